//! Ordered, case-insensitive header multimap shared by requests and
//! responses, plus a few scanners for comma-separated header values.

use std::slice;
use std::time::SystemTime;

use httpdate::{parse_http_date, fmt_http_date};

use enums::Version;


/// An ordered multimap of HTTP headers.
///
/// Names are compared case-insensitively, but the original spelling and
/// the insertion order are preserved and visible when serializing.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

/// Iterator over `(name, value)` pairs in insertion order.
pub struct HeaderIter<'a> {
    iter: slice::Iter<'a, (String, String)>,
}

impl<'a> Iterator for HeaderIter<'a> {
    type Item = (&'a str, &'a str);
    fn next(&mut self) -> Option<(&'a str, &'a str)> {
        self.iter.next().map(|&(ref n, ref v)| (&n[..], &v[..]))
    }
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> HeaderIter {
        HeaderIter { iter: self.entries.iter() }
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Value of the first header with this name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }

    /// All values with this name, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> Vec<&'a str> {
        self.entries.iter()
            .filter(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
            .collect()
    }

    /// Append a header, keeping any existing entries with the same name.
    pub fn add<N, V>(&mut self, name: N, value: V)
        where N: Into<String>, V: Into<String>,
    {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace all headers with this name by a single entry.
    ///
    /// The new value takes the position of the first occurrence; later
    /// duplicates are removed. Absent the name, this appends.
    pub fn set<N, V>(&mut self, name: N, value: V)
        where N: Into<String>, V: Into<String>,
    {
        let name = name.into();
        let mut value = Some(value.into());
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].0.eq_ignore_ascii_case(&name) {
                match value.take() {
                    Some(v) => self.entries[i].1 = v,
                    None => {
                        self.entries.remove(i);
                        continue;
                    }
                }
            }
            i += 1;
        }
        if let Some(v) = value {
            self.entries.push((name, v));
        }
    }

    /// Remove all headers with this name, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|&(ref n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    // Typed accessors

    pub fn content_length(&self) -> Option<u64> {
        self.get("Content-Length").and_then(|v| v.trim().parse().ok())
    }

    pub fn set_content_length(&mut self, len: u64) {
        self.set("Content-Length", len.to_string());
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("Content-Type")
    }

    pub fn set_content_type(&mut self, value: &str) {
        self.set("Content-Type", value);
    }

    /// Explicit keep-alive marker from the `Connection` header.
    ///
    /// `None` means the header expresses neither `close` nor `keep-alive`
    /// and the HTTP version default applies.
    pub fn is_keep_alive(&self) -> Option<bool> {
        let value = match self.get("Connection") {
            Some(v) => v,
            None => return None,
        };
        if is_close(value) {
            Some(false)
        } else if is_keep_alive(value) {
            Some(true)
        } else {
            None
        }
    }

    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        if keep_alive {
            self.set("Connection", "Keep-Alive");
        } else {
            self.set("Connection", "Close");
        }
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.get("Last-Modified").and_then(|v| parse_http_date(v).ok())
    }

    pub fn set_last_modified(&mut self, time: SystemTime) {
        self.set("Last-Modified", fmt_http_date(time));
    }

    pub fn if_modified_since(&self) -> Option<SystemTime> {
        self.get("If-Modified-Since").and_then(|v| parse_http_date(v).ok())
    }
}

/// Whether the connection should be kept alive, folding the version
/// default together with an explicit `Connection` header.
pub fn keep_alive(version: Version, headers: &Headers) -> bool {
    match headers.is_keep_alive() {
        Some(explicit) => explicit,
        None => version == Version::Http11,
    }
}

// Header values are comma-separated token lists; all three scanners below
// compare case-insensitively and ignore surrounding whitespace.

pub fn is_close(value: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case("close"))
}

pub fn is_keep_alive(value: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case("keep-alive"))
}

/// A `Transfer-Encoding` denotes a chunked body when `chunked` is the
/// last encoding applied.
pub fn is_chunked(value: &str) -> bool {
    value.split(',').last()
        .map(|t| t.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}
