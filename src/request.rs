//! The parsed request value handed to handler streams.

use url;
use url::percent_encoding::percent_decode;

use enums::Version;
use headers::{self, Headers};


/// A request target decomposed into its parts.
///
/// The original target string is always kept; decomposition may fail for
/// garbage targets, in which case `is_valid()` is false and the connection
/// answers 400 without dispatching.
#[derive(Debug, Clone, Default)]
pub struct Url {
    original: String,
    parsed: Option<url::Url>,
    path: String,
    path_components: Vec<String>,
    query_items: Vec<(String, Option<String>)>,
}

/// An HTTP request: request line, headers and connection-derived metadata.
///
/// Built incrementally by the parser through the public setters, then
/// frozen and moved into the handler's `on_headers`.
#[derive(Debug, Clone, Default)]
pub struct Request {
    method: String,
    url: Url,
    http_major: u8,
    http_minor: u8,
    headers: Headers,
    request_id: u64,
    trace_bit: bool,
    local_endpoint: String,
    remote_endpoint: String,
}

fn decode(piece: &str) -> String {
    percent_decode(piece.as_bytes()).decode_utf8_lossy().into_owned()
}

fn decode_query_piece(piece: &str) -> String {
    decode(&piece.replace('+', " "))
}

impl Url {
    /// Decompose a request target.
    ///
    /// Origin-form targets (`/path?query`) borrow the authority from the
    /// `Host` header; absolute-form targets carry their own.
    pub fn parse(target: &str, host: Option<&str>) -> Url {
        let parsed = if target.starts_with('/') {
            let base = format!("http://{}", host.unwrap_or("localhost"));
            url::Url::parse(&base).ok()
                .and_then(|base| base.join(target).ok())
        } else if target.contains("://") {
            url::Url::parse(target).ok()
        } else {
            None
        };
        let mut url = Url {
            original: target.to_string(),
            parsed: parsed,
            path: String::new(),
            path_components: Vec::new(),
            query_items: Vec::new(),
        };
        if let Some(ref parsed) = url.parsed {
            url.path = decode(parsed.path());
            url.path_components = parsed.path()
                .split('/')
                .filter(|c| !c.is_empty())
                .map(decode)
                .collect();
            if let Some(query) = parsed.query() {
                url.query_items = query.split('&')
                    .filter(|item| !item.is_empty())
                    .map(|item| match item.find('=') {
                        Some(eq) => (decode_query_piece(&item[..eq]),
                                     Some(decode_query_piece(&item[eq + 1..]))),
                        None => (decode_query_piece(item), None),
                    })
                    .collect();
            }
        }
        url
    }

    pub fn is_valid(&self) -> bool {
        self.parsed.is_some()
    }

    /// The target exactly as it appeared on the request line.
    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn scheme(&self) -> Option<&str> {
        self.parsed.as_ref().map(|u| u.scheme())
    }

    pub fn host(&self) -> Option<&str> {
        self.parsed.as_ref().and_then(|u| u.host_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.parsed.as_ref().and_then(|u| u.port())
    }

    /// Percent-decoded path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Decoded, non-empty path segments.
    pub fn path_components(&self) -> &[String] {
        &self.path_components
    }

    pub fn fragment(&self) -> Option<&str> {
        self.parsed.as_ref().and_then(|u| u.fragment())
    }

    /// Ordered query items; duplicate keys are preserved, a key without
    /// `=` has no value.
    pub fn query(&self) -> &[(String, Option<String>)] {
        &self.query_items
    }

    pub fn has_query_item(&self, key: &str) -> bool {
        self.query_items.iter().any(|&(ref k, _)| k == key)
    }

    /// Value of the first query item with this key.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query_items.iter()
            .find(|&&(ref k, _)| k == key)
            .and_then(|&(_, ref v)| v.as_ref().map(|v| &v[..]))
    }
}

impl Request {
    pub fn new() -> Request {
        Request::default()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn version(&self) -> Version {
        Version::from_pair(self.http_major, self.http_minor)
    }

    pub fn http_version(&self) -> (u8, u8) {
        (self.http_major, self.http_minor)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Whether the peer may reuse the connection after this exchange.
    pub fn is_keep_alive(&self) -> bool {
        headers::keep_alive(self.version(), &self.headers)
    }

    /// Whether the body uses chunked transfer encoding.
    pub fn is_chunked(&self) -> bool {
        self.headers.get("Transfer-Encoding")
            .map(|v| headers::is_chunked(v))
            .unwrap_or(false)
    }

    /// Request id assigned by the connection (configured header or random).
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn trace_bit(&self) -> bool {
        self.trace_bit
    }

    pub fn local_endpoint(&self) -> &str {
        &self.local_endpoint
    }

    pub fn remote_endpoint(&self) -> &str {
        &self.remote_endpoint
    }

    // Mutators used while the request is being assembled.

    pub fn set_method(&mut self, method: &str) {
        self.method = method.to_string();
    }

    /// Record the raw target; decomposition happens in `parse_url` once
    /// the `Host` header is known.
    pub fn set_target(&mut self, target: &str) {
        self.url = Url {
            original: target.to_string(),
            ..Url::default()
        };
    }

    pub fn parse_url(&mut self) {
        let target = self.url.original.clone();
        self.url = Url::parse(&target, self.headers.get("Host"));
    }

    pub fn set_http_version(&mut self, major: u8, minor: u8) {
        self.http_major = major;
        self.http_minor = minor;
    }

    pub fn set_request_id(&mut self, id: u64) {
        self.request_id = id;
    }

    pub fn set_trace_bit(&mut self, bit: bool) {
        self.trace_bit = bit;
    }

    pub fn set_local_endpoint(&mut self, endpoint: &str) {
        self.local_endpoint = endpoint.to_string();
    }

    pub fn set_remote_endpoint(&mut self, endpoint: &str) {
        self.remote_endpoint = endpoint.to_string();
    }
}
