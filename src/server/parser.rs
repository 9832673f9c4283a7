//! Incremental parser for the request line and headers.
//!
//! The parser consumes bytes as they arrive, accumulating at most one
//! unfinished line between calls, and is re-armed with `reset()` for the
//! next request on a kept-alive connection.

use request::Request;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// Request line and headers fully parsed; trailing input was left
    /// unconsumed for the body machinery.
    Complete,
    /// All input consumed, more is needed.
    Incomplete,
    Malformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    HeaderLine,
}

#[derive(Debug)]
pub struct Parser {
    state: State,
    line: Vec<u8>,
    header: Option<(String, String)>,
}

fn is_token_char(c: u8) -> bool {
    if c <= 0x20 || c >= 0x7f {
        return false;
    }
    match c {
        b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' |
        b'"' | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}' => false,
        _ => true,
    }
}

fn has_ctl(bytes: &[u8]) -> bool {
    bytes.iter().any(|&c| c < 0x20 || c == 0x7f)
}

fn trim(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = bytes.len();
    while start < end && (bytes[start] == b' ' || bytes[start] == b'\t') {
        start += 1;
    }
    while end > start && (bytes[end - 1] == b' ' || bytes[end - 1] == b'\t') {
        end -= 1;
    }
    &bytes[start..end]
}

fn parse_version(bytes: &[u8]) -> Option<(u8, u8)> {
    if !bytes.starts_with(b"HTTP/") {
        return None;
    }
    let rest = &bytes[5..];
    let dot = rest.iter().position(|&c| c == b'.')?;
    let (major, minor) = (&rest[..dot], &rest[dot + 1..]);
    if major.is_empty() || minor.is_empty() {
        return None;
    }
    if !major.iter().all(|c| c.is_ascii_digit())
        || !minor.iter().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let major: u8 = ::std::str::from_utf8(major).ok()?.parse().ok()?;
    let minor: u8 = ::std::str::from_utf8(minor).ok()?.parse().ok()?;
    Some((major, minor))
}

impl Parser {
    pub fn new() -> Parser {
        Parser {
            state: State::RequestLine,
            line: Vec::with_capacity(64),
            header: None,
        }
    }

    /// Prime the parser for the next request on the same connection.
    pub fn reset(&mut self) {
        self.state = State::RequestLine;
        self.line.clear();
        self.header = None;
    }

    /// Feed a slice of input.
    ///
    /// Returns the parse status and the number of bytes consumed; on
    /// `Complete` the body bytes that may follow are left alone.
    pub fn parse(&mut self, request: &mut Request, data: &[u8])
        -> (ParseResult, usize)
    {
        let mut consumed = 0;
        while consumed < data.len() {
            let newline = data[consumed..].iter().position(|&c| c == b'\n');
            let newline = match newline {
                Some(pos) => pos,
                None => {
                    self.line.extend(&data[consumed..]);
                    return (ParseResult::Incomplete, data.len());
                }
            };
            self.line.extend(&data[consumed..consumed + newline]);
            consumed += newline + 1;
            if self.line.last() == Some(&b'\r') {
                let len = self.line.len();
                self.line.truncate(len - 1);
            }

            let line = ::std::mem::replace(&mut self.line,
                Vec::with_capacity(64));
            match self.parse_line(request, &line) {
                Some(ParseResult::Complete) => {
                    return (ParseResult::Complete, consumed);
                }
                Some(ParseResult::Malformed) => {
                    return (ParseResult::Malformed, consumed);
                }
                _ => {}
            }
        }
        (ParseResult::Incomplete, consumed)
    }

    fn parse_line(&mut self, request: &mut Request, line: &[u8])
        -> Option<ParseResult>
    {
        match self.state {
            State::RequestLine => {
                if line.is_empty() {
                    // stray CRLF between requests on a kept-alive socket
                    return None;
                }
                let sp1 = match line.iter().position(|&c| c == b' ') {
                    Some(pos) => pos,
                    None => return Some(ParseResult::Malformed),
                };
                let method = &line[..sp1];
                if method.is_empty()
                    || !method.iter().all(|&c| is_token_char(c))
                {
                    return Some(ParseResult::Malformed);
                }
                let rest = &line[sp1 + 1..];
                let sp2 = match rest.iter().position(|&c| c == b' ') {
                    Some(pos) => pos,
                    None => return Some(ParseResult::Malformed),
                };
                let target = &rest[..sp2];
                if target.is_empty() || has_ctl(target) {
                    return Some(ParseResult::Malformed);
                }
                let version = match parse_version(&rest[sp2 + 1..]) {
                    Some(pair) => pair,
                    None => return Some(ParseResult::Malformed),
                };

                request.set_method(
                    ::std::str::from_utf8(method).expect("token is ascii"));
                request.set_target(
                    &String::from_utf8_lossy(target));
                request.set_http_version(version.0, version.1);
                self.state = State::HeaderLine;
                None
            }
            State::HeaderLine => {
                if !line.is_empty()
                    && (line[0] == b' ' || line[0] == b'\t')
                    && self.header.is_some()
                {
                    // obs-fold continuation joins with a single space
                    let folded = trim(line);
                    if has_ctl(folded) {
                        return Some(ParseResult::Malformed);
                    }
                    let header = self.header.as_mut().unwrap();
                    header.1.push(' ');
                    header.1.push_str(&String::from_utf8_lossy(folded));
                    return None;
                }

                if let Some((name, value)) = self.header.take() {
                    request.headers_mut().add(name, value);
                }

                if line.is_empty() {
                    return Some(ParseResult::Complete);
                }

                let colon = match line.iter().position(|&c| c == b':') {
                    Some(pos) => pos,
                    None => return Some(ParseResult::Malformed),
                };
                let name = trim(&line[..colon]);
                let value = trim(&line[colon + 1..]);
                if name.is_empty() || !name.iter().all(|&c| is_token_char(c)) {
                    return Some(ParseResult::Malformed);
                }
                if value.iter().any(|&c| (c < 0x20 && c != b'\t') || c == 0x7f)
                {
                    return Some(ParseResult::Malformed);
                }
                self.header = Some((
                    String::from_utf8_lossy(name).into_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                ));
                None
            }
        }
    }
}
