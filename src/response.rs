//! The response head built by handlers and serialized by the connection.

use enums::{Status, Version, default_reason};
use headers::Headers;


/// Status line and headers of an HTTP response.
///
/// The body is not part of this value; body bytes are passed to the reply
/// stream alongside it and written after the head.
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    code: u16,
    reason: Option<String>,
    headers: Headers,
}

impl Response {
    pub fn new(code: u16) -> Response {
        Response {
            version: Version::Http11,
            code: code,
            reason: None,
            headers: Headers::new(),
        }
    }

    pub fn from_status(status: Status) -> Response {
        Response::new(status.code())
    }

    /// A minimal error page: empty body, connection not reusable.
    pub fn stock(status: Status) -> Response {
        let mut response = Response::from_status(status);
        response.headers.set_content_length(0);
        response.headers.set_keep_alive(false);
        response
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn set_code(&mut self, code: u16) {
        self.code = code;
    }

    /// The reason phrase, falling back to the default table.
    pub fn reason(&self) -> &str {
        match self.reason {
            Some(ref reason) => reason,
            None => default_reason(self.code),
        }
    }

    pub fn set_reason<S: Into<String>>(&mut self, reason: S) {
        self.reason = Some(reason.into());
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
}
