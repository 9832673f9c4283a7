use std::fmt;

/// Enum representing HTTP version.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Version {
    /// Version 1.0 of the HTTP protocol
    Http10,
    /// Version 1.1 of the HTTP protocol
    Http11,
}

impl Version {
    /// Classify a parsed `major.minor` pair.
    ///
    /// Anything at `1.1` or above is treated as HTTP/1.1 for the purposes
    /// of keep-alive defaults and response serialization.
    pub fn from_pair(major: u8, minor: u8) -> Version {
        if major > 1 || (major == 1 && minor >= 1) {
            Version::Http11
        } else {
            Version::Http10
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}
