use std::io;

use httparse;


quick_error! {
    /// Errors surfaced to handler streams and send-completion callbacks.
    ///
    /// The type is `Clone` so a single failure can be fanned out to every
    /// pending callback and the handler's `on_close`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        Io(kind: io::ErrorKind) {
            description("I/O error")
            display("I/O error: {:?}", kind)
            from(err: io::Error) -> (err.kind())
        }
        /// Malformed request line, headers or chunk framing.
        BadRequest {
            description("malformed request")
        }
        /// Peer closed the connection in the middle of a request.
        Eof {
            description("unexpected end of stream")
        }
        /// The connection is gone; no more data can be sent.
        Aborted {
            description("connection aborted")
        }
        /// A handler panicked while safe mode was enabled.
        HandlerPanic {
            description("handler panicked")
        }
    }
}

impl From<httparse::InvalidChunkSize> for Error {
    fn from(_: httparse::InvalidChunkSize) -> Error {
        Error::BadRequest
    }
}
