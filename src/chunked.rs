//! Incremental decoder for chunked transfer encoding.
//!
//! Framing bytes (chunk size lines, boundary CRLFs, the final empty
//! chunk) are removed from the input buffer in place, so the front of the
//! buffer always holds clean body bytes ready to be offered to a handler.
//! Decoding pauses at each chunk boundary: body bytes are surfaced one
//! chunk at a time.

use httparse::{InvalidChunkSize, parse_chunk_size};
use netbuf::Buf;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Expecting the CRLF that terminates the previous chunk's data.
    Boundary,
    /// Expecting a chunk size line (hex digits, optional extensions).
    Size,
    /// Inside chunk data, this many bytes still to come.
    Data(u64),
    /// Zero-size chunk seen, expecting the closing CRLF.
    Trailer,
    Done,
}

#[derive(Debug, Clone)]
pub struct State {
    buffered: usize,
    phase: Phase,
}

impl State {
    pub fn new() -> State {
        State {
            buffered: 0,
            phase: Phase::Size,
        }
    }

    /// Decode as much framing as the buffer allows.
    ///
    /// Returns with `buffered()` grown by any newly uncovered body bytes.
    /// Stops cleanly when more input is needed.
    pub fn parse(&mut self, buf: &mut Buf) -> Result<(), InvalidChunkSize> {
        loop {
            match self.phase {
                Phase::Done => return Ok(()),
                Phase::Boundary => {
                    if self.buffered > 0 {
                        // the current chunk must be delivered (and
                        // consumed) before decoding continues
                        return Ok(());
                    }
                    if buf.len() < self.buffered + 1 {
                        return Ok(());
                    }
                    match buf[self.buffered] {
                        b'\r' => {
                            if buf.len() < self.buffered + 2 {
                                return Ok(());
                            }
                            if buf[self.buffered + 1] != b'\n' {
                                return Err(InvalidChunkSize);
                            }
                            buf.remove_range(
                                self.buffered..self.buffered + 2);
                        }
                        b'\n' => {
                            buf.remove_range(
                                self.buffered..self.buffered + 1);
                        }
                        // boundary already consumed upstream
                        _ => {}
                    }
                    self.phase = Phase::Size;
                }
                Phase::Size => {
                    match parse_chunk_size(&buf[self.buffered..])? {
                        ::httparse::Status::Complete((bytes, 0)) => {
                            buf.remove_range(
                                self.buffered..self.buffered + bytes);
                            self.phase = Phase::Trailer;
                        }
                        ::httparse::Status::Complete((bytes, size)) => {
                            buf.remove_range(
                                self.buffered..self.buffered + bytes);
                            self.phase = Phase::Data(size);
                        }
                        ::httparse::Status::Partial => return Ok(()),
                    }
                }
                Phase::Data(pending) => {
                    let available = (buf.len() - self.buffered) as u64;
                    if available >= pending {
                        self.buffered += pending as usize;
                        self.phase = Phase::Boundary;
                    } else {
                        self.buffered = buf.len();
                        self.phase = Phase::Data(pending - available);
                        return Ok(());
                    }
                }
                Phase::Trailer => {
                    if buf.len() < self.buffered + 2 {
                        return Ok(());
                    }
                    if &buf[self.buffered..self.buffered + 2] != b"\r\n" {
                        return Err(InvalidChunkSize);
                    }
                    buf.remove_range(self.buffered..self.buffered + 2);
                    self.phase = Phase::Done;
                }
            }
        }
    }

    /// Clean body bytes at the front of the buffer.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Account for body bytes the handler consumed off the buffer front.
    pub fn consume(&mut self, n: usize) {
        assert!(self.buffered >= n);
        self.buffered -= n;
    }
}

#[cfg(test)]
mod test {
    use netbuf::Buf;
    use super::State;

    fn buf(data: &[u8]) -> Buf {
        let mut buf = Buf::new();
        buf.extend(data);
        buf
    }

    #[test]
    fn two_chunks() {
        let mut state = State::new();
        let mut b = buf(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 5);
        assert!(!state.is_done());
        assert_eq!(&b[..5], b"hello");

        b.consume(5);
        state.consume(5);
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 6);
        assert_eq!(&b[..6], b" world");

        b.consume(6);
        state.consume(6);
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 0);
        assert!(state.is_done());
    }

    #[test]
    fn incremental_feed() {
        let mut state = State::new();
        let mut b = buf(b"5\r\nhel");
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 3);
        assert!(!state.is_done());

        b.extend(b"lo\r");
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 5);

        b.extend(b"\n0\r\n\r\n");
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 5);
        assert!(!state.is_done());

        b.consume(5);
        state.consume(5);
        state.parse(&mut b).unwrap();
        assert!(state.is_done());
    }

    #[test]
    fn consume_interleaves_with_parse() {
        let mut state = State::new();
        let mut b = buf(b"3\r\nabc");
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 3);
        b.consume(3);
        state.consume(3);

        b.extend(b"\r\n2\r\nde\r\n0\r\n\r\n");
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 2);
        assert_eq!(&b[..2], b"de");
        assert!(!state.is_done());

        b.consume(2);
        state.consume(2);
        state.parse(&mut b).unwrap();
        assert!(state.is_done());
    }

    #[test]
    fn extensions_are_ignored() {
        let mut state = State::new();
        let mut b = buf(b"5;name=value\r\nhello\r\n0\r\n\r\n");
        state.parse(&mut b).unwrap();
        assert_eq!(state.buffered(), 5);
        assert_eq!(&b[..5], b"hello");

        b.consume(5);
        state.consume(5);
        state.parse(&mut b).unwrap();
        assert!(state.is_done());
    }

    #[test]
    fn garbage_size_line() {
        let mut state = State::new();
        let mut b = buf(b"xyz\r\n");
        assert!(state.parse(&mut b).is_err());
    }

    #[test]
    fn missing_final_crlf() {
        let mut state = State::new();
        let mut b = buf(b"0\r\nxx");
        assert!(state.parse(&mut b).is_err());
    }
}
