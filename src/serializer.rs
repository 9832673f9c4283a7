//! Serialization of a response head into the output buffer.

use std::io::Write;

use netbuf::Buf;

use response::Response;


/// Write the status line, headers and the terminating empty line.
///
/// Everything lands in the buffer immediately; it reaches the network on
/// the next flush of the connection. Header names and values are expected
/// to be free of CR/LF; they are produced by handler code, not parsed off
/// the wire.
pub fn write_head(buf: &mut Buf, response: &Response) {
    write!(buf, "{} {} {}\r\n",
        response.version(), response.code(), response.reason()).unwrap();
    for (name, value) in response.headers().iter() {
        debug_assert!(!name.contains('\r') && !name.contains('\n'));
        debug_assert!(!value.contains('\r') && !value.contains('\n'));
        write!(buf, "{}: {}\r\n", name, value).unwrap();
    }
    buf.extend(b"\r\n");
}
