extern crate tk_httpd;

use tk_httpd::Request;
use tk_httpd::server::{Parser, ParseResult};


fn parse(input: &[u8]) -> (ParseResult, Request, usize) {
    let mut parser = Parser::new();
    let mut request = Request::new();
    let (result, consumed) = parser.parse(&mut request, input);
    (result, request, consumed)
}

fn assert_malformed(input: &[u8]) {
    let (result, _, _) = parse(input);
    assert_eq!(result, ParseResult::Malformed,
        "expected malformed: {:?}", String::from_utf8_lossy(input));
}

#[test]
fn simple_get() {
    let input = b"GET /ping HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let (result, request, consumed) = parse(input);
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(consumed, input.len());
    assert_eq!(request.method(), "GET");
    assert_eq!(request.http_version(), (1, 1));
    assert_eq!(request.headers().get("host"), Some("example.com"));
}

#[test]
fn body_is_left_unconsumed() {
    let input = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
    let (result, request, consumed) = parse(input);
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(consumed, input.len() - 5);
    assert_eq!(request.headers().content_length(), Some(5));
}

#[test]
fn incremental_feed() {
    let mut parser = Parser::new();
    let mut request = Request::new();

    let (result, consumed) =
        parser.parse(&mut request, b"GET /a HT");
    assert_eq!(result, ParseResult::Incomplete);
    assert_eq!(consumed, 9);

    let (result, consumed) =
        parser.parse(&mut request, b"TP/1.0\r\nX-One: 1\r");
    assert_eq!(result, ParseResult::Incomplete);
    assert_eq!(consumed, 17);

    let (result, consumed) = parser.parse(&mut request, b"\n\r\n");
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(consumed, 3);
    assert_eq!(request.method(), "GET");
    assert_eq!(request.http_version(), (1, 0));
    assert_eq!(request.headers().get("x-one"), Some("1"));
}

#[test]
fn stray_newlines_between_requests() {
    let input = b"\r\n\r\nGET / HTTP/1.1\r\n\r\n";
    let (result, request, consumed) = parse(input);
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(consumed, input.len());
    assert_eq!(request.method(), "GET");

    // bare LF is tolerated too
    let (result, _, _) = parse(b"\n\nGET / HTTP/1.1\r\n\r\n");
    assert_eq!(result, ParseResult::Complete);
}

#[test]
fn obs_fold_joins_with_a_space() {
    let input = b"GET / HTTP/1.1\r\nX-Long: first\r\n \t second\r\n\r\n";
    let (result, request, _) = parse(input);
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(request.headers().get("X-Long"), Some("first second"));
}

#[test]
fn values_are_trimmed() {
    let input = b"GET / HTTP/1.1\r\nX-Pad:   value \t \r\n\r\n";
    let (result, request, _) = parse(input);
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(request.headers().get("X-Pad"), Some("value"));
}

#[test]
fn duplicate_headers_are_kept() {
    let input = b"GET / HTTP/1.1\r\nX-A: 1\r\nX-A: 2\r\n\r\n";
    let (result, request, _) = parse(input);
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(request.headers().get_all("X-A"), vec!["1", "2"]);
}

#[test]
fn malformed_requests() {
    // no spaces on the request line
    assert_malformed(b"GET\r\n\r\n");
    // non-token bytes in the method
    assert_malformed(b"G\x80T / HTTP/1.1\r\n\r\n");
    // control character in the target
    assert_malformed(b"GET /a\x01b HTTP/1.1\r\n\r\n");
    // not HTTP
    assert_malformed(b"GET / TTMP/1.1\r\n\r\n");
    // version without a dot
    assert_malformed(b"GET / HTTP/11\r\n\r\n");
    // version with non-digits
    assert_malformed(b"GET / HTTP/1.x\r\n\r\n");
    // header without a colon
    assert_malformed(b"GET / HTTP/1.1\r\nbroken\r\n\r\n");
    // control character in a header value
    assert_malformed(b"GET / HTTP/1.1\r\nX: a\x01b\r\n\r\n");
}

#[test]
fn tab_is_fine_in_header_values() {
    let input = b"GET / HTTP/1.1\r\nX: a\tb\r\n\r\n";
    let (result, request, _) = parse(input);
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(request.headers().get("X"), Some("a\tb"));
}

#[test]
fn reset_primes_for_the_next_request() {
    let mut parser = Parser::new();
    let mut request = Request::new();
    let (result, _) =
        parser.parse(&mut request, b"GET /a HTTP/1.1\r\n\r\n");
    assert_eq!(result, ParseResult::Complete);

    parser.reset();
    let mut second = Request::new();
    let (result, _) =
        parser.parse(&mut second, b"PUT /b HTTP/1.0\r\n\r\n");
    assert_eq!(result, ParseResult::Complete);
    assert_eq!(second.method(), "PUT");
    assert_eq!(second.http_version(), (1, 0));
}

#[test]
fn keep_alive_defaults() {
    let (_, request, _) = parse(b"GET / HTTP/1.1\r\n\r\n");
    assert!(request.is_keep_alive());
    let (_, request, _) = parse(b"GET / HTTP/1.0\r\n\r\n");
    assert!(!request.is_keep_alive());
    let (_, request, _) =
        parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert!(!request.is_keep_alive());
    let (_, request, _) =
        parse(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n");
    assert!(request.is_keep_alive());
}

#[test]
fn chunked_detection() {
    let (_, request, _) =
        parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
    assert!(request.is_chunked());
    let (_, request, _) =
        parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n");
    assert!(request.is_chunked());
    let (_, request, _) =
        parse(b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\n");
    assert!(!request.is_chunked());
}
