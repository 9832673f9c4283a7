extern crate futures;
extern crate tk_httpd;
extern crate tokio_io;

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Async, Poll};
use futures::executor::{self, Notify, NotifyHandle, Spawn};
use tokio_io::{AsyncRead, AsyncWrite};

use tk_httpd::{Request, Response};
use tk_httpd::server::{Config, Connection, Error, Match, Reply};
use tk_httpd::server::{RequestStream, Router, Stats};
use tk_httpd::server::{SimpleRequest, SimpleRequestStream};


// ---- a scriptable bidirectional socket ----

struct MockInner {
    input: Vec<u8>,
    eof: bool,
    output: Vec<u8>,
    fail_writes: bool,
    write_shutdown: bool,
}

#[derive(Clone)]
struct Mock {
    inner: Arc<Mutex<MockInner>>,
}

impl Mock {
    fn new() -> Mock {
        Mock {
            inner: Arc::new(Mutex::new(MockInner {
                input: Vec::new(),
                eof: false,
                output: Vec::new(),
                fail_writes: false,
                write_shutdown: false,
            })),
        }
    }

    fn add_input(&self, data: &[u8]) {
        self.inner.lock().unwrap().input.extend_from_slice(data);
    }

    fn set_eof(&self) {
        self.inner.lock().unwrap().eof = true;
    }

    fn fail_writes(&self) {
        self.inner.lock().unwrap().fail_writes = true;
    }

    fn output(&self) -> Vec<u8> {
        self.inner.lock().unwrap().output.clone()
    }

    fn output_str(&self) -> String {
        String::from_utf8_lossy(&self.output()).to_string()
    }

    fn write_shutdown(&self) -> bool {
        self.inner.lock().unwrap().write_shutdown
    }
}

impl Read for Mock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.input.is_empty() {
            if inner.eof {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = ::std::cmp::min(buf.len(), inner.input.len());
        buf[..n].copy_from_slice(&inner.input[..n]);
        inner.input.drain(..n);
        Ok(n)
    }
}

impl Write for Mock {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        inner.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for Mock {}

impl AsyncWrite for Mock {
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        self.inner.lock().unwrap().write_shutdown = true;
        Ok(Async::Ready(()))
    }
}

// ---- polling without a reactor ----

struct NoopNotify;

impl Notify for NoopNotify {
    fn notify(&self, _id: usize) {}
}

fn poll_conn(task: &mut Spawn<Connection<Mock>>) -> Async<()> {
    let handle = NotifyHandle::from(Arc::new(NoopNotify));
    task.poll_future_notify(&handle, 0).expect("connection never errors")
}

fn connection_with(router: Router, sock: &Mock, cfg: Arc<Config>)
    -> Spawn<Connection<Mock>>
{
    let stats = Stats::new();
    executor::spawn(Connection::new(sock.clone(), &cfg,
        &Arc::new(router), &stats,
        "127.0.0.1:8080".to_string(), "127.0.0.1:41000".to_string()))
}

fn connection(router: Router, sock: &Mock) -> Spawn<Connection<Mock>> {
    connection_with(router, sock, Config::new().done())
}

// ---- handlers used by the scenarios ----

struct Ping;

impl RequestStream for Ping {
    fn on_headers(&mut self, _req: Request, reply: Reply) {
        let mut response = Response::new(200);
        response.headers_mut().set_content_length(0);
        reply.send_reply(response, Vec::new());
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        data.len()
    }

    fn on_close(&mut self, _result: Result<(), Error>) {}
}

struct Echo;

impl SimpleRequest for Echo {
    fn on_request(&mut self, req: &Request, body: &[u8], reply: Reply) {
        let code = req.url().query_value("code")
            .and_then(|v| v.parse().ok())
            .unwrap_or(200);
        let mut response = Response::new(code);
        response.headers_mut().set_content_length(body.len() as u64);
        reply.send_reply(response, body.to_vec());
    }
}

/// Records every callback; replies 200 on successful close.
struct Recorder {
    log: Arc<Mutex<Vec<String>>>,
    reply: Option<Reply>,
}

impl RequestStream for Recorder {
    fn on_headers(&mut self, req: Request, reply: Reply) {
        self.log.lock().unwrap()
            .push(format!("headers {} {}", req.method(),
                req.url().path()));
        self.reply = Some(reply);
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        self.log.lock().unwrap()
            .push(format!("data {:?}", String::from_utf8_lossy(data)));
        data.len()
    }

    fn on_close(&mut self, result: Result<(), Error>) {
        self.log.lock().unwrap()
            .push(format!("close {:?}", result));
        if result.is_ok() {
            let mut response = Response::new(200);
            response.headers_mut().set_content_length(0);
            self.reply.take().unwrap().send_reply(response, Vec::new());
        }
    }
}

// ---- scenarios ----

#[test]
fn ping() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/ping").methods(&["GET"]),
        || Box::new(Ping));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");

    // the connection is kept open and serves the next request
    sock.add_input(b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n\
         HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
}

#[test]
fn pipelined_requests() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/ping"), || Box::new(Ping));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n\
                     GET /ping HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n\
         HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
}

#[test]
fn echo() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/echo").methods(&["POST"]),
        || Box::new(SimpleRequestStream::new(Echo)));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    let request = b"POST /echo?code=201 HTTP/1.1\r\nHost: x\r\n\
                    Content-Length: 5\r\n\r\nhello";
    sock.add_input(request);
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 201 Created\r\nContent-Length: 5\r\n\r\nhello");

    // a second identical request on the same socket succeeds
    sock.add_input(request);
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 201 Created\r\nContent-Length: 5\r\n\r\nhello\
         HTTP/1.1 201 Created\r\nContent-Length: 5\r\n\r\nhello");
}

#[test]
fn chunked_upload() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();
    {
        let log = log.clone();
        router.add(Match::new().exact_path("/upload"), move || {
            Box::new(Recorder {
                log: log.clone(),
                reply: None,
            }) as Box<RequestStream>
        });
    }
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"POST /upload HTTP/1.1\r\nHost: x\r\n\
                     Transfer-Encoding: chunked\r\n\r\n\
                     5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, vec![
        "headers POST /upload".to_string(),
        "data \"hello\"".to_string(),
        "data \" world\"".to_string(),
        "close Ok(())".to_string(),
    ]);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
}

#[test]
fn route_miss() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/ping"), || Box::new(Ping));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));
    assert_eq!(sock.output_str(),
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\
         Connection: Close\r\n\r\n");
}

#[test]
fn malformed_request() {
    let router = Router::new();
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"NONSENSE\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));
    assert_eq!(sock.output_str(),
        "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\
         Connection: Close\r\n\r\n");
}

/// Consumes nothing until told otherwise; the test drives `want_more`.
struct Reluctant {
    consume: Arc<AtomicBool>,
    offers: Arc<Mutex<Vec<String>>>,
    reply: Arc<Mutex<Option<Reply>>>,
}

impl RequestStream for Reluctant {
    fn on_headers(&mut self, _req: Request, reply: Reply) {
        *self.reply.lock().unwrap() = Some(reply);
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        self.offers.lock().unwrap()
            .push(String::from_utf8_lossy(data).to_string());
        if self.consume.load(Ordering::SeqCst) {
            data.len()
        } else {
            0
        }
    }

    fn on_close(&mut self, result: Result<(), Error>) {
        if result.is_ok() {
            let mut response = Response::new(200);
            response.headers_mut().set_content_length(0);
            let reply = self.reply.lock().unwrap();
            reply.as_ref().unwrap().send_reply(response, Vec::new());
        }
    }
}

#[test]
fn back_pressure() {
    let consume = Arc::new(AtomicBool::new(false));
    let offers = Arc::new(Mutex::new(Vec::new()));
    let reply = Arc::new(Mutex::new(None));
    let mut router = Router::new();
    {
        let consume = consume.clone();
        let offers = offers.clone();
        let reply = reply.clone();
        router.add(Match::new().exact_path("/slow"), move || {
            Box::new(Reluctant {
                consume: consume.clone(),
                offers: offers.clone(),
                reply: reply.clone(),
            }) as Box<RequestStream>
        });
    }
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"POST /slow HTTP/1.1\r\nHost: x\r\n\
                     Content-Length: 5\r\n\r\nhello");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(*offers.lock().unwrap(), vec!["hello".to_string()]);

    // while paused, polling again delivers nothing new
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(offers.lock().unwrap().len(), 1);

    // want_more re-offers the same bytes from the unconsumed offset
    consume.store(true, Ordering::SeqCst);
    reply.lock().unwrap().as_ref().unwrap().want_more();
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(*offers.lock().unwrap(),
        vec!["hello".to_string(), "hello".to_string()]);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
}

/// Replies during `on_headers`, long before the body is complete.
struct EagerReply;

impl RequestStream for EagerReply {
    fn on_headers(&mut self, _req: Request, reply: Reply) {
        let mut response = Response::new(200);
        response.headers_mut().set_content_length(0);
        reply.send_reply(response, Vec::new());
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        data.len()
    }

    fn on_close(&mut self, _result: Result<(), Error>) {}
}

#[test]
fn graceful_close() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/upload"),
        || Box::new(EagerReply));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    // HTTP/1.0 request whose 10-byte body is only partly there
    sock.add_input(b"POST /upload HTTP/1.0\r\nHost: x\r\n\
                     Content-Length: 10\r\n\r\n1234");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);

    // the response went out and the send half was shut down, but the
    // connection stays up to drain the rest of the request body
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\
         Connection: Close\r\n\r\n");
    assert!(sock.write_shutdown());

    // once the remaining body bytes were read and discarded the
    // connection closes for real
    sock.add_input(b"567890");
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));
}

#[test]
fn graceful_close_ends_on_peer_eof() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/upload"),
        || Box::new(EagerReply));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"POST /upload HTTP/1.0\r\nHost: x\r\n\
                     Content-Length: 10\r\n\r\n1234");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert!(sock.write_shutdown());

    sock.set_eof();
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));
}

#[test]
fn eof_between_requests_is_silent() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/ping"), || Box::new(Ping));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"GET /ping HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);

    sock.set_eof();
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
}

#[test]
fn eof_mid_request_reaches_the_handler() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();
    {
        let log = log.clone();
        router.add(Match::new().exact_path("/upload"), move || {
            Box::new(Recorder {
                log: log.clone(),
                reply: None,
            }) as Box<RequestStream>
        });
    }
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"POST /upload HTTP/1.1\r\nHost: x\r\n\
                     Content-Length: 10\r\n\r\n1234");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);

    sock.set_eof();
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));
    let entries = log.lock().unwrap().clone();
    assert_eq!(entries, vec![
        "headers POST /upload".to_string(),
        "data \"1234\"".to_string(),
        format!("close {:?}", Err::<(), Error>(Error::Eof)),
    ]);
    // peer disconnect mid-request is logged with the reserved 499
    assert_eq!(conn.get_ref().access_status(), 499);
}

/// Splits its reply across several send jobs, each with a callback.
struct Ordered {
    log: Arc<Mutex<Vec<String>>>,
}

impl RequestStream for Ordered {
    fn on_headers(&mut self, _req: Request, reply: Reply) {
        let mut response = Response::new(200);
        response.headers_mut().set_content_length(10);
        let log = self.log.clone();
        reply.send_headers(response, Vec::new(), move |result| {
            log.lock().unwrap().push(format!("head {}", result.is_ok()));
        });
        let log = self.log.clone();
        reply.send_data(b"AAAAA".to_vec(), move |result| {
            log.lock().unwrap().push(format!("a {}", result.is_ok()));
        });
        let log = self.log.clone();
        reply.send_data(b"BBBBB".to_vec(), move |result| {
            log.lock().unwrap().push(format!("b {}", result.is_ok()));
        });
        reply.close(Ok(()));
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        data.len()
    }

    fn on_close(&mut self, _result: Result<(), Error>) {}
}

#[test]
fn send_jobs_are_ordered() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();
    {
        let log = log.clone();
        router.add(Match::new().exact_path("/ordered"), move || {
            Box::new(Ordered { log: log.clone() }) as Box<RequestStream>
        });
    }
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"GET /ordered HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);

    // bytes appear on the wire in submission order
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nAAAAABBBBB");
    // and each callback fired exactly once, in submission order
    assert_eq!(*log.lock().unwrap(), vec![
        "head true".to_string(),
        "a true".to_string(),
        "b true".to_string(),
    ]);
}

/// Consumes everything but asks for a pause after the first call.
struct Pausing {
    offers: Arc<Mutex<Vec<String>>>,
    reply: Arc<Mutex<Option<Reply>>>,
}

impl RequestStream for Pausing {
    fn on_headers(&mut self, _req: Request, reply: Reply) {
        *self.reply.lock().unwrap() = Some(reply);
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        let mut offers = self.offers.lock().unwrap();
        offers.push(String::from_utf8_lossy(data).to_string());
        if offers.len() == 1 {
            let reply = self.reply.lock().unwrap();
            reply.as_ref().unwrap().pause_receive();
        }
        data.len()
    }

    fn on_close(&mut self, result: Result<(), Error>) {
        if result.is_ok() {
            let mut response = Response::new(200);
            response.headers_mut().set_content_length(0);
            let reply = self.reply.lock().unwrap();
            reply.as_ref().unwrap().send_reply(response, Vec::new());
        }
    }
}

#[test]
fn pause_receive_is_sticky() {
    let offers = Arc::new(Mutex::new(Vec::new()));
    let reply = Arc::new(Mutex::new(None));
    let mut router = Router::new();
    {
        let offers = offers.clone();
        let reply = reply.clone();
        router.add(Match::new().exact_path("/slow"), move || {
            Box::new(Pausing {
                offers: offers.clone(),
                reply: reply.clone(),
            }) as Box<RequestStream>
        });
    }
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"POST /slow HTTP/1.1\r\nHost: x\r\n\
                     Content-Length: 10\r\n\r\n12345");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(*offers.lock().unwrap(), vec!["12345".to_string()]);

    // everything was consumed, but the pause holds until want_more
    sock.add_input(b"67890");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(offers.lock().unwrap().len(), 1);

    reply.lock().unwrap().as_ref().unwrap().want_more();
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(*offers.lock().unwrap(),
        vec!["12345".to_string(), "67890".to_string()]);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
}

#[test]
fn explicit_connection_close_is_honored() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/ping"), || Box::new(Ping));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"GET /ping HTTP/1.1\r\nHost: x\r\n\
                     Connection: close\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\
         Connection: Close\r\n\r\n");
}

/// Replies with an explicit `Connection: Keep-Alive` header.
struct ExplicitKeepAlive;

impl RequestStream for ExplicitKeepAlive {
    fn on_headers(&mut self, _req: Request, reply: Reply) {
        let mut response = Response::new(200);
        response.headers_mut().set_content_length(0);
        response.headers_mut().set_keep_alive(true);
        reply.send_reply(response, Vec::new());
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        data.len()
    }

    fn on_close(&mut self, _result: Result<(), Error>) {}
}

#[test]
fn response_keep_alive_overrides_request() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/ping"),
        || Box::new(ExplicitKeepAlive));
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    // HTTP/1.0 defaults to close, but the response's explicit header is
    // authoritative and the connection is kept open
    sock.add_input(b"GET /ping HTTP/1.0\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\
         Connection: Keep-Alive\r\n\r\n");

    sock.add_input(b"GET /ping HTTP/1.0\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::NotReady);
    assert_eq!(sock.output_str(),
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\
         Connection: Keep-Alive\r\n\r\n\
         HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\
         Connection: Keep-Alive\r\n\r\n");
}

#[test]
fn write_error_fails_callbacks_and_logs_499() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut router = Router::new();
    {
        let log = log.clone();
        router.add(Match::new().exact_path("/ordered"), move || {
            Box::new(Ordered { log: log.clone() }) as Box<RequestStream>
        });
    }
    let sock = Mock::new();
    let mut conn = connection(router, &sock);

    sock.add_input(b"GET /ordered HTTP/1.1\r\nHost: x\r\n\r\n");
    sock.fail_writes();
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));

    // nothing reached the wire, every callback saw the error, in order
    assert_eq!(sock.output_str(), "");
    assert_eq!(*log.lock().unwrap(), vec![
        "head false".to_string(),
        "a false".to_string(),
        "b false".to_string(),
    ]);
    assert_eq!(conn.get_ref().access_status(), 499);
}

/// Panics as soon as it sees the request.
struct Panicker;

impl RequestStream for Panicker {
    fn on_headers(&mut self, _req: Request, _reply: Reply) {
        panic!("handler exploded");
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        data.len()
    }

    fn on_close(&mut self, _result: Result<(), Error>) {}
}

#[test]
fn handler_panic_in_safe_mode_logs_598() {
    let mut router = Router::new();
    router.add(Match::new().exact_path("/boom"), || Box::new(Panicker));
    let sock = Mock::new();
    let cfg = Config::new().safe_mode(true).done();
    let mut conn = connection_with(router, &sock, cfg);

    sock.add_input(b"GET /boom HTTP/1.1\r\nHost: x\r\n\r\n");
    assert_eq!(poll_conn(&mut conn), Async::Ready(()));

    // the connection is cut abruptly and logged with the reserved 598
    assert_eq!(sock.output_str(), "");
    assert_eq!(conn.get_ref().access_status(), 598);
}
