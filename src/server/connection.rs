//! The per-connection state machine.
//!
//! One `Connection` drives a socket through any number of sequential
//! requests: it reads, parses, routes, streams the body into the handler
//! and writes queued replies, deciding between keep-alive recycling and
//! (graceful) close at the end of every exchange.

use std::cmp::min;
use std::collections::VecDeque;
use std::io;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use futures::{Async, Future, Poll};
use netbuf::Buf;
use rand;
use tokio_io::{AsyncRead, AsyncWrite};

use chunked;
use enums::Status;
use request::Request;
use serializer;
use super::parser::{Parser, ParseResult};
use super::reply::{self, JobKind, SendCallback, SendJob, Shared};
use super::route::Router;
use super::stream::RequestStream;
use super::{Config, Error, Stats};


pub const READ_HEADERS: u32 = 0x01;
pub const READ_DATA: u32 = 0x02;
pub const REQUEST_PROCESSED: u32 = 0x04;
pub const WAITING_FOR_FIRST_DATA: u32 = 0x08;
pub const GRACEFUL_CLOSE: u32 = 0x10;

/// All per-request flags clear: the request is fully received and only
/// the handler's close is awaited.
const PROCESSING: u32 = 0;

fn state_name(state: u32) -> String {
    let names = [
        (READ_HEADERS, "read_headers"),
        (READ_DATA, "read_data"),
        (REQUEST_PROCESSED, "request_processed"),
        (WAITING_FOR_FIRST_DATA, "waiting_for_first_data"),
        (GRACEFUL_CLOSE, "graceful_close"),
    ];
    let mut out = String::new();
    for &(bit, name) in names.iter() {
        if state & bit != 0 {
            if !out.is_empty() {
                out.push('|');
            }
            out.push_str(name);
        }
    }
    if out.is_empty() {
        out.push_str("processing_request");
    }
    out
}

fn us(duration: Duration) -> u64 {
    duration.as_secs() * 1_000_000 + (duration.subsec_nanos() / 1_000) as u64
}

/// Run a handler callback, catching panics when safe mode is on.
///
/// On a panic the connection is cut with status 598 and `Err(())` is
/// returned so the call site can bail out.
macro_rules! safe_call {
    ($conn:expr, $context:expr, |$handler:ident| $call:expr) => {{
        let result = {
            let $handler = $conn.handler.as_mut().expect("handler present");
            if $conn.cfg.safe_mode {
                catch_unwind(AssertUnwindSafe(|| $call)).map_err(|_| ())
            } else {
                Ok($call)
            }
        };
        if result.is_err() {
            $conn.handler_panicked($context);
        }
        result
    }};
}

#[derive(Debug)]
enum BodyProgress {
    /// Plain body, this many bytes left on the wire.
    Fixed(u64),
    Chunked(chunked::State),
}

/// A queued job already serialized into the output buffer.
struct Inflight {
    bytes_left: usize,
    callback: Option<SendCallback>,
    shutdown: bool,
}

/// Per-request access log accumulators.
struct Access {
    method: String,
    url: String,
    received: u64,
    sent: u64,
    start: Option<Instant>,
    receive_time: Duration,
    send_time: Duration,
    starttransfer_time: Duration,
    printed: bool,
    /// The handler finished the request (`close` reached the connection).
    finished: bool,
}

impl Access {
    fn new() -> Access {
        Access {
            method: String::new(),
            url: String::new(),
            received: 0,
            sent: 0,
            start: None,
            receive_time: Duration::new(0, 0),
            send_time: Duration::new(0, 0),
            starttransfer_time: Duration::new(0, 0),
            printed: false,
            finished: false,
        }
    }
}

enum Input {
    /// Made progress, run the machine again.
    Again,
    /// Need more bytes from the socket.
    Read,
    /// Nothing to do until an external event.
    Idle,
}

enum ReadOutcome {
    Data,
    Blocked,
    /// The receive buffer is at capacity.
    Full,
    Eof,
    Failed(io::Error),
}

pub struct Connection<S> {
    sock: S,
    in_buf: Buf,
    out_buf: Buf,
    cfg: Arc<Config>,
    router: Arc<Router>,
    stats: Arc<Stats>,
    shared: Arc<Shared>,
    parser: Parser,
    request: Request,
    handler: Option<Box<RequestStream>>,
    state: u32,
    body: Option<BodyProgress>,
    /// `on_data` consumed less than offered; waiting for `want_more`.
    stalled: bool,
    /// `close_impl` already ran for this request; duplicate `close`
    /// calls from the handler must not disturb the next exchange.
    close_handled: bool,
    inflight: VecDeque<Inflight>,
    local: String,
    remote: String,
    access: Access,
    request_id: u64,
    trace_bit: bool,
    read_wait: Option<Instant>,
    write_wait: Option<Instant>,
    done: bool,
}

impl<S> Connection<S> {
    /// Status code recorded for the access log of the current request.
    ///
    /// Zero until a response is started; the reserved classes (499, 597,
    /// 598, 599) show up here when the connection ends abnormally.
    pub fn access_status(&self) -> u16 {
        self.status()
    }

    fn status(&self) -> u16 {
        self.shared.state.lock().expect("reply lock").status
    }

    fn set_status(&self, status: u16) {
        self.shared.state.lock().expect("reply lock").status = status;
    }

    fn close_invoked(&self) -> bool {
        self.shared.state.lock().expect("reply lock").close_invoked
    }

    fn pause_requested(&self) -> bool {
        self.shared.state.lock().expect("reply lock").pause_receive
    }

    fn keep_alive(&self) -> bool {
        self.shared.state.lock().expect("reply lock").keep_alive
    }

    fn drop_handler(&mut self) {
        if self.handler.take().is_some() {
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn access_log(&mut self) {
        if self.state & WAITING_FOR_FIRST_DATA != 0 {
            return;
        }
        if self.access.printed {
            return;
        }
        self.access.printed = true;
        let total = self.access.start
            .map(|start| start.elapsed())
            .unwrap_or(Duration::new(0, 0));
        info!(target: "access_log",
            "request_id: {:016x}, trace_bit: {}, method: {}, url: {}, \
             local: {}, remote: {}, status: {}, received: {}, sent: {}, \
             time: {} us, receive_time: {} us, send_time: {} us, \
             starttransfer_time: {} us",
            self.request_id,
            self.trace_bit,
            if self.access.method.is_empty() { "-" }
                else { &self.access.method },
            if self.access.url.is_empty() { "-" } else { &self.access.url },
            self.local,
            self.remote,
            self.status(),
            self.access.received,
            self.access.sent,
            us(total),
            us(self.access.receive_time),
            us(self.access.send_time),
            us(self.access.starttransfer_time));
    }
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    pub fn new(sock: S, cfg: &Arc<Config>, router: &Arc<Router>,
        stats: &Arc<Stats>, local: String, remote: String)
        -> Connection<S>
    {
        stats.connections.fetch_add(1, Ordering::SeqCst);
        info!("connection to client opened, local: {}, remote: {}",
            local, remote);
        Connection {
            sock: sock,
            in_buf: Buf::new(),
            out_buf: Buf::new(),
            cfg: cfg.clone(),
            router: router.clone(),
            stats: stats.clone(),
            shared: Shared::new(),
            parser: Parser::new(),
            request: Request::new(),
            handler: None,
            state: READ_HEADERS | WAITING_FOR_FIRST_DATA,
            body: None,
            stalled: false,
            close_handled: false,
            inflight: VecDeque::new(),
            local: local,
            remote: remote,
            access: Access::new(),
            request_id: 0,
            trace_bit: false,
            read_wait: None,
            write_wait: None,
            done: false,
        }
    }

    /// Handler panicked: log 598 and cut the connection without ceremony.
    fn handler_panicked(&mut self, context: &str) {
        error!("uncaught panic in handler, context: {}", context);
        self.set_status(598);
        self.access_log();
        self.drop_handler();
        self.done = true;
    }

    // ---- output side ----

    /// Move queued send jobs into the output buffer.
    fn drain_queue(&mut self) -> bool {
        let jobs: Vec<SendJob> = {
            let mut state = self.shared.state.lock().expect("reply lock");
            state.queue.drain(..).collect()
        };
        let progress = !jobs.is_empty();
        for job in jobs {
            let before = self.out_buf.len();
            let shutdown = match job.kind {
                JobKind::Headers { ref response, ref body } => {
                    debug!("handler sends headers to client, status: {}, \
                            state: {}",
                        response.code(), state_name(self.state));
                    serializer::write_head(&mut self.out_buf, response);
                    self.out_buf.extend(body);
                    false
                }
                JobKind::Data(ref data) => {
                    debug!("handler sends data to client, size: {}, \
                            state: {}",
                        data.len(), state_name(self.state));
                    self.out_buf.extend(data);
                    false
                }
                JobKind::Shutdown => true,
            };
            let bytes = self.out_buf.len() - before;
            self.inflight.push_back(Inflight {
                bytes_left: bytes,
                callback: job.callback,
                shutdown: shutdown,
            });
        }
        progress
    }

    fn flush_output(&mut self) -> io::Result<usize> {
        let before = self.out_buf.len();
        while self.out_buf.len() > 0 {
            match self.out_buf.write_to(&mut self.sock) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        let flushed = before - self.out_buf.len();
        self.access.sent += flushed as u64;
        if self.out_buf.len() > 0 {
            if self.write_wait.is_none() {
                self.write_wait = Some(Instant::now());
            }
        } else if let Some(since) = self.write_wait.take() {
            self.access.send_time += since.elapsed();
        }
        Ok(flushed)
    }

    /// Retire fully-written jobs in order, firing their callbacks, and
    /// run `close` once its flush point is reached.
    fn retire_jobs(&mut self, mut flushed: usize) -> bool {
        let mut progress = false;
        loop {
            let complete = match self.inflight.front_mut() {
                Some(job) => {
                    if job.bytes_left > flushed {
                        job.bytes_left -= flushed;
                        flushed = 0;
                        false
                    } else {
                        flushed -= job.bytes_left;
                        true
                    }
                }
                None => break,
            };
            if !complete {
                break;
            }
            let job = self.inflight.pop_front().expect("job present");
            progress = true;
            if let Some(callback) = job.callback {
                callback(Ok(()));
            }
            if job.shutdown {
                self.close_impl(None);
                if self.done {
                    return true;
                }
            }
        }
        progress
    }

    /// A write failed: every pending callback gets the error, the handler
    /// is notified once and the connection is logged as 499 and closed.
    fn write_failed(&mut self, err: io::Error) {
        error!("write to client failed, error: {}, state: {}",
            err, state_name(self.state));
        let err = Error::from(err);
        let queued: Vec<SendJob> = {
            let mut state = self.shared.state.lock().expect("reply lock");
            state.finished = true;
            state.queue.drain(..).collect()
        };
        for job in self.inflight.drain(..) {
            if let Some(callback) = job.callback {
                callback(Err(err.clone()));
            }
        }
        for job in queued {
            if let Some(callback) = job.callback {
                callback(Err(err.clone()));
            }
        }
        self.set_status(499);
        if self.handler.is_some() && !self.close_invoked() {
            let failure = err.clone();
            let result = safe_call!(self, "write_failed -> on_close",
                |handler| handler.on_close(Err(failure)));
            if result.is_err() {
                return;
            }
        }
        self.drop_handler();
        self.access_log();
        self.done = true;
    }

    // ---- request lifecycle ----

    /// The handler finished the request (or an error-class close fired).
    fn close_impl(&mut self, err: Option<Error>) {
        if self.close_handled && err.is_none() {
            return;
        }
        self.close_handled = true;
        debug!("handler closes connection, error: {:?}, state: {}",
            err, state_name(self.state));
        self.drop_handler();
        self.access.finished = true;
        // nothing throttles the remaining drain once the handler is gone
        self.stalled = false;
        self.shared.state.lock().expect("reply lock").pause_receive = false;

        if err.is_some() {
            // 499 is already set when the write side broke first
            if self.status() != 499 {
                self.set_status(599);
            }
            self.access_log();
            self.done = true;
            return;
        }

        if !self.keep_alive() {
            if self.state == PROCESSING {
                // request fully received, just close
                self.access_log();
                self.done = true;
            } else {
                // The response is out but the peer is still sending its
                // request body. Half-close the send side and drain what
                // remains so the peer can read the whole reply.
                self.state |= GRACEFUL_CLOSE;
                debug!("gracefully close the connection, state: {}",
                    state_name(self.state));
                let _ = self.sock.shutdown();
            }
            return;
        }

        if self.state != PROCESSING {
            // body not fully received yet, keep draining it
            self.state |= REQUEST_PROCESSED;
            return;
        }

        self.process_next();
    }

    /// Recycle the connection for the next request on the same socket.
    fn process_next(&mut self) {
        self.access_log();
        self.state = READ_HEADERS | WAITING_FOR_FIRST_DATA;
        self.parser.reset();
        self.request = Request::new();
        self.body = None;
        self.stalled = false;
        self.close_handled = false;
        self.access = Access::new();
        self.request_id = 0;
        self.trace_bit = false;
        self.read_wait = None;
        self.shared.reset_request();
        info!("process next request, buffered: {}, local: {}, remote: {}",
            self.in_buf.len(), self.local, self.remote);
    }

    /// Emit a stock error page through the regular reply machinery.
    fn send_error(&mut self, status: Status) {
        debug!("sending error to client, status: {}, state: {}",
            status.code(), state_name(self.state));
        reply::new_reply(&self.shared).send_error(status);
    }

    /// A protocol error in the middle of a request: the handler learns
    /// about it once, a 400 goes out and the request cannot continue.
    fn fail_request(&mut self, err: Error) -> Input {
        if self.handler.is_some() && !self.close_invoked() {
            let failure = err.clone();
            let result = safe_call!(self, "fail_request -> on_close",
                |handler| handler.on_close(Err(failure)));
            if result.is_err() {
                return Input::Idle;
            }
        }
        self.drop_handler();
        self.body = None;
        self.state &= !(READ_HEADERS | READ_DATA);
        self.send_error(Status::BadRequest);
        Input::Again
    }

    // ---- input side ----

    fn do_read(&mut self) -> ReadOutcome {
        if self.in_buf.len() >= self.cfg.buffer_size {
            return ReadOutcome::Full;
        }
        let max = self.cfg.buffer_size - self.in_buf.len();
        let before = self.in_buf.len();
        match self.in_buf.read_max_from(max, &mut self.sock).map(|_| self.in_buf.len() - before) {
            Ok(0) => ReadOutcome::Eof,
            Ok(bytes) => {
                if let Some(since) = self.read_wait.take() {
                    let waited = since.elapsed();
                    if self.state & WAITING_FOR_FIRST_DATA != 0 {
                        self.access.starttransfer_time = waited;
                    } else {
                        self.access.receive_time += waited;
                    }
                }
                debug!("received new data, size: {}, state: {}",
                    bytes, state_name(self.state));
                ReadOutcome::Data
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                if self.read_wait.is_none() {
                    self.read_wait = Some(Instant::now());
                }
                ReadOutcome::Blocked
            }
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    fn handle_eof(&mut self) {
        if self.state & GRACEFUL_CLOSE != 0 {
            // the peer finished reading our reply and went away
            self.access_log();
            self.done = true;
            return;
        }
        if self.state & WAITING_FOR_FIRST_DATA != 0 {
            // disconnect between requests, not worth an access log entry
            debug!("peer disconnected between requests, local: {}, \
                    remote: {}", self.local, self.remote);
            self.done = true;
            return;
        }
        if self.status() == 0 || !self.access.finished {
            self.set_status(499);
        }
        self.access_log();
        if self.handler.is_some() && !self.close_invoked() {
            let result = safe_call!(self, "handle_eof -> on_close",
                |handler| handler.on_close(Err(Error::Eof)));
            if result.is_err() {
                return;
            }
        }
        self.drop_handler();
        self.done = true;
    }

    fn read_failed(&mut self, err: io::Error) {
        if self.state & GRACEFUL_CLOSE != 0 {
            self.access_log();
            self.done = true;
            return;
        }
        error!("read from client failed, error: {}, state: {}",
            err, state_name(self.state));
        if self.status() == 0 || !self.access.finished {
            self.set_status(499);
        }
        self.access_log();
        let failure = Error::from(err);
        if self.handler.is_some() && !self.close_invoked() {
            let result = safe_call!(self, "read_failed -> on_close",
                |handler| handler.on_close(Err(failure)));
            if result.is_err() {
                return;
            }
        }
        self.drop_handler();
        self.done = true;
    }

    fn process_headers(&mut self) -> Input {
        let (result, consumed) = {
            let data: &[u8] = &self.in_buf[..];
            self.parser.parse(&mut self.request, data)
        };
        self.in_buf.consume(consumed);
        self.access.received += consumed as u64;
        match result {
            ParseResult::Malformed => {
                error!("failed to parse request, local: {}, remote: {}",
                    self.local, self.remote);
                self.state &= !(READ_HEADERS | READ_DATA);
                self.send_error(Status::BadRequest);
                Input::Again
            }
            ParseResult::Incomplete => Input::Read,
            ParseResult::Complete => self.dispatch(),
        }
    }

    /// Headers are in: finalize the request value, pick a handler and
    /// switch to body delivery.
    fn dispatch(&mut self) -> Input {
        self.request.parse_url();
        self.access.method = self.request.method().to_string();
        self.access.url = self.request.url().original().to_string();

        self.assign_request_id();
        self.request.set_local_endpoint(&self.local);
        self.request.set_remote_endpoint(&self.remote);

        if !self.request.url().is_valid() {
            error!("failed to parse invalid url, url: {}", self.access.url);
            self.state &= !(READ_HEADERS | READ_DATA);
            self.send_error(Status::BadRequest);
            return Input::Again;
        }

        info!("received new request, request_id: {:016x}, method: {}, \
               url: {}, local: {}, remote: {}",
            self.request_id, self.access.method, self.access.url,
            self.local, self.remote);

        self.body = Some(if self.request.is_chunked() {
            BodyProgress::Chunked(chunked::State::new())
        } else {
            let length = self.request.headers().content_length().unwrap_or(0);
            BodyProgress::Fixed(length)
        });
        {
            let mut state = self.shared.state.lock().expect("reply lock");
            state.keep_alive = self.request.is_keep_alive();
        }

        let factory = self.router.find(&self.request).map(|f| f());
        match factory {
            Some(handler) => {
                self.stats.active.fetch_add(1, Ordering::SeqCst);
                self.handler = Some(handler);
                let request = mem::replace(&mut self.request, Request::new());
                let reply = reply::new_reply(&self.shared);
                let result = safe_call!(self, "dispatch -> on_headers",
                    |handler| handler.on_headers(request, reply));
                if result.is_err() {
                    return Input::Idle;
                }
            }
            None => {
                error!("failed to find handler, method: {}, url: {}",
                    self.access.method, self.access.url);
                self.send_error(Status::NotFound);
            }
        }

        self.state &= !READ_HEADERS;
        self.state |= READ_DATA;
        Input::Again
    }

    /// Offer buffered body bytes to the handler, honoring chunk framing,
    /// consumption accounting and back-pressure.
    fn process_body(&mut self) -> Input {
        let parsed = match self.body {
            Some(BodyProgress::Fixed(remaining)) => {
                let offer = min(remaining, self.in_buf.len() as u64) as usize;
                Ok((offer, remaining == 0))
            }
            Some(BodyProgress::Chunked(ref mut state)) => {
                state.parse(&mut self.in_buf)
                    .map(|()| (state.buffered(), state.is_done()))
            }
            None => return Input::Idle,
        };
        let (offer, framing_done) = match parsed {
            Ok(pair) => pair,
            Err(_) => {
                error!("malformed chunked encoding, state: {}",
                    state_name(self.state));
                return self.fail_request(Error::BadRequest);
            }
        };

        if offer == 0 && framing_done {
            self.finish_body();
            return Input::Again;
        }
        if offer == 0 {
            return Input::Read;
        }

        let consumed = if self.close_invoked() || self.handler.is_none() {
            // nobody to deliver to, discard
            offer
        } else {
            let result = {
                let data = &self.in_buf[..offer];
                safe_call!(self, "process_body -> on_data",
                    |handler| handler.on_data(data))
            };
            match result {
                Ok(consumed) => consumed,
                Err(()) => return Input::Idle,
            }
        };
        assert!(consumed <= offer,
            "handler consumed more bytes than it was offered");

        self.in_buf.consume(consumed);
        self.access.received += consumed as u64;
        match self.body {
            Some(BodyProgress::Fixed(ref mut remaining)) => {
                *remaining -= consumed as u64;
            }
            Some(BodyProgress::Chunked(ref mut state)) => {
                state.consume(consumed);
            }
            None => unreachable!(),
        }
        debug!("processed body, consumed: {}, offered: {}, state: {}",
            consumed, offer, state_name(self.state));

        if self.pause_requested() {
            return Input::Idle;
        }
        if consumed < offer {
            // handler is backlogged until want_more
            self.stalled = true;
            return Input::Idle;
        }
        Input::Again
    }

    /// All body bytes were delivered: tell the handler and either finish
    /// the graceful close or recycle for the next request.
    fn finish_body(&mut self) {
        self.state &= !READ_DATA;
        self.body = None;
        if self.handler.is_some() && !self.close_invoked() {
            let result = safe_call!(self, "finish_body -> on_close",
                |handler| handler.on_close(Ok(())));
            if result.is_err() {
                return;
            }
        }
        self.drop_handler();

        if self.state & GRACEFUL_CLOSE != 0 {
            // the drain is complete, this ends the graceful close
            self.access_log();
            self.done = true;
        } else if self.state & REQUEST_PROCESSED != 0 {
            self.process_next();
        }
        // otherwise the response is still being produced; wait for close
    }

    fn assign_request_id(&mut self) {
        let mut request_id = None;
        if let Some(ref header) = self.cfg.request_header {
            if let Some(value) = self.request.headers().get(header) {
                let prefix: String = value.chars().take(16).collect();
                match u64::from_str_radix(&prefix, 16) {
                    Ok(id) => request_id = Some(id),
                    Err(_) => {
                        error!("failed to parse request id header, \
                                header_name: {}, header_value: {}",
                            header, value);
                    }
                }
            }
        }
        self.request_id = request_id.unwrap_or_else(rand::random);

        self.trace_bit = false;
        if let Some(ref header) = self.cfg.trace_header {
            if let Some(value) = self.request.headers().get(header) {
                match value.trim().parse::<u32>() {
                    Ok(flag) => self.trace_bit = flag > 0,
                    Err(_) => {
                        error!("failed to parse trace header, must be an \
                                integer, header_name: {}, header_value: {}",
                            header, value);
                    }
                }
            }
        }
        self.request.set_request_id(self.request_id);
        self.request.set_trace_bit(self.trace_bit);
    }

    fn do_input(&mut self) -> bool {
        let mut progress = false;
        loop {
            if self.done {
                return progress;
            }
            if self.stalled || self.pause_requested() {
                return progress;
            }
            if self.state & (READ_HEADERS | READ_DATA) == 0 {
                // request fully received; no reads until the next one
                return progress;
            }

            if self.in_buf.len() > 0
                && self.state & WAITING_FOR_FIRST_DATA != 0
            {
                self.state &= !WAITING_FOR_FIRST_DATA;
                self.access.start = Some(Instant::now());
            }

            let action = if self.state & READ_HEADERS != 0 {
                if self.in_buf.len() > 0 {
                    self.process_headers()
                } else {
                    Input::Read
                }
            } else {
                self.process_body()
            };

            match action {
                Input::Again => {
                    progress = true;
                }
                Input::Idle => return progress,
                Input::Read => {
                    match self.do_read() {
                        ReadOutcome::Data => {
                            progress = true;
                        }
                        ReadOutcome::Blocked => return progress,
                        ReadOutcome::Full => {
                            // no room left and the handler is not the
                            // limiting factor: framing does not fit
                            error!("receive buffer exhausted without \
                                    progress, state: {}",
                                state_name(self.state));
                            self.state &= !(READ_HEADERS | READ_DATA);
                            self.send_error(Status::BadRequest);
                            return true;
                        }
                        ReadOutcome::Eof => {
                            self.handle_eof();
                            return true;
                        }
                        ReadOutcome::Failed(err) => {
                            self.read_failed(err);
                            return true;
                        }
                    }
                }
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite> Future for Connection<S> {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        if self.done {
            return Ok(Async::Ready(()));
        }
        self.shared.task.register();
        loop {
            let mut progress = false;

            let abort = {
                let mut state = self.shared.state.lock().expect("reply lock");
                state.abort.take()
            };
            if let Some(err) = abort {
                self.close_impl(Some(err));
            }
            if self.done {
                return Ok(Async::Ready(()));
            }

            progress |= self.drain_queue();

            let flushed = match self.flush_output() {
                Ok(flushed) => flushed,
                Err(err) => {
                    self.write_failed(err);
                    return Ok(Async::Ready(()));
                }
            };
            progress |= flushed > 0;
            progress |= self.retire_jobs(flushed);
            if self.done {
                return Ok(Async::Ready(()));
            }

            let wants_more = {
                let mut state = self.shared.state.lock().expect("reply lock");
                mem::replace(&mut state.wants_more, false)
            };
            if wants_more && self.stalled {
                debug!("handler asks for more data, state: {}",
                    state_name(self.state));
                self.stalled = false;
                progress = true;
            }

            progress |= self.do_input();
            if self.done {
                return Ok(Async::Ready(()));
            }

            if !progress {
                return Ok(Async::NotReady);
            }
        }
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        let queued: Vec<SendJob> = {
            let mut state = self.shared.state.lock().expect("reply lock");
            state.finished = true;
            state.queue.drain(..).collect()
        };
        for job in self.inflight.drain(..) {
            if let Some(callback) = job.callback {
                callback(Err(Error::Aborted));
            }
        }
        for job in queued {
            if let Some(callback) = job.callback {
                callback(Err(Error::Aborted));
            }
        }
        if self.handler.take().is_some() {
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
            // the handler never saw the end of its request
            self.set_status(597);
            self.access_log();
        }
        self.stats.connections.fetch_sub(1, Ordering::SeqCst);
        info!("connection to client closed, local: {}, remote: {}",
            self.local, self.remote);
    }
}
