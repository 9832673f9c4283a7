//! The handler contract and the two convenience shapes built on it.

use std::cmp::min;
use std::mem;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use request::Request;
use super::{Error, Reply};


/// A streaming request handler.
///
/// For every handler instance the connection calls `on_headers` once,
/// then `on_data` any number of times, then `on_close` exactly once; all
/// calls happen on the connection's worker thread, in order.
///
/// `on_data` returns how many of the offered bytes were consumed.
/// Returning less than offered pauses delivery; the unconsumed tail is
/// offered again after `Reply::want_more`.
pub trait RequestStream {
    fn on_headers(&mut self, req: Request, reply: Reply);
    fn on_data(&mut self, data: &[u8]) -> usize;
    fn on_close(&mut self, result: Result<(), Error>);
}

/// Factory producing a fresh handler per matched request.
pub type StreamFactory = Box<Fn() -> Box<RequestStream> + Send + Sync>;


/// Handler shape receiving the fully buffered body in one call.
pub trait SimpleRequest {
    fn on_request(&mut self, req: &Request, body: &[u8], reply: Reply);
}

/// Accumulates the whole request body (pre-sized from `Content-Length`
/// when present) and calls `on_request` once on successful completion.
/// Receive errors simply skip `on_request`.
pub struct SimpleRequestStream<T> {
    inner: T,
    request: Option<Request>,
    reply: Option<Reply>,
    body: Vec<u8>,
}

impl<T: SimpleRequest> SimpleRequestStream<T> {
    pub fn new(inner: T) -> SimpleRequestStream<T> {
        SimpleRequestStream {
            inner: inner,
            request: None,
            reply: None,
            body: Vec::new(),
        }
    }
}

impl<T: SimpleRequest> RequestStream for SimpleRequestStream<T> {
    fn on_headers(&mut self, req: Request, reply: Reply) {
        if let Some(len) = req.headers().content_length() {
            self.body.reserve(len as usize);
        }
        self.request = Some(req);
        self.reply = Some(reply);
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        self.body.extend_from_slice(data);
        data.len()
    }

    fn on_close(&mut self, result: Result<(), Error>) {
        if result.is_ok() {
            let request = self.request.take().expect("headers before close");
            let reply = self.reply.take().expect("headers before close");
            let body = mem::replace(&mut self.body, Vec::new());
            self.inner.on_request(&request, &body, reply);
        }
    }
}


pub const FIRST_CHUNK: u32 = 0x01;
pub const LAST_CHUNK: u32 = 0x02;

const DEFAULT_CHUNK_SIZE: usize = 10 * 1024;

const HANDLER_READY: usize = 0x01;
const DATA_PENDING: usize = 0x02;

/// Handler shape receiving the body in fixed-size chunks.
///
/// The handler paces delivery itself: after finishing with a chunk it
/// calls `Pacer::try_next_chunk`, which may be done from any thread and
/// at any later time. `flags` carries `FIRST_CHUNK` / `LAST_CHUNK` (both
/// for a single-chunk body).
pub trait BufferedRequest: Sized {
    fn on_request(&mut self, req: &Request, reply: &Reply);
    fn on_chunk(&mut self, data: &[u8], flags: u32, pacer: &Pacer<Self>);
    fn on_error(&mut self, err: Error);
}

struct BufferedInner<T> {
    handler: T,
    buf: Vec<u8>,
    chunk_size: usize,
    first: bool,
    last: bool,
}

struct BufferedShared<T> {
    /// Two readiness bits: a chunk is delivered only when both
    /// `HANDLER_READY` and `DATA_PENDING` are set.
    bits: AtomicUsize,
    reply: Mutex<Option<Reply>>,
    inner: Mutex<BufferedInner<T>>,
}

/// Delivers buffered chunks to a `BufferedRequest` handler.
pub struct BufferedRequestStream<T> {
    shared: Arc<BufferedShared<T>>,
}

/// Pacing handle passed to `on_chunk`; keeps the chunk machinery alive
/// for as long as the handler needs it.
pub struct Pacer<T> {
    shared: Arc<BufferedShared<T>>,
}

impl<T> Clone for Pacer<T> {
    fn clone(&self) -> Pacer<T> {
        Pacer { shared: self.shared.clone() }
    }
}

impl<T: BufferedRequest> BufferedRequestStream<T> {
    pub fn new(inner: T) -> BufferedRequestStream<T> {
        BufferedRequestStream::with_chunk_size(inner, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: T, chunk_size: usize)
        -> BufferedRequestStream<T>
    {
        assert!(chunk_size > 0);
        BufferedRequestStream {
            shared: Arc::new(BufferedShared {
                bits: AtomicUsize::new(HANDLER_READY),
                reply: Mutex::new(None),
                inner: Mutex::new(BufferedInner {
                    handler: inner,
                    buf: Vec::new(),
                    chunk_size: chunk_size,
                    first: true,
                    last: false,
                }),
            }),
        }
    }
}

/// Deliver as long as both readiness bits stay set. The inner lock is
/// held by the caller; `try_next_chunk` from inside `on_chunk` only flips
/// its bit and is picked up by the loop.
fn deliver<T: BufferedRequest>(shared: &Arc<BufferedShared<T>>,
    inner: &mut BufferedInner<T>)
{
    let pacer = Pacer { shared: shared.clone() };
    loop {
        let bits = shared.bits.load(Ordering::SeqCst);
        if bits != HANDLER_READY | DATA_PENDING {
            return;
        }
        shared.bits.store(0, Ordering::SeqCst);

        let mut flags = 0;
        if inner.first {
            flags |= FIRST_CHUNK;
        }
        inner.first = false;
        if inner.last {
            flags |= LAST_CHUNK;
        }
        let data = mem::replace(&mut inner.buf, Vec::new());
        inner.handler.on_chunk(&data, flags, &pacer);

        let reply = shared.reply.lock().expect("pacer lock").clone();
        if let Some(reply) = reply {
            reply.want_more();
        }
    }
}

impl<T: BufferedRequest> RequestStream for BufferedRequestStream<T> {
    fn on_headers(&mut self, req: Request, reply: Reply) {
        *self.shared.reply.lock().expect("pacer lock") = Some(reply.clone());
        let mut inner = self.shared.inner.lock().expect("stream lock");
        let chunk_size = inner.chunk_size;
        inner.buf.reserve(chunk_size);
        inner.handler.on_request(&req, &reply);
    }

    fn on_data(&mut self, data: &[u8]) -> usize {
        let mut inner = self.shared.inner.lock().expect("stream lock");
        let mut consumed = 0;
        while consumed < data.len() {
            if self.shared.bits.load(Ordering::SeqCst) & DATA_PENDING != 0 {
                // an undelivered chunk is waiting for the handler
                return consumed;
            }
            let space = inner.chunk_size - inner.buf.len();
            let take = min(space, data.len() - consumed);
            inner.buf.extend_from_slice(&data[consumed..consumed + take]);
            consumed += take;
            if inner.buf.len() == inner.chunk_size {
                self.shared.bits.fetch_or(DATA_PENDING, Ordering::SeqCst);
                deliver(&self.shared, &mut inner);
            }
        }
        consumed
    }

    fn on_close(&mut self, result: Result<(), Error>) {
        let mut inner = self.shared.inner.lock().expect("stream lock");
        match result {
            Ok(()) => {
                inner.last = true;
                self.shared.bits.fetch_or(DATA_PENDING, Ordering::SeqCst);
                deliver(&self.shared, &mut inner);
            }
            Err(err) => inner.handler.on_error(err),
        }
    }
}

impl<T: BufferedRequest> Pacer<T> {
    /// Signal that the handler finished with the previous chunk.
    ///
    /// The next chunk (or the final, possibly empty one) is delivered as
    /// soon as it is available. Callable from any thread; calling it from
    /// inside `on_chunk` is fine and resumes delivery once `on_chunk`
    /// returns.
    pub fn try_next_chunk(&self) {
        self.shared.bits.fetch_or(HANDLER_READY, Ordering::SeqCst);
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            deliver(&self.shared, &mut inner);
        }
        let reply = self.shared.reply.lock().expect("pacer lock").clone();
        if let Some(reply) = reply {
            reply.want_more();
        }
    }

    /// The reply handle of the request being streamed.
    ///
    /// # Panics
    ///
    /// Before `on_request` was called (no request is being streamed yet).
    pub fn reply(&self) -> Reply {
        self.shared.reply.lock().expect("pacer lock").clone()
            .expect("a request is being streamed")
    }
}
