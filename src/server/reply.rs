//! The reply stream: the handler-facing handle of a connection.
//!
//! A `Reply` can be cloned, sent to other threads and used across
//! suspension points; every method only records intent under the
//! per-connection mutex and wakes the connection task, whose `poll` (on
//! the worker thread) performs the actual work.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::task::AtomicTask;

use enums::Status;
use response::Response;
use super::Error;


/// Completion callback of a send job.
///
/// Fired exactly once: with `Ok` after the job's last byte was accepted
/// by the kernel, or with the first error observed on the connection.
pub type SendCallback = Box<FnOnce(Result<(), Error>) + Send>;

pub enum JobKind {
    /// Response head plus an optional first body chunk.
    Headers {
        response: Response,
        body: Vec<u8>,
    },
    Data(Vec<u8>),
    /// Marks the flush point of `close(Ok)`: the connection finishes the
    /// request once everything queued before this job has drained.
    Shutdown,
}

pub struct SendJob {
    pub kind: JobKind,
    pub callback: Option<SendCallback>,
}

/// State shared between the connection task and its `Reply` handles,
/// guarded by the per-connection mutex.
pub struct ReplyState {
    pub queue: VecDeque<SendJob>,
    /// `close(Err)` was requested; processed ahead of the queue.
    pub abort: Option<Error>,
    pub wants_more: bool,
    pub pause_receive: bool,
    /// Some `close` was invoked; body bytes are discarded from now on.
    pub close_invoked: bool,
    /// Keep-alive decision; seeded from the request, adjusted by an
    /// explicit `Connection` header on the response.
    pub keep_alive: bool,
    /// Status code for the access log, recorded at `send_headers` time.
    pub status: u16,
    pub headers_sent: bool,
    /// The connection is gone; new jobs fail with `Aborted` right away.
    pub finished: bool,
}

pub struct Shared {
    pub task: AtomicTask,
    pub state: Mutex<ReplyState>,
}

impl Shared {
    pub fn new() -> Arc<Shared> {
        Arc::new(Shared {
            task: AtomicTask::new(),
            state: Mutex::new(ReplyState {
                queue: VecDeque::new(),
                abort: None,
                wants_more: false,
                pause_receive: false,
                close_invoked: false,
                keep_alive: false,
                status: 0,
                headers_sent: false,
                finished: false,
            }),
        })
    }

    /// Re-arm the per-request fields for the next request on the socket.
    pub fn reset_request(&self) {
        let mut state = self.state.lock().expect("reply lock");
        state.abort = None;
        state.wants_more = false;
        state.pause_receive = false;
        state.close_invoked = false;
        state.keep_alive = false;
        state.status = 0;
        state.headers_sent = false;
    }
}

/// Handle for sending the response and steering body delivery.
#[derive(Clone)]
pub struct Reply {
    shared: Arc<Shared>,
}

pub fn new_reply(shared: &Arc<Shared>) -> Reply {
    Reply { shared: shared.clone() }
}

impl Reply {
    fn push(&self, kind: JobKind, callback: Option<SendCallback>) {
        let rejected = {
            let mut state = self.shared.state.lock().expect("reply lock");
            if state.finished {
                callback
            } else {
                state.queue.push_back(SendJob {
                    kind: kind,
                    callback: callback,
                });
                None
            }
        };
        match rejected {
            Some(callback) => callback(Err(Error::Aborted)),
            None => self.shared.task.notify(),
        }
    }

    /// Queue the response head, optionally with a first body chunk.
    ///
    /// Must be called at most once per request. An explicit `Connection`
    /// header on the response overrides the keep-alive decision derived
    /// from the request.
    pub fn send_headers<F>(&self, response: Response, body: Vec<u8>,
        callback: F)
        where F: FnOnce(Result<(), Error>) + Send + 'static
    {
        let response = self.prepare_headers(response);
        self.push(JobKind::Headers {
            response: response,
            body: body,
        }, Some(Box::new(callback)));
    }

    /// Queue a body chunk.
    pub fn send_data<F>(&self, data: Vec<u8>, callback: F)
        where F: FnOnce(Result<(), Error>) + Send + 'static
    {
        self.push(JobKind::Data(data), Some(Box::new(callback)));
    }

    /// Queue the head and the whole body, then close.
    pub fn send_reply(&self, response: Response, body: Vec<u8>) {
        let response = self.prepare_headers(response);
        self.push(JobKind::Headers {
            response: response,
            body: body,
        }, None);
        self.close(Ok(()));
    }

    /// Send a stock error page and close.
    pub fn send_error(&self, status: Status) {
        self.send_reply(Response::stock(status), Vec::new());
    }

    /// Finish the request.
    ///
    /// With `Ok` the connection completes the exchange once all queued
    /// data has been flushed; with `Err` it tears the connection down
    /// immediately, failing any pending callbacks.
    pub fn close(&self, result: Result<(), Error>) {
        {
            let mut state = self.shared.state.lock().expect("reply lock");
            let repeated = state.close_invoked;
            state.close_invoked = true;
            match result {
                Ok(()) => {
                    if !state.finished && !repeated {
                        if !state.headers_sent {
                            // the handler never produced a response,
                            // substitute an empty error page
                            let stock = Response::stock(
                                Status::InternalServerError);
                            state.status = stock.code();
                            state.headers_sent = true;
                            state.keep_alive = false;
                            state.queue.push_back(SendJob {
                                kind: JobKind::Headers {
                                    response: stock,
                                    body: Vec::new(),
                                },
                                callback: None,
                            });
                        }
                        state.queue.push_back(SendJob {
                            kind: JobKind::Shutdown,
                            callback: None,
                        });
                    }
                }
                Err(err) => {
                    if state.abort.is_none() {
                        state.abort = Some(err);
                    }
                }
            }
        }
        self.shared.task.notify();
    }

    /// Resume body delivery after `on_data` consumed less than offered
    /// (or after `pause_receive`). Delivery restarts from the unconsumed
    /// tail of the buffer before any new socket read happens.
    pub fn want_more(&self) {
        {
            let mut state = self.shared.state.lock().expect("reply lock");
            state.wants_more = true;
            state.pause_receive = false;
        }
        self.shared.task.notify();
    }

    /// Sticky request to stop body delivery even while `on_data` keeps
    /// consuming everything; undone by `want_more`.
    pub fn pause_receive(&self) {
        let mut state = self.shared.state.lock().expect("reply lock");
        state.pause_receive = true;
    }

    fn prepare_headers(&self, mut response: Response) -> Response {
        let mut state = self.shared.state.lock().expect("reply lock");
        state.status = response.code();
        state.headers_sent = true;
        // an explicit Connection header on the response is authoritative,
        // in either direction; only without one does the request-derived
        // decision apply
        match response.headers().is_keep_alive() {
            Some(explicit) => {
                state.keep_alive = explicit;
            }
            None => {
                if !state.keep_alive {
                    // connection cannot be reused, make it explicit on
                    // the wire
                    response.headers_mut().set_keep_alive(false);
                }
            }
        }
        response
    }
}
