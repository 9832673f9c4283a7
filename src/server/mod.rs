//! HTTP server protocol implementation
//!
mod accept;
mod connection;
mod error;
mod parser;
mod reply;
mod route;
mod stream;

pub use self::accept::{Acceptors, BindAddr, Dispatcher, WorkerPool};
pub use self::accept::parse_bind;
pub use self::connection::Connection;
pub use self::error::Error;
pub use self::parser::{Parser, ParseResult};
pub use self::reply::Reply;
pub use self::route::{Match, Router};
pub use self::stream::{RequestStream, StreamFactory};
pub use self::stream::{SimpleRequest, SimpleRequestStream};
pub use self::stream::{BufferedRequest, BufferedRequestStream, Pacer};
pub use self::stream::{FIRST_CHUNK, LAST_CHUNK};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};


/// Fine-grained configuration of the HTTP server core.
#[derive(Debug, Clone)]
pub struct Config {
    pub buffer_size: usize,
    pub safe_mode: bool,
    pub request_header: Option<String>,
    pub trace_header: Option<String>,
}

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            buffer_size: 8192,
            safe_mode: false,
            request_header: None,
            trace_header: None,
        }
    }

    /// Receive buffer capacity per connection
    pub fn buffer_size(&mut self, value: usize) -> &mut Self {
        assert!(value > 0);
        self.buffer_size = value;
        self
    }

    /// Catch handler panics instead of letting them take the worker down
    pub fn safe_mode(&mut self, value: bool) -> &mut Self {
        self.safe_mode = value;
        self
    }

    /// Name of the request header carrying a hex request id
    pub fn request_header(&mut self, name: &str) -> &mut Self {
        self.request_header = Some(name.to_string());
        self
    }

    /// Name of the request header carrying the trace bit
    pub fn trace_header(&mut self, name: &str) -> &mut Self {
        self.trace_header = Some(name.to_string());
        self
    }

    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}

/// Global connection counters, shared across workers and the monitor.
#[derive(Debug, Default)]
pub struct Stats {
    /// Currently open connections.
    pub connections: AtomicUsize,
    /// Connections with a live handler processing a request.
    pub active: AtomicUsize,
}

impl Stats {
    pub fn new() -> Arc<Stats> {
        Arc::new(Stats::default())
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
