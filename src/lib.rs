//! Streaming HTTP/1.x server framework for the tokio stack.
//!
//! Requests are parsed incrementally and streamed into handler objects
//! (`server::RequestStream`) with receiver-driven back-pressure; replies
//! go out through a thread-safe `server::Reply` handle. The lifecycle
//! layer (`Server` / `run_server`) adds the accept loop, worker pool,
//! JSON config, daemonization, signal handling and a monitor port.

extern crate argparse;
extern crate env_logger;
extern crate futures;
extern crate httparse;
extern crate httpdate;
extern crate libc;
extern crate net2;
extern crate netbuf;
extern crate rand;
extern crate regex;
extern crate serde;
extern crate serde_json;
extern crate tokio_core;
extern crate tokio_io;
extern crate tokio_uds;
extern crate url;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate log;
#[macro_use] extern crate serde_derive;

pub mod config;
pub mod server;
pub mod signals;
mod chunked;
mod enums;
mod headers;
mod monitor;
mod request;
mod response;
mod runtime;
mod serializer;

pub use enums::{Status, Version, default_reason};
pub use headers::Headers;
pub use request::{Request, Url};
pub use response::Response;
pub use runtime::{Server, run_server};
