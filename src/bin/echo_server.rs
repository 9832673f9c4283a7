//! A small demo server: `/ping`, `/echo` and a chunk-counting `/upload`.
//!
//! Run with a JSON config:
//!
//! ```text
//! echo_server --config demo.json
//! ```
//!
//! where `demo.json` looks like:
//!
//! ```json
//! {
//!     "endpoints": ["127.0.0.1:8080"],
//!     "threads": 2,
//!     "monitor-port": 20000,
//!     "logger": {"level": "info"},
//!     "application": {}
//! }
//! ```

extern crate tk_httpd;

use std::process;

use tk_httpd::{run_server, Request, Response};
use tk_httpd::server::{Match, Reply};
use tk_httpd::server::{SimpleRequest, SimpleRequestStream};
use tk_httpd::server::{BufferedRequest, BufferedRequestStream, Pacer};
use tk_httpd::server::{Error, LAST_CHUNK};


struct Ping;

impl SimpleRequest for Ping {
    fn on_request(&mut self, _req: &Request, _body: &[u8], reply: Reply) {
        let mut response = Response::new(200);
        response.headers_mut().set_content_length(0);
        reply.send_reply(response, Vec::new());
    }
}

/// Echoes the body back, with the status code taken from `?code=`.
struct Echo;

impl SimpleRequest for Echo {
    fn on_request(&mut self, req: &Request, body: &[u8], reply: Reply) {
        let code = req.url().query_value("code")
            .and_then(|v| v.parse().ok())
            .unwrap_or(200);
        let mut response = Response::new(code);
        response.headers_mut().set_content_length(body.len() as u64);
        if let Some(content_type) = req.headers().content_type() {
            response.headers_mut().set_content_type(content_type);
        }
        reply.send_reply(response, body.to_vec());
    }
}

/// Consumes an upload chunk by chunk and reports how much arrived.
struct Upload {
    received: u64,
}

impl BufferedRequest for Upload {
    fn on_request(&mut self, _req: &Request, _reply: &Reply) {
        self.received = 0;
    }

    fn on_chunk(&mut self, data: &[u8], flags: u32, pacer: &Pacer<Self>) {
        self.received += data.len() as u64;
        if flags & LAST_CHUNK != 0 {
            let text = format!("received {} bytes\n", self.received);
            let mut response = Response::new(200);
            response.headers_mut().set_content_length(text.len() as u64);
            response.headers_mut().set_content_type("text/plain");
            pacer.reply().send_reply(response, text.into_bytes());
        } else {
            pacer.try_next_chunk();
        }
    }

    fn on_error(&mut self, _err: Error) {}
}

fn main() {
    let code = run_server(|server, _config| {
        server.add_handler(
            Match::new().exact_path("/ping").methods(&["GET"]),
            || Box::new(SimpleRequestStream::new(Ping)));
        server.add_handler(
            Match::new().exact_path("/echo").methods(&["GET", "POST"]),
            || Box::new(SimpleRequestStream::new(Echo)));
        server.add_handler(
            Match::new().exact_path("/upload").methods(&["POST", "PUT"]),
            || Box::new(BufferedRequestStream::new(Upload { received: 0 })));
        Ok(())
    });
    process::exit(code);
}
