//! The monitor side channel: one-byte commands on a separate port.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use libc;
use serde_json::{self, Value};

use server::Stats;


const HELP: &'static str =
    "i - statistics information\n\
     s - stop server\n\
     h - this help message\n";

pub type StatisticsFn = Fn() -> BTreeMap<String, String> + Send + Sync;

pub struct Monitor {
    stop: Arc<AtomicBool>,
    fd: RawFd,
    thread: Option<JoinHandle<()>>,
}

fn information(stats: &Stats, statistics: &Arc<StatisticsFn>) -> String {
    let mut application = serde_json::Map::new();
    for (key, value) in (**statistics)() {
        application.insert(key, Value::String(value));
    }
    let mut info = serde_json::Map::new();
    info.insert("connections".to_string(),
        Value::from(stats.connections() as u64));
    info.insert("active-connections".to_string(),
        Value::from(stats.active() as u64));
    info.insert("application".to_string(), Value::Object(application));
    let mut text = serde_json::to_string_pretty(&Value::Object(info))
        .expect("statistics are serializable");
    text.push('\n');
    text
}

fn handle_client(mut sock: TcpStream, stats: &Stats,
    statistics: &Arc<StatisticsFn>, stop_server: &Arc<Fn() + Send + Sync>)
{
    let mut command = [0u8; 1];
    match sock.read(&mut command) {
        Ok(1) => {}
        _ => {
            let _ = sock.shutdown(Shutdown::Both);
            return;
        }
    }
    match command[0] {
        b'i' | b'I' => {
            let _ = sock.write_all(information(stats, statistics).as_bytes());
        }
        b's' | b'S' => {
            let _ = sock.write_all(b"Stopping...\n");
            (**stop_server)();
        }
        _ => {
            let _ = sock.write_all(HELP.as_bytes());
        }
    }
    let _ = sock.shutdown(Shutdown::Both);
}

/// Bind the monitor port and serve commands until `stop`.
pub fn spawn(port: u16, stats: Arc<Stats>, statistics: Arc<StatisticsFn>,
    stop_server: Arc<Fn() + Send + Sync>) -> io::Result<Monitor>
{
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!("monitor listening on port {}", port);
    let fd = listener.as_raw_fd();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let thread = thread::Builder::new()
        .name("httpd-monitor".to_string())
        .spawn(move || {
            loop {
                match listener.accept() {
                    Ok((sock, _peer)) => {
                        handle_client(sock, &stats, &statistics,
                            &stop_server);
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted
                        => {}
                    Err(_) => return,
                }
                if stop_flag.load(Ordering::SeqCst) {
                    return;
                }
            }
        })
        .expect("spawn monitor thread");
    Ok(Monitor {
        stop: stop,
        fd: fd,
        thread: Some(thread),
    })
}

impl Monitor {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        unsafe {
            libc::shutdown(self.fd, libc::SHUT_RDWR);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
