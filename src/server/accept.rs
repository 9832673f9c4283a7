//! Listeners and the accept / worker-pool plumbing.
//!
//! Every bind endpoint gets an acceptor thread doing blocking accepts;
//! accepted sockets are handed round-robin to worker threads, each of
//! which runs its own event loop and owns its connections for their
//! entire life.

use std::fs;
use std::io;
use std::net::{self, SocketAddr, ToSocketAddrs};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net as unix;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use futures::Stream;
use futures::sync::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use libc;
use net2::TcpBuilder;
use tokio_core::net::TcpStream;
use tokio_core::reactor::Core;
use tokio_uds::UnixStream;

use super::{Config, Connection, Router, Stats};


/// A parsed bind string: `host:port` or `unix:/path/to/socket`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

pub fn parse_bind(spec: &str) -> io::Result<BindAddr> {
    if spec.starts_with("unix:") {
        let path = &spec[5..];
        if path.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput,
                "empty unix socket path"));
        }
        return Ok(BindAddr::Unix(PathBuf::from(path)));
    }
    spec.to_socket_addrs()?
        .next()
        .map(BindAddr::Tcp)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput,
            format!("cannot resolve {:?}", spec)))
}

enum Sock {
    Tcp(net::TcpStream),
    Unix(unix::UnixStream),
}

/// An accepted socket on its way to a worker.
pub struct Accepted {
    sock: Sock,
    local: String,
    peer: String,
}

struct PoolShared {
    senders: Mutex<Vec<UnboundedSender<Accepted>>>,
    next: AtomicUsize,
}

/// Round-robin handle the acceptor threads dispatch through.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<PoolShared>,
}

impl Dispatcher {
    fn dispatch(&self, conn: Accepted) {
        let senders = self.shared.senders.lock().expect("pool lock");
        if senders.is_empty() {
            // shutting down, drop the socket on the floor
            return;
        }
        let index = self.shared.next.fetch_add(1, Ordering::SeqCst)
            % senders.len();
        if senders[index].unbounded_send(conn).is_err() {
            error!("worker {} is gone, dropping accepted connection",
                index);
        }
    }
}

/// A fixed set of worker threads, each running one event loop.
///
/// The channel receiver keeps the loop alive (the work guard); dropping
/// the senders on stop ends the loops and aborts whatever connections
/// they still own.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(count: usize, cfg: &Arc<Config>, router: &Arc<Router>,
        stats: &Arc<Stats>) -> WorkerPool
    {
        assert!(count > 0);
        let mut senders = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = unbounded();
            senders.push(tx);
            let cfg = cfg.clone();
            let router = router.clone();
            let stats = stats.clone();
            let thread = thread::Builder::new()
                .name(format!("httpd-worker-{}", index))
                .spawn(move || worker_loop(rx, cfg, router, stats))
                .expect("spawn worker thread");
            threads.push(thread);
        }
        WorkerPool {
            shared: Arc::new(PoolShared {
                senders: Mutex::new(senders),
                next: AtomicUsize::new(0),
            }),
            threads: threads,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher { shared: self.shared.clone() }
    }

    /// Shut the workers down and wait for them.
    pub fn stop(&mut self) {
        self.shared.senders.lock().expect("pool lock").clear();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn worker_loop(rx: UnboundedReceiver<Accepted>, cfg: Arc<Config>,
    router: Arc<Router>, stats: Arc<Stats>)
{
    let mut core = Core::new().expect("create worker event loop");
    let handle = core.handle();
    let driver = rx.for_each(|accepted| {
        let Accepted { sock, local, peer } = accepted;
        match sock {
            Sock::Tcp(sock) => {
                let registered = match sock.set_nonblocking(true) {
                    Ok(()) => TcpStream::from_stream(sock, &handle),
                    Err(e) => Err(e),
                };
                match registered {
                    Ok(sock) => {
                        handle.spawn(Connection::new(sock, &cfg, &router,
                            &stats, local, peer));
                    }
                    Err(e) => {
                        error!("failed to register connection: {}", e);
                    }
                }
            }
            Sock::Unix(sock) => {
                let registered = match sock.set_nonblocking(true) {
                    Ok(()) => UnixStream::from_stream(sock, &handle),
                    Err(e) => Err(e),
                };
                match registered {
                    Ok(sock) => {
                        handle.spawn(Connection::new(sock, &cfg, &router,
                            &stats, local, peer));
                    }
                    Err(e) => {
                        error!("failed to register connection: {}", e);
                    }
                }
            }
        }
        Ok(())
    });
    core.run(driver).ok();
}

struct UnixGuard {
    listener: unix::UnixListener,
    path: PathBuf,
}

impl Drop for UnixGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

enum Bound {
    Tcp(net::TcpListener, String),
    Unix(UnixGuard, String),
}

/// Bound listening sockets plus the acceptor threads serving them.
///
/// Binding and accepting are two separate steps so that a daemonizing
/// server can fork between them: file descriptors survive the fork,
/// threads do not.
pub struct Acceptors {
    bound: Vec<Bound>,
    stop: Arc<AtomicBool>,
    fds: Vec<RawFd>,
    threads: Vec<JoinHandle<()>>,
}

impl Acceptors {
    pub fn new() -> Acceptors {
        Acceptors {
            bound: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            fds: Vec::new(),
            threads: Vec::new(),
        }
    }

    /// Bind an endpoint.
    pub fn bind(&mut self, addr: BindAddr, backlog: i32) -> io::Result<()> {
        match addr {
            BindAddr::Tcp(addr) => {
                let builder = match addr {
                    SocketAddr::V4(..) => TcpBuilder::new_v4()?,
                    SocketAddr::V6(..) => TcpBuilder::new_v6()?,
                };
                builder.reuse_address(true)?;
                builder.bind(&addr)?;
                let listener = builder.listen(backlog)?;
                let local = format!("{}", listener.local_addr()?);
                info!("listening on {}", local);
                self.fds.push(listener.as_raw_fd());
                self.bound.push(Bound::Tcp(listener, local));
            }
            BindAddr::Unix(path) => {
                // a leftover socket file from a previous run would make
                // bind fail
                let _ = fs::remove_file(&path);
                let listener = unix::UnixListener::bind(&path)?;
                fs::set_permissions(&path,
                    fs::Permissions::from_mode(0o666))?;
                unsafe {
                    libc::listen(listener.as_raw_fd(), backlog as libc::c_int);
                }
                let local = format!("unix:{}", path.display());
                info!("listening on {}", local);
                self.fds.push(listener.as_raw_fd());
                self.bound.push(Bound::Unix(UnixGuard {
                    listener: listener,
                    path: path,
                }, local));
            }
        }
        Ok(())
    }

    /// Start one acceptor thread per bound listener.
    pub fn start(&mut self, dispatcher: &Dispatcher) {
        for bound in self.bound.drain(..) {
            let dispatcher = dispatcher.clone();
            let stop = self.stop.clone();
            let thread = thread::Builder::new()
                .name("httpd-acceptor".to_string())
                .spawn(move || match bound {
                    Bound::Tcp(listener, local) => {
                        tcp_accept_loop(listener, local, dispatcher, stop)
                    }
                    Bound::Unix(guard, local) => {
                        unix_accept_loop(guard, local, dispatcher, stop)
                    }
                })
                .expect("spawn acceptor thread");
            self.threads.push(thread);
        }
    }

    /// Unblock and join every acceptor thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for &fd in &self.fds {
            unsafe {
                libc::shutdown(fd, libc::SHUT_RDWR);
            }
        }
        self.fds.clear();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn tcp_accept_loop(listener: net::TcpListener, local: String,
    dispatcher: Dispatcher, stop: Arc<AtomicBool>)
{
    loop {
        match listener.accept() {
            Ok((sock, peer)) => {
                dispatcher.dispatch(Accepted {
                    sock: Sock::Tcp(sock),
                    local: local.clone(),
                    peer: peer.to_string(),
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted ||
                          e.kind() == io::ErrorKind::ConnectionAborted => {}
            Err(e) => {
                if !stop.load(Ordering::SeqCst) {
                    error!("accept on {} failed: {}", local, e);
                }
                return;
            }
        }
        if stop.load(Ordering::SeqCst) {
            return;
        }
    }
}

fn unix_accept_loop(guard: UnixGuard, local: String,
    dispatcher: Dispatcher, stop: Arc<AtomicBool>)
{
    loop {
        match guard.listener.accept() {
            Ok((sock, _peer)) => {
                dispatcher.dispatch(Accepted {
                    sock: Sock::Unix(sock),
                    local: local.clone(),
                    peer: "-".to_string(),
                });
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted ||
                          e.kind() == io::ErrorKind::ConnectionAborted => {}
            Err(e) => {
                if !stop.load(Ordering::SeqCst) {
                    error!("accept on {} failed: {}", local, e);
                }
                return;
            }
        }
        if stop.load(Ordering::SeqCst) {
            return;
        }
    }
}
