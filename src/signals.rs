//! Process-wide signal handling through a self-pipe.
//!
//! The native handler only writes the signal number into a pipe; a
//! dispatch thread reads it and applies the registered action to every
//! registered server. This keeps the async-signal-safe part down to a
//! single `write` call.

use std::io;
use std::mem;
use std::ptr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;

use libc;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Stop,
    Reload,
    Ignore,
}

/// What a registered server exposes to the signal dispatcher.
pub struct Target {
    pub id: usize,
    pub stop: Box<Fn() + Send + Sync>,
    pub reload: Box<Fn() + Send + Sync>,
}

const MAX_SIGNAL: usize = 32;

static WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static READ_FD: AtomicI32 = AtomicI32::new(-1);
static DISPATCH_STARTED: AtomicBool = AtomicBool::new(false);
static ACTIONS: Mutex<[Option<Action>; MAX_SIGNAL]> =
    Mutex::new([None; MAX_SIGNAL]);
static TARGETS: Mutex<Vec<Target>> = Mutex::new(Vec::new());

extern "C" fn handle_signal(signal: libc::c_int) {
    let fd = WRITE_FD.load(Ordering::SeqCst);
    if fd != -1 {
        unsafe {
            libc::write(fd, &signal as *const libc::c_int
                as *const libc::c_void,
                mem::size_of::<libc::c_int>());
        }
    }
}

fn dispatch_loop(read_fd: libc::c_int) {
    loop {
        let mut signal: libc::c_int = 0;
        let bytes = unsafe {
            libc::read(read_fd, &mut signal as *mut libc::c_int
                as *mut libc::c_void,
                mem::size_of::<libc::c_int>())
        };
        if bytes <= 0 {
            return;
        }
        let action = {
            let actions = ACTIONS.lock().expect("signal lock");
            if signal < 0 || signal as usize >= MAX_SIGNAL {
                continue;
            }
            actions[signal as usize]
        };
        let action = match action {
            Some(action) => action,
            None => continue,
        };
        info!("received signal {}, action: {:?}", signal, action);
        let targets = TARGETS.lock().expect("signal lock");
        for target in targets.iter() {
            match action {
                Action::Stop => (target.stop)(),
                Action::Reload => (target.reload)(),
                Action::Ignore => {}
            }
        }
    }
}

fn ensure_pipe() -> io::Result<()> {
    if WRITE_FD.load(Ordering::SeqCst) != -1 {
        return Ok(());
    }
    let mut fds = [0 as libc::c_int; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    unsafe {
        libc::fcntl(fds[0], libc::F_SETFD, libc::FD_CLOEXEC);
        libc::fcntl(fds[1], libc::F_SETFD, libc::FD_CLOEXEC);
        // the write side must never block inside a signal handler
        let flags = libc::fcntl(fds[1], libc::F_GETFL);
        libc::fcntl(fds[1], libc::F_SETFL, flags | libc::O_NONBLOCK);
    }
    READ_FD.store(fds[0], Ordering::SeqCst);
    WRITE_FD.store(fds[1], Ordering::SeqCst);
    Ok(())
}

/// Start the dispatch thread reading the signal pipe.
///
/// Separate from registration so a daemonizing process can install the
/// handlers early and start the (fork-unsafe) thread after forking.
/// Calling it more than once is harmless.
pub fn start_dispatch() {
    if DISPATCH_STARTED.swap(true, Ordering::SeqCst) {
        return;
    }
    let read_fd = READ_FD.load(Ordering::SeqCst);
    if read_fd == -1 {
        DISPATCH_STARTED.store(false, Ordering::SeqCst);
        return;
    }
    thread::Builder::new()
        .name("httpd-signals".to_string())
        .spawn(move || dispatch_loop(read_fd))
        .expect("spawn signal thread");
}

fn register(signal: libc::c_int, action: Action) -> io::Result<()> {
    if signal < 0 || signal as usize >= MAX_SIGNAL {
        return Err(io::Error::new(io::ErrorKind::InvalidInput,
            "signal number out of range"));
    }
    ensure_pipe()?;
    {
        let mut actions = ACTIONS.lock().expect("signal lock");
        if actions[signal as usize].is_some() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists,
                "signal is already registered"));
        }
        actions[signal as usize] = Some(action);
    }
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = handle_signal as usize;
        libc::sigfillset(&mut sa.sa_mask);
        if libc::sigaction(signal, &sa, ptr::null_mut()) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Stop every registered server when `signal` arrives.
pub fn register_stop(signal: libc::c_int) -> io::Result<()> {
    register(signal, Action::Stop)
}

/// Reload every registered server when `signal` arrives.
pub fn register_reload(signal: libc::c_int) -> io::Result<()> {
    register(signal, Action::Reload)
}

/// Swallow `signal` without any action.
pub fn register_ignore(signal: libc::c_int) -> io::Result<()> {
    register(signal, Action::Ignore)
}

/// Add a server to the process-wide dispatch list.
pub fn add_server(target: Target) {
    TARGETS.lock().expect("signal lock").push(target);
}

/// Remove a previously added server.
pub fn remove_server(id: usize) {
    TARGETS.lock().expect("signal lock").retain(|t| t.id != id);
}
