//! Server lifecycle: CLI, config, daemonization, worker startup, stop.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{stderr, stdout, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use argparse::{ArgumentParser, StoreOption, StoreTrue};
use env_logger;
use libc;
use log::LevelFilter;
use serde_json::Value;

use config::{self, ConfigError, ServerConfig};
use monitor::{self, Monitor, StatisticsFn};
use server::{self, Acceptors, Match, RequestStream, Router, Stats};
use server::{WorkerPool, parse_bind};
use signals;


static NEXT_SERVER_ID: AtomicUsize = AtomicUsize::new(0);

struct StopSignal {
    requested: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn new() -> StopSignal {
        StopSignal {
            requested: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn request(&self) {
        let mut requested = self.requested.lock().expect("stop lock");
        *requested = true;
        self.cond.notify_all();
    }

    fn wait(&self) {
        let mut requested = self.requested.lock().expect("stop lock");
        while !*requested {
            requested = self.cond.wait(requested).expect("stop lock");
        }
    }
}

/// Pid file with stale-instance detection; unlinked on drop.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn new(path: &Path) -> PidFile {
        PidFile { path: path.to_path_buf() }
    }

    /// Remove a pid file left by a process that no longer exists.
    ///
    /// Returns false when the recorded process is still alive.
    fn remove_stale(&self) -> bool {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return true,
        };
        let pid: libc::pid_t = match text.trim().parse() {
            Ok(pid) => pid,
            Err(_) => return fs::remove_file(&self.path).is_ok(),
        };
        let alive = unsafe { libc::kill(pid, 0) } == 0
            || ::std::io::Error::last_os_error().raw_os_error()
                != Some(libc::ESRCH);
        if alive {
            return false;
        }
        fs::remove_file(&self.path).is_ok()
    }

    fn write(&self) -> ::std::io::Result<()> {
        fs::write(&self.path, format!("{}", process::id()))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn parse_level(name: &str) -> Option<LevelFilter> {
    match &name.to_ascii_lowercase()[..] {
        "error" => Some(LevelFilter::Error),
        "warning" | "warn" => Some(LevelFilter::Warn),
        "notice" | "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        "off" => Some(LevelFilter::Off),
        _ => None,
    }
}

fn init_logger(config: &ServerConfig) -> Result<(), String> {
    let logger = match config.logger {
        Some(ref logger) => logger,
        None => return Err("\"logger\" field is missed".to_string()),
    };
    let level = match parse_level(&logger.level) {
        Some(level) => level,
        None => return Err(format!("unknown log level {:?}", logger.level)),
    };
    let mut builder = env_logger::Builder::new();
    builder.filter(None, level);
    if let Ok(spec) = env::var("RUST_LOG") {
        builder.parse(&spec);
    }
    // ignore failure so embedding applications may install their own
    let _ = builder.try_init();
    Ok(())
}

/// An HTTP server assembled from routes, ready to run as a daemon.
///
/// Register handlers with `add_handler`, then hand control to `run`:
///
/// ```ignore
/// let mut server = Server::new();
/// process::exit(server.run(env::args().collect(), |server, config| {
///     server.add_handler(
///         Match::new().exact_path("/ping").methods(&["GET"]),
///         || Box::new(SimpleRequestStream::new(Ping)));
///     Ok(())
/// }));
/// ```
pub struct Server {
    id: usize,
    router: Router,
    statistics: Arc<StatisticsFn>,
    stop: Arc<StopSignal>,
}

impl Server {
    pub fn new() -> Server {
        Server {
            id: NEXT_SERVER_ID.fetch_add(1, Ordering::SeqCst),
            router: Router::new(),
            statistics: Arc::new(BTreeMap::new),
            stop: Arc::new(StopSignal::new()),
        }
    }

    /// Register a handler factory with its match options.
    pub fn add_handler<F>(&mut self, options: Match, factory: F)
        where F: Fn() -> Box<RequestStream> + Send + Sync + 'static
    {
        self.router.add(options, factory);
    }

    /// Provide the application statistics shown by the monitor.
    pub fn set_statistics<F>(&mut self, statistics: F)
        where F: Fn() -> BTreeMap<String, String> + Send + Sync + 'static
    {
        self.statistics = Arc::new(statistics);
    }

    /// Ask the server to shut down; `run` returns once everything
    /// stopped.
    pub fn stop(&self) {
        self.stop.request();
    }

    /// Configuration reload hook; there is nothing to re-read yet.
    pub fn reload(&self) {
        info!("reload requested");
    }

    /// Parse arguments, read the config, call the initialize hook and
    /// serve until stopped. Returns the process exit code.
    pub fn run<F>(&mut self, args: Vec<String>, init: F) -> i32
        where F: FnOnce(&mut Server, &Value)
            -> Result<(), Box<::std::error::Error>>
    {
        let mut config_path: Option<String> = None;
        let mut daemonize = false;
        let mut pid_path: Option<String> = None;
        {
            let mut ap = ArgumentParser::new();
            ap.set_description("Streaming HTTP server");
            ap.refer(&mut config_path)
                .add_option(&["-c", "--config"], StoreOption,
                    "config path (required)");
            ap.refer(&mut daemonize)
                .add_option(&["-d", "--daemonize"], StoreTrue,
                    "daemonize on start");
            ap.refer(&mut pid_path)
                .add_option(&["-p", "--pidfile"], StoreOption,
                    "location of a pid file");
            match ap.parse(args, &mut stdout(), &mut stderr()) {
                Ok(()) => {}
                Err(0) => return 0,
                Err(_) => return -1,
            }
        }
        let config_path = match config_path {
            Some(path) => path,
            None => {
                writeln!(&mut stderr(), "\"config\" is required").ok();
                return -1;
            }
        };

        let config = match config::read_config(&config_path) {
            Ok(config) => config,
            Err(ConfigError::Read(e)) => {
                writeln!(&mut stderr(), "Can't open file {:?}: {}",
                    config_path, e).ok();
                return -2;
            }
            Err(ConfigError::Parse(e)) => {
                writeln!(&mut stderr(), "Parse error: {}", e).ok();
                return -3;
            }
        };

        if let Err(message) = init_logger(&config) {
            writeln!(&mut stderr(), "Failed to initialize logger: {}",
                message).ok();
            return -8;
        }

        if config.application.is_null() {
            error!("\"application\" field is missed");
            return -5;
        }
        if let Err(e) = init(&mut *self, &config.application) {
            error!("Failed to initialize application: {}", e);
            return -5;
        }

        if config.endpoints.is_empty() {
            error!("\"endpoints\" field is missed or empty");
            return -4;
        }

        let mut acceptors = Acceptors::new();
        for endpoint in &config.endpoints {
            let addr = match parse_bind(endpoint) {
                Ok(addr) => addr,
                Err(e) => {
                    error!("invalid endpoint {:?}: {}", endpoint, e);
                    return -6;
                }
            };
            if let Err(e) = acceptors.bind(addr, config.backlog) {
                error!("failed to bind {:?}: {}", endpoint, e);
                return -6;
            }
        }

        let daemon_config = config.daemon.clone();
        let should_fork = daemonize
            || daemon_config.as_ref().map(|d| d.fork).unwrap_or(false);
        let mut pid_file = None;
        if should_fork {
            match self.daemonize(pid_path.as_ref().map(|p| Path::new(p))) {
                Ok(file) => pid_file = file,
                Err(message) => {
                    writeln!(&mut stderr(), "{}", message).ok();
                    return -1;
                }
            }
            if let Some(uid) = daemon_config.and_then(|d| d.uid) {
                if unsafe { libc::setuid(uid as libc::uid_t) } == -1 {
                    let errno = ::std::io::Error::last_os_error()
                        .raw_os_error().unwrap_or(1);
                    error!("setuid({}) failed, errno: {}", uid, errno);
                    return errno;
                }
            }
        }

        let core_config = {
            let mut core = server::Config::new();
            core.buffer_size(config.buffer_size);
            core.safe_mode(config.safe_mode);
            if let Some(ref name) = config.request_header {
                core.request_header(name);
            }
            if let Some(ref name) = config.trace_header {
                core.trace_header(name);
            }
            core.done()
        };
        let router = Arc::new(mem::replace(&mut self.router, Router::new()));
        let stats = Stats::new();

        let mut pool = WorkerPool::new(config.threads, &core_config,
            &router, &stats);
        acceptors.start(&pool.dispatcher());

        let mut monitor: Option<Monitor> = None;
        if let Some(port) = config.monitor_port {
            let stop = self.stop.clone();
            match monitor::spawn(port, stats.clone(),
                self.statistics.clone(),
                Arc::new(move || stop.request()))
            {
                Ok(running) => monitor = Some(running),
                Err(e) => {
                    error!("failed to start monitor on port {}: {}",
                        port, e);
                    acceptors.stop();
                    pool.stop();
                    return -7;
                }
            }
        }

        {
            let stop = self.stop.clone();
            signals::add_server(signals::Target {
                id: self.id,
                stop: Box::new(move || stop.request()),
                reload: Box::new(|| info!("reload requested")),
            });
        }
        signals::start_dispatch();

        info!("server started, threads: {}, endpoints: {:?}",
            config.threads, config.endpoints);
        self.stop.wait();
        info!("server stopping");

        signals::remove_server(self.id);
        acceptors.stop();
        if let Some(mut monitor) = monitor {
            monitor.stop();
        }
        pool.stop();
        drop(pid_file);
        0
    }

    fn daemonize(&self, pid_path: Option<&Path>)
        -> Result<Option<PidFile>, String>
    {
        let mut pid_file = None;
        if let Some(path) = pid_path {
            let file = PidFile::new(path);
            if !file.remove_stale() {
                // do not unlink the live instance's pid file
                mem::forget(file);
                return Err("daemon initialization failed: another \
                            process is active".to_string());
            }
            pid_file = Some(file);
        }
        match unsafe { libc::fork() } {
            -1 => {
                if let Some(file) = pid_file {
                    mem::forget(file);
                }
                Err("daemon initialization failed: failed to fork to \
                     background".to_string())
            }
            0 => {
                unsafe {
                    libc::setsid();
                }
                if let Some(ref file) = pid_file {
                    if file.write().is_err() {
                        return Err("daemon initialization failed: can \
                                    not write pid file".to_string());
                    }
                }
                Ok(pid_file)
            }
            child => {
                println!("Children pid: {}", child);
                process::exit(0);
            }
        }
    }
}

/// Run a server with the default signal setup: stop on INT/TERM/ALRM,
/// reload on HUP, ignore USR1/USR2.
pub fn run_server<F>(init: F) -> i32
    where F: FnOnce(&mut Server, &Value)
        -> Result<(), Box<::std::error::Error>>
{
    let mut server = Server::new();
    let _ = signals::register_stop(libc::SIGINT);
    let _ = signals::register_stop(libc::SIGTERM);
    let _ = signals::register_stop(libc::SIGALRM);
    let _ = signals::register_reload(libc::SIGHUP);
    let _ = signals::register_ignore(libc::SIGUSR1);
    let _ = signals::register_ignore(libc::SIGUSR2);
    server.run(env::args().collect(), init)
}
