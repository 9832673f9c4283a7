//! The JSON configuration file.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde_json::{self, Value};


fn default_threads() -> usize {
    2
}

fn default_buffer_size() -> usize {
    8192
}

fn default_backlog() -> i32 {
    128
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub uid: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggerConfig {
    pub level: String,
    /// Accepted for compatibility; only the level is honored.
    #[serde(default)]
    pub frontends: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(rename = "monitor-port", default)]
    pub monitor_port: Option<u16>,
    #[serde(default)]
    pub daemon: Option<DaemonConfig>,
    #[serde(default)]
    pub safe_mode: bool,
    #[serde(default)]
    pub request_header: Option<String>,
    #[serde(default)]
    pub trace_header: Option<String>,
    #[serde(default)]
    pub logger: Option<LoggerConfig>,
    /// Opaque sub-tree forwarded to the application's initialize hook.
    #[serde(default)]
    pub application: Value,
}

quick_error! {
    #[derive(Debug)]
    pub enum ConfigError {
        Read(err: io::Error) {
            description("cannot read config file")
            display("cannot read config file: {}", err)
            from()
        }
        Parse(err: serde_json::Error) {
            description("cannot parse config file")
            display("cannot parse config file: {}", err)
            from()
        }
    }
}

pub fn read_config<P: AsRef<Path>>(path: P)
    -> Result<ServerConfig, ConfigError>
{
    let mut text = String::new();
    File::open(path)?.read_to_string(&mut text)?;
    let config = serde_json::from_str(&text)?;
    Ok(config)
}

#[cfg(test)]
mod test {
    use serde_json;
    use super::ServerConfig;

    #[test]
    fn minimal() {
        let config: ServerConfig = serde_json::from_str(r#"
            {"endpoints": ["127.0.0.1:8080"]}
        "#).unwrap();
        assert_eq!(config.endpoints, vec!["127.0.0.1:8080"]);
        assert_eq!(config.threads, 2);
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.backlog, 128);
        assert_eq!(config.monitor_port, None);
        assert!(!config.safe_mode);
        assert!(config.application.is_null());
    }

    #[test]
    fn full() {
        let config: ServerConfig = serde_json::from_str(r#"
            {
                "endpoints": ["0.0.0.0:80", "unix:/run/httpd.sock"],
                "threads": 8,
                "buffer_size": 65536,
                "backlog": 512,
                "monitor-port": 20000,
                "daemon": {"fork": true, "uid": 1000},
                "safe_mode": true,
                "request_header": "X-Request",
                "trace_header": "X-Trace",
                "logger": {"level": "info", "frontends": []},
                "application": {"greeting": "hello"}
            }
        "#).unwrap();
        assert_eq!(config.threads, 8);
        assert_eq!(config.monitor_port, Some(20000));
        let daemon = config.daemon.unwrap();
        assert!(daemon.fork);
        assert_eq!(daemon.uid, Some(1000));
        assert_eq!(config.request_header.as_ref().unwrap(), "X-Request");
        assert_eq!(config.logger.unwrap().level, "info");
        assert_eq!(config.application["greeting"], "hello");
    }
}
