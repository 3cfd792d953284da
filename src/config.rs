//! Configuration for Gibson
//!
//! Centralized configuration with the server's defaults, plus a parser for
//! the classic `key value` configuration file format:
//!
//! ```text
//! # gibson.conf
//! address     127.0.0.1
//! port        10128
//! max_memory  128m
//! gc_ratio    10m
//! ```
//!
//! Size values accept `k`/`m`/`g` suffixes (powers of 1024) and time values
//! accept `s`/`m`/`h`/`d` suffixes. Unknown keys are logged and skipped so
//! that a newer configuration file still loads on an older server.

use std::path::{Path, PathBuf};

use crate::error::{GibsonError, Result};

/// Main configuration for a Gibson server instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------
    /// If set, listen on this Unix domain socket path instead of TCP
    pub unix_socket: Option<PathBuf>,

    /// TCP bind address
    pub address: String,

    /// TCP port
    pub port: u16,

    // -------------------------------------------------------------------------
    // Client limits
    // -------------------------------------------------------------------------
    /// Seconds a client may stay silent before it is dropped
    pub max_idletime: u64,

    /// Hard cap on concurrent connections
    pub max_clients: usize,

    /// Max size in bytes of a single request frame
    pub max_request_size: usize,

    /// Max size in bytes of a single reply frame
    pub max_response_size: usize,

    // -------------------------------------------------------------------------
    // Data limits
    // -------------------------------------------------------------------------
    /// Max key length in bytes
    pub max_key_size: usize,

    /// Max value length in bytes
    pub max_value_size: usize,

    /// Memory budget in bytes; exceeding it triggers pressure eviction
    pub max_memory: usize,

    /// Upper bound in seconds for any item TTL
    pub max_item_ttl: u64,

    /// Minimum value size in bytes before LZF compression is attempted
    pub compression: usize,

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------
    /// Maintenance cron tick in milliseconds
    pub cron_period: u64,

    /// Idle age in seconds after which an item is eligible for pressure
    /// eviction
    pub gc_ratio: u64,

    // -------------------------------------------------------------------------
    // Process lifecycle (recognized and carried; handled by the environment)
    // -------------------------------------------------------------------------
    /// Log verbosity: "debug", "info", "warn" or "error"
    pub loglevel: String,

    /// Log file path, if any (stdout otherwise)
    pub logfile: Option<PathBuf>,

    /// Pid file path, if any
    pub pidfile: Option<PathBuf>,

    /// Whether the launcher should daemonize the process
    pub daemonize: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unix_socket: None,
            address: "127.0.0.1".to_string(),
            port: 10128,
            max_idletime: 30,
            max_clients: 255,
            max_request_size: 10 * 1024 * 1024,
            max_response_size: 25 * 1024 * 1024,
            max_key_size: 8 * 1024,
            max_value_size: 1024 * 1024,
            max_memory: 128 * 1024 * 1024,
            max_item_ttl: 30 * 24 * 3600,
            compression: 4 * 1024,
            cron_period: 100,
            gc_ratio: 600,
            loglevel: "info".to_string(),
            logfile: None,
            pidfile: None,
            daemonize: false,
        }
    }
}

impl Config {
    /// Loads a configuration file, starting from the defaults.
    ///
    /// Lines are `key value` pairs; `#` starts a comment and blank lines are
    /// ignored. Unknown keys are skipped with a warning.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&contents)
    }

    /// Parses configuration file contents. See [`Config::from_file`].
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self> {
        let mut config = Config::default();

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k.trim(), v.trim()),
                None => {
                    return Err(GibsonError::Config(format!(
                        "line {}: expected 'key value', got '{}'",
                        lineno + 1,
                        line
                    )))
                }
            };

            config.apply(key, value, lineno + 1)?;
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str, lineno: usize) -> Result<()> {
        let bad = |what: &str| {
            GibsonError::Config(format!("line {}: invalid {} '{}'", lineno, what, value))
        };

        match key {
            "unix_socket" => self.unix_socket = Some(PathBuf::from(value)),
            "address" => self.address = value.to_string(),
            "port" => self.port = value.parse().map_err(|_| bad("port"))?,
            "max_idletime" => self.max_idletime = parse_time(value).ok_or_else(|| bad("time"))?,
            "max_clients" => self.max_clients = value.parse().map_err(|_| bad("count"))?,
            "max_request_size" => {
                self.max_request_size = parse_size(value).ok_or_else(|| bad("size"))?
            }
            "max_response_size" => {
                self.max_response_size = parse_size(value).ok_or_else(|| bad("size"))?
            }
            "max_key_size" => self.max_key_size = parse_size(value).ok_or_else(|| bad("size"))?,
            "max_value_size" => {
                self.max_value_size = parse_size(value).ok_or_else(|| bad("size"))?
            }
            "max_memory" => self.max_memory = parse_size(value).ok_or_else(|| bad("size"))?,
            "max_item_ttl" => self.max_item_ttl = parse_time(value).ok_or_else(|| bad("time"))?,
            "compression" => self.compression = parse_size(value).ok_or_else(|| bad("size"))?,
            "cron_period" => self.cron_period = value.parse().map_err(|_| bad("period"))?,
            "gc_ratio" => self.gc_ratio = parse_time(value).ok_or_else(|| bad("time"))?,
            "loglevel" => self.loglevel = value.to_string(),
            "logfile" => self.logfile = Some(PathBuf::from(value)),
            "pidfile" => self.pidfile = Some(PathBuf::from(value)),
            "daemonize" => self.daemonize = matches!(value, "1" | "yes" | "true"),
            // logflushrate shaped the C logger's buffering; the tracing
            // subscriber flushes on its own
            "logflushrate" => {}
            _ => {
                tracing::warn!(key = key, line = lineno, "Unknown configuration key, skipping");
            }
        }

        Ok(())
    }

    /// Returns the TCP bind address as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Parses a byte size with an optional `k`/`m`/`g` suffix (powers of 1024).
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let (digits, mult) = match s.as_bytes().last()? {
        b'k' | b'K' => (&s[..s.len() - 1], 1024),
        b'm' | b'M' => (&s[..s.len() - 1], 1024 * 1024),
        b'g' | b'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(mult)
}

/// Parses a time span in seconds with an optional `s`/`m`/`h`/`d` suffix.
pub fn parse_time(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, mult) = match s.as_bytes().last()? {
        b's' | b'S' => (&s[..s.len() - 1], 1),
        b'm' | b'M' => (&s[..s.len() - 1], 60),
        b'h' | b'H' => (&s[..s.len() - 1], 3600),
        b'd' | b'D' => (&s[..s.len() - 1], 86400),
        _ => (s, 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(mult)
}
