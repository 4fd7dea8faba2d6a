//! Configuration for the [TelemetrySink] and the HTTP server in front of it. Values are validated
//! once, when the config is created, and never change afterwards.
//!
//! [TelemetrySink]: crate::TelemetrySink

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_LOG_PATH: &str = "telemetry.log";
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_FLUSH_INTERVAL_SECS: f64 = 0.5;
pub const DEFAULT_RATE_LIMIT: usize = 10240;
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Settings of the ingestion sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    /// Append-only file the buffered records are written to.
    pub(crate) log_path: PathBuf,
    /// Byte ceiling of the in-memory buffer. An append that would cross it flushes first.
    pub(crate) buffer_size: usize,
    /// Time between two timer driven flushes.
    pub(crate) flush_interval: Duration,
    /// Bytes admitted per one second window.
    pub(crate) rate_limit: usize,
}

impl SinkConfig {
    pub fn new(
        log_path: impl Into<PathBuf>,
        buffer_size: usize,
        flush_interval_secs: f64,
        rate_limit: usize,
    ) -> Result<Self> {
        let log_path = log_path.into();
        if log_path.as_os_str().is_empty() {
            return Err(Error::Config("log path must not be empty".to_string()));
        }
        if buffer_size == 0 {
            return Err(Error::Config("buffer size must be positive".to_string()));
        }
        if rate_limit == 0 {
            return Err(Error::Config("rate limit must be positive".to_string()));
        }
        if !flush_interval_secs.is_finite() || flush_interval_secs <= 0.0 {
            return Err(Error::Config(format!(
                "flush interval must be a positive number of seconds, got {flush_interval_secs}"
            )));
        }
        let flush_interval = Duration::try_from_secs_f64(flush_interval_secs)
            .map_err(|e| Error::Config(format!("flush interval {flush_interval_secs}: {e}")))?;
        if flush_interval.is_zero() {
            return Err(Error::Config(format!(
                "flush interval {flush_interval_secs} is below the timer resolution"
            )));
        }

        Ok(Self {
            log_path,
            buffer_size,
            flush_interval,
            rate_limit,
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn rate_limit(&self) -> usize {
        self.rate_limit
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_interval: Duration::from_secs_f64(DEFAULT_FLUSH_INTERVAL_SECS),
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

/// Settings of the HTTP ingress server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub(crate) bind_addr: SocketAddr,
    /// Upper bound on how long in-flight requests may take once shutdown has started.
    pub(crate) drain_timeout: Duration,
}

impl ServerConfig {
    /// Parses a `host:port` bind address.
    pub fn new(bind: &str) -> Result<Self> {
        let bind_addr = bind
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {bind}: {e}")))?;
        Ok(Self {
            bind_addr,
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}
