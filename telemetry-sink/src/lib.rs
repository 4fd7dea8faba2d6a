//! Telemetry sink. Producers `POST` JSON messages which are admitted against a per-second byte
//! budget, buffered in memory and appended as newline delimited JSON to a log file, periodically
//! and on shutdown.

mod app;
mod config;
mod error;
mod sink;

pub use app::{AppState, router, serve};
pub use config::{
    DEFAULT_BIND_ADDR, DEFAULT_BUFFER_SIZE, DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_LOG_PATH,
    DEFAULT_RATE_LIMIT, ServerConfig, SinkConfig,
};
pub use error::{Error, Result};
pub use sink::{FlushLoop, Message, TelemetrySink};
