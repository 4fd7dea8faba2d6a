//! [TelemetrySink] accepts telemetry messages, drops them once the per-second byte budget is used
//! up, and keeps the accepted records in an in-memory buffer which is appended to the log file
//! - eagerly, when an append would push the buffer past its size ceiling,
//! - periodically, by the [FlushLoop] running in the background,
//! - once more on shutdown, after the [FlushLoop] has exited.
//!
//! Records reach the file in the order they entered the buffer. A failed write keeps the buffer
//! intact so the next flush retries it.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SinkConfig;
use crate::error::{Error, Result};
use rate_limit::RateWindow;

mod rate_limit;

/// A telemetry message as sent by a producer. The sink never looks inside it.
pub type Message = Map<String, Value>;

/// Single line JSON with a space after every `,` and `:`. Non-ASCII text is written as raw UTF-8.
struct RecordFormatter;

impl Formatter for RecordFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

/// Encodes a message as a single newline terminated JSON line. The encoded length is what the
/// message costs against the rate limit.
fn encode_record(message: &Message) -> Result<Vec<u8>> {
    let mut record = Vec::with_capacity(128);
    let mut serializer = serde_json::Serializer::with_formatter(&mut record, RecordFormatter);
    message
        .serialize(&mut serializer)
        .map_err(|e| Error::Encode(e.to_string()))?;
    record.push(b'\n');
    Ok(record)
}

/// Records waiting to be written.
struct Buffer {
    bytes: Vec<u8>,
    last_flush: Instant,
    /// Set under the lock by the final flush; nothing is appended afterwards.
    closed: bool,
}

struct Inner {
    config: SinkConfig,
    // held only for the admission check, never across an await
    rate_window: parking_lot::Mutex<RateWindow>,
    buffer: tokio::sync::Mutex<Buffer>,
    /// Fast path rejection once shutdown has started.
    closing: AtomicBool,
}

/// Handle to the sink. Cloning is cheap and every clone shares the same buffer and rate window.
#[derive(Clone)]
pub struct TelemetrySink {
    inner: Arc<Inner>,
}

impl TelemetrySink {
    /// Creates the sink and spawns its [FlushLoop]. Does no I/O, but has to be called from within
    /// a tokio runtime.
    pub fn new(config: SinkConfig) -> (Self, FlushLoop) {
        let now = Instant::now();
        let sink = Self {
            inner: Arc::new(Inner {
                rate_window: parking_lot::Mutex::new(RateWindow::new(config.rate_limit, now)),
                buffer: tokio::sync::Mutex::new(Buffer {
                    bytes: Vec::with_capacity(config.buffer_size),
                    last_flush: now,
                    closed: false,
                }),
                closing: AtomicBool::new(false),
                config,
            }),
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_flush_loop(sink.clone(), cancel.clone()));

        (
            sink.clone(),
            FlushLoop {
                sink,
                cancel,
                handle,
            },
        )
    }

    pub fn config(&self) -> &SinkConfig {
        &self.inner.config
    }

    /// Ingests one message. Returns `Ok(false)` if the message would exceed the byte budget of
    /// the current window, in which case it is dropped and nothing is recorded.
    ///
    /// Fails with [Error::ShuttingDown] once shutdown has begun, and with [Error::Persistence]
    /// if the eager flush needed to make room fails; the message is not buffered in either case.
    pub async fn add_message(&self, message: &Message) -> Result<bool> {
        if self.inner.closing.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let record = encode_record(message)?;

        let admitted_at = Instant::now();
        let admitted = self
            .inner
            .rate_window
            .lock()
            .try_admit(record.len(), admitted_at);
        if !admitted {
            warn!(
                record_len = record.len(),
                rate_limit = self.inner.config.rate_limit,
                "Incoming rate exceeded, message dropped"
            );
            return Ok(false);
        }

        let mut buffer = self.inner.buffer.lock().await;
        if buffer.closed {
            drop(buffer);
            self.refund(record.len(), admitted_at);
            return Err(Error::ShuttingDown);
        }

        if buffer.bytes.len() + record.len() > self.inner.config.buffer_size
            && let Err(e) = self.write_out(&mut buffer).await
        {
            drop(buffer);
            self.refund(record.len(), admitted_at);
            return Err(e);
        }

        buffer.bytes.extend_from_slice(&record);
        Ok(true)
    }

    /// Appends the whole buffer to the log file and clears it. An empty buffer is a no-op.
    pub async fn flush(&self) -> Result<()> {
        let mut buffer = self.inner.buffer.lock().await;
        self.write_out(&mut buffer).await
    }

    fn refund(&self, len: usize, admitted_at: Instant) {
        self.inner.rate_window.lock().refund(len, admitted_at);
    }

    /// Final flush. Closes the buffer under the same lock so no append can slip in behind it.
    async fn close_and_flush(&self) -> Result<()> {
        let mut buffer = self.inner.buffer.lock().await;
        buffer.closed = true;
        self.write_out(&mut buffer).await
    }

    /// Writes the buffer out while the caller holds the lock. The file is opened and closed on
    /// every call. The buffer is only cleared after the write has fully succeeded; a failed write
    /// is cut off the file again so the retry starts on a record boundary.
    async fn write_out(&self, buffer: &mut Buffer) -> Result<()> {
        if buffer.bytes.is_empty() {
            return Ok(());
        }

        let path = &self.inner.config.log_path;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::Persistence(format!("opening {}: {e}", path.display())))?;
        let prev_len = file
            .metadata()
            .await
            .map_err(|e| Error::Persistence(format!("stat {}: {e}", path.display())))?
            .len();

        if let Err(e) = append_records(&mut file, &buffer.bytes).await {
            truncate_to(&file, prev_len, path).await;
            return Err(Error::Persistence(format!("writing to {}: {e}", path.display())));
        }

        info!(
            bytes = buffer.bytes.len(),
            path = %path.display(),
            since_last_flush = ?buffer.last_flush.elapsed(),
            "Flushed buffer to log file"
        );
        buffer.bytes.clear();
        buffer.last_flush = Instant::now();
        Ok(())
    }

    #[cfg(test)]
    async fn buffered_len(&self) -> usize {
        self.inner.buffer.lock().await.bytes.len()
    }

    #[cfg(test)]
    async fn last_flush(&self) -> Instant {
        self.inner.buffer.lock().await.last_flush
    }

    #[cfg(test)]
    fn bytes_admitted(&self) -> usize {
        self.inner.rate_window.lock().bytes_admitted()
    }
}

async fn append_records(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    // tokio's File may still have the last write in flight
    file.flush().await
}

/// Cuts the file back to `len` after a partial write.
async fn truncate_to(file: &File, len: u64, path: &Path) {
    if let Err(e) = file.set_len(len).await {
        error!(
            ?e,
            path = %path.display(),
            len,
            "Failed to roll back a partial write, the log file may end in a torn record"
        );
    }
}

/// Background task flushing the sink every `flush_interval`. It is owned by whoever is in charge
/// of the process lifecycle and consumed by [FlushLoop::shutdown], so the sink can only be shut
/// down once.
pub struct FlushLoop {
    sink: TelemetrySink,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushLoop {
    /// Stops accepting messages, waits for the flush task to exit and flushes whatever is left.
    /// Once this returns `Ok`, every accepted byte is in the log file.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down TelemetrySink");
        self.sink.inner.closing.store(true, Ordering::Release);
        self.cancel.cancel();

        // the final flush must not race a timer flush, and must happen even if the task panicked
        let joined = self.handle.await;
        let flushed = self.sink.close_and_flush().await;

        if let Err(e) = joined {
            error!(?e, "Flush loop did not exit cleanly");
            flushed?;
            return Err(Error::FlushLoop(format!("joining flush loop: {e:?}")));
        }
        flushed?;

        info!("TelemetrySink shutdown complete");
        Ok(())
    }
}

async fn run_flush_loop(sink: TelemetrySink, cancel: CancellationToken) {
    let period = sink.inner.config.flush_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(?period, "Flush loop started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = sink.flush().await {
            error!(?e, "Periodic flush failed, keeping the buffer for the next tick");
        }
    }
    info!("Flush loop stopped");
}
