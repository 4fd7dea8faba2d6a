//! Synthetic sensor that posts one random reading per interval to a telemetry sink. Sending is
//! fire-and-forget: failed or rejected readings are logged and the next reading supersedes them.

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod config;
mod error;

pub use config::{DEFAULT_RATE, SensorConfig};
pub use error::{Error, Result};

/// One sensor reading as it goes over the wire.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub sensor_name: String,
    pub value: u32,
    /// RFC 3339 timestamp in UTC.
    pub timestamp: String,
}

impl Reading {
    /// Takes a reading with a random value in `0..=100`, timestamped now.
    pub fn sample(sensor_name: &str) -> Self {
        Self {
            sensor_name: sensor_name.to_string(),
            value: rand::rng().random_range(0..=100),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

pub struct SensorNode {
    config: SensorConfig,
    client: Client,
}

impl SensorNode {
    pub fn new(config: SensorConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    /// Posts a single reading and returns the status the sink answered with.
    pub async fn send(&self, reading: &Reading) -> Result<StatusCode> {
        let response = self
            .client
            .post(self.config.sink_url.clone())
            .json(reading)
            .send()
            .await?;
        Ok(response.status())
    }

    /// Sends a reading every interval until `cancel` fires. The first reading goes out right away.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sensor_name = %self.config.sensor_name,
            sink_url = %self.config.sink_url,
            interval = ?self.config.interval,
            "Starting sensor"
        );
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reading = Reading::sample(&self.config.sensor_name);
            debug!(?reading, "Sending reading");
            match self.send(&reading).await {
                Ok(status) if status == StatusCode::OK => {}
                Ok(status) => warn!(%status, "Sink responded with non-OK status"),
                Err(e) => error!(?e, "Failed to send telemetry"),
            }
        }
        info!(sensor_name = %self.config.sensor_name, "Sensor stopped");
    }
}
