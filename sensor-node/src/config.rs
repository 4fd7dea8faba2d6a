use std::time::Duration;

use reqwest::Url;

use crate::error::{Error, Result};

pub const DEFAULT_RATE: f64 = 1.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 3;

/// Settings of a synthetic sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub(crate) sensor_name: String,
    /// Time between two readings, `1 / rate`.
    pub(crate) interval: Duration,
    pub(crate) sink_url: Url,
    pub(crate) request_timeout: Duration,
}

impl SensorConfig {
    /// `rate` is the number of readings sent per second.
    pub fn new(sensor_name: impl Into<String>, rate: f64, sink_url: &str) -> Result<Self> {
        let sensor_name = sensor_name.into();
        if sensor_name.is_empty() {
            return Err(Error::Config("sensor name must not be empty".to_string()));
        }
        if !rate.is_finite() || rate <= 0.0 {
            return Err(Error::Config(format!(
                "rate must be a positive number of messages per second, got {rate}"
            )));
        }
        let interval = Duration::try_from_secs_f64(1.0 / rate)
            .map_err(|e| Error::Config(format!("rate {rate}: {e}")))?;
        if interval.is_zero() {
            return Err(Error::Config(format!("rate {rate} is too high")));
        }
        let sink_url = Url::parse(sink_url)
            .map_err(|e| Error::Config(format!("invalid sink url {sink_url}: {e}")))?;

        Ok(Self {
            sensor_name,
            interval,
            sink_url,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    pub fn sensor_name(&self) -> &str {
        &self.sensor_name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sink_url(&self) -> &Url {
        &self.sink_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_config() {
        let config = SensorConfig::new("temp-1", 4.0, "http://localhost:8080/telemetry").unwrap();
        assert_eq!(config.sensor_name(), "temp-1");
        assert_eq!(config.interval(), Duration::from_millis(250));
        assert_eq!(config.sink_url().path(), "/telemetry");
        assert_eq!(config.request_timeout, Duration::from_secs(3));

        let config = SensorConfig::new("temp-1", DEFAULT_RATE, "http://localhost:8080").unwrap();
        assert_eq!(config.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_sensor_config_invalid() {
        let url = "http://localhost:8080/telemetry";
        assert!(matches!(SensorConfig::new("", 1.0, url), Err(Error::Config(_))));
        assert!(matches!(SensorConfig::new("s", 0.0, url), Err(Error::Config(_))));
        assert!(matches!(SensorConfig::new("s", -2.0, url), Err(Error::Config(_))));
        assert!(matches!(
            SensorConfig::new("s", f64::INFINITY, url),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SensorConfig::new("s", 1.0, "not a url"),
            Err(Error::Config(_))
        ));
    }
}
