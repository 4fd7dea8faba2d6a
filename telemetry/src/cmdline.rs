use std::error::Error;

use clap::{Arg, ArgAction, ArgMatches, Command};
use sensor_node::SensorConfig;
use telemetry_sink::{ServerConfig, SinkConfig};

pub(super) fn root_cli() -> Command {
    Command::new("telemetry")
        .about("Telemetry ingestion sink and synthetic sensor")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_sink_subcommand())
        .subcommand(add_sensor_subcommand())
}

fn add_sink_subcommand() -> Command {
    Command::new("sink")
        .about("Receives telemetry over HTTP and appends it to a log file")
        .arg(
            Arg::new("bind")
                .long("bind")
                .env("TELEMETRY_SINK_BIND")
                .help("Address and port to listen on")
                .action(ArgAction::Set)
                .default_value(telemetry_sink::DEFAULT_BIND_ADDR),
        )
        .arg(
            Arg::new("log-path")
                .long("log-path")
                .env("TELEMETRY_SINK_LOG_PATH")
                .help("Path to the log file")
                .action(ArgAction::Set)
                .default_value(telemetry_sink::DEFAULT_LOG_PATH),
        )
        .arg(
            Arg::new("buffer-size")
                .long("buffer-size")
                .env("TELEMETRY_SINK_BUFFER_SIZE")
                .help("Buffer size in bytes, reaching it flushes the buffer early")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize))
                .default_value(telemetry_sink::DEFAULT_BUFFER_SIZE.to_string()),
        )
        .arg(
            Arg::new("flush-interval")
                .long("flush-interval")
                .env("TELEMETRY_SINK_FLUSH_INTERVAL")
                .help("Seconds between two buffer flushes")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(f64))
                .default_value(telemetry_sink::DEFAULT_FLUSH_INTERVAL_SECS.to_string()),
        )
        .arg(
            Arg::new("rate-limit")
                .long("rate-limit")
                .env("TELEMETRY_SINK_RATE_LIMIT")
                .help("Incoming bytes accepted per second")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(usize))
                .default_value(telemetry_sink::DEFAULT_RATE_LIMIT.to_string()),
        )
}

fn add_sensor_subcommand() -> Command {
    Command::new("sensor")
        .about("Sends a synthetic sensor reading to the sink at a fixed rate")
        .arg_required_else_help(true)
        .arg(
            Arg::new("sensor-name")
                .long("sensor-name")
                .help("Sensor name")
                .required(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("rate")
                .long("rate")
                .help("Readings sent per second")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(f64))
                .default_value(sensor_node::DEFAULT_RATE.to_string()),
        )
        .arg(
            Arg::new("sink-url")
                .long("sink-url")
                .help("URL of the telemetry sink, e.g. http://localhost:8080/telemetry")
                .required(true)
                .action(ArgAction::Set),
        )
}

/// Builds the server and sink configs from the `sink` subcommand.
pub(super) fn sink_configs(
    args: &ArgMatches,
) -> Result<(ServerConfig, SinkConfig), Box<dyn Error>> {
    let bind = required::<String>(args, "bind")?;
    let server_config = ServerConfig::new(&bind)?;
    let sink_config = SinkConfig::new(
        required::<String>(args, "log-path")?,
        required::<usize>(args, "buffer-size")?,
        required::<f64>(args, "flush-interval")?,
        required::<usize>(args, "rate-limit")?,
    )?;
    Ok((server_config, sink_config))
}

/// Builds the sensor config from the `sensor` subcommand.
pub(super) fn sensor_config(args: &ArgMatches) -> Result<SensorConfig, Box<dyn Error>> {
    Ok(SensorConfig::new(
        required::<String>(args, "sensor-name")?,
        required::<f64>(args, "rate")?,
        &required::<String>(args, "sink-url")?,
    )?)
}

fn required<T: Clone + Send + Sync + 'static>(
    args: &ArgMatches,
    id: &str,
) -> Result<T, Box<dyn Error>> {
    args.get_one::<T>(id)
        .cloned()
        .ok_or_else(|| format!("missing argument --{id}").into())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;

    #[test]
    fn verify_cli() {
        root_cli().debug_assert();
    }

    #[test]
    fn test_sink_defaults() {
        let matches = root_cli().try_get_matches_from(["telemetry", "sink"]).unwrap();
        let (_, args) = matches.subcommand().unwrap();
        let (server_config, sink_config) = sink_configs(args).unwrap();

        assert_eq!(server_config.bind_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(sink_config.log_path(), Path::new("telemetry.log"));
        assert_eq!(sink_config.buffer_size(), 4096);
        assert_eq!(sink_config.flush_interval(), Duration::from_millis(500));
        assert_eq!(sink_config.rate_limit(), 10240);
        assert_eq!(sink_config, SinkConfig::default());
    }

    #[test]
    fn test_sink_args() {
        let matches = root_cli()
            .try_get_matches_from([
                "telemetry",
                "sink",
                "--bind",
                "127.0.0.1:9090",
                "--log-path",
                "/tmp/t.log",
                "--buffer-size",
                "50",
                "--flush-interval",
                "10",
                "--rate-limit",
                "100",
            ])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "sink");

        let (server_config, sink_config) = sink_configs(args).unwrap();
        assert_eq!(server_config.bind_addr().to_string(), "127.0.0.1:9090");
        assert_eq!(sink_config.log_path(), Path::new("/tmp/t.log"));
        assert_eq!(sink_config.buffer_size(), 50);
        assert_eq!(sink_config.flush_interval(), Duration::from_secs(10));
        assert_eq!(sink_config.rate_limit(), 100);
    }

    #[test]
    fn test_sink_rejects_invalid_values() {
        let matches = root_cli()
            .try_get_matches_from(["telemetry", "sink", "--buffer-size", "0"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert!(sink_configs(args).is_err());

        assert!(
            root_cli()
                .try_get_matches_from(["telemetry", "sink", "--rate-limit", "fast"])
                .is_err()
        );
    }

    #[test]
    fn test_sensor_args() {
        assert!(
            root_cli()
                .try_get_matches_from(["telemetry", "sensor", "--sensor-name", "temp-1"])
                .is_err()
        );

        let matches = root_cli()
            .try_get_matches_from([
                "telemetry",
                "sensor",
                "--sensor-name",
                "temp-1",
                "--rate",
                "2",
                "--sink-url",
                "http://localhost:8080/telemetry",
            ])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "sensor");

        let config = sensor_config(args).unwrap();
        assert_eq!(config.sensor_name(), "temp-1");
        assert_eq!(config.interval(), Duration::from_millis(500));
        assert_eq!(config.sink_url().as_str(), "http://localhost:8080/telemetry");

        let matches = root_cli()
            .try_get_matches_from([
                "telemetry",
                "sensor",
                "--sensor-name",
                "temp-1",
                "--sink-url",
                "http://localhost:8080/telemetry",
            ])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(sensor_config(args).unwrap().interval(), Duration::from_secs(1));
    }
}
