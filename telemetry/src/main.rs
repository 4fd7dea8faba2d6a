use std::error::Error;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();

    match matches.subcommand() {
        Some(("sink", args)) => {
            let (server_config, sink_config) = cmdline::sink_configs(args)?;
            info!(?server_config, ?sink_config, "Starting telemetry sink");
            telemetry_sink::serve(server_config, sink_config, shutdown_signal()).await?;
        }
        Some(("sensor", args)) => {
            let config = cmdline::sensor_config(args)?;
            let node = sensor_node::SensorNode::new(config)?;

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    shutdown_signal().await;
                    cancel.cancel();
                }
            });
            node.run(cancel).await;
        }
        other => return Err(format!("unknown subcommand {other:?}").into()),
    }

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
