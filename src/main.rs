use std::process::ExitCode;
use std::time::Duration;

use suntwins_logger::prelude::*;

#[tokio::main]
async fn main() -> ExitCode {
    let options = Options::new();
    let config = Config::from_options(&options);

    suntwins_logger::init_logging(
        &config
            .as_ref()
            .map(Config::loglevel)
            .unwrap_or_else(|_| "info".to_string()),
    );

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load config: {:?}", err);
            return ExitCode::from(255);
        }
    };
    config.log_summary();

    // Create a channel for shutdown signaling
    let (shutdown_tx, _) = broadcast::channel(1);
    let shutdown_rx = shutdown_tx.subscribe();

    suntwins_logger::spawn_signal_listener(shutdown_tx.clone());
    if let Some(secs) = options.runtime {
        suntwins_logger::spawn_runtime_limit(shutdown_tx.clone(), Duration::from_secs(secs));
    }

    let result = suntwins_logger::app(shutdown_rx, config).await;
    if let Err(e) = &result {
        error!("Error reading from inverter, {:#}", e);
    }

    ExitCode::from(suntwins_logger::exit_code(&result))
}
