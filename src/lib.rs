// Module declarations for the application's core components
pub mod config;         // Configuration file and validation
pub mod coordinator;    // Acquisition loop
pub mod datalog_writer; // Append-only readings file
pub mod error;          // Error taxonomy
pub mod jfy;            // JFY inverter protocol implementation
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod unixtime;       // Capture timestamps

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use std::io::Write;
use std::time::Duration;

/// Initialises env_logger at `level` unless RUST_LOG says otherwise.
pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

/// Listens for SIGINT/SIGTERM and turns the first one into a shutdown.
pub fn spawn_signal_listener(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                info!("Signal received, quitting");
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!("Failed to listen for signals: {}", e),
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Requests a clean shutdown once `limit` has elapsed.
pub fn spawn_runtime_limit(shutdown_tx: broadcast::Sender<()>, limit: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(limit).await;
        info!("Runtime limit of {:?} reached, quitting", limit);
        let _ = shutdown_tx.send(());
    });
}

/// Main application entry point
///
/// Opens the serial port (an absent device is fatal, there is no retry)
/// and hands it to `run`.
pub async fn app(shutdown_rx: broadcast::Receiver<()>, config: Config) -> Result<PollStats> {
    info!("suntwins-logger {} starting", CARGO_PKG_VERSION);

    let transport = SerialTransport::open(&config.port)?;

    run(transport, &config, shutdown_rx).await
}

/// Opens the datalog, then runs the acquisition loop on its own task until
/// it stops, either on `shutdown_rx` or on a fatal error.
///
/// The session is closed exactly once on every path, including when the
/// datalog cannot be opened.
pub async fn run<T: Transport + 'static>(
    transport: T,
    config: &Config,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<PollStats> {
    let mut session = Session::new(transport);

    let writer = match DatalogWriter::new(&config.datalog_file, config.timestamp_format) {
        Ok(writer) => writer,
        Err(e) => {
            session.close().await;
            return Err(e.into());
        }
    };

    let coordinator = Coordinator::new(
        session,
        writer,
        config.poll_period(),
        config.read_timeout(),
    );

    let stats = tokio::spawn(coordinator.start(shutdown_rx))
        .await
        .map_err(|e| anyhow!("poller task failed: {}", e))??;

    info!("Shutdown complete");
    Ok(stats)
}

/// Process exit status for the outcome of `app`.
pub fn exit_code(result: &Result<PollStats>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}
