use std::process;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use plate_relay::config::RelayConfig;
use plate_relay::services::ServiceContainer;
use plate_relay::{logging, panic_hook};

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let logging = match logging::init_logging(&log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };
    panic_hook::install();

    let retention_cancel = CancellationToken::new();
    logging.start_retention_cleanup(retention_cancel.clone());

    if let Err(e) = run().await {
        error!(error = %e, "plate-relay failed");
        drop(logging);
        process::exit(1);
    }

    retention_cancel.cancel();
}

async fn run() -> anyhow::Result<()> {
    let config = RelayConfig::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        channels = config.channels.len(),
        address = %config.server.address(),
        "Starting plate-relay"
    );

    let container = ServiceContainer::build(config).await?;
    container.run_until(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
