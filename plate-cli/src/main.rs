use std::process;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use plate_cli::cli::{self, Args, Commands};
use plate_cli::output::{OutputFormat, OutputManager};
use plate_cli::session::ListenerSession;
use plate_cli::simulate::Simulator;

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, closing connection");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Commands::Listen {
            connection,
            backoff,
            json,
        } => {
            let format = if json {
                OutputFormat::Json
            } else {
                OutputFormat::Pretty
            };
            let mut output = OutputManager::stdout(format);
            let mut session = ListenerSession::new(connection.url(), backoff.policy()?);

            session.listen(&mut output, cancel).await?;
            info!(received = output.received(), "Listener stopped");
        }

        Commands::Simulate {
            connection,
            backoff,
            cameras,
            min_delay_secs,
            max_delay_secs,
            count,
        } => {
            let config = cli::simulate_config(cameras, min_delay_secs, max_delay_secs, count)?;
            let mut simulator = Simulator::new(config)?;
            let mut session = ListenerSession::new(connection.url(), backoff.policy()?);

            info!(url = session.url(), "Starting plate detection simulator");
            let sent = simulator.run(&mut session, cancel).await?;
            info!(sent, "Simulator stopped");
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays clean for event output.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
