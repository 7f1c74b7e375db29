use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::backoff::{BackoffPolicy, DEFAULT_BACKOFF_MS};
use crate::error::{Result, SessionError};
use crate::simulate::SimulateConfig;

#[derive(Parser, Debug)]
#[command(name = "plate", author, version, about = "Listener and simulator clients for plate-relay")]
pub struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print every detection event the relay broadcasts
    Listen {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        backoff: BackoffArgs,

        /// Print one JSON object per line instead of a readable block
        #[arg(long)]
        json: bool,
    },

    /// Send random plate detections to the relay
    Simulate {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        backoff: BackoffArgs,

        /// Number of simulated cameras
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
        cameras: u32,

        /// Minimum pause between events, in seconds
        #[arg(long, default_value_t = 2.0)]
        min_delay_secs: f64,

        /// Maximum pause between events, in seconds
        #[arg(long, default_value_t = 5.0)]
        max_delay_secs: f64,

        /// Stop after sending this many events
        #[arg(long)]
        count: Option<u64>,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Relay host
    #[arg(long, env = "WEBSOCKET_HOST", default_value = "localhost")]
    pub host: String,

    /// Relay port
    #[arg(long, env = "WEBSOCKET_PORT", default_value_t = 8765)]
    pub port: u16,

    /// Full relay URL, overrides --host and --port
    #[arg(long)]
    pub url: Option<String>,
}

impl ConnectionArgs {
    pub fn url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("ws://{}:{}", self.host, self.port),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct BackoffArgs {
    /// Delay before reconnecting, in milliseconds
    #[arg(long, default_value_t = DEFAULT_BACKOFF_MS)]
    pub backoff_ms: u64,

    /// Upper bound for the reconnect delay when it grows
    #[arg(long)]
    pub max_backoff_ms: Option<u64>,

    /// Growth factor applied to the delay after each failed attempt
    #[arg(long, default_value_t = 1.0)]
    pub multiplier: f64,

    /// Give up after this many consecutive failed attempts
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Randomise each delay by up to 25%
    #[arg(long)]
    pub jitter: bool,
}

impl BackoffArgs {
    pub fn policy(&self) -> Result<BackoffPolicy> {
        let policy = BackoffPolicy {
            initial_delay_ms: self.backoff_ms,
            max_delay_ms: self.max_backoff_ms,
            multiplier: self.multiplier,
            use_jitter: self.jitter,
            max_attempts: self.max_attempts,
        };
        policy.validate()?;
        Ok(policy)
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| SessionError::InvalidArgument(format!("--{name} {value}: {e}")))
}

pub fn simulate_config(
    cameras: u32,
    min_delay_secs: f64,
    max_delay_secs: f64,
    count: Option<u64>,
) -> Result<SimulateConfig> {
    Ok(SimulateConfig {
        cameras,
        min_delay: seconds("min-delay-secs", min_delay_secs)?,
        max_delay: seconds("max-delay-secs", max_delay_secs)?,
        count,
    })
}
