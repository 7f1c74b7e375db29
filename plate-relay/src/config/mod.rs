//! Process configuration from environment variables.
//!
//! Everything is read once at startup. Missing required keys and unparsable
//! values are [`Error::Configuration`], which stops the process before the
//! scheduler starts.
//!
//! | Key | Default |
//! |-----|---------|
//! | `CAMERA_CHANNELS` | required, e.g. `1,2,3` |
//! | `POLL_INTERVAL_MS` | `100` |
//! | `FRAME_TIMEOUT_MS` / `DETECT_TIMEOUT_MS` | `5000` |
//! | `CONFIDENCE_THRESHOLD` | `0.5` |
//! | `PUBLISH_QUEUE_CAPACITY` | `256` |
//! | `DEBOUNCE_WINDOW_MS` | `2000` (`0` disables) |
//! | `SHUTDOWN_DRAIN_MS` | `5000` |
//! | `LISTENER_QUEUE_CAPACITY` | `64` |
//! | `LISTENER_SEND_TIMEOUT_MS` | `1000` |
//! | `WEBSOCKET_HOST` / `WEBSOCKET_PORT` | `localhost` / `8765` |
//! | `FRAME_SOURCE` | `hikvision` (or `simulated`) |
//! | `DVR_IP`, `DVR_USERNAME`, `DVR_PASSWORD` | required for `hikvision` |
//! | `DVR_PORT` | `80` |
//! | `SIMULATED_FAILURE_RATE` | `0.0` |
//! | `DETECTOR` | `http` (or `simulated`) |
//! | `DETECTOR_URL` | required for `http` |
//! | `LOG_DIR` | `logs` |

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::hub::HubConfig;
use crate::publisher::PublisherConfig;
use crate::scheduler::{ChannelConfig, SchedulerConfig};
use crate::source::HikvisionConfig;

/// Listener-facing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8765,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where frames come from.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Hikvision(HikvisionConfig),
    Simulated { failure_rate: f64 },
}

/// Which detector runs on frames.
#[derive(Debug, Clone)]
pub enum DetectorConfig {
    Http { url: Url, timeout: Duration },
    Simulated,
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub channels: Vec<ChannelConfig>,
    pub scheduler: SchedulerConfig,
    pub publisher: PublisherConfig,
    pub hub: HubConfig,
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub log_dir: PathBuf,
}

impl RelayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve each key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let poll_interval = env.millis("POLL_INTERVAL_MS", 100)?;
        if poll_interval.is_zero() {
            return Err(Error::config("POLL_INTERVAL_MS must be greater than 0"));
        }
        let frame_timeout = env.millis("FRAME_TIMEOUT_MS", 5000)?;
        let detect_timeout = env.millis("DETECT_TIMEOUT_MS", 5000)?;

        let channels = parse_channels(&env.required("CAMERA_CHANNELS")?)?
            .into_iter()
            .map(|id| ChannelConfig::new(id, poll_interval))
            .collect();

        let threshold: f64 = env.parse("CONFIDENCE_THRESHOLD", 0.5)?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::config(format!(
                "CONFIDENCE_THRESHOLD must be within [0, 1], got {threshold}"
            )));
        }

        let publisher = PublisherConfig {
            threshold,
            queue_capacity: env.capacity("PUBLISH_QUEUE_CAPACITY", 256)?,
            debounce_window: env.millis("DEBOUNCE_WINDOW_MS", 2000)?,
            drain_timeout: env.millis("SHUTDOWN_DRAIN_MS", 5000)?,
        };

        let hub = HubConfig {
            outbound_capacity: env.capacity("LISTENER_QUEUE_CAPACITY", 64)?,
            send_timeout: env.millis("LISTENER_SEND_TIMEOUT_MS", 1000)?,
        };

        let server = ServerConfig {
            host: env.string("WEBSOCKET_HOST", "localhost"),
            port: env.parse("WEBSOCKET_PORT", 8765)?,
        };

        let source = match env.string("FRAME_SOURCE", "hikvision").to_ascii_lowercase().as_str() {
            "hikvision" => SourceConfig::Hikvision(HikvisionConfig {
                host: env.required("DVR_IP")?,
                port: env.parse("DVR_PORT", 80)?,
                username: env.required("DVR_USERNAME")?,
                password: env.required("DVR_PASSWORD")?,
                request_timeout: frame_timeout,
            }),
            "simulated" => {
                let failure_rate: f64 = env.parse("SIMULATED_FAILURE_RATE", 0.0)?;
                if !(0.0..=1.0).contains(&failure_rate) {
                    return Err(Error::config(
                        "SIMULATED_FAILURE_RATE must be within [0, 1]",
                    ));
                }
                SourceConfig::Simulated { failure_rate }
            }
            other => {
                return Err(Error::config(format!(
                    "unknown FRAME_SOURCE '{other}' (expected hikvision or simulated)"
                )));
            }
        };

        let detector = match env.string("DETECTOR", "http").to_ascii_lowercase().as_str() {
            "http" => {
                let raw = env.required("DETECTOR_URL")?;
                let url = Url::parse(&raw)
                    .map_err(|e| Error::config(format!("invalid DETECTOR_URL '{raw}': {e}")))?;
                DetectorConfig::Http {
                    url,
                    timeout: detect_timeout,
                }
            }
            "simulated" => DetectorConfig::Simulated,
            other => {
                return Err(Error::config(format!(
                    "unknown DETECTOR '{other}' (expected http or simulated)"
                )));
            }
        };

        Ok(Self {
            channels,
            scheduler: SchedulerConfig {
                interval: poll_interval,
                frame_timeout,
                detect_timeout,
            },
            publisher,
            hub,
            server,
            source,
            detector,
            log_dir: PathBuf::from(env.string("LOG_DIR", "logs")),
        })
    }
}

/// Key lookup with typed accessors. Blank values count as unset.
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| Error::config(format!("missing required environment variable {key}")))
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::config(format!("invalid {key} '{raw}': {e}"))),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: u64) -> Result<Duration> {
        self.parse(key, default).map(Duration::from_millis)
    }

    fn capacity(&self, key: &str, default: usize) -> Result<usize> {
        let value = self.parse(key, default)?;
        if value == 0 {
            return Err(Error::config(format!("{key} must be greater than 0")));
        }
        Ok(value)
    }
}

/// Parse a comma-separated list of distinct channel ids.
fn parse_channels(raw: &str) -> Result<Vec<u32>> {
    let mut channels = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let id: u32 = part
            .parse()
            .map_err(|e| Error::config(format!("invalid camera channel '{part}': {e}")))?;
        if channels.contains(&id) {
            return Err(Error::config(format!("camera channel {id} listed twice")));
        }
        channels.push(id);
    }

    if channels.is_empty() {
        return Err(Error::config("CAMERA_CHANNELS lists no channels"));
    }
    Ok(channels)
}
