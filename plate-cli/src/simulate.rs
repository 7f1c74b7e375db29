//! Mock detection producer that feeds random plates into a relay.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use plate_event::DetectionEvent;
use rand::Rng;
use rand::seq::IndexedRandom;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Result, SessionError};
use crate::session::ListenerSession;

pub const SAMPLE_PLATES: [&str; 5] = ["ABC1234", "XYZ5678", "DEF9012", "GHI3456", "JKL7890"];

const MIN_CONFIDENCE: f64 = 0.75;
const MAX_CONFIDENCE: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct SimulateConfig {
    /// Events are spread over camera ids `1..=cameras`.
    pub cameras: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Stop after this many events. `None` runs until cancelled.
    pub count: Option<u64>,
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            cameras: 3,
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            count: None,
        }
    }
}

impl SimulateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cameras == 0 {
            return Err(SessionError::InvalidArgument(
                "at least one camera is required".to_string(),
            ));
        }
        if self.min_delay > self.max_delay {
            return Err(SessionError::InvalidArgument(format!(
                "min delay {:?} exceeds max delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

pub struct Simulator {
    config: SimulateConfig,
    sent: u64,
}

impl Simulator {
    pub fn new(config: SimulateConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, sent: 0 })
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn finished(&self) -> bool {
        self.config.count.is_some_and(|count| self.sent >= count)
    }

    /// A random plate on a random camera, stamped now.
    pub fn random_event<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DetectionEvent> {
        let plate = SAMPLE_PLATES.choose(rng).copied().unwrap_or(SAMPLE_PLATES[0]);
        let camera = rng.random_range(1..=self.config.cameras);
        let confidence = (rng.random_range(MIN_CONFIDENCE..=MAX_CONFIDENCE) * 100.0).round() / 100.0;
        Ok(DetectionEvent::now(camera, plate, confidence)?)
    }

    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let SimulateConfig {
            min_delay,
            max_delay,
            ..
        } = self.config;
        if min_delay == max_delay {
            min_delay
        } else {
            rng.random_range(min_delay..=max_delay)
        }
    }

    /// Send events until the count is reached or `cancel` fires, reconnecting
    /// through `session` whenever the relay goes away.
    pub async fn run(
        &mut self,
        session: &mut ListenerSession,
        cancel: CancellationToken,
    ) -> Result<u64> {
        loop {
            if self.finished() {
                return Ok(self.sent);
            }
            let Some(mut stream) = session.open(&cancel).await? else {
                return Ok(self.sent);
            };

            let reason = 'connection: loop {
                if self.finished() {
                    session.close(&mut stream).await?;
                    return Ok(self.sent);
                }

                let (event, delay) = {
                    let mut rng = rand::rng();
                    (self.random_event(&mut rng)?, self.next_delay(&mut rng))
                };

                if let Err(e) = stream.send(Message::text(event.to_json()?)).await {
                    break e.to_string();
                }
                self.sent += 1;
                info!(
                    plate = event.label(),
                    camera = event.source_id(),
                    confidence = event.confidence(),
                    sent = self.sent,
                    "Sent simulated detection"
                );

                if self.finished() {
                    continue;
                }

                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            session.close(&mut stream).await?;
                            return Ok(self.sent);
                        }
                        _ = &mut sleep => break,
                        message = stream.next() => match message {
                            Some(Ok(Message::Close(_))) | None => break 'connection "closed by relay".to_string(),
                            Some(Err(e)) => break 'connection e.to_string(),
                            // Events relayed from other producers are not ours to handle.
                            Some(Ok(_)) => {}
                        },
                    }
                }
            };

            warn!(sent = self.sent, "Simulator lost its relay connection");
            if !session.lost(&reason, &cancel).await? {
                return Ok(self.sent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn fast_config(count: u64) -> SimulateConfig {
        SimulateConfig {
            cameras: 3,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            count: Some(count),
        }
    }

    #[test]
    fn test_random_events_in_range() {
        let simulator = Simulator::new(SimulateConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let event = simulator.random_event(&mut rng).unwrap();
            assert!(SAMPLE_PLATES.contains(&event.label()));
            assert!((1..=3).contains(&event.source_id()));
            assert!((MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&event.confidence()));

            let delay = simulator.next_delay(&mut rng);
            assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_confidence_has_two_decimals() {
        let simulator = Simulator::new(SimulateConfig::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let confidence = simulator.random_event(&mut rng).unwrap().confidence();
            let scaled = confidence * 100.0;
            assert!((scaled - scaled.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rejects_bad_config() {
        let no_cameras = SimulateConfig {
            cameras: 0,
            ..Default::default()
        };
        assert!(Simulator::new(no_cameras).is_err());

        let inverted = SimulateConfig {
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(2),
            ..Default::default()
        };
        assert!(Simulator::new(inverted).is_err());
    }

    #[tokio::test]
    async fn test_sends_requested_count() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    received.push(DetectionEvent::from_json(text.as_str()).unwrap());
                }
            }
            received
        });

        let mut simulator = Simulator::new(fast_config(4)).unwrap();
        let mut session = ListenerSession::new(
            format!("ws://{addr}"),
            BackoffPolicy::fixed(Duration::from_millis(10)),
        );
        let sent = tokio::time::timeout(
            Duration::from_secs(5),
            simulator.run(&mut session, CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(sent, 4);
        let received = server.await.unwrap();
        assert_eq!(received.len(), 4);
        assert!(received.iter().all(|e| e.confidence() >= MIN_CONFIDENCE));
    }
}
