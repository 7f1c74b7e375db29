//! Service container: builds every component from [`RelayConfig`] and owns
//! their lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{AppState, RelayServer};
use crate::config::{DetectorConfig, RelayConfig, SourceConfig};
use crate::detector::{Detector, HttpDetector, SimulatedDetector};
use crate::hub::BroadcastHub;
use crate::publisher::EventPublisher;
use crate::scheduler::Scheduler;
use crate::source::{FrameSource, HikvisionSource, SimulatedSource};
use crate::{Error, Result};

/// How long shutdown waits for WebSocket sessions to send their close frames.
const SESSION_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Every running component of the relay.
pub struct ServiceContainer {
    config: RelayConfig,
    hub: Arc<BroadcastHub>,
    publisher: EventPublisher,
    dispatcher: JoinHandle<()>,
    publisher_cancel: CancellationToken,
    scheduler: Arc<Scheduler>,
    server: Arc<RelayServer>,
}

impl ServiceContainer {
    /// Build all services. The frame source is checked for reachability here;
    /// an unreachable device is a fatal startup error.
    pub async fn build(config: RelayConfig) -> Result<Self> {
        let source = Self::build_source(&config.source)?;
        source
            .check_reachable()
            .await
            .map_err(|e| Error::startup(format!("frame source '{}' unreachable: {e}", source.name())))?;
        let detector = Self::build_detector(&config.detector)?;

        Ok(Self::with_components(config, source, detector))
    }

    /// Wire the container around already built source and detector.
    pub fn with_components(
        config: RelayConfig,
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new(config.hub.clone()));

        let publisher_cancel = CancellationToken::new();
        let (publisher, dispatcher) =
            EventPublisher::spawn(hub.clone(), config.publisher.clone(), publisher_cancel.clone());

        let scheduler = Arc::new(Scheduler::new(
            source,
            detector,
            publisher.clone(),
            config.scheduler.clone(),
        ));

        let state = AppState::new(hub.clone(), publisher.clone())
            .with_scheduler_metrics(scheduler.metrics());
        let server = Arc::new(RelayServer::new(config.server.clone(), state));

        Self {
            config,
            hub,
            publisher,
            dispatcher,
            publisher_cancel,
            scheduler,
            server,
        }
    }

    fn build_source(config: &SourceConfig) -> Result<Arc<dyn FrameSource>> {
        Ok(match config {
            SourceConfig::Hikvision(hikvision) => Arc::new(
                HikvisionSource::new(hikvision.clone())
                    .map_err(|e| Error::startup(e.to_string()))?,
            ),
            SourceConfig::Simulated { failure_rate } => {
                Arc::new(SimulatedSource::new(*failure_rate))
            }
        })
    }

    fn build_detector(config: &DetectorConfig) -> Result<Arc<dyn Detector>> {
        Ok(match config {
            DetectorConfig::Http { url, timeout } => Arc::new(
                HttpDetector::new(url.clone(), *timeout)
                    .map_err(|e| Error::startup(e.to_string()))?,
            ),
            DetectorConfig::Simulated => Arc::new(SimulatedDetector::default()),
        })
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn server(&self) -> &Arc<RelayServer> {
        &self.server
    }

    /// Start the server and scheduler, run until `shutdown` resolves, then stop
    /// in order: scheduler, publisher drain, listeners, server.
    ///
    /// Binds the configured address itself; see [`run_on`](Self::run_on) to
    /// serve on an already bound listener.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.server.bind().await?;
        self.run_on(listener, shutdown).await
    }

    pub async fn run_on<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut server_task = {
            let server = self.server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let scheduler_cancel = CancellationToken::new();
        let scheduler_task = {
            let scheduler = self.scheduler.clone();
            let channels = self.config.channels.clone();
            let cancel = scheduler_cancel.clone();
            tokio::spawn(async move { scheduler.run(channels, cancel).await })
        };

        info!(channels = self.config.channels.len(), "Relay running");

        let server_result = tokio::select! {
            _ = shutdown => None,
            result = &mut server_task => Some(result),
        };

        info!("Shutting down relay");

        scheduler_cancel.cancel();
        if let Err(e) = scheduler_task.await {
            warn!(error = %e, "Scheduler task failed");
        }

        self.publisher_cancel.cancel();
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "Publisher dispatcher failed");
        }

        // Late upgrades still reach the hub until the server stops accepting;
        // a closed hub turns them away with a close frame.
        let closed = self.hub.close_all();
        self.server.shutdown();

        let sessions = &self.server.state().sessions;
        sessions.close();
        if tokio::time::timeout(SESSION_CLOSE_GRACE, sessions.wait())
            .await
            .is_err()
        {
            warn!(remaining = sessions.len(), "Listener sessions did not close in time");
        }

        let server_result = match server_result {
            Some(result) => result,
            None => server_task.await,
        };

        info!(listeners_closed = closed, "Relay stopped");
        server_result.map_err(|e| Error::Server(format!("server task failed: {e}")))?
    }
}
