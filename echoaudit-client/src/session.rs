//! Session: one catalog, one pipeline and one playback controller sharing
//! an event bus
//!
//! Background tasks:
//! - periodic index refresh
//! - refresh after any event that means artifacts may have changed

use crate::catalog::Catalog;
use crate::job_service::JobService;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::playback::{AudioSink, PlaybackController};
use echoaudit_common::config::TomlConfig;
use echoaudit_common::events::{EchoEvent, EventBus};
use echoaudit_common::NameBook;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default event bus capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub pipeline: PipelineConfig,
    pub index_refresh_interval: Duration,
    pub names: NameBook,
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            index_refresh_interval: Duration::from_millis(5000),
            names: NameBook::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl From<&TomlConfig> for SessionSettings {
    fn from(config: &TomlConfig) -> Self {
        Self {
            pipeline: PipelineConfig::from(&config.polling),
            index_refresh_interval: config.polling.index_refresh_interval(),
            names: config.names.clone(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

pub struct Session {
    service: Arc<dyn JobService>,
    catalog: Arc<Catalog>,
    pipeline: Pipeline,
    playback: Arc<PlaybackController>,
    events: EventBus,
    names: NameBook,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Wire the components and start background tasks
    pub fn start(
        service: Arc<dyn JobService>,
        sink: Arc<dyn AudioSink>,
        settings: SessionSettings,
    ) -> Self {
        let events = EventBus::new(settings.event_capacity);
        let cancel = CancellationToken::new();

        let catalog = Arc::new(Catalog::new(
            Arc::clone(&service),
            settings.names.clone(),
            events.clone(),
        ));
        let pipeline = Pipeline::spawn(
            Arc::clone(&service),
            events.clone(),
            settings.pipeline,
            cancel.child_token(),
        );
        let playback = Arc::new(PlaybackController::new(sink, events.clone()));

        let tasks = vec![
            tokio::spawn(refresh_periodically(
                Arc::clone(&catalog),
                settings.index_refresh_interval,
                cancel.clone(),
            )),
            tokio::spawn(refresh_on_invalidation(
                Arc::clone(&catalog),
                events.subscribe(),
                cancel.clone(),
            )),
        ];

        info!(
            refresh_ms = settings.index_refresh_interval.as_millis() as u64,
            "Session started"
        );

        Self {
            service,
            catalog,
            pipeline,
            playback,
            events,
            names: settings.names,
            cancel,
            tasks,
        }
    }

    pub fn service(&self) -> &Arc<dyn JobService> {
        &self.service
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn playback(&self) -> &Arc<PlaybackController> {
        &self.playback
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn names(&self) -> &NameBook {
        &self.names
    }

    /// Stop background work, pending waits and playback
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.playback.stop();
        self.pipeline.shutdown().await;
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task ended abnormally");
            }
        }
        info!("Session shut down");
    }
}

async fn refresh_periodically(catalog: Arc<Catalog>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            // Failures are logged by the catalog; the next tick retries
            _ = catalog.refresh() => {}
        }
    }
    debug!("Index refresh loop stopped");
}

async fn refresh_on_invalidation(
    catalog: Arc<Catalog>,
    mut events: tokio::sync::broadcast::Receiver<EchoEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) if event.invalidates_index() => {
                debug!(event = %event, "Artifacts may have changed, refreshing");
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "Event listener lagged, refreshing");
            }
            Err(RecvError::Closed) => break,
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = catalog.refresh() => {}
        }
    }
}
