//! Status poller: the only source of status samples

use super::controller::Command;
use super::{PipelineConfig, PipelineSnapshot, PipelineStatus};
use crate::job_service::JobService;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub(crate) async fn run_poller(
    service: Arc<dyn JobService>,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<PipelineSnapshot>,
    poll_now: Arc<Notify>,
    config: PipelineConfig,
    cancel: CancellationToken,
) {
    debug!(
        idle_ms = config.idle_interval.as_millis() as u64,
        active_ms = config.active_interval.as_millis() as u64,
        "Status poller started"
    );

    loop {
        let requested_at = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = service.status() => result,
        };

        let polled = result
            .map(|document| PipelineStatus {
                document,
                requested_at: Some(requested_at),
                received_at: Some(Utc::now()),
            })
            .map_err(|e| e.to_string());
        if commands.send(Command::StatusPolled(polled)).is_err() {
            break;
        }

        let busy = snapshots.borrow().is_busy();
        let interval = if busy {
            config.active_interval
        } else {
            config.idle_interval
        };
        trace!(busy, interval_ms = interval.as_millis() as u64, "Next status poll");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
            _ = poll_now.notified() => {}
        }
    }

    debug!("Status poller stopped");
}
