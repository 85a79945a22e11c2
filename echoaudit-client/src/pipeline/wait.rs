//! Waiting for a triggered stage to finish
//!
//! Completion is judged only from status samples whose poll request was
//! issued after the trigger was acknowledged. `running=false` counts as
//! done once a `running=true` sample was seen, or, for an explicit
//! acknowledgment, once the start grace window has passed with no error
//! showing. Errors already present before the trigger are only discounted
//! after the stage was seen running. An implicit
//! acknowledgment that never shows a running sample within the window is
//! treated as a rejected trigger.

use super::{non_blank, PipelineSnapshot, PipelineStatus};
use crate::error::PipelineError;
use echoaudit_common::api::Stage;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// What was known when the Job Service acknowledged a trigger
#[derive(Debug, Clone)]
pub(crate) struct Acknowledgment {
    pub at: Instant,
    /// End of the start grace window
    pub grace_deadline: Instant,
    /// The service explicitly said `accepted` / `started`
    pub explicit: bool,
    /// Errors present before the trigger; not attributed to it
    pub baseline_global_error: Option<String>,
    pub baseline_stage_error: Option<String>,
}

impl Acknowledgment {
    pub(crate) fn new(
        at: Instant,
        grace: Duration,
        explicit: bool,
        baseline: &PipelineStatus,
        stage: Stage,
    ) -> Self {
        Self {
            at,
            grace_deadline: at + grace,
            explicit,
            baseline_global_error: baseline.last_error().map(str::to_string),
            baseline_stage_error: non_blank(baseline.document.stage(stage).error.as_deref())
                .map(str::to_string),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Pending,
    Completed,
    Failed(String),
}

/// Judge the latest sample; `seen_running` is updated in place
fn judge(
    status: &PipelineStatus,
    stage: Stage,
    ack: &Acknowledgment,
    seen_running: &mut bool,
    now: Instant,
) -> Verdict {
    if !status.is_fresh_since(ack.at) {
        return Verdict::Pending;
    }

    let stage_status = status.document.stage(stage);
    let finished_after_running = *seen_running && !stage_status.running;

    if let Some(error) = non_blank(stage_status.error.as_deref()) {
        if finished_after_running || Some(error) != ack.baseline_stage_error.as_deref() {
            return Verdict::Failed(error.to_string());
        }
    }
    if let Some(error) = status.last_error() {
        if Some(error) != ack.baseline_global_error.as_deref() {
            return Verdict::Failed(error.to_string());
        }
    }

    if stage_status.running {
        *seen_running = true;
        Verdict::Pending
    } else if *seen_running {
        Verdict::Completed
    } else if ack.explicit && now >= ack.grace_deadline {
        // Without a running sample a leftover error cannot be told apart
        // from the same failure repeated by this trigger.
        match non_blank(stage_status.error.as_deref()).or_else(|| status.last_error()) {
            Some(error) => Verdict::Failed(error.to_string()),
            None => Verdict::Completed,
        }
    } else {
        Verdict::Pending
    }
}

/// Wait until `stage` finishes after `ack`
///
/// Returns `Cancelled` when `cancel` fires or the controller stops; the
/// remote job is left running either way.
pub(crate) async fn await_completion(
    snapshots: &mut watch::Receiver<PipelineSnapshot>,
    stage: Stage,
    ack: &Acknowledgment,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    let mut seen_running = false;

    loop {
        let now = Instant::now();
        let verdict = {
            let snapshot = snapshots.borrow_and_update();
            judge(&snapshot.status, stage, ack, &mut seen_running, now)
        };
        trace!(stage = %stage, ?verdict, seen_running, "Judged status sample");

        match verdict {
            Verdict::Completed => {
                debug!(stage = %stage, seen_running, "Stage completed");
                return Ok(());
            }
            Verdict::Failed(message) => return Err(PipelineError::StageFailure { stage, message }),
            Verdict::Pending => {}
        }

        let in_grace = !seen_running && now < ack.grace_deadline;
        if !seen_running && !ack.explicit && !in_grace {
            return Err(PipelineError::TriggerRejected {
                target: format!("{stage} stage"),
                reason: "no running status observed after the trigger".to_string(),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Err(PipelineError::Cancelled);
                }
            }
            _ = sleep_until(ack.grace_deadline), if in_grace => {}
        }
    }
}
