//! Pipeline state owned by the controller actor
//!
//! Pure bookkeeping, no I/O. Every mutation goes through the actor, so the
//! checks here are race-free.

use super::{ActiveRun, PipelineSnapshot, PipelineStatus, RunPhase};
use crate::error::PipelineError;
use echoaudit_common::events::RunKind;
use echoaudit_common::AgentKey;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
pub(crate) struct PipelineState {
    status: Arc<PipelineStatus>,
    phase: RunPhase,
    active_run: Option<ActiveRun>,
    agents_in_flight: BTreeSet<AgentKey>,
    consecutive_poll_failures: u32,
}

impl PipelineState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the status mirror with a new sample
    pub(crate) fn apply_status(&mut self, status: PipelineStatus) {
        self.status = Arc::new(status);
        self.consecutive_poll_failures = 0;
    }

    /// Count a failed poll; the previous status is retained
    pub(crate) fn record_poll_failure(&mut self) -> u32 {
        self.consecutive_poll_failures = self.consecutive_poll_failures.saturating_add(1);
        self.consecutive_poll_failures
    }

    /// Take the run lock
    ///
    /// Refused while another run holds it or the last status shows any
    /// stage running.
    pub(crate) fn try_begin_run(&mut self, kind: RunKind) -> Result<ActiveRun, PipelineError> {
        if let Some(active) = &self.active_run {
            return Err(PipelineError::Busy(format!("{} in progress", active.kind)));
        }
        if let Some(stage) = self.status.document.running_stage() {
            return Err(PipelineError::Busy(format!("{stage} stage is running")));
        }

        let run = ActiveRun {
            run_id: Uuid::new_v4(),
            kind,
        };
        self.active_run = Some(run);
        self.phase = RunPhase::Idle;
        Ok(run)
    }

    /// Move the active run to `phase`; ignored for any other run id
    pub(crate) fn enter_phase(&mut self, run_id: Uuid, phase: RunPhase) -> bool {
        if !self.is_active(run_id) {
            return false;
        }
        self.phase = phase;
        true
    }

    /// Release the run lock; a failed run goes back to `Idle`
    pub(crate) fn finish_run(&mut self, run_id: Uuid, succeeded: bool) -> bool {
        if !self.is_active(run_id) {
            return false;
        }
        self.active_run = None;
        self.phase = if succeeded {
            RunPhase::Done
        } else {
            RunPhase::Idle
        };
        true
    }

    /// Mark an agent in flight; `false` if it already is
    pub(crate) fn try_acquire_agent(&mut self, key: AgentKey) -> bool {
        self.agents_in_flight.insert(key)
    }

    pub(crate) fn release_agent(&mut self, key: &AgentKey) -> bool {
        self.agents_in_flight.remove(key)
    }

    pub(crate) fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            status: Arc::clone(&self.status),
            phase: self.phase,
            active_run: self.active_run,
            agents_in_flight: self.agents_in_flight.clone(),
            consecutive_poll_failures: self.consecutive_poll_failures,
        }
    }

    fn is_active(&self, run_id: Uuid) -> bool {
        self.active_run.is_some_and(|run| run.run_id == run_id)
    }
}
