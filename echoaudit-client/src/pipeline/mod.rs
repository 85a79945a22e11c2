//! Pipeline controller
//!
//! Sequences the Job Service stages (fetch → transcribe → analyze → report),
//! mirrors the remote status by polling, and guards against duplicate
//! triggers.
//!
//! **Architecture:**
//! - One actor task owns `PipelineState` (status mirror, run phase, run lock,
//!   per-agent in-flight markers) and publishes a `PipelineSnapshot` on a
//!   `watch` channel after every command
//! - The status poller is the only producer of status samples
//! - `Pipeline` is a cloneable handle; orchestration runs on the caller's task
//!   and waits on snapshots, never on its own timers

mod agent;
mod controller;
mod orchestrator;
mod poller;
mod state;
mod wait;

pub use agent::{AgentAnalysis, PendingForce};
pub use controller::{AgentPermit, Pipeline, RunLease};

use chrono::{DateTime, Utc};
use echoaudit_common::api::{Stage, StatusDocument};
use echoaudit_common::config::PollingConfig;
use echoaudit_common::events::RunKind;
use echoaudit_common::AgentKey;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Phase of the current (or last) run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunPhase {
    #[default]
    Idle,
    Fetching,
    Transcribing,
    Analyzing,
    Reporting,
    /// Last run finished every stage
    Done,
}

impl RunPhase {
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Fetch => RunPhase::Fetching,
            Stage::Transcribe => RunPhase::Transcribing,
            Stage::Analyze => RunPhase::Analyzing,
            Stage::Report => RunPhase::Reporting,
        }
    }

    /// Stage being executed in this phase
    pub fn stage(self) -> Option<Stage> {
        match self {
            RunPhase::Fetching => Some(Stage::Fetch),
            RunPhase::Transcribing => Some(Stage::Transcribe),
            RunPhase::Analyzing => Some(Stage::Analyze),
            RunPhase::Reporting => Some(Stage::Report),
            RunPhase::Idle | RunPhase::Done => None,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Fetching => "fetching",
            RunPhase::Transcribing => "transcribing",
            RunPhase::Analyzing => "analyzing",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// One decoded status sample
#[derive(Debug, Clone, Default)]
pub struct PipelineStatus {
    pub document: StatusDocument,
    /// When the poll request was issued; `None` before the first poll
    pub requested_at: Option<Instant>,
    pub received_at: Option<DateTime<Utc>>,
}

impl PipelineStatus {
    /// Whether this sample was requested at or after `instant`
    pub fn is_fresh_since(&self, instant: Instant) -> bool {
        self.requested_at.is_some_and(|at| at >= instant)
    }

    pub fn job_state(&self, stage: Stage) -> PipelineJobState {
        let status = self.document.stage(stage);
        PipelineJobState {
            stage,
            running: status.running,
            progress_text: status.progress.clone(),
            last_error: non_blank(status.error.as_deref()).map(str::to_string),
        }
    }

    /// All four stage states in pipeline order
    pub fn job_states(&self) -> Vec<PipelineJobState> {
        Stage::ALL.iter().map(|&s| self.job_state(s)).collect()
    }

    /// Global error text, if any
    pub fn last_error(&self) -> Option<&str> {
        non_blank(self.document.last_error.as_deref())
    }
}

/// Coarse state of one stage as last observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineJobState {
    pub stage: Stage,
    pub running: bool,
    pub progress_text: String,
    pub last_error: Option<String>,
}

/// Run holding the stage lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveRun {
    pub run_id: Uuid,
    pub kind: RunKind,
}

/// Published pipeline state
#[derive(Debug, Clone, Default)]
pub struct PipelineSnapshot {
    pub status: Arc<PipelineStatus>,
    pub phase: RunPhase,
    pub active_run: Option<ActiveRun>,
    pub agents_in_flight: BTreeSet<AgentKey>,
    pub consecutive_poll_failures: u32,
}

impl PipelineSnapshot {
    /// Something is running locally or remotely; the poller uses the
    /// active interval
    pub fn is_busy(&self) -> bool {
        self.active_run.is_some()
            || !self.agents_in_flight.is_empty()
            || self.status.document.any_running()
    }
}

/// Poll timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Poll period while nothing runs
    pub idle_interval: Duration,
    /// Poll period while a run or stage is active
    pub active_interval: Duration,
    /// How long a trigger may go without a `running` sample
    pub start_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(2000),
            active_interval: Duration::from_millis(3000),
            start_grace: Duration::from_millis(10_000),
        }
    }
}

impl From<&PollingConfig> for PipelineConfig {
    fn from(polling: &PollingConfig) -> Self {
        Self {
            idle_interval: polling.idle_interval(),
            active_interval: polling.active_interval(),
            start_grace: polling.start_grace(),
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub kind: RunKind,
    pub completed_stages: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub(crate) fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}
