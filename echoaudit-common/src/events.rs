//! Event types for the EchoAudit event system
//!
//! Pipeline runs, agent analyses, refreshes and playback all report through
//! one `EventBus`. Events are informational: no component relies on an event
//! being received to stay correct.

use crate::api::Stage;
use crate::keys::{AgentKey, CallKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What a pipeline run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum RunKind {
    /// All four stages in order
    FullCycle,
    /// A single stage
    Stage(Stage),
}

impl RunKind {
    /// Stages this run executes, in order
    pub fn stages(self) -> Vec<Stage> {
        match self {
            RunKind::FullCycle => Stage::ALL.to_vec(),
            RunKind::Stage(stage) => vec![stage],
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::FullCycle => f.write_str("full cycle"),
            RunKind::Stage(stage) => write!(f, "{stage} stage"),
        }
    }
}

/// EchoAudit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EchoEvent {
    /// A pipeline run acquired the stage lock
    RunStarted {
        run_id: Uuid,
        kind: RunKind,
        timestamp: DateTime<Utc>,
    },

    /// A stage trigger was acknowledged by the Job Service
    StageTriggered {
        run_id: Uuid,
        stage: Stage,
        timestamp: DateTime<Utc>,
    },

    /// A stage's completion was observed by poll
    StageCompleted {
        run_id: Uuid,
        stage: Stage,
        timestamp: DateTime<Utc>,
    },

    /// Every stage of the run completed
    RunCompleted {
        run_id: Uuid,
        kind: RunKind,
        timestamp: DateTime<Utc>,
    },

    /// The run stopped early; the pipeline is back to idle
    RunFailed {
        run_id: Uuid,
        kind: RunKind,
        /// Stage that was in progress, if any
        stage: Option<Stage>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent analysis was accepted by the Job Service
    AgentAnalysisStarted {
        agent: AgentKey,
        force: bool,
        timestamp: DateTime<Utc>,
    },

    /// The agent's report already exists; waiting for the caller to confirm
    ArtifactConflict {
        agent: AgentKey,
        timestamp: DateTime<Utc>,
    },

    AgentAnalysisCompleted {
        agent: AgentKey,
        timestamp: DateTime<Utc>,
    },

    AgentAnalysisFailed {
        agent: AgentKey,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A status poll failed; the previous status is retained
    StatusFetchFailed {
        message: String,
        consecutive_failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// A new index snapshot was published
    IndexRefreshed {
        periods: usize,
        agents: usize,
        timestamp: DateTime<Utc>,
    },

    PlaybackStarted {
        call: CallKey,
        timestamp: DateTime<Utc>,
    },

    PlaybackStopped {
        call: CallKey,
        /// True when the stream ended on its own
        finished: bool,
        timestamp: DateTime<Utc>,
    },
}

impl EchoEvent {
    /// Whether this event means Job Service artifacts may have changed
    pub fn invalidates_index(&self) -> bool {
        matches!(
            self,
            EchoEvent::RunCompleted { .. }
                | EchoEvent::RunFailed { .. }
                | EchoEvent::AgentAnalysisCompleted { .. }
                | EchoEvent::AgentAnalysisFailed { .. }
        )
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            EchoEvent::RunStarted { timestamp, .. }
            | EchoEvent::StageTriggered { timestamp, .. }
            | EchoEvent::StageCompleted { timestamp, .. }
            | EchoEvent::RunCompleted { timestamp, .. }
            | EchoEvent::RunFailed { timestamp, .. }
            | EchoEvent::AgentAnalysisStarted { timestamp, .. }
            | EchoEvent::ArtifactConflict { timestamp, .. }
            | EchoEvent::AgentAnalysisCompleted { timestamp, .. }
            | EchoEvent::AgentAnalysisFailed { timestamp, .. }
            | EchoEvent::StatusFetchFailed { timestamp, .. }
            | EchoEvent::IndexRefreshed { timestamp, .. }
            | EchoEvent::PlaybackStarted { timestamp, .. }
            | EchoEvent::PlaybackStopped { timestamp, .. } => *timestamp,
        }
    }
}

impl fmt::Display for EchoEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EchoEvent::RunStarted { kind, .. } => write!(f, "Starting {kind}"),
            EchoEvent::StageTriggered { stage, .. } => write!(f, "{stage}: started"),
            EchoEvent::StageCompleted { stage, .. } => write!(f, "{stage}: done"),
            EchoEvent::RunCompleted { kind, .. } => write!(f, "{kind} finished"),
            EchoEvent::RunFailed {
                kind,
                stage: Some(stage),
                message,
                ..
            } => write!(f, "{kind} failed at {stage}: {message}"),
            EchoEvent::RunFailed { kind, message, .. } => write!(f, "{kind} failed: {message}"),
            EchoEvent::AgentAnalysisStarted { agent, force, .. } => {
                if *force {
                    write!(f, "Regenerating report for {agent}")
                } else {
                    write!(f, "Analyzing {agent}")
                }
            }
            EchoEvent::ArtifactConflict { agent, .. } => {
                write!(f, "Report for {agent} already exists")
            }
            EchoEvent::AgentAnalysisCompleted { agent, .. } => {
                write!(f, "Report for {agent} is ready")
            }
            EchoEvent::AgentAnalysisFailed { agent, message, .. } => {
                write!(f, "Analysis of {agent} failed: {message}")
            }
            EchoEvent::StatusFetchFailed {
                message,
                consecutive_failures,
                ..
            } => write!(f, "Status unavailable ({consecutive_failures}x): {message}"),
            EchoEvent::IndexRefreshed {
                periods, agents, ..
            } => write!(f, "Index refreshed: {periods} periods, {agents} agents"),
            EchoEvent::PlaybackStarted { call, .. } => write!(f, "Playing {}", call.filename),
            EchoEvent::PlaybackStopped {
                call, finished, ..
            } => {
                if *finished {
                    write!(f, "Finished {}", call.filename)
                } else {
                    write!(f, "Stopped {}", call.filename)
                }
            }
        }
    }
}

/// Broadcast bus for `EchoEvent`s
///
/// Cloning is cheap; all clones share one channel. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
///
/// # Examples
///
/// ```
/// use echoaudit_common::events::{EchoEvent, EventBus};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
/// bus.emit_lossy(EchoEvent::IndexRefreshed {
///     periods: 1,
///     agents: 3,
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EchoEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EchoEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: EchoEvent) -> Result<usize, broadcast::error::SendError<EchoEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EchoEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
