//! Controller actor and the `Pipeline` handle

use super::poller::run_poller;
use super::state::PipelineState;
use super::{ActiveRun, PipelineConfig, PipelineSnapshot, PipelineStatus, RunPhase};
use crate::error::PipelineError;
use crate::job_service::JobService;
use chrono::Utc;
use echoaudit_common::events::{EchoEvent, EventBus, RunKind};
use echoaudit_common::AgentKey;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Commands handled by the controller actor
#[derive(Debug)]
pub(crate) enum Command {
    /// Result of one status poll
    StatusPolled(Result<PipelineStatus, String>),
    BeginRun {
        kind: RunKind,
        reply: oneshot::Sender<Result<ActiveRun, PipelineError>>,
    },
    EnterPhase {
        run_id: Uuid,
        phase: RunPhase,
    },
    FinishRun {
        run_id: Uuid,
        succeeded: bool,
    },
    AcquireAgent {
        key: AgentKey,
        reply: oneshot::Sender<bool>,
    },
    ReleaseAgent {
        key: AgentKey,
    },
}

/// Cloneable handle to the pipeline controller
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    service: Arc<dyn JobService>,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<PipelineSnapshot>,
    poll_now: Arc<Notify>,
    events: EventBus,
    config: PipelineConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Start the controller actor and the status poller
    ///
    /// Both stop when `cancel` fires. Must be called inside a tokio runtime.
    pub fn spawn(
        service: Arc<dyn JobService>,
        events: EventBus,
        config: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(PipelineSnapshot::default());
        let poll_now = Arc::new(Notify::new());

        let actor = tokio::spawn(run_actor(
            PipelineState::new(),
            command_rx,
            snapshot_tx,
            events.clone(),
            cancel.clone(),
        ));
        let poller = tokio::spawn(run_poller(
            Arc::clone(&service),
            commands.clone(),
            snapshots.clone(),
            Arc::clone(&poll_now),
            config,
            cancel.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                service,
                commands,
                snapshots,
                poll_now,
                events,
                config,
                cancel,
                tasks: Mutex::new(vec![actor, poller]),
            }),
        }
    }

    /// Latest published state
    pub fn snapshot(&self) -> PipelineSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.inner.snapshots.clone()
    }

    pub fn config(&self) -> PipelineConfig {
        self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Ask the poller for an immediate tick
    pub fn poll_now(&self) {
        self.inner.poll_now.notify_one();
    }

    /// Stop polling and abandon pending waits
    ///
    /// Remote jobs keep running; only local observation ends.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let tasks: Vec<_> = match self.inner.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Pipeline task ended abnormally");
            }
        }
    }

    pub(crate) fn service(&self) -> &Arc<dyn JobService> {
        &self.inner.service
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    fn send(&self, command: Command) {
        if self.inner.commands.send(command).is_err() {
            debug!("Pipeline controller stopped, command dropped");
        }
    }

    /// Take the run lock
    pub(crate) async fn begin_run(&self, kind: RunKind) -> Result<RunLease, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::BeginRun { kind, reply });
        let run = rx.await.map_err(|_| PipelineError::Cancelled)??;
        Ok(RunLease {
            pipeline: self.clone(),
            run,
            finished: false,
        })
    }

    /// Mark an agent in flight; `None` if it already is
    pub(crate) async fn acquire_agent(
        &self,
        key: AgentKey,
    ) -> Result<Option<AgentPermit>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AcquireAgent {
            key: key.clone(),
            reply,
        });
        let acquired = rx.await.map_err(|_| PipelineError::Cancelled)?;
        Ok(acquired.then(|| AgentPermit {
            pipeline: self.clone(),
            key,
        }))
    }
}

/// Holds the run lock; a lease dropped without `finish` fails the run
pub struct RunLease {
    pipeline: Pipeline,
    run: ActiveRun,
    finished: bool,
}

impl RunLease {
    pub fn run_id(&self) -> Uuid {
        self.run.run_id
    }

    pub fn kind(&self) -> RunKind {
        self.run.kind
    }

    pub(crate) fn enter_phase(&self, phase: RunPhase) {
        self.pipeline.send(Command::EnterPhase {
            run_id: self.run.run_id,
            phase,
        });
    }

    pub(crate) fn finish(mut self, succeeded: bool) {
        self.finished = true;
        self.pipeline.send(Command::FinishRun {
            run_id: self.run.run_id,
            succeeded,
        });
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if !self.finished {
            self.pipeline.send(Command::FinishRun {
                run_id: self.run.run_id,
                succeeded: false,
            });
        }
    }
}

/// In-flight marker of one agent, released on drop
pub struct AgentPermit {
    pipeline: Pipeline,
    key: AgentKey,
}

impl AgentPermit {
    pub fn key(&self) -> &AgentKey {
        &self.key
    }

    pub(crate) fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl Drop for AgentPermit {
    fn drop(&mut self) {
        self.pipeline.send(Command::ReleaseAgent {
            key: self.key.clone(),
        });
    }
}

impl std::fmt::Debug for AgentPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPermit").field("key", &self.key).finish()
    }
}

async fn run_actor(
    mut state: PipelineState,
    mut commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<PipelineSnapshot>,
    events: EventBus,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            Command::StatusPolled(Ok(status)) => state.apply_status(status),
            Command::StatusPolled(Err(message)) => {
                let consecutive_failures = state.record_poll_failure();
                warn!(
                    error = %message,
                    consecutive_failures,
                    "Status poll failed, keeping previous status"
                );
                events.emit_lossy(EchoEvent::StatusFetchFailed {
                    message,
                    consecutive_failures,
                    timestamp: Utc::now(),
                });
            }
            Command::BeginRun { kind, reply } => {
                if let Err(Ok(run)) = reply.send(state.try_begin_run(kind)) {
                    state.finish_run(run.run_id, false);
                }
            }
            Command::EnterPhase { run_id, phase } => {
                state.enter_phase(run_id, phase);
            }
            Command::FinishRun { run_id, succeeded } => {
                state.finish_run(run_id, succeeded);
            }
            Command::AcquireAgent { key, reply } => {
                let acquired = state.try_acquire_agent(key.clone());
                if reply.send(acquired).is_err() && acquired {
                    // Requester went away before taking the permit
                    state.release_agent(&key);
                }
            }
            Command::ReleaseAgent { key } => {
                state.release_agent(&key);
            }
        }

        snapshots.send_replace(state.snapshot());
    }

    debug!("Pipeline controller stopped");
}
