//! Stage sequencing
//!
//! A run takes the run lock, then for each stage: trigger, wait for the
//! acknowledgment, wake the poller, and wait for completion. The next stage
//! is triggered only after the previous one was observed finished. The
//! first failure ends the run; nothing is retried.

use super::wait::{await_completion, Acknowledgment};
use super::{Pipeline, PipelineStatus, RunPhase, RunReport};
use crate::error::{JobServiceError, PipelineError};
use chrono::Utc;
use echoaudit_common::api::{AckKind, Stage};
use echoaudit_common::events::{EchoEvent, RunKind};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

impl Pipeline {
    /// Run fetch → transcribe → analyze → report
    pub async fn run_full_cycle(&self) -> Result<RunReport, PipelineError> {
        self.run(RunKind::FullCycle).await
    }

    /// Run a single stage
    pub async fn run_stage(&self, stage: Stage) -> Result<RunReport, PipelineError> {
        self.run(RunKind::Stage(stage)).await
    }

    async fn run(&self, kind: RunKind) -> Result<RunReport, PipelineError> {
        let lease = self.begin_run(kind).await?;
        let run_id = lease.run_id();
        let started_at = Utc::now();

        info!(run_id = %run_id, kind = %kind, "Run started");
        self.events().emit_lossy(EchoEvent::RunStarted {
            run_id,
            kind,
            timestamp: started_at,
        });

        let mut completed_stages = Vec::new();
        for stage in kind.stages() {
            lease.enter_phase(RunPhase::for_stage(stage));

            if let Err(e) = self.execute_stage(run_id, stage).await {
                if e.is_fatal() {
                    error!(run_id = %run_id, stage = %stage, error = %e, "Run failed");
                } else {
                    warn!(run_id = %run_id, stage = %stage, error = %e, "Run stopped");
                }
                lease.finish(false);
                self.events().emit_lossy(EchoEvent::RunFailed {
                    run_id,
                    kind,
                    stage: Some(stage),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }

            info!(run_id = %run_id, stage = %stage, "Stage completed");
            self.events().emit_lossy(EchoEvent::StageCompleted {
                run_id,
                stage,
                timestamp: Utc::now(),
            });
            completed_stages.push(stage);
        }

        lease.finish(true);
        let finished_at = Utc::now();
        info!(
            run_id = %run_id,
            kind = %kind,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "Run completed"
        );
        self.events().emit_lossy(EchoEvent::RunCompleted {
            run_id,
            kind,
            timestamp: finished_at,
        });

        Ok(RunReport {
            run_id,
            kind,
            completed_stages,
            started_at,
            finished_at,
        })
    }

    async fn execute_stage(&self, run_id: Uuid, stage: Stage) -> Result<(), PipelineError> {
        let target = format!("{stage} stage");
        let mut snapshots = self.subscribe();
        let baseline = self.baseline_status().await;

        let response = tokio::select! {
            _ = self.cancel_token().cancelled() => return Err(PipelineError::Cancelled),
            response = self.service().trigger_stage(stage) => response,
        };
        let ack = match response {
            Ok(ack) => ack,
            Err(JobServiceError::Rejected(reason)) => {
                return Err(PipelineError::TriggerRejected { target, reason })
            }
            Err(source) => return Err(PipelineError::Request { target, source }),
        };

        let kind = ack.kind();
        if kind == AckKind::Rejected {
            let reason = ack
                .message
                .or(ack.status)
                .unwrap_or_else(|| "rejected".to_string());
            return Err(PipelineError::TriggerRejected { target, reason });
        }

        let acknowledgment = Acknowledgment::new(
            Instant::now(),
            self.config().start_grace,
            kind == AckKind::Accepted,
            &baseline,
            stage,
        );
        info!(
            run_id = %run_id,
            stage = %stage,
            explicit = acknowledgment.explicit,
            "Stage triggered"
        );
        self.events().emit_lossy(EchoEvent::StageTriggered {
            run_id,
            stage,
            timestamp: Utc::now(),
        });
        self.poll_now();

        await_completion(&mut snapshots, stage, &acknowledgment, self.cancel_token()).await
    }

    /// Status a new trigger is judged against
    ///
    /// Before the poller's first sample has landed, one sample is fetched
    /// directly so errors left over from earlier work are not attributed
    /// to the trigger.
    pub(crate) async fn baseline_status(&self) -> Arc<PipelineStatus> {
        let current = self.snapshot().status;
        if current.requested_at.is_some() {
            return current;
        }

        let requested_at = Instant::now();
        let fetched = tokio::select! {
            _ = self.cancel_token().cancelled() => return current,
            fetched = self.service().status() => fetched,
        };
        match fetched {
            Ok(document) => Arc::new(PipelineStatus {
                document,
                requested_at: Some(requested_at),
                received_at: Some(Utc::now()),
            }),
            Err(e) => {
                debug!(error = %e, "No baseline status, judging against an empty one");
                current
            }
        }
    }
}
