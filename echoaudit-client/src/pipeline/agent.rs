//! Agent-scoped analysis with single-flight and two-phase overwrite
//!
//! The in-flight marker is keyed by agent and is independent of the run
//! lock. A report that already exists is never overwritten without the
//! caller confirming through `PendingForce`.

use super::controller::AgentPermit;
use super::wait::{await_completion, Acknowledgment};
use super::Pipeline;
use crate::error::{JobServiceError, PipelineError};
use chrono::Utc;
use echoaudit_common::api::{AgentAnalysisStatus, Stage};
use echoaudit_common::events::EchoEvent;
use echoaudit_common::AgentKey;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stage whose status reflects agent-scoped analysis work
const AGENT_ANALYSIS_STAGE: Stage = Stage::Report;

/// Outcome of `trigger_agent_analysis`
#[derive(Debug)]
pub enum AgentAnalysis {
    /// An analysis for this agent is already in flight; nothing was sent
    AlreadyInFlight,
    /// The analysis ran to completion
    Completed,
    /// The report exists; confirm to overwrite or abandon
    Conflict(PendingForce),
}

/// Existing-report conflict awaiting the caller's decision
///
/// Holds the agent's in-flight marker until confirmed, abandoned or dropped.
#[derive(Debug)]
#[must_use = "a pending conflict holds the agent's in-flight marker"]
pub struct PendingForce {
    permit: AgentPermit,
}

impl PendingForce {
    pub fn agent(&self) -> &AgentKey {
        self.permit.key()
    }

    /// Re-issue the analysis with `force = true`
    pub async fn confirm(self) -> Result<(), PipelineError> {
        let pipeline = self.permit.pipeline().clone();
        pipeline
            .issue_agent_analysis(self.permit, true)
            .await
            .map(|_| ())
    }

    /// Decline the overwrite; no request is sent
    pub fn abandon(self) {
        debug!(agent = %self.agent(), "Overwrite declined");
    }
}

impl Pipeline {
    /// Analyze one agent's period
    ///
    /// No-op while the same agent is in flight. With `force = false` an
    /// existing report yields `Conflict`.
    pub async fn trigger_agent_analysis(
        &self,
        agent: &AgentKey,
        force: bool,
    ) -> Result<AgentAnalysis, PipelineError> {
        let Some(permit) = self.acquire_agent(agent.clone()).await? else {
            debug!(agent = %agent, "Analysis already in flight, ignoring trigger");
            return Ok(AgentAnalysis::AlreadyInFlight);
        };
        self.issue_agent_analysis(permit, force).await
    }

    pub(crate) async fn issue_agent_analysis(
        &self,
        permit: AgentPermit,
        force: bool,
    ) -> Result<AgentAnalysis, PipelineError> {
        let agent = permit.key().clone();
        let target = format!("analysis of {agent}");
        let mut snapshots = self.subscribe();
        let baseline = self.baseline_status().await;

        let response = tokio::select! {
            _ = self.cancel_token().cancelled() => return Err(PipelineError::Cancelled),
            response = self.service().trigger_agent_analysis(&agent, force) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(JobServiceError::Rejected(reason)) => {
                return Err(PipelineError::TriggerRejected { target, reason })
            }
            Err(source) => {
                self.agent_failed(&agent, &source.to_string());
                return Err(PipelineError::Request { target, source });
            }
        };

        match response.status {
            AgentAnalysisStatus::Accepted => {}
            AgentAnalysisStatus::Exists if !force => {
                info!(agent = %agent, "Report already exists, awaiting confirmation");
                self.events().emit_lossy(EchoEvent::ArtifactConflict {
                    agent,
                    timestamp: Utc::now(),
                });
                return Ok(AgentAnalysis::Conflict(PendingForce { permit }));
            }
            AgentAnalysisStatus::Exists | AgentAnalysisStatus::Rejected => {
                let reason = response
                    .message
                    .unwrap_or_else(|| format!("{:?}", response.status).to_lowercase());
                return Err(PipelineError::TriggerRejected { target, reason });
            }
        }

        let acknowledgment = Acknowledgment::new(
            Instant::now(),
            self.config().start_grace,
            true,
            &baseline,
            AGENT_ANALYSIS_STAGE,
        );
        info!(agent = %agent, force, "Agent analysis started");
        self.events().emit_lossy(EchoEvent::AgentAnalysisStarted {
            agent: agent.clone(),
            force,
            timestamp: Utc::now(),
        });
        self.poll_now();

        let outcome = await_completion(
            &mut snapshots,
            AGENT_ANALYSIS_STAGE,
            &acknowledgment,
            self.cancel_token(),
        )
        .await;
        drop(permit);

        match outcome {
            Ok(()) => {
                info!(agent = %agent, "Agent analysis completed");
                self.events().emit_lossy(EchoEvent::AgentAnalysisCompleted {
                    agent,
                    timestamp: Utc::now(),
                });
                Ok(AgentAnalysis::Completed)
            }
            Err(e) => {
                if !matches!(e, PipelineError::Cancelled) {
                    self.agent_failed(&agent, &e.to_string());
                }
                Err(e)
            }
        }
    }

    fn agent_failed(&self, agent: &AgentKey, message: &str) {
        warn!(agent = %agent, error = %message, "Agent analysis failed");
        self.events().emit_lossy(EchoEvent::AgentAnalysisFailed {
            agent: agent.clone(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}
