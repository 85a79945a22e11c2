//! Shared test helpers: an in-memory Job Service with a simulated pipeline

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use echoaudit_client::job_service::AudioStream;
use echoaudit_client::{JobService, JobServiceError, PipelineConfig, PipelineSnapshot};
use echoaudit_common::api::{
    AgentAnalysisResponse, AgentAnalysisStatus, CallEntry, ListingAgent, ListingDocument,
    PromptSet, Stage, StatusDocument, TriggerAck,
};
use echoaudit_common::{AgentKey, CallKey};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub const PERIOD: &str = "2024-05-06_2024-05-12";
pub const OLDER_PERIOD: &str = "2024-04-29_2024-05-05";

/// Status polls a triggered stage reports `running=true` before finishing
pub const DEFAULT_RUN_POLLS: u32 = 2;

/// Fast intervals so tests finish in milliseconds
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        idle_interval: Duration::from_millis(10),
        active_interval: Duration::from_millis(5),
        start_grace: Duration::from_millis(200),
    }
}

pub fn agent_key(agent: &str) -> AgentKey {
    AgentKey::new(PERIOD, "UN", agent)
}

pub fn listing_agent(id: &str, calls: u64) -> ListingAgent {
    ListingAgent {
        id: id.to_string(),
        name: None,
        calls_count: calls,
        has_weekly_report: false,
    }
}

/// Two periods; the newest has organizations UN and VL
pub fn sample_listing() -> ListingDocument {
    let mut listing = ListingDocument::new();
    listing.entry(PERIOD.to_string()).or_default().insert(
        "UN".to_string(),
        vec![listing_agent("Volkov_Ivan", 3), listing_agent("Petrova_Anna", 1)],
    );
    listing
        .entry(PERIOD.to_string())
        .or_default()
        .insert("VL".to_string(), vec![listing_agent("Sidorov_Oleg", 2)]);
    listing
        .entry(OLDER_PERIOD.to_string())
        .or_default()
        .insert("UN".to_string(), vec![listing_agent("Volkov_Ivan", 5)]);
    listing
}

pub fn call_entry(filename: &str, date: &str, sort_key: &str) -> CallEntry {
    CallEntry {
        filename: filename.to_string(),
        date: Some(date.to_string()),
        time: Some("10:00".to_string()),
        sort_key: Some(sort_key.to_string()),
        has_transcript: false,
        has_report: false,
    }
}

/// Server-side pipeline and archive state
#[derive(Default)]
pub struct FakeState {
    pub listing: ListingDocument,
    pub calls: HashMap<String, Vec<CallEntry>>,
    pub calls_delay: HashMap<String, Duration>,
    pub listing_fails: bool,
    pub status_fails: bool,
    pub document: StatusDocument,
    /// Remaining running polls per stage
    pub remaining: HashMap<Stage, u32>,
    /// Running polls given to the next triggered stages
    pub run_polls: u32,
    /// Error a stage reports when it finishes
    pub stage_errors: HashMap<Stage, String>,
    /// Stages answered with 409
    pub rejected_stages: Vec<Stage>,
    /// Accept triggers without ever starting the stage
    pub ignore_triggers: bool,
    pub ack: TriggerAck,
    pub analysis_responses: VecDeque<AgentAnalysisStatus>,
    pub prompts: PromptSet,
    /// Every request that changes server state, in arrival order
    pub log: Vec<String>,
    /// Stages triggered while another stage still reported running
    pub overlapping_triggers: Vec<Stage>,
    pub status_polls: u32,
    pub listing_requests: u32,
}

pub struct FakeJobService {
    pub state: Mutex<FakeState>,
}

impl FakeJobService {
    pub fn new() -> Arc<Self> {
        Self::with(|_| {})
    }

    pub fn with(setup: impl FnOnce(&mut FakeState)) -> Arc<Self> {
        let mut state = FakeState {
            listing: sample_listing(),
            run_polls: DEFAULT_RUN_POLLS,
            ack: accepted(),
            ..Default::default()
        };
        setup(&mut state);
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn update(&self, change: impl FnOnce(&mut FakeState)) {
        change(&mut self.state.lock().unwrap());
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn status_polls(&self) -> u32 {
        self.state.lock().unwrap().status_polls
    }

    pub fn listing_requests(&self) -> u32 {
        self.state.lock().unwrap().listing_requests
    }

    pub fn overlapping_triggers(&self) -> Vec<Stage> {
        self.state.lock().unwrap().overlapping_triggers.clone()
    }

    /// Mark `stage` running for `polls` status polls
    pub fn start_remotely(&self, stage: Stage, polls: u32) {
        let mut state = self.state.lock().unwrap();
        state.document.stage_mut(stage).running = true;
        state.remaining.insert(stage, polls);
    }
}

pub fn accepted() -> TriggerAck {
    TriggerAck {
        status: Some("accepted".to_string()),
        message: None,
    }
}

#[async_trait]
impl JobService for FakeJobService {
    async fn listing(&self) -> Result<ListingDocument, JobServiceError> {
        let mut state = self.state.lock().unwrap();
        state.listing_requests += 1;
        if state.listing_fails {
            return Err(JobServiceError::Network("connection refused".to_string()));
        }
        Ok(state.listing.clone())
    }

    async fn calls(&self, agent: &AgentKey) -> Result<Vec<CallEntry>, JobServiceError> {
        let (delay, calls) = {
            let state = self.state.lock().unwrap();
            (
                state.calls_delay.get(&agent.agent).copied(),
                state.calls.get(&agent.agent).cloned().unwrap_or_default(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(calls)
    }

    async fn status(&self) -> Result<StatusDocument, JobServiceError> {
        let mut state = self.state.lock().unwrap();
        state.status_polls += 1;
        if state.status_fails {
            return Err(JobServiceError::Network("timed out".to_string()));
        }

        for stage in Stage::ALL {
            let Some(remaining) = state.remaining.get(&stage).copied() else {
                continue;
            };
            if remaining == 0 {
                state.remaining.remove(&stage);
                let error = state.stage_errors.get(&stage).cloned();
                let status = state.document.stage_mut(stage);
                status.running = false;
                status.progress.clear();
                status.error = error;
            } else {
                state.remaining.insert(stage, remaining - 1);
                state.document.stage_mut(stage).progress = format!("{remaining} left");
            }
        }
        Ok(state.document.clone())
    }

    async fn trigger_stage(&self, stage: Stage) -> Result<TriggerAck, JobServiceError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("trigger {stage}"));
        if state.rejected_stages.contains(&stage) {
            return Err(JobServiceError::Rejected("already running".to_string()));
        }
        if state.document.any_running() {
            state.overlapping_triggers.push(stage);
        }
        if !state.ignore_triggers {
            let polls = state.run_polls;
            state.document.stage_mut(stage).running = true;
            state.document.stage_mut(stage).error = None;
            state.remaining.insert(stage, polls);
        }
        Ok(state.ack.clone())
    }

    async fn trigger_agent_analysis(
        &self,
        agent: &AgentKey,
        force: bool,
    ) -> Result<AgentAnalysisResponse, JobServiceError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("analyze {} force={force}", agent.agent));
        let status = state
            .analysis_responses
            .pop_front()
            .unwrap_or(AgentAnalysisStatus::Accepted);
        if status == AgentAnalysisStatus::Accepted {
            let polls = state.run_polls;
            state.document.report.running = true;
            state.remaining.insert(Stage::Report, polls);
        }
        Ok(AgentAnalysisResponse {
            status,
            message: None,
        })
    }

    async fn report(&self, agent: &AgentKey) -> Result<Option<String>, JobServiceError> {
        Ok(Some(format!("# Report for {}", agent.agent)))
    }

    async fn transcript(&self, call: &CallKey) -> Result<Option<String>, JobServiceError> {
        Ok(Some(format!("Transcript of {}", call.filename)))
    }

    async fn audio_stream(&self, _call: &CallKey) -> Result<AudioStream, JobServiceError> {
        let chunks: Vec<Result<Bytes, JobServiceError>> = vec![Ok(Bytes::from_static(b"ID3"))];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn prompts(&self) -> Result<PromptSet, JobServiceError> {
        Ok(self.state.lock().unwrap().prompts.clone())
    }

    async fn save_prompts(&self, prompts: &PromptSet) -> Result<(), JobServiceError> {
        let mut state = self.state.lock().unwrap();
        state.log.push("save prompts".to_string());
        state.prompts = prompts.clone();
        Ok(())
    }
}

/// Wait (bounded) until the published snapshot satisfies `condition`
pub async fn wait_for_snapshot(
    snapshots: &mut watch::Receiver<PipelineSnapshot>,
    condition: impl Fn(&PipelineSnapshot) -> bool,
) -> PipelineSnapshot {
    let snapshot = tokio::time::timeout(Duration::from_secs(2), snapshots.wait_for(|s| condition(s)))
        .await
        .expect("timed out waiting for pipeline snapshot")
        .expect("pipeline controller stopped");
    snapshot.clone()
}

/// Await `future` with a generous upper bound
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation did not finish in time")
}
