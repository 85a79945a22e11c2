//! Job Service boundary
//!
//! The Job Service fetches recordings, runs speech-to-text and the language
//! model, and stores the artifacts. The client only triggers and observes it.

mod http;

pub use http::HttpJobService;

use crate::error::JobServiceError;
use async_trait::async_trait;
use bytes::Bytes;
use echoaudit_common::api::{
    AgentAnalysisResponse, CallEntry, ListingDocument, PromptSet, Stage, StatusDocument,
    TriggerAck,
};
use echoaudit_common::{AgentKey, CallKey};
use futures::stream::BoxStream;

/// Audio bytes of one recording, in arrival order
pub type AudioStream = BoxStream<'static, Result<Bytes, JobServiceError>>;

/// Request/response surface of the Job Service
#[async_trait]
pub trait JobService: Send + Sync {
    /// Period → organization → agent listing
    async fn listing(&self) -> Result<ListingDocument, JobServiceError>;

    /// Call records of one agent
    async fn calls(&self, agent: &AgentKey) -> Result<Vec<CallEntry>, JobServiceError>;

    /// Full status document
    async fn status(&self) -> Result<StatusDocument, JobServiceError>;

    /// Start a stage; the acknowledgment only confirms acceptance
    async fn trigger_stage(&self, stage: Stage) -> Result<TriggerAck, JobServiceError>;

    /// Start an agent-scoped analysis
    ///
    /// With `force = false` the service answers `exists` instead of
    /// overwriting a finished report.
    async fn trigger_agent_analysis(
        &self,
        agent: &AgentKey,
        force: bool,
    ) -> Result<AgentAnalysisResponse, JobServiceError>;

    /// Weekly report body, `None` if not generated yet
    async fn report(&self, agent: &AgentKey) -> Result<Option<String>, JobServiceError>;

    /// Transcript text, `None` if not transcribed yet
    async fn transcript(&self, call: &CallKey) -> Result<Option<String>, JobServiceError>;

    /// Binary audio of one recording
    async fn audio_stream(&self, call: &CallKey) -> Result<AudioStream, JobServiceError>;

    /// Analysis instruction texts
    async fn prompts(&self) -> Result<PromptSet, JobServiceError>;

    /// Persist analysis instruction texts
    async fn save_prompts(&self, prompts: &PromptSet) -> Result<(), JobServiceError>;
}
