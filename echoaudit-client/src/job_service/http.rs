//! HTTP Job Service client
//!
//! Endpoint layout follows the Job Service's REST surface under `/api`.
//! Path segments are percent-encoded by `Url`, so ids and filenames with
//! spaces or non-ASCII characters are safe.

use super::{AudioStream, JobService};
use crate::error::JobServiceError;
use async_trait::async_trait;
use echoaudit_common::api::{
    AgentAnalysisRequest, AgentAnalysisResponse, CallEntry, ListingDocument, PromptSet, Stage,
    StatusDocument, TranscriptBody, TriggerAck,
};
use echoaudit_common::{AgentKey, CallKey};
use futures::TryStreamExt;
use reqwest::{Response, StatusCode, Url};
use std::time::Duration;

const USER_AGENT: &str = concat!("echoaudit/", env!("CARGO_PKG_VERSION"));

/// Job Service client over HTTP
#[derive(Debug, Clone)]
pub struct HttpJobService {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpJobService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, JobServiceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| JobServiceError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(JobServiceError::InvalidUrl(base_url.to_string()));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| JobServiceError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `{base}/api/{segments...}`
    fn endpoint(&self, segments: &[&str]) -> Result<Url, JobServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| JobServiceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn agent_segments<'a>(prefix: &'a str, agent: &'a AgentKey) -> [&'a str; 4] {
        [prefix, &agent.period, &agent.organization, &agent.agent]
    }

    async fn get(&self, url: Url) -> Result<Response, JobServiceError> {
        tracing::debug!(url = %url, "GET");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| JobServiceError::Network(e.to_string()))?;
        check_status(response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, JobServiceError> {
        self.get(url)
            .await?
            .json()
            .await
            .map_err(|e| JobServiceError::Parse(e.to_string()))
    }

    async fn post_json<B: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        body: Option<&B>,
    ) -> Result<Response, JobServiceError> {
        tracing::debug!(url = %url, "POST");
        let mut request = self.http_client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| JobServiceError::Network(e.to_string()))?;
        check_status(response).await
    }
}

/// Map non-success statuses onto `JobServiceError`
async fn check_status(response: Response) -> Result<Response, JobServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let detail = if body.trim().is_empty() { path } else { body };

    Err(match status {
        StatusCode::NOT_FOUND => JobServiceError::NotFound(detail),
        StatusCode::CONFLICT => JobServiceError::Rejected(detail),
        _ => JobServiceError::Api(status.as_u16(), detail),
    })
}

/// Treat 404 as "artifact not produced yet"
fn not_found_as_none<T>(result: Result<T, JobServiceError>) -> Result<Option<T>, JobServiceError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(JobServiceError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn trigger_path(stage: Stage) -> &'static str {
    match stage {
        Stage::Fetch => "sync",
        Stage::Transcribe => "transcribe",
        Stage::Analyze => "analyze",
        Stage::Report => "generatereport",
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn listing(&self) -> Result<ListingDocument, JobServiceError> {
        self.get_json(self.endpoint(&["structure"])?).await
    }

    async fn calls(&self, agent: &AgentKey) -> Result<Vec<CallEntry>, JobServiceError> {
        self.get_json(self.endpoint(&Self::agent_segments("calls", agent))?)
            .await
    }

    async fn status(&self) -> Result<StatusDocument, JobServiceError> {
        self.get_json(self.endpoint(&["status"])?).await
    }

    async fn trigger_stage(&self, stage: Stage) -> Result<TriggerAck, JobServiceError> {
        let url = self.endpoint(&[trigger_path(stage)])?;
        let response = self.post_json::<()>(url, None).await?;
        let text = response
            .text()
            .await
            .map_err(|e| JobServiceError::Network(e.to_string()))?;

        // The body only has to acknowledge; anything unreadable is an implicit ack
        if text.trim().is_empty() {
            return Ok(TriggerAck::default());
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::debug!(stage = %stage, error = %e, "Unrecognized trigger acknowledgment body");
            TriggerAck::default()
        }))
    }

    async fn trigger_agent_analysis(
        &self,
        agent: &AgentKey,
        force: bool,
    ) -> Result<AgentAnalysisResponse, JobServiceError> {
        let body = AgentAnalysisRequest {
            week: agent.period.clone(),
            company: agent.organization.clone(),
            manager: agent.agent.clone(),
            force,
        };
        self.post_json(self.endpoint(&["analyze_manager"])?, Some(&body))
            .await?
            .json()
            .await
            .map_err(|e| JobServiceError::Parse(e.to_string()))
    }

    async fn report(&self, agent: &AgentKey) -> Result<Option<String>, JobServiceError> {
        let [prefix, period, org, id] = Self::agent_segments("calls", agent);
        let mut url = self.endpoint(&[prefix, period, org, id, "report"])?;
        // Cache buster: a regenerated report must never be served stale
        url.query_pairs_mut()
            .append_pair("t", &chrono::Utc::now().timestamp_millis().to_string());

        let response = not_found_as_none(self.get(url).await)?;
        match response {
            Some(response) => response
                .text()
                .await
                .map(Some)
                .map_err(|e| JobServiceError::Network(e.to_string())),
            None => Ok(None),
        }
    }

    async fn transcript(&self, call: &CallKey) -> Result<Option<String>, JobServiceError> {
        let [_, period, org, id] = Self::agent_segments("transcript", &call.agent);
        let url = self.endpoint(&["transcript", period, org, id, &call.filename])?;
        let body: Option<TranscriptBody> = not_found_as_none(self.get_json(url).await)?;
        Ok(body.map(|b| b.content))
    }

    async fn audio_stream(&self, call: &CallKey) -> Result<AudioStream, JobServiceError> {
        let [_, period, org, id] = Self::agent_segments("audio", &call.agent);
        let url = self.endpoint(&["audio", period, org, id, &call.filename])?;
        let response = self.get(url).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| JobServiceError::Network(e.to_string()));
        Ok(Box::pin(stream))
    }

    async fn prompts(&self) -> Result<PromptSet, JobServiceError> {
        self.get_json(self.endpoint(&["prompts"])?).await
    }

    async fn save_prompts(&self, prompts: &PromptSet) -> Result<(), JobServiceError> {
        self.post_json(self.endpoint(&["prompts"])?, Some(prompts))
            .await?;
        Ok(())
    }
}
