//! Listing, call, trigger and transcript wire types

use super::null_as_default;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ========================================
// Listing
// ========================================

/// `GET /api/structure` document: period → organization → agents
pub type ListingDocument = BTreeMap<String, BTreeMap<String, Vec<ListingAgent>>>;

/// One agent entry of the listing document
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ListingAgent {
    /// Stable agent key (empty when the Job Service omitted it)
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,

    /// Human-readable name supplied by the Job Service, if any
    #[serde(default)]
    pub name: Option<String>,

    /// Number of recorded calls for the period
    #[serde(default, deserialize_with = "null_as_default")]
    pub calls_count: u64,

    /// Whether the weekly quality report already exists
    #[serde(default, deserialize_with = "null_as_default")]
    pub has_weekly_report: bool,
}

// ========================================
// Calls
// ========================================

/// One entry of `GET /api/calls/{period}/{org}/{agent}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CallEntry {
    /// Recording file name, unique within agent + day
    #[serde(default, deserialize_with = "null_as_default")]
    pub filename: String,

    /// Calendar date (`YYYY-MM-DD` when well-formed)
    #[serde(default)]
    pub date: Option<String>,

    /// Display time of day
    #[serde(default)]
    pub time: Option<String>,

    /// Recency key, lexicographically sortable
    #[serde(default)]
    pub sort_key: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub has_transcript: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub has_report: bool,
}

/// `GET /api/transcript/...` response body
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TranscriptBody {
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
}

// ========================================
// Stage triggers
// ========================================

/// Acknowledgment returned by the stage trigger endpoints
///
/// The Job Service only promises to acknowledge acceptance; the body may be
/// empty, so every field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TriggerAck {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

/// Classification of a trigger acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// Job Service said it accepted or started the stage
    Accepted,
    /// Request succeeded but the body carried no recognizable status
    Implicit,
    /// Job Service declined (e.g. the stage is already running)
    Rejected,
}

impl TriggerAck {
    pub fn kind(&self) -> AckKind {
        match self.status.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if matches!(s.as_str(), "accepted" | "started" | "ok") => AckKind::Accepted,
            Some(s) if matches!(s.as_str(), "already_running" | "busy" | "rejected") => {
                AckKind::Rejected
            }
            _ => AckKind::Implicit,
        }
    }
}

// ========================================
// Agent analysis
// ========================================

/// `POST /api/analyze_manager` body
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgentAnalysisRequest {
    /// Period key
    pub week: String,
    /// Organization code
    pub company: String,
    /// Agent id
    pub manager: String,
    /// Overwrite an existing report
    #[serde(default)]
    pub force: bool,
}

/// Outcome reported by the agent analysis endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAnalysisStatus {
    /// Job queued
    #[serde(alias = "started", alias = "ok")]
    Accepted,
    /// Report already exists; re-issue with `force = true` to overwrite
    Exists,
    /// Job Service refused (e.g. an analysis is already running)
    #[serde(alias = "already_running", alias = "busy")]
    Rejected,
}

/// `POST /api/analyze_manager` response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentAnalysisResponse {
    pub status: AgentAnalysisStatus,

    #[serde(default)]
    pub message: Option<String>,
}
