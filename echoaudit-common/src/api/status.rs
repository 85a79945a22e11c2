//! Pipeline status document
//!
//! Each stage reports under its own key; sub-stages are never inferred from
//! progress text.

use super::null_as_default;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Download new call recordings
    Fetch,
    /// Speech-to-text
    Transcribe,
    /// Per-call language-model analysis
    Analyze,
    /// Weekly report generation
    Report,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 4] = [Stage::Fetch, Stage::Transcribe, Stage::Analyze, Stage::Report];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transcribe => "transcribe",
            Stage::Analyze => "analyze",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fetch" | "sync" => Ok(Stage::Fetch),
            "transcribe" => Ok(Stage::Transcribe),
            "analyze" => Ok(Stage::Analyze),
            "report" => Ok(Stage::Report),
            other => Err(crate::Error::InvalidInput(format!("unknown stage: {other}"))),
        }
    }
}

/// Status of one stage as reported by the Job Service
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StageStatus {
    #[serde(default, deserialize_with = "null_as_default")]
    pub running: bool,

    /// Human-readable progress line
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress: String,

    /// Terminal error of the last run of this stage, if the service reports one per stage
    #[serde(default, alias = "last_error")]
    pub error: Option<String>,
}

/// `GET /api/status` document
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StatusDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub fetch: StageStatus,

    #[serde(default, deserialize_with = "null_as_default")]
    pub transcribe: StageStatus,

    #[serde(default, deserialize_with = "null_as_default")]
    pub analyze: StageStatus,

    #[serde(default, deserialize_with = "null_as_default")]
    pub report: StageStatus,

    /// Most recent pipeline error, not tied to a stage
    #[serde(default)]
    pub last_error: Option<String>,
}

impl StatusDocument {
    pub fn stage(&self, stage: Stage) -> &StageStatus {
        match stage {
            Stage::Fetch => &self.fetch,
            Stage::Transcribe => &self.transcribe,
            Stage::Analyze => &self.analyze,
            Stage::Report => &self.report,
        }
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageStatus {
        match stage {
            Stage::Fetch => &mut self.fetch,
            Stage::Transcribe => &mut self.transcribe,
            Stage::Analyze => &mut self.analyze,
            Stage::Report => &mut self.report,
        }
    }

    /// First running stage in pipeline order
    pub fn running_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| self.stage(*s).running)
    }

    pub fn any_running(&self) -> bool {
        self.running_stage().is_some()
    }
}
