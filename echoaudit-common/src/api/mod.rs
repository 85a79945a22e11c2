//! Job Service wire types
//!
//! Request/response shapes exchanged with the Job Service. Everything here
//! decodes leniently: absent or `null` fields fall back to documented
//! defaults so a partial document never fails a whole refresh.

pub mod prompts;
pub mod status;
pub mod types;

pub use prompts::{CompanyPrompt, PromptSet};
pub use status::{Stage, StageStatus, StatusDocument};
pub use types::{
    AckKind, AgentAnalysisRequest, AgentAnalysisResponse, AgentAnalysisStatus, CallEntry,
    ListingAgent, ListingDocument, TranscriptBody, TriggerAck,
};

use serde::{Deserialize, Deserializer};

/// Deserialize `null` as the type's default value
///
/// Used together with `#[serde(default)]` so both a missing field and an
/// explicit `null` produce the default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
