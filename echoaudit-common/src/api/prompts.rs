//! Analysis instruction texts (`GET`/`POST /api/prompts`)
//!
//! The client treats prompts as opaque configuration: unknown fields are
//! carried through `extra` so a save never drops data it did not understand.

use super::null_as_default;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Full prompt document
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PromptSet {
    /// Shared system role for every organization
    #[serde(default, deserialize_with = "null_as_default")]
    pub system: String,

    /// Per-organization criteria keyed by organization code
    #[serde(default, deserialize_with = "null_as_default")]
    pub companies: BTreeMap<String, CompanyPrompt>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Analysis criteria for one organization
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CompanyPrompt {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub prompt: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PromptSet {
    /// Replace one organization's criteria, creating the entry if needed
    pub fn set_company_prompt(&mut self, code: &str, prompt: String) {
        self.companies.entry(code.to_string()).or_default().prompt = prompt;
    }
}
