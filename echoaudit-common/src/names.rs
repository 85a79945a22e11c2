//! Display names for agents and organizations
//!
//! Names are presentation-only. Ids remain the only lookup keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Translation tables loaded from the `[names]` section of the config
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NameBook {
    /// Agent id → display name
    #[serde(default)]
    pub agents: BTreeMap<String, String>,

    /// Organization code → display name
    #[serde(default)]
    pub organizations: BTreeMap<String, String>,
}

impl NameBook {
    /// Display name for an agent
    ///
    /// Priority: configured translation, then the name supplied by the Job
    /// Service, then the id with underscores turned into spaces.
    pub fn agent_name(&self, id: &str, supplied: Option<&str>) -> String {
        if let Some(name) = self.agents.get(id) {
            return name.clone();
        }
        match supplied.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => normalize_id(id),
        }
    }

    /// Display name for an organization, e.g. `Union (UN)`
    pub fn organization_name(&self, code: &str) -> String {
        match self.organizations.get(code) {
            Some(name) => format!("{name} ({code})"),
            None => code.to_string(),
        }
    }
}

/// `Volkov_Ivan` → `Volkov Ivan`
pub fn normalize_id(id: &str) -> String {
    id.replace('_', " ")
}
