//! Identity keys for agents and calls
//!
//! These are the only keys used for lookups and Job Service requests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One agent within one period and organization
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentKey {
    pub period: String,
    pub organization: String,
    pub agent: String,
}

impl AgentKey {
    pub fn new(
        period: impl Into<String>,
        organization: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            period: period.into(),
            organization: organization.into(),
            agent: agent.into(),
        }
    }

    /// Key of one recording of this agent
    pub fn call(&self, filename: impl Into<String>) -> CallKey {
        CallKey {
            agent: self.clone(),
            filename: filename.into(),
        }
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.period, self.organization, self.agent)
    }
}

/// One recording
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallKey {
    pub agent: AgentKey,
    pub filename: String,
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent, self.filename)
    }
}
