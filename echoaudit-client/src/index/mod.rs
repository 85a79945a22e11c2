//! Recording index: period → organization → agent
//!
//! The index is rebuilt wholesale from each listing and shared as
//! `Arc<RecordingIndex>`; it is never mutated after construction.

mod builder;
mod selection;

pub use builder::build_index;
pub use selection::{Selection, SelectionChange};

use serde::Serialize;
use std::collections::BTreeMap;

/// One agent within one period and organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    /// Lookup key; stable across refreshes
    pub id: String,
    /// Presentation-only name
    pub display_name: String,
    pub call_count: u64,
    pub has_weekly_report: bool,
}

/// Three-level ordered index
///
/// Periods are `START_END` keys; lexicographic order doubles as
/// chronological order. Organizations iterate sorted; agents keep listing
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordingIndex {
    periods: BTreeMap<String, BTreeMap<String, Vec<AgentSummary>>>,
}

impl RecordingIndex {
    pub(crate) fn from_periods(
        periods: BTreeMap<String, BTreeMap<String, Vec<AgentSummary>>>,
    ) -> Self {
        Self { periods }
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Period keys, most recent first
    pub fn periods(&self) -> impl Iterator<Item = &str> {
        self.periods.keys().rev().map(String::as_str)
    }

    pub fn latest_period(&self) -> Option<&str> {
        self.periods().next()
    }

    pub fn contains_period(&self, period: &str) -> bool {
        self.periods.contains_key(period)
    }

    /// Organization codes of a period, sorted
    pub fn organizations<'a>(&'a self, period: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.periods
            .get(period)
            .into_iter()
            .flat_map(|orgs| orgs.keys().map(String::as_str))
    }

    pub fn first_organization(&self, period: &str) -> Option<&str> {
        self.organizations(period).next()
    }

    pub fn contains_organization(&self, period: &str, organization: &str) -> bool {
        self.periods
            .get(period)
            .is_some_and(|orgs| orgs.contains_key(organization))
    }

    /// Agents of one organization in listing order; empty if absent
    pub fn agents(&self, period: &str, organization: &str) -> &[AgentSummary] {
        self.periods
            .get(period)
            .and_then(|orgs| orgs.get(organization))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn agent(&self, period: &str, organization: &str, id: &str) -> Option<&AgentSummary> {
        self.agents(period, organization).iter().find(|a| a.id == id)
    }

    pub fn contains_agent(&self, period: &str, organization: &str, id: &str) -> bool {
        self.agent(period, organization, id).is_some()
    }

    /// Total number of agent entries across all periods
    pub fn agent_count(&self) -> usize {
        self.periods
            .values()
            .flat_map(|orgs| orgs.values())
            .map(Vec::len)
            .sum()
    }

    pub fn period_count(&self) -> usize {
        self.periods.len()
    }
}
