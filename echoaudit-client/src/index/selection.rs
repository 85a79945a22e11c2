//! Navigation selection and its reconciliation against a new index

use super::RecordingIndex;
use crate::error::CatalogError;
use echoaudit_common::AgentKey;
use serde::Serialize;

/// Current period / organization / agent selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub period: Option<String>,
    pub organization: Option<String>,
    pub agent: Option<String>,
}

/// Which levels changed during a reconcile or navigation step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionChange {
    pub period: bool,
    pub organization: bool,
    pub agent: bool,
}

impl SelectionChange {
    pub fn any(&self) -> bool {
        self.period || self.organization || self.agent
    }
}

impl Selection {
    /// Fully qualified agent key, when all three levels are selected
    pub fn agent_key(&self) -> Option<AgentKey> {
        match (&self.period, &self.organization, &self.agent) {
            (Some(p), Some(o), Some(a)) => Some(AgentKey::new(p, o, a)),
            _ => None,
        }
    }

    /// Adjust the selection to a freshly built index
    ///
    /// Keys still present are kept. A vanished period or organization falls
    /// back to the first available key. A vanished agent falls back to the
    /// first agent of the same organization; when the organization itself
    /// moved the agent is cleared. Agents are never picked from nothing.
    pub fn reconcile(&mut self, index: &RecordingIndex) -> SelectionChange {
        let before = self.clone();

        let period = match self.period.take() {
            Some(p) if index.contains_period(&p) => Some(p),
            _ => index.latest_period().map(str::to_string),
        };

        let organization = match (&period, self.organization.take()) {
            (Some(p), Some(o)) if index.contains_organization(p, &o) => Some(o),
            (Some(p), _) => index.first_organization(p).map(str::to_string),
            (None, _) => None,
        };

        let parent_unchanged = period == before.period && organization == before.organization;
        let agent = match (&period, &organization, self.agent.take()) {
            (Some(p), Some(o), Some(a)) if index.contains_agent(p, o, &a) => Some(a),
            (Some(p), Some(o), Some(_)) if parent_unchanged => {
                index.agents(p, o).first().map(|a| a.id.clone())
            }
            _ => None,
        };

        self.period = period;
        self.organization = organization;
        self.agent = agent;

        SelectionChange {
            period: self.period != before.period,
            organization: self.organization != before.organization,
            agent: self.agent != before.agent,
        }
    }

    /// Switch period; keeps the organization if the new period has it
    pub fn select_period(
        &mut self,
        index: &RecordingIndex,
        period: &str,
    ) -> Result<SelectionChange, CatalogError> {
        if !index.contains_period(period) {
            return Err(CatalogError::NotFound(format!("period {period}")));
        }
        if self.period.as_deref() == Some(period) {
            return Ok(SelectionChange::default());
        }

        let organization = match &self.organization {
            Some(o) if index.contains_organization(period, o) => Some(o.clone()),
            _ => index.first_organization(period).map(str::to_string),
        };
        let change = SelectionChange {
            period: true,
            organization: organization != self.organization,
            agent: self.agent.is_some(),
        };

        self.period = Some(period.to_string());
        self.organization = organization;
        self.agent = None;
        Ok(change)
    }

    /// Switch organization within the selected period; clears the agent
    pub fn select_organization(
        &mut self,
        index: &RecordingIndex,
        organization: &str,
    ) -> Result<SelectionChange, CatalogError> {
        let period = self
            .period
            .as_deref()
            .ok_or(CatalogError::NoSelection("period"))?;
        if !index.contains_organization(period, organization) {
            return Err(CatalogError::NotFound(format!(
                "organization {organization} in {period}"
            )));
        }

        let change = SelectionChange {
            period: false,
            organization: self.organization.as_deref() != Some(organization),
            agent: self.agent.is_some(),
        };
        self.organization = Some(organization.to_string());
        self.agent = None;
        Ok(change)
    }

    /// Select an agent of the selected organization
    pub fn select_agent(
        &mut self,
        index: &RecordingIndex,
        agent: &str,
    ) -> Result<SelectionChange, CatalogError> {
        let period = self
            .period
            .as_deref()
            .ok_or(CatalogError::NoSelection("period"))?;
        let organization = self
            .organization
            .as_deref()
            .ok_or(CatalogError::NoSelection("organization"))?;
        if !index.contains_agent(period, organization, agent) {
            return Err(CatalogError::NotFound(format!(
                "agent {agent} in {period}/{organization}"
            )));
        }

        let change = SelectionChange {
            agent: self.agent.as_deref() != Some(agent),
            ..SelectionChange::default()
        };
        self.agent = Some(agent.to_string());
        Ok(change)
    }
}
