//! Catalog: recording index, navigation selection and the selected agent's calls
//!
//! The whole navigation state is one `CatalogView` published through a
//! `watch` channel. Every update replaces the view's `Arc` parts; readers
//! never observe a half-applied refresh.

use crate::calls::{group_by_day, CallRecord, DayGroup};
use crate::error::CatalogError;
use crate::index::{build_index, RecordingIndex, Selection, SelectionChange};
use crate::job_service::JobService;
use chrono::{DateTime, Utc};
use echoaudit_common::events::{EchoEvent, EventBus};
use echoaudit_common::{AgentKey, NameBook};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Atomically replaced navigation snapshot
#[derive(Debug, Clone, Default)]
pub struct CatalogView {
    pub index: Arc<RecordingIndex>,
    pub selection: Selection,
    /// Calls of `calls_for`, in Job Service order
    pub calls: Arc<Vec<CallRecord>>,
    /// `calls` grouped by day
    pub days: Arc<Vec<DayGroup>>,
    /// Agent the call list belongs to
    pub calls_for: Option<AgentKey>,
    /// When the index was last rebuilt; `None` before the first listing
    pub loaded_at: Option<DateTime<Utc>>,
    /// Generation of the listing the index was built from
    generation: u64,
}

impl CatalogView {
    fn clear_calls(&mut self) {
        self.calls = Arc::default();
        self.days = Arc::default();
        self.calls_for = None;
    }
}

pub struct Catalog {
    service: Arc<dyn JobService>,
    names: NameBook,
    events: EventBus,
    view: watch::Sender<CatalogView>,
    next_generation: AtomicU64,
}

impl Catalog {
    pub fn new(service: Arc<dyn JobService>, names: NameBook, events: EventBus) -> Self {
        let (view, _) = watch::channel(CatalogView::default());
        Self {
            service,
            names,
            events,
            view,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Current snapshot
    pub fn view(&self) -> CatalogView {
        self.view.borrow().clone()
    }

    pub fn selection(&self) -> Selection {
        self.view.borrow().selection.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CatalogView> {
        self.view.subscribe()
    }

    /// Fetch the listing, rebuild the index and reconcile the selection
    ///
    /// On failure the previous view stays published. A listing that
    /// arrives after a newer one was applied is dropped.
    pub async fn refresh_index(&self) -> Result<SelectionChange, CatalogError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let listing = self.service.listing().await.map_err(|e| {
            warn!(error = %e, "Listing fetch failed, keeping previous index");
            CatalogError::from(e)
        })?;
        let index = Arc::new(build_index(&listing, &self.names));

        let mut change = SelectionChange::default();
        let applied = self.view.send_if_modified(|view| {
            if generation < view.generation {
                return false;
            }
            change = view.selection.reconcile(&index);
            view.index = Arc::clone(&index);
            view.loaded_at = Some(Utc::now());
            view.generation = generation;
            if change.any() {
                view.clear_calls();
            }
            true
        });

        if !applied {
            debug!(generation, "Discarding out-of-order listing");
            return Ok(SelectionChange::default());
        }

        info!(
            periods = index.period_count(),
            agents = index.agent_count(),
            "Index refreshed"
        );
        self.events.emit_lossy(EchoEvent::IndexRefreshed {
            periods: index.period_count(),
            agents: index.agent_count(),
            timestamp: Utc::now(),
        });

        if change.agent {
            self.reload_calls().await?;
        }
        Ok(change)
    }

    /// Refresh the index, then the selected agent's calls
    pub async fn refresh(&self) -> Result<(), CatalogError> {
        let change = self.refresh_index().await?;
        if !change.agent {
            self.reload_calls().await?;
        }
        Ok(())
    }

    pub fn select_period(&self, period: &str) -> Result<SelectionChange, CatalogError> {
        self.navigate(|index, selection| selection.select_period(index, period))
    }

    pub fn select_organization(&self, organization: &str) -> Result<SelectionChange, CatalogError> {
        self.navigate(|index, selection| selection.select_organization(index, organization))
    }

    /// Select an agent and load its calls
    pub async fn select_agent(&self, agent: &str) -> Result<SelectionChange, CatalogError> {
        let change = self.navigate(|index, selection| selection.select_agent(index, agent))?;
        let loaded = self.view.borrow().calls_for.is_some();
        if change.agent || !loaded {
            self.reload_calls().await?;
        }
        Ok(change)
    }

    /// Navigate to an agent, defaulting period and organization to the
    /// current (auto-selected) ones
    pub async fn focus_agent(
        &self,
        period: Option<&str>,
        organization: Option<&str>,
        agent: &str,
    ) -> Result<AgentKey, CatalogError> {
        let loaded = self.view.borrow().loaded_at.is_some();
        if !loaded {
            self.refresh_index().await?;
        }
        if let Some(period) = period {
            self.select_period(period)?;
        }
        if let Some(organization) = organization {
            self.select_organization(organization)?;
        }
        self.select_agent(agent).await?;
        self.selection()
            .agent_key()
            .ok_or(CatalogError::NoSelection("agent"))
    }

    /// Fetch the selected agent's calls and publish them
    ///
    /// The result is applied only if the same agent is still selected when
    /// it arrives; otherwise it is discarded.
    pub async fn reload_calls(&self) -> Result<(), CatalogError> {
        let selected = self.view.borrow().selection.agent_key();
        let Some(key) = selected else {
            return Ok(());
        };

        let entries = self.service.calls(&key).await.map_err(|e| {
            warn!(agent = %key, error = %e, "Call list fetch failed");
            CatalogError::from(e)
        })?;
        let calls: Vec<CallRecord> = entries.into_iter().map(CallRecord::from).collect();
        let days = group_by_day(&calls);
        let count = calls.len();

        let applied = self.view.send_if_modified(|view| {
            if view.selection.agent_key().as_ref() != Some(&key) {
                return false;
            }
            view.calls = Arc::new(calls);
            view.days = Arc::new(days);
            view.calls_for = Some(key.clone());
            true
        });

        if applied {
            debug!(agent = %key, calls = count, "Call list loaded");
        } else {
            debug!(agent = %key, "Discarding stale call list");
        }
        Ok(())
    }

    fn navigate<F>(&self, step: F) -> Result<SelectionChange, CatalogError>
    where
        F: FnOnce(&RecordingIndex, &mut Selection) -> Result<SelectionChange, CatalogError>,
    {
        let mut outcome = Ok(SelectionChange::default());
        self.view.send_if_modified(|view| {
            let index = Arc::clone(&view.index);
            outcome = step(&index, &mut view.selection);
            match &outcome {
                Ok(change) if change.any() => {
                    view.clear_calls();
                    true
                }
                _ => false,
            }
        });
        outcome
    }
}
