//! Catalog Navigation Tests
//! Test File: catalog_tests.rs
//!
//! Index refresh, selection reconciliation and call-list loading against
//! the in-memory Job Service.

mod helpers;

use echoaudit_client::{Catalog, CatalogError, JobService};
use echoaudit_common::events::{EchoEvent, EventBus};
use echoaudit_common::{AgentKey, NameBook};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

fn catalog_for(service: &Arc<FakeJobService>) -> Arc<Catalog> {
    Arc::new(Catalog::new(
        Arc::clone(service) as Arc<dyn JobService>,
        NameBook::default(),
        EventBus::new(16),
    ))
}

fn with_calls(state: &mut FakeState) {
    state.calls.insert(
        "Volkov_Ivan".to_string(),
        vec![
            call_entry("a.mp3", "2024-05-07", "2024-05-07T09:00"),
            call_entry("b.mp3", "2024-05-08", "2024-05-08T11:00"),
            call_entry("c.mp3", "2024-05-08", "2024-05-08T15:30"),
        ],
    );
    state.calls.insert(
        "Petrova_Anna".to_string(),
        vec![call_entry("p.mp3", "2024-05-09", "2024-05-09T10:00")],
    );
}

/// TC-CAT-001: First refresh selects the latest period and first organization
#[tokio::test]
async fn tc_cat_001_initial_refresh_auto_selects() {
    // Given: A listing with two periods
    let service = FakeJobService::with(with_calls);
    let catalog = catalog_for(&service);

    // When: The index is loaded
    let change = catalog.refresh_index().await.unwrap();

    // Then: Period and organization are chosen, the agent is not
    assert!(change.period && change.organization && !change.agent);
    let selection = catalog.selection();
    assert_eq!(selection.period.as_deref(), Some(PERIOD));
    assert_eq!(selection.organization.as_deref(), Some("UN"));
    assert_eq!(selection.agent, None);
    assert!(catalog.view().calls.is_empty());
}

/// TC-CAT-002: Selecting an agent loads its calls grouped newest day first
#[tokio::test]
async fn tc_cat_002_select_agent_loads_day_groups() {
    let service = FakeJobService::with(with_calls);
    let catalog = catalog_for(&service);
    catalog.refresh_index().await.unwrap();

    catalog.select_agent("Volkov_Ivan").await.unwrap();

    let view = catalog.view();
    assert_eq!(view.calls_for, Some(agent_key("Volkov_Ivan")));
    assert_eq!(view.calls.len(), 3);
    let days: Vec<&str> = view.days.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(days, vec!["2024-05-08", "2024-05-07"]);
    let newest: Vec<&str> = view.days[0].calls.iter().map(|c| c.filename.as_str()).collect();
    assert_eq!(newest, vec!["c.mp3", "b.mp3"]);
}

/// TC-CAT-003: Unknown keys are rejected and leave the selection alone
#[tokio::test]
async fn tc_cat_003_unknown_keys_rejected() {
    let service = FakeJobService::new();
    let catalog = catalog_for(&service);
    catalog.refresh_index().await.unwrap();
    let before = catalog.selection();

    assert!(matches!(
        catalog.select_agent("Nobody").await,
        Err(CatalogError::NotFound(_))
    ));
    assert!(matches!(
        catalog.select_period("2020-01-01_2020-01-07"),
        Err(CatalogError::NotFound(_))
    ));
    assert_eq!(catalog.selection(), before);
}

/// TC-CAT-004: Navigation on an empty index needs a period first
#[tokio::test]
async fn tc_cat_004_empty_index_has_nothing_to_select() {
    let service = FakeJobService::with(|s| s.listing.clear());
    let catalog = catalog_for(&service);

    catalog.refresh_index().await.unwrap();

    assert!(catalog.view().index.is_empty());
    assert!(matches!(
        catalog.select_organization("UN"),
        Err(CatalogError::NoSelection("period"))
    ));
}

/// TC-CAT-005: Refresh keeps a selection whose keys still exist
#[tokio::test]
async fn tc_cat_005_refresh_keeps_selection() {
    let service = FakeJobService::with(with_calls);
    let catalog = catalog_for(&service);
    catalog.refresh_index().await.unwrap();
    catalog.select_organization("VL").unwrap();
    catalog.select_agent("Sidorov_Oleg").await.unwrap();
    let before = catalog.selection();

    // When: A new listing arrives with an extra agent
    service.update(|s| {
        s.listing
            .get_mut(PERIOD)
            .unwrap()
            .get_mut("VL")
            .unwrap()
            .push(listing_agent("Orlova_Maria", 4));
    });
    catalog.refresh().await.unwrap();

    // Then: Nothing moved
    assert_eq!(catalog.selection(), before);
    assert_eq!(catalog.view().index.agents(PERIOD, "VL").len(), 2);
}

/// TC-CAT-006: A vanished agent falls back to the first agent of the organization
#[tokio::test]
async fn tc_cat_006_vanished_agent_falls_back() {
    let service = FakeJobService::with(with_calls);
    let catalog = catalog_for(&service);
    catalog.refresh_index().await.unwrap();
    catalog.select_agent("Petrova_Anna").await.unwrap();

    // When: Petrova disappears from the listing
    service.update(|s| {
        s.listing
            .get_mut(PERIOD)
            .unwrap()
            .get_mut("UN")
            .unwrap()
            .retain(|a| a.id != "Petrova_Anna");
    });
    let change = catalog.refresh_index().await.unwrap();

    // Then: The first remaining agent is selected and its calls loaded
    assert!(change.agent && !change.organization);
    let view = catalog.view();
    assert_eq!(view.selection.agent.as_deref(), Some("Volkov_Ivan"));
    assert_eq!(view.calls_for, Some(agent_key("Volkov_Ivan")));
    assert_eq!(view.calls.len(), 3);
}

/// TC-CAT-007: A vanished organization clears the agent
#[tokio::test]
async fn tc_cat_007_vanished_organization_clears_agent() {
    let service = FakeJobService::with(with_calls);
    let catalog = catalog_for(&service);
    catalog.refresh_index().await.unwrap();
    catalog.select_organization("VL").unwrap();
    catalog.select_agent("Sidorov_Oleg").await.unwrap();

    service.update(|s| {
        s.listing.get_mut(PERIOD).unwrap().remove("VL");
    });
    catalog.refresh_index().await.unwrap();

    let view = catalog.view();
    assert_eq!(view.selection.organization.as_deref(), Some("UN"));
    assert_eq!(view.selection.agent, None);
    assert!(view.calls.is_empty());
    assert_eq!(view.calls_for, None);
}

/// TC-CAT-008: A failed refresh keeps the previous view
#[tokio::test]
async fn tc_cat_008_refresh_failure_keeps_view() {
    let service = FakeJobService::with(with_calls);
    let catalog = catalog_for(&service);
    catalog.refresh_index().await.unwrap();
    catalog.select_agent("Volkov_Ivan").await.unwrap();
    let before = catalog.view();

    service.update(|s| s.listing_fails = true);
    let result = catalog.refresh().await;

    assert!(matches!(result, Err(CatalogError::Fetch(_))));
    let after = catalog.view();
    assert_eq!(after.selection, before.selection);
    assert_eq!(after.loaded_at, before.loaded_at);
    assert_eq!(after.calls.len(), 3);
}

/// TC-CAT-009: A call list that arrives after the selection moved is discarded
#[tokio::test]
async fn tc_cat_009_stale_call_list_discarded() {
    // Given: Volkov's calls are slow to load
    let service = FakeJobService::with(|s| {
        with_calls(s);
        s.calls_delay
            .insert("Volkov_Ivan".to_string(), Duration::from_millis(100));
    });
    let catalog = catalog_for(&service);
    catalog.refresh_index().await.unwrap();

    // When: The user clicks Volkov, then Petrova before Volkov's list arrives
    let slow = {
        let catalog = Arc::clone(&catalog);
        tokio::spawn(async move { catalog.select_agent("Volkov_Ivan").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    catalog.select_agent("Petrova_Anna").await.unwrap();
    within(slow).await.unwrap().unwrap();

    // Then: Petrova's calls are shown
    let view = catalog.view();
    assert_eq!(view.calls_for, Some(agent_key("Petrova_Anna")));
    let files: Vec<&str> = view.calls.iter().map(|c| c.filename.as_str()).collect();
    assert_eq!(files, vec!["p.mp3"]);
}

/// TC-CAT-010: focus_agent loads the index and resolves the scope
#[tokio::test]
async fn tc_cat_010_focus_agent_in_older_period() {
    let service = FakeJobService::with(with_calls);
    let catalog = catalog_for(&service);

    let key = catalog
        .focus_agent(Some(OLDER_PERIOD), None, "Volkov_Ivan")
        .await
        .unwrap();

    assert_eq!(key, AgentKey::new(OLDER_PERIOD, "UN", "Volkov_Ivan"));
    assert_eq!(catalog.view().calls_for, Some(key));
}

/// TC-CAT-011: Each applied refresh is announced on the bus
#[tokio::test]
async fn tc_cat_011_refresh_emits_event() {
    let service = FakeJobService::new();
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let catalog = Catalog::new(
        Arc::clone(&service) as Arc<dyn JobService>,
        NameBook::default(),
        bus,
    );

    catalog.refresh_index().await.unwrap();

    match rx.try_recv().unwrap() {
        EchoEvent::IndexRefreshed { periods, agents, .. } => {
            assert_eq!(periods, 2);
            assert_eq!(agents, 4);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
