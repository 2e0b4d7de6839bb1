/// Optimistic mutation tests
///
/// Create, update and delete against an in-memory remote: local visibility,
/// confirmation, rollback and resync.
/// Run with: cargo test --test optimistic_store_tests

mod common;

use async_trait::async_trait;
use common::{Harness, settle, store_over, wait_for_state};
use crm_sync::core::{MemoryNotifier, NotificationLevel, is_provisional};
use crm_sync::entities::{Deal, DealPatch, DealStage, Lead, LeadPatch, LeadStatus};
use crm_sync::remote::{RemoteOp, RemoteSource};
use crm_sync::store::MutationPhase;
use crm_sync::{MutationKind, Result, SyncError};
use serde_json::{Value, json};
use std::sync::Arc;

fn lead_draft(name: &str) -> LeadPatch {
    LeadPatch {
        name: Some(name.to_string()),
        email: Some(Some(format!("{}@example.com", name.to_lowercase()))),
        status: Some(Some(LeadStatus::New)),
        ..Default::default()
    }
}

fn seeded_leads() -> Vec<Value> {
    vec![
        json!({ "id": "l-1", "name": "Grace", "status": "qualified" }),
        json!({ "id": "l-2", "name": "Linus", "status": "new" }),
        json!({ "id": "l-3", "name": "Barbara", "status": "won", "value": 5000.0 }),
    ]
}

/// Answers every create with a fixed server record.
struct FixedCreate;

#[async_trait]
impl RemoteSource for FixedCreate {
    async fn list(&self, _collection: &str) -> Result<Vec<Value>> {
        Ok(vec![json!({ "id": "a", "name": "Existing" })])
    }

    async fn create(&self, _collection: &str, body: Value) -> Result<Value> {
        let mut record = body;
        record["id"] = json!("real-1");
        Ok(record)
    }

    async fn update(&self, _collection: &str, _id: &str, body: Value) -> Result<Value> {
        Ok(body)
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_create_is_visible_before_request_resolves() {
    let h = Harness::new();
    let store = h.store::<Lead>();
    h.remote.hold();

    let task = tokio::spawn({
        let store = store.clone();
        async move { store.create(lead_draft("Ada")).await }
    });
    wait_for_state(&store, |s| s.records.len() == 1).await;

    let provisional = store.records()[0].clone();
    assert!(is_provisional(&provisional.id));
    assert_eq!(provisional.name, "Ada");
    assert_eq!(store.statistics().total, 1);
    assert_eq!(store.statistics().count("status", "new"), 1);

    let pending = store.pending_mutations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].action, MutationKind::Create);
    assert_eq!(pending[0].phase, MutationPhase::Applied);
    assert_eq!(pending[0].record_id, provisional.id);

    h.remote.release();
    let created = task.await.unwrap().unwrap();

    assert!(!is_provisional(&created.id));
    assert_eq!(store.len(), 1);
    assert_eq!(store.records()[0].id, created.id);
    assert!(store.pending_mutations().is_empty());
}

#[tokio::test]
async fn test_create_success_swaps_in_server_identifier() {
    let notifier = Arc::new(MemoryNotifier::new());
    let store = store_over::<Lead>(Arc::new(FixedCreate), notifier.clone());
    store.load().await.unwrap();

    let created = store.create(lead_draft("Ada")).await.unwrap();

    assert_eq!(created.id, "real-1");
    let ids: Vec<String> = store.records().iter().map(|l| l.id.clone()).collect();
    assert_eq!(ids, vec!["real-1".to_string(), "a".to_string()]);
    assert_eq!(ids.iter().filter(|id| *id == "real-1").count(), 1);
    assert!(!ids.iter().any(|id| is_provisional(id)));
    assert_eq!(notifier.count(NotificationLevel::Success), 1);
}

#[tokio::test]
async fn test_create_failure_restores_previous_collection() {
    let h = Harness::new();
    h.remote.seed("leads", seeded_leads());
    let store = h.store::<Lead>();
    store.load().await.unwrap();
    let before = store.records();
    let stats_before = store.statistics();

    h.remote.fail_next(
        RemoteOp::Create,
        SyncError::Rejected {
            status: 422,
            message: "email is already taken".into(),
        },
    );
    let err = store.create(lead_draft("Ada")).await.unwrap_err();

    assert_eq!(
        err,
        SyncError::MutationFailed {
            entity: "Lead",
            action: MutationKind::Create,
            message: "email is already taken".into(),
        }
    );
    assert_eq!(store.records(), before);
    assert_eq!(store.statistics(), stats_before);
    assert!(store.pending_mutations().is_empty());

    let errors: Vec<_> = h
        .notifier
        .notifications()
        .into_iter()
        .filter(|n| n.level == NotificationLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].action, "create");
    assert!(errors[0].message.contains("email is already taken"));
}

#[tokio::test]
async fn test_malformed_create_response_takes_the_rollback_path() {
    let h = Harness::new();
    let store = h.store::<Deal>();
    h.remote
        .fail_next(RemoteOp::Create, SyncError::Malformed("response has no `data` field".into()));

    let err = store
        .create(DealPatch {
            title: Some("Renewal".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MutationFailed { entity: "Deal", .. }));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_delete_failure_restores_exact_order() {
    let h = Harness::new();
    h.remote.seed("leads", seeded_leads());
    let store = h.store::<Lead>();
    store.load().await.unwrap();
    let before = store.records();

    h.remote.hold();
    h.remote
        .fail_next(RemoteOp::Delete, SyncError::Transport("connection reset".into()));
    let task = tokio::spawn({
        let store = store.clone();
        async move { store.delete("l-2").await }
    });
    wait_for_state(&store, |s| s.records.len() == 2).await;
    assert!(store.get("l-2").is_none());

    h.remote.release();
    let err = task.await.unwrap().unwrap_err();

    assert!(matches!(
        err,
        SyncError::MutationFailed { action: MutationKind::Delete, .. }
    ));
    assert_eq!(store.records(), before);
    let ids: Vec<&str> = before.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, vec!["l-1", "l-2", "l-3"]);
}

#[tokio::test]
async fn test_delete_success_keeps_record_removed() {
    let h = Harness::new();
    h.remote.seed("leads", seeded_leads());
    let store = h.store::<Lead>();
    store.load().await.unwrap();

    store.delete("l-3").await.unwrap();

    assert_eq!(store.len(), 2);
    assert_eq!(store.statistics().sum("value"), 0.0);
    assert_eq!(h.remote.records("leads").len(), 2);
    assert_eq!(h.notifier.count(NotificationLevel::Success), 1);
}

#[tokio::test]
async fn test_update_overwrites_with_server_record() {
    let h = Harness::new();
    h.remote.seed(
        "deals",
        vec![json!({ "id": "d-1", "title": "Renewal", "value": 1000.0, "stage": "prospecting" })],
    );
    let store = h.store::<Deal>();
    store.load().await.unwrap();

    let updated = store
        .update(
            "d-1",
            DealPatch {
                stage: Some(Some(DealStage::Negotiation)),
                probability: Some(60),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let server: Deal = serde_json::from_value(h.remote.records("deals")[0].clone()).unwrap();
    assert_eq!(updated, server);
    assert_eq!(store.get("d-1"), Some(server));
    assert_eq!(store.statistics().count("stage", "negotiation"), 1);
    assert_eq!(store.statistics().count("stage", "prospecting"), 0);
}

#[tokio::test]
async fn test_update_failure_resyncs_from_server() {
    let h = Harness::new();
    h.remote.seed("leads", seeded_leads());
    let store = h.store::<Lead>();
    store.load().await.unwrap();

    // Another session changed the lead in the meantime.
    let mut server_side = seeded_leads();
    server_side[0]["status"] = json!("lost");
    h.remote.seed("leads", server_side);
    h.remote.fail_next(
        RemoteOp::Update,
        SyncError::Rejected {
            status: 409,
            message: "lead is locked".into(),
        },
    );

    let err = store
        .update(
            "l-1",
            LeadPatch {
                status: Some(Some(LeadStatus::Won)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("lead is locked"));
    assert_eq!(store.get("l-1").unwrap().status, Some(LeadStatus::Lost));
    assert_eq!(h.remote.calls(RemoteOp::List), 2);
    assert!(!store.is_loading());
    assert!(store.error().is_none());
}

#[tokio::test]
async fn test_update_is_merged_locally_while_in_flight() {
    let h = Harness::new();
    h.remote.seed("leads", seeded_leads());
    let store = h.store::<Lead>();
    store.load().await.unwrap();
    h.remote.hold();

    let task = tokio::spawn({
        let store = store.clone();
        async move {
            store
                .update(
                    "l-2",
                    LeadPatch {
                        status: Some(Some(LeadStatus::Contacted)),
                        ..Default::default()
                    },
                )
                .await
        }
    });
    wait_for_state(&store, |s| {
        s.get("l-2").is_some_and(|l| l.status == Some(LeadStatus::Contacted))
    })
    .await;

    let lead = store.get("l-2").unwrap();
    assert_eq!(lead.name, "Linus");
    assert_eq!(store.statistics().count("status", "contacted"), 1);

    h.remote.release();
    task.await.unwrap().unwrap();
    assert_eq!(store.get("l-2").unwrap().status, Some(LeadStatus::Contacted));
}

#[tokio::test]
async fn test_concurrent_creates_settle_independently() {
    let h = Harness::new();
    let store = h.store::<Lead>();
    h.remote.hold();
    h.remote.fail_next(RemoteOp::Create, SyncError::Transport("timeout".into()));

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.create(lead_draft("First")).await }
    });
    let second = tokio::spawn({
        let store = store.clone();
        async move { store.create(lead_draft("Second")).await }
    });
    wait_for_state(&store, |s| s.records.len() == 2).await;
    settle().await;
    assert_eq!(store.pending_mutations().len(), 2);

    h.remote.release();
    let outcomes = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 1);
    assert_eq!(store.len(), 1);
    assert!(!is_provisional(&store.records()[0].id));
    assert!(store.pending_mutations().is_empty());
}

#[tokio::test]
async fn test_mutating_unknown_records_is_reported() {
    let h = Harness::new();
    let store = h.store::<Lead>();

    assert!(store.delete("nope").await.is_err());
    assert!(store.update("temp-1", LeadPatch::default()).await.is_err());

    assert_eq!(h.remote.calls(RemoteOp::Delete), 0);
    assert_eq!(h.notifier.count(NotificationLevel::Error), 2);
}
