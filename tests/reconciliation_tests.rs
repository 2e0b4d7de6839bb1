/// Change feed reconciliation tests
///
/// Server records and feed events applied to stores: idempotence, ordering,
/// echoes of the store's own writes, changes made by other sessions and
/// category values this client does not know.
/// Run with: cargo test --test reconciliation_tests

mod common;

use common::{Harness, settle, wait_for_state};
use crm_sync::entities::{Lead, LeadPatch, LeadStatus, Task, TaskPatch, TaskStatus};
use crm_sync::realtime::{ChangeEvent, RawChangeEvent};
use crm_sync::remote::{MemoryRemote, RemoteSource};
use crm_sync::store::UNKNOWN_BUCKET;
use serde_json::json;

#[tokio::test]
async fn test_remote_update_lands_in_place() {
    let h = Harness::new();
    h.remote.seed(
        "tasks",
        vec![
            json!({ "id": "a", "title": "Call back" }),
            json!({ "id": "b", "title": "Send proposal" }),
        ],
    );
    let store = h.store::<Task>();
    store.open(&h.manager).await.unwrap();
    assert!(h.manager.is_connected());

    h.feed.publish(RawChangeEvent::update(
        "tasks",
        Some(json!({ "id": "a" })),
        json!({ "id": "a", "status": "done" }),
    ));
    wait_for_state(&store, |s| {
        s.get("a").is_some_and(|t| t.status == Some(TaskStatus::Done))
    })
    .await;

    let ids: Vec<String> = store.records().iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    let stats = store.statistics();
    assert_eq!(stats.count("status", "done"), 1);
    assert_eq!(stats.count("status", UNKNOWN_BUCKET), 1);
}

#[tokio::test]
async fn test_load_counts_missing_categories_as_unknown() {
    let h = Harness::new();
    h.remote.seed("tasks", vec![json!({ "id": "a" }), json!({ "id": "b" })]);
    let store = h.store::<Task>();

    store.load().await.unwrap();

    let stats = store.statistics();
    assert_eq!(stats.total, 2);
    for field in ["status", "priority"] {
        let counts = stats.breakdown(field).unwrap();
        assert_eq!(counts.len(), 1, "field {}", field);
        assert_eq!(counts.get(UNKNOWN_BUCKET), Some(&2), "field {}", field);
    }
}

#[tokio::test]
async fn test_load_keeps_records_with_unrecognised_categories() {
    let h = Harness::new();
    h.remote.seed(
        "leads",
        vec![
            json!({ "id": "a", "name": "Ada", "status": "won" }),
            json!({ "id": "b", "name": "Bjarne", "status": "archived", "source": "podcast" }),
        ],
    );
    let store = h.store::<Lead>();

    store.load().await.unwrap();

    assert_eq!(store.len(), 2);
    assert!(store.error().is_none());
    assert_eq!(store.get("b").unwrap().status, None);
    let stats = store.statistics();
    assert_eq!(stats.count("status", "won"), 1);
    assert_eq!(stats.count("status", UNKNOWN_BUCKET), 1);
    assert_eq!(stats.count("source", UNKNOWN_BUCKET), 2);
}

#[tokio::test]
async fn test_remote_update_with_unrecognised_category_is_applied() {
    let h = Harness::new();
    h.remote.seed("leads", vec![json!({ "id": "a", "name": "Ada", "status": "new" })]);
    let store = h.store::<Lead>();
    store.open(&h.manager).await.unwrap();
    assert_eq!(store.get("a").unwrap().status, Some(LeadStatus::New));

    h.feed.publish(RawChangeEvent::update(
        "leads",
        Some(json!({ "id": "a" })),
        json!({ "id": "a", "name": "Ada King", "status": "nurturing" }),
    ));
    wait_for_state(&store, |s| s.get("a").is_some_and(|l| l.name == "Ada King")).await;

    assert_eq!(store.get("a").unwrap().status, None);
    assert_eq!(store.statistics().count("status", "new"), 0);
    assert_eq!(store.statistics().count("status", UNKNOWN_BUCKET), 1);
}

#[tokio::test]
async fn test_duplicate_insert_is_applied_once() {
    let h = Harness::new();
    let store = h.store::<Lead>();
    let insert = RawChangeEvent::insert("leads", json!({ "id": "l-9", "name": "Hedy" }));

    store.handle_raw_event(&insert);
    let once = store.records();
    store.handle_raw_event(&insert);

    assert_eq!(store.records(), once);
    assert_eq!(store.len(), 1);
    assert_eq!(store.statistics().total, 1);
}

#[tokio::test]
async fn test_duplicate_delivery_through_feed() {
    let h = Harness::new();
    let store = h.store::<Lead>();
    store.open(&h.manager).await.unwrap();

    let insert = RawChangeEvent::insert("leads", json!({ "id": "l-9", "name": "Hedy" }));
    h.feed.publish(insert.clone());
    h.feed.publish(insert);
    h.feed.publish(RawChangeEvent::insert("leads", json!({ "id": "l-10", "name": "Alan" })));
    wait_for_state(&store, |s| s.get("l-10").is_some()).await;

    let ids: Vec<String> = store.records().iter().map(|l| l.id.clone()).collect();
    assert_eq!(ids, vec!["l-10".to_string(), "l-9".to_string()]);
}

#[tokio::test]
async fn test_events_for_absent_records_are_noops() {
    let h = Harness::new();
    h.remote.seed("leads", vec![json!({ "id": "l-1", "name": "Grace" })]);
    let store = h.store::<Lead>();
    store.load().await.unwrap();
    let before = store.records();

    let update = RawChangeEvent::update("leads", None, json!({ "id": "ghost", "name": "?" }));
    let delete = RawChangeEvent::delete("leads", json!({ "id": "ghost" }));
    assert!(!store.apply_remote_change(ChangeEvent::decode(&update).unwrap()));
    assert!(!store.apply_remote_change(ChangeEvent::decode(&delete).unwrap()));

    assert_eq!(store.records(), before);
}

#[tokio::test]
async fn test_delete_event_is_idempotent() {
    let h = Harness::new();
    h.remote.seed(
        "leads",
        vec![
            json!({ "id": "l-1", "name": "Grace" }),
            json!({ "id": "l-2", "name": "Linus" }),
        ],
    );
    let store = h.store::<Lead>();
    store.load().await.unwrap();

    let delete = RawChangeEvent::delete("leads", json!({ "id": "l-1" }));
    store.handle_raw_event(&delete);
    store.handle_raw_event(&delete);

    assert_eq!(store.len(), 1);
    assert_eq!(store.records()[0].id, "l-2");
}

#[tokio::test]
async fn test_own_create_echo_does_not_duplicate() {
    let h = Harness::new();
    let store = h.store::<Lead>();
    store.open(&h.manager).await.unwrap();

    let created = store
        .create(LeadPatch {
            name: Some("Ada".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    settle().await;

    assert_eq!(store.len(), 1);
    assert_eq!(store.records()[0].id, created.id);
}

#[tokio::test]
async fn test_own_update_and_delete_echoes_converge() {
    let h = Harness::new();
    h.remote.seed("leads", vec![json!({ "id": "l-1", "name": "Grace" })]);
    let store = h.store::<Lead>();
    store.open(&h.manager).await.unwrap();

    store
        .update(
            "l-1",
            LeadPatch {
                company: Some(Some("Navy".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    settle().await;
    assert_eq!(store.get("l-1").unwrap().company.as_deref(), Some("Navy"));

    store.delete("l-1").await.unwrap();
    settle().await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_other_session_changes_are_prepended() {
    let h = Harness::new();
    h.remote.seed("tasks", vec![json!({ "id": "t-1", "title": "Existing" })]);
    let store = h.store::<Task>();
    store.open(&h.manager).await.unwrap();

    // A second client writing through the same backend.
    let other: &dyn RemoteSource = h.remote.as_ref();
    let created = other
        .create("tasks", json!({ "title": "From a colleague", "priority": "urgent" }))
        .await
        .unwrap();
    let created_id = created["id"].as_str().unwrap().to_string();
    wait_for_state(&store, |s| s.get(&created_id).is_some()).await;

    assert_eq!(store.records()[0].id, created_id);
    assert_eq!(store.statistics().count("priority", "urgent"), 1);
    assert_eq!(store.statistics().recent.len(), 2);
}

#[tokio::test]
async fn test_undecodable_events_are_dropped() {
    let h = Harness::new();
    let store = h.store::<Task>();
    store.open(&h.manager).await.unwrap();

    h.feed.publish(RawChangeEvent::insert("tasks", json!({ "title": "no id" })));
    h.feed.publish(RawChangeEvent::insert("tasks", json!({ "id": "temp-1-x", "title": "local id" })));
    h.feed.publish(RawChangeEvent::insert("tasks", json!({ "id": "t-2", "title": "fine" })));
    wait_for_state(&store, |s| s.get("t-2").is_some()).await;

    assert_eq!(store.len(), 1);
    assert_eq!(store.statistics().total, 1);
    assert_eq!(store.statistics().count("status", UNKNOWN_BUCKET), 1);
}

#[tokio::test]
async fn test_events_of_other_collections_are_ignored() {
    let h = Harness::new();
    let tasks = h.store::<Task>();
    let leads = h.store::<Lead>();
    tasks.open(&h.manager).await.unwrap();
    leads.open(&h.manager).await.unwrap();

    h.feed.publish(RawChangeEvent::insert("leads", json!({ "id": "l-1", "name": "Grace" })));
    wait_for_state(&leads, |s| s.records.len() == 1).await;

    assert!(tasks.is_empty());
}

#[tokio::test]
async fn test_dropped_store_releases_its_channel() {
    let h = Harness::new();
    let store = h.store::<Task>();
    store.open(&h.manager).await.unwrap();
    assert_eq!(h.manager.handler_count("tasks"), 1);
    assert_eq!(h.feed.active_channels("tasks"), 1);

    drop(store);

    assert_eq!(h.manager.handler_count("tasks"), 0);
    assert_eq!(h.feed.active_channels("tasks"), 0);
}

#[tokio::test]
async fn test_task_patch_shape_is_closed() {
    let draft: Result<TaskPatch, _> =
        serde_json::from_value(json!({ "title": "x", "colour": "red" }));
    assert!(draft.is_err());

    let remote = MemoryRemote::new();
    remote.seed("tasks", vec![json!({ "id": "t-1", "title": "x", "colour": "red" })]);
    let task: Task = serde_json::from_value(remote.records("tasks")[0].clone()).unwrap();
    assert_eq!(task.title, "x");
}
