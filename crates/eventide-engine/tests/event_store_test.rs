//! Integration tests for appends, reads, aggregates and snapshots.

mod common;

use std::sync::Arc;

use eventide_core::aggregate::{AggregateState, MergeFolder, TypedFolder, fold_events};
use eventide_core::error::EventStoreError;
use eventide_core::event::NewEvent;
use eventide_core::snapshot::SnapshotReason;
use eventide_engine::{EngineConfig, EventQuery};
use eventide_test_support::{FailingEventRepository, RecordingEventRepository};
use serde_json::json;
use uuid::Uuid;

use common::{build_store, builder, config_with_frequency, new_event};

// --- versioning ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_produce_gapless_versions() {
    // Arrange
    let store = build_store(EngineConfig::default());

    // Act
    let mut tasks = Vec::new();
    for writer in 0..10 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            let events = (0..5)
                .map(|n| NewEvent::new("Touched", json!({"writer": writer, "n": n})))
                .collect();
            store.append_events("user-1", "user", events, None).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Assert
    let versions: Vec<i64> = store
        .get_events(&EventQuery::all().stream("user", "user-1"))
        .await
        .iter()
        .map(|event| event.aggregate_version)
        .collect();
    assert_eq!(versions, (1..=50).collect::<Vec<i64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_appends_with_same_expected_version_admit_one_writer() {
    // Arrange
    let store = build_store(EngineConfig::default());

    // Act
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .append_events("order-1", "order", new_event("OrderPlaced", json!({})), Some(0))
                .await
        }));
    }
    let mut winners = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(EventStoreError::ConcurrencyConflict { expected: 0, actual: 1, .. }) => conflicts += 1,
            other => panic!("expected success or conflict, got {other:?}"),
        }
    }

    // Assert
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn test_stale_expected_version_fails_without_partial_apply() {
    // Arrange
    let store = build_store(EngineConfig::default());
    store
        .append_events(
            "user-1",
            "user",
            vec![
                NewEvent::new("UserRegistered", json!({"name": "ada"})),
                NewEvent::new("EmailChanged", json!({"email": "ada@example.com"})),
            ],
            Some(0),
        )
        .await
        .unwrap();

    // Act
    let result = store
        .append_events(
            "user-1",
            "user",
            vec![
                NewEvent::new("NameChanged", json!({"name": "grace"})),
                NewEvent::new("NameChanged", json!({"name": "lin"})),
            ],
            Some(1),
        )
        .await;

    // Assert
    match result {
        Err(EventStoreError::ConcurrencyConflict {
            aggregate_type,
            aggregate_id,
            expected,
            actual,
        }) => {
            assert_eq!(aggregate_type, "user");
            assert_eq!(aggregate_id, "user-1");
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(store.get_events(&EventQuery::all()).await.len(), 2);
    let aggregate = store.get_aggregate("user-1", "user", None).await.unwrap();
    assert_eq!(aggregate.version, 2);
    assert_eq!(aggregate.state["name"], "ada");
}

#[tokio::test]
async fn test_empty_append_still_checks_expected_version() {
    let store = build_store(EngineConfig::default());
    store
        .append_events("user-1", "user", new_event("UserRegistered", json!({})), None)
        .await
        .unwrap();

    let ok = store.append_events("user-1", "user", Vec::new(), Some(1)).await;
    let stale = store.append_events("user-1", "user", Vec::new(), Some(0)).await;

    assert!(ok.unwrap().is_empty());
    assert!(matches!(stale, Err(EventStoreError::ConcurrencyConflict { .. })));
}

#[tokio::test]
async fn test_append_rejects_blank_aggregate_identity() {
    let store = build_store(EngineConfig::default());

    let result = store
        .append_events(" ", "user", new_event("UserRegistered", json!({})), None)
        .await;

    assert!(matches!(result, Err(EventStoreError::Validation(_))));
}

#[tokio::test]
async fn test_appended_events_carry_causation_and_correlation() {
    // Arrange
    let store = build_store(EngineConfig::default());
    let cause = Uuid::new_v4();
    let correlation = Uuid::new_v4();

    // Act
    let appended = store
        .append_events(
            "user-1",
            "user",
            vec![
                NewEvent::new("UserRegistered", json!({"name": "ada"}))
                    .caused_by(cause)
                    .correlated_with(correlation),
            ],
            None,
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(appended[0].aggregate_version, 1);
    assert_eq!(appended[0].timestamp, common::fixed_now());
    let by_correlation = store
        .get_events(&EventQuery::all().correlation_id(correlation))
        .await;
    let by_cause = store.get_events(&EventQuery::all().caused_by(cause)).await;
    assert_eq!(by_correlation.len(), 1);
    assert_eq!(by_cause[0].id, appended[0].id);
}

// --- queries ---

#[tokio::test]
async fn test_get_events_composes_filters_and_limit() {
    // Arrange
    let store = build_store(EngineConfig::default());
    for (id, event_type) in [
        ("o-1", "OrderPlaced"),
        ("o-2", "OrderPlaced"),
        ("o-1", "OrderShipped"),
        ("o-3", "OrderPlaced"),
    ] {
        store
            .append_events(id, "order", new_event(event_type, json!({})), None)
            .await
            .unwrap();
    }

    // Act
    let placed = store
        .get_events(&EventQuery::all().event_types(["OrderPlaced"]).limit(2))
        .await;
    let shipped_o1 = store
        .get_events(&EventQuery::all().stream("order", "o-1").versions(Some(2), None))
        .await;

    // Assert
    assert_eq!(
        placed.iter().map(|e| e.aggregate_id.as_str()).collect::<Vec<_>>(),
        vec!["o-1", "o-2"]
    );
    assert_eq!(shipped_o1.len(), 1);
    assert_eq!(shipped_o1[0].event_type, "OrderShipped");
}

// --- aggregates and snapshots ---

#[tokio::test]
async fn test_get_aggregate_returns_none_for_unknown_stream() {
    let store = build_store(EngineConfig::default());

    assert!(store.get_aggregate("nobody", "user", None).await.is_none());
}

#[tokio::test]
async fn test_snapshot_frequency_two_snapshots_at_version_two() {
    // Arrange
    let store = build_store(config_with_frequency(2));

    // Act
    store
        .append_events("user-1", "user", new_event("UserRegistered", json!({"name": "ada"})), None)
        .await
        .unwrap();
    store
        .append_events("user-1", "user", new_event("EmailChanged", json!({"email": "ada@example.com"})), None)
        .await
        .unwrap();
    store
        .append_events("user-1", "user", new_event("NameChanged", json!({"name": "ada lovelace"})), None)
        .await
        .unwrap();

    // Assert
    let snapshot = store.get_snapshot("user-1", "user").await.unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.metadata.reason, SnapshotReason::SizeThreshold);
    assert_eq!(snapshot.data["name"], "ada");

    let history = store
        .get_events(&EventQuery::all().stream("user", "user-1"))
        .await;
    let from_scratch = fold_events(&MergeFolder, AggregateState::new(), history.iter().map(|e| &**e));
    let aggregate = store.get_aggregate("user-1", "user", None).await.unwrap();
    assert_eq!(aggregate.version, 3);
    assert_eq!(aggregate.state, from_scratch);
    assert_eq!(aggregate.state["name"], "ada lovelace");
    assert_eq!(aggregate.state["email"], "ada@example.com");
}

#[tokio::test]
async fn test_snapshot_and_replay_match_full_fold_for_any_cadence() {
    for frequency in [1, 2, 3, 5, 7, 1000] {
        // Arrange
        let store = build_store(config_with_frequency(frequency));
        for n in 0..12 {
            let mut data = serde_json::Map::new();
            data.insert(format!("k{}", n % 4), json!(n));
            data.insert("last".to_owned(), json!(n));
            store
                .append_events("acct-1", "account", new_event("Changed", serde_json::Value::Object(data)), None)
                .await
                .unwrap();
        }

        // Act
        let aggregate = store.get_aggregate("acct-1", "account", None).await.unwrap();
        let midway = store.get_aggregate("acct-1", "account", Some(5)).await.unwrap();

        // Assert
        let history = store
            .get_events(&EventQuery::all().stream("account", "acct-1"))
            .await;
        let full = fold_events(&MergeFolder, AggregateState::new(), history.iter().map(|e| &**e));
        let first_five = fold_events(&MergeFolder, AggregateState::new(), history.iter().take(5).map(|e| &**e));
        assert_eq!(aggregate.state, full, "frequency {frequency}");
        assert_eq!(midway.state, first_five, "frequency {frequency}");
        assert_eq!(midway.version, 5);
    }
}

#[tokio::test]
async fn test_typed_folder_drives_snapshots_and_aggregates() {
    // Arrange
    let store = build_store(config_with_frequency(2));
    store
        .register_folder(
            "account",
            Arc::new(TypedFolder::new().on("Deposited", |state, event| {
                let balance = state.get("balance").and_then(serde_json::Value::as_i64).unwrap_or(0);
                let amount = event.data.get("amount").and_then(serde_json::Value::as_i64).unwrap_or(0);
                state.insert("balance".to_owned(), json!(balance + amount));
            })),
        )
        .await;

    // Act
    for _ in 0..3 {
        store
            .append_events("acct-1", "account", new_event("Deposited", json!({"amount": 10})), None)
            .await
            .unwrap();
    }

    // Assert
    let snapshot = store.get_snapshot("acct-1", "account").await.unwrap();
    assert_eq!(snapshot.data["balance"], 20);
    let aggregate = store.get_aggregate("acct-1", "account", None).await.unwrap();
    assert_eq!(aggregate.state["balance"], 30);
}

#[tokio::test]
async fn test_max_events_per_stream_forces_snapshot() {
    // Arrange
    let config = EngineConfig {
        snapshot_frequency: 100,
        max_events_per_stream: 3,
        ..EngineConfig::default()
    };
    let store = build_store(config);

    // Act
    let events = (0..4).map(|n| NewEvent::new("Touched", json!({"n": n}))).collect();
    store.append_events("user-1", "user", events, None).await.unwrap();

    // Assert
    let snapshot = store.get_snapshot("user-1", "user").await.unwrap();
    assert_eq!(snapshot.version, 4);
    assert_eq!(snapshot.metadata.event_count, 4);
    assert_eq!(snapshot.metadata.checksum.len(), 64);
}

#[tokio::test]
async fn test_create_snapshot_on_demand() {
    // Arrange
    let store = build_store(EngineConfig::default());
    store
        .append_events("user-1", "user", new_event("UserRegistered", json!({"name": "ada"})), None)
        .await
        .unwrap();

    // Act
    let snapshot = store.create_snapshot("user-1", "user").await.unwrap();
    let again = store.create_snapshot("user-1", "user").await.unwrap();
    let missing = store.create_snapshot("nobody", "user").await;

    // Assert
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.metadata.reason, SnapshotReason::Manual);
    assert_eq!(again.id, snapshot.id);
    assert!(matches!(missing, Err(EventStoreError::StreamNotFound { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_racing_appends_folds_a_committed_prefix() {
    // Arrange
    let store = build_store(EngineConfig::default());
    store
        .append_events("acct-1", "account", new_event("Opened", json!({"seq": 0})), None)
        .await
        .unwrap();

    // Act
    let writer = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            for seq in 1..=40 {
                store
                    .append_events("acct-1", "account", new_event("Touched", json!({"seq": seq})), None)
                    .await
                    .unwrap();
            }
        })
    };
    let mut snapshots = Vec::new();
    for _ in 0..10 {
        snapshots.push(store.create_snapshot("acct-1", "account").await.unwrap());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    // Assert
    let history = store
        .get_events(&EventQuery::all().stream("account", "acct-1"))
        .await;
    for snapshot in snapshots {
        let prefix = usize::try_from(snapshot.version).unwrap();
        let expected = fold_events(&MergeFolder, AggregateState::new(), history.iter().take(prefix).map(|e| &**e));
        assert_eq!(snapshot.data, expected, "snapshot at version {}", snapshot.version);
        assert_eq!(snapshot.data["seq"], json!(snapshot.version - 1));
    }
    let aggregate = store.get_aggregate("acct-1", "account", None).await.unwrap();
    assert_eq!(aggregate.version, 41);
    assert_eq!(aggregate.state["seq"], 40);
}

// --- durability ---

#[tokio::test]
async fn test_durable_write_failure_applies_nothing() {
    // Arrange
    let store = builder(EngineConfig::default())
        .with_repository(Arc::new(FailingEventRepository))
        .build()
        .unwrap();

    // Act
    let result = store
        .append_events("user-1", "user", new_event("UserRegistered", json!({})), None)
        .await;

    // Assert
    assert!(matches!(result, Err(EventStoreError::Infrastructure(_))));
    assert!(store.get_events(&EventQuery::all()).await.is_empty());
    assert!(store.get_aggregate("user-1", "user", None).await.is_none());
}

#[tokio::test]
async fn test_repository_receives_events_and_snapshots() {
    // Arrange
    let repository = Arc::new(RecordingEventRepository::new());
    let store = builder(config_with_frequency(2))
        .with_repository(repository.clone())
        .build()
        .unwrap();

    // Act
    for n in 0..2 {
        store
            .append_events("user-1", "user", new_event("Touched", json!({"n": n})), None)
            .await
            .unwrap();
    }

    // Assert
    assert_eq!(repository.append_calls(), 2);
    assert_eq!(repository.appended_events().len(), 2);
    let snapshots = repository.saved_snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].version, 2);
}

#[tokio::test]
async fn test_append_after_shutdown_is_rejected() {
    let store = build_store(EngineConfig::default());

    store.shutdown().await;
    let result = store
        .append_events("user-1", "user", new_event("UserRegistered", json!({})), None)
        .await;

    assert!(matches!(result, Err(EventStoreError::Shutdown)));
}
