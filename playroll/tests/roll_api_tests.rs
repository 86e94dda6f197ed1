//! Roll API tests
//!
//! Upsert resolution, ordering reconciliation and the end-to-end queue
//! lifecycle through the scheduler's public surface.

mod helpers;

use helpers::{assert_dense, ids_in_order};
use playroll::playback::{MatchPredicate, OrderingSourceEntry, UpsertAction, UpsertOptions, UpsertRequest};
use playroll::{Error, Metadata, OrderedStore, Roll, RollConfig};
use serde_json::json;

async fn empty_roll() -> Roll {
    Roll::new(OrderedStore::open_in_memory().await.unwrap())
}

#[tokio::test]
async fn test_end_to_end_queue_lifecycle() {
    let roll = empty_roll().await;
    let store = roll.store();

    let a = store.add(Some(&b"blobA"[..]), &Metadata::with_filename("a"), None).await.unwrap();
    assert_eq!(a, 1);
    assert_eq!(store.get(a).await.unwrap().unwrap().queue_index, 0);

    let b = store.add(Some(&b"blobB"[..]), &Metadata::with_filename("b"), None).await.unwrap();
    assert_eq!(b, 2);
    assert_eq!(store.get(b).await.unwrap().unwrap().queue_index, 1);

    let outcome = roll
        .upsert_item_by_filename(Some(b"blobC".to_vec()), "a", Metadata::new(), UpsertOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.id, 1);
    assert_eq!(outcome.action, UpsertAction::Updated);

    let updated = store.get(1).await.unwrap().unwrap();
    assert_eq!(updated.blob.as_deref(), Some(&b"blobC"[..]));
    assert_eq!(updated.queue_index, 0);

    store.remove(2).await.unwrap();
    let remaining = store.get_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!((remaining[0].id, remaining[0].queue_index), (1, 0));
}

#[tokio::test]
async fn test_upsert_id_beats_predicate() {
    let roll = empty_roll().await;
    let first = roll.store().add(Some(&b"1"[..]), &Metadata::with_filename("a"), None).await.unwrap();
    let second = roll.store().add(Some(&b"2"[..]), &Metadata::with_filename("b"), None).await.unwrap();

    let request = UpsertRequest::new(Some(b"new".to_vec()), Metadata::new())
        .with_id(second)
        .match_by(MatchPredicate::field("filename", "a"));
    let outcome = roll.upsert_item(&request).await.unwrap();

    assert_eq!(outcome.id, second);
    assert_eq!(outcome.matched_id, Some(second));
    let untouched = roll.store().get(first).await.unwrap().unwrap();
    assert_eq!(untouched.blob.as_deref(), Some(&b"1"[..]));
}

#[tokio::test]
async fn test_upsert_unknown_id_falls_back_to_predicate_then_insert() {
    let roll = empty_roll().await;
    let first = roll.store().add(None, &Metadata::with_filename("a"), None).await.unwrap();

    let matched = UpsertRequest::new(Some(b"x".to_vec()), Metadata::new())
        .with_id(999)
        .match_by(MatchPredicate::field("filename", "a"));
    assert_eq!(roll.upsert_item(&matched).await.unwrap().id, first);

    let inserted = UpsertRequest::new(Some(b"y".to_vec()), Metadata::with_filename("z"))
        .with_id(999)
        .match_by(MatchPredicate::field("filename", "z"));
    let outcome = roll.upsert_item(&inserted).await.unwrap();
    assert_eq!(outcome.action, UpsertAction::Inserted);
    assert_ne!(outcome.id, 999);
    assert_eq!(roll.store().length().await.unwrap(), 2);
}

#[tokio::test]
async fn test_upsert_items_applies_in_order() {
    let roll = empty_roll().await;

    let requests = vec![
        UpsertRequest::new(Some(b"1".to_vec()), Metadata::with_filename("a"))
            .match_by(MatchPredicate::field("filename", "a")),
        UpsertRequest::new(Some(b"2".to_vec()), Metadata::with_filename("a"))
            .match_by(MatchPredicate::field("filename", "a")),
    ];
    let outcomes = roll.upsert_items(&requests).await.unwrap();

    assert_eq!(outcomes[0].action, UpsertAction::Inserted);
    assert_eq!(outcomes[1].action, UpsertAction::Updated);
    assert_eq!(outcomes[0].id, outcomes[1].id);

    let entry = roll.store().get(outcomes[0].id).await.unwrap().unwrap();
    assert_eq!(entry.blob.as_deref(), Some(&b"2"[..]));
}

#[tokio::test]
async fn test_upsert_rejects_negative_index_before_writing() {
    let roll = empty_roll().await;
    let options = UpsertOptions {
        queue_index: Some(-1),
        ..UpsertOptions::default()
    };

    let result = roll
        .upsert_item_by_filename(Some(b"x".to_vec()), "a", Metadata::new(), options)
        .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert!(roll.store().is_empty().await.unwrap());
}

async fn reconciliation_fixture() -> (Roll, Vec<i64>) {
    let roll = empty_roll().await;
    let store = roll.store();

    let entry1 = store.add(Some(&b"1"[..]), &Metadata::with_filename("a"), None).await.unwrap();
    let entry2 = store.add(Some(&b"2"[..]), &Metadata::with_filename("b"), None).await.unwrap();
    let loose1 = store.add(Some(&b"3"[..]), &Metadata::with_filename("x"), None).await.unwrap();
    let loose2 = store.add(Some(&b"4"[..]), &Metadata::new(), None).await.unwrap();

    (roll, vec![entry1, entry2, loose1, loose2])
}

#[tokio::test]
async fn test_reconciliation_places_matched_first() {
    let (roll, ids) = reconciliation_fixture().await;
    let source = vec![OrderingSourceEntry::new("b", 0), OrderingSourceEntry::new("a", 1)];

    let matched = roll.update_ordering(&source).await.unwrap();

    assert_eq!(matched, 2);
    assert_eq!(ids_in_order(roll.store()).await, vec![ids[1], ids[0], ids[2], ids[3]]);
    assert_dense(roll.store()).await;

    // Applying the same source again changes nothing
    assert_eq!(roll.update_ordering(&source).await.unwrap(), 2);
    assert_eq!(ids_in_order(roll.store()).await, vec![ids[1], ids[0], ids[2], ids[3]]);
}

#[tokio::test]
async fn test_reconciliation_by_original_index() {
    let roll = empty_roll().await;
    let mut late = Metadata::new();
    late.insert("originalIndex", 1);
    let mut early = Metadata::new();
    early.insert("originalIndex", json!("0"));

    let late_id = roll.store().add(Some(&b"l"[..]), &late, None).await.unwrap();
    let early_id = roll.store().add(Some(&b"e"[..]), &early, None).await.unwrap();

    // Source positions 0 and 1 carry the desired orders
    let source = vec![OrderingSourceEntry::new("first", 0), OrderingSourceEntry::new("second", 5)];
    assert_eq!(roll.update_ordering(&source).await.unwrap(), 2);
    assert_eq!(ids_in_order(roll.store()).await, vec![early_id, late_id]);
}

#[tokio::test]
async fn test_malformed_source_is_surfaced() {
    let (roll, ids) = reconciliation_fixture().await;

    let duplicated = vec![OrderingSourceEntry::new("a", 0), OrderingSourceEntry::new("a", 1)];
    assert!(matches!(roll.update_ordering(&duplicated).await, Err(Error::InvalidArgument(_))));

    let negative = vec![OrderingSourceEntry::new("a", -3)];
    assert!(matches!(roll.compare_ordering(&negative).await, Err(Error::InvalidArgument(_))));

    assert_eq!(ids_in_order(roll.store()).await, ids);
}

#[tokio::test]
async fn test_compare_reports_without_writing() {
    let (roll, ids) = reconciliation_fixture().await;
    let source = vec![
        OrderingSourceEntry::new("b", 0),
        OrderingSourceEntry::new("a", 1),
        OrderingSourceEntry::new("gone", 2),
    ];

    let comparison = roll.compare_ordering(&source).await.unwrap();
    assert!(!comparison.consistent);
    assert_eq!(comparison.matched, 2);
    assert_eq!(comparison.missing_files, vec!["gone".to_string()]);
    let moved: Vec<i64> = comparison.mismatches.iter().map(|m| m.id).collect();
    assert_eq!(moved, vec![ids[0], ids[1]]);
    assert_eq!(ids_in_order(roll.store()).await, ids);

    roll.update_ordering(&source).await.unwrap();
    assert!(roll.compare_ordering(&source).await.unwrap().consistent);
}

#[tokio::test]
async fn test_current_ordering_snapshot() {
    let (roll, ids) = reconciliation_fixture().await;
    roll.store().reorder(0, 1).await.unwrap();

    let snapshot = roll.get_current_ordering().await.unwrap();
    let rows: Vec<(i64, i64, Option<String>)> = snapshot
        .into_iter()
        .map(|row| (row.id, row.queue_index, row.filename))
        .collect();

    assert_eq!(
        rows,
        vec![
            (ids[1], 0, Some("b".to_string())),
            (ids[0], 1, Some("a".to_string())),
            (ids[2], 2, Some("x".to_string())),
            (ids[3], 3, None),
        ]
    );
}

#[tokio::test]
async fn test_init_opens_configured_database() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = RollConfig {
        db_path: temp_dir.path().join("nested").join("queue.db"),
        ..RollConfig::default()
    };

    let mut roll = Roll::init(&config).await.unwrap();
    roll.store().add(Some(&b"x"[..]), &Metadata::with_filename("x"), None).await.unwrap();
    roll.close().await;

    let reopened = Roll::init(&config).await.unwrap();
    assert_eq!(reopened.store().length().await.unwrap(), 1);
    assert!(config.db_path.exists());
}
