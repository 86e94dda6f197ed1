//! Queue integrity tests
//!
//! Index invariants of the ordered store under mixed sequences of
//! insertions, removals and swaps, plus durability across reopen.

mod helpers;

use helpers::{assert_dense, ids_in_order, payload, seeded_store};
use playroll::{Error, Metadata, OrderedStore};

/// Small deterministic generator so failures reproduce
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound.max(1)
    }
}

#[tokio::test]
async fn test_indices_stay_dense_under_mixed_operations() {
    let store = OrderedStore::open_in_memory().await.unwrap();
    let mut rng = Lcg(42);
    let mut live: Vec<i64> = Vec::new();

    for round in 0..200 {
        match rng.next(4) {
            0 | 1 => {
                let count = live.len();
                let index = match rng.next(3) {
                    0 => None,
                    // Deliberately out of range sometimes; add clamps
                    _ => Some(rng.next(count + 3) as i64),
                };
                let id = store
                    .add(Some(payload(round).as_slice()), &Metadata::new(), index)
                    .await
                    .unwrap();
                live.push(id);
            }
            2 if !live.is_empty() => {
                let id = live.swap_remove(rng.next(live.len()));
                store.remove(id).await.unwrap();
            }
            _ if live.len() >= 2 => {
                let a = rng.next(live.len());
                let b = rng.next(live.len());
                store.reorder(a, b).await.unwrap();
            }
            _ => {}
        }

        assert_dense(&store).await;
        assert_eq!(store.length().await.unwrap(), live.len());
    }
}

#[tokio::test]
async fn test_insert_shifts_only_the_tail() {
    let store = seeded_store(5).await;
    let before = ids_in_order(&store).await;

    let inserted = store.add(Some(&b"new"[..]), &Metadata::new(), Some(2)).await.unwrap();

    for (position, id) in before.iter().enumerate() {
        let entry = store.get(*id).await.unwrap().unwrap();
        let expected = if position < 2 { position } else { position + 1 };
        assert_eq!(entry.queue_index, expected as i64, "entry {}", id);
    }
    assert_eq!(store.get(inserted).await.unwrap().unwrap().queue_index, 2);
    assert_dense(&store).await;
}

#[tokio::test]
async fn test_removal_compacts_the_tail() {
    let store = seeded_store(5).await;
    let before = ids_in_order(&store).await;

    store.remove(before[1]).await.unwrap();

    assert_eq!(store.get(before[0]).await.unwrap().unwrap().queue_index, 0);
    for (position, id) in before.iter().enumerate().skip(2) {
        let entry = store.get(*id).await.unwrap().unwrap();
        assert_eq!(entry.queue_index, position as i64 - 1);
    }
    assert!(store.get(before[1]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reorder_twice_restores_assignment() {
    let store = seeded_store(4).await;
    let original = ids_in_order(&store).await;

    store.reorder(0, 3).await.unwrap();
    let swapped = ids_in_order(&store).await;
    assert_eq!(swapped, vec![original[3], original[1], original[2], original[0]]);

    store.reorder(0, 3).await.unwrap();
    assert_eq!(ids_in_order(&store).await, original);
    assert_dense(&store).await;
}

#[tokio::test]
async fn test_invalid_positions_leave_store_untouched() {
    let store = seeded_store(3).await;
    let original = ids_in_order(&store).await;

    assert!(matches!(store.reorder(0, 3).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(store.update_queue_index(original[0], -1).await, Err(Error::InvalidArgument(_))));
    assert!(matches!(
        store.batch_update_queue_indices(&[(original[0], 2), (9999, 0)]).await,
        Err(Error::NotFound(_))
    ));

    assert_eq!(ids_in_order(&store).await, original);
    assert_dense(&store).await;
}

#[tokio::test]
async fn test_entries_survive_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("queue.db");

    let ids = {
        let store = OrderedStore::open(&db_path).await.unwrap();
        let a = store.add(Some(&b"A"[..]), &Metadata::with_filename("a"), None).await.unwrap();
        let b = store.add(None, &Metadata::with_filename("b"), None).await.unwrap();
        store.reorder(0, 1).await.unwrap();
        store.close().await;
        vec![b, a]
    };

    let store = OrderedStore::open(&db_path).await.unwrap();
    assert_eq!(ids_in_order(&store).await, ids);

    let a = store.get(ids[1]).await.unwrap().unwrap();
    assert_eq!(a.blob.as_deref(), Some(&b"A"[..]));
    assert_eq!(a.metadata.filename(), Some("a"));
    assert!(!store.get(ids[0]).await.unwrap().unwrap().has_payload());

    // Ids keep increasing after reopen
    let c = store.add(Some(&b"C"[..]), &Metadata::new(), None).await.unwrap();
    assert!(c > ids[0] && c > ids[1]);
}
