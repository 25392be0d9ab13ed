//! Higher-level persistence tests against an on-disk SQLite file (the
//! in-crate unit tests in `src/persistence/mod.rs` cover the same surface
//! against `:memory:`; these exercise what only a real file can: surviving
//! a close/reopen cycle, and `cleanup`/`compact` operating on real state).

use chrono::{Duration as ChronoDuration, Utc};
use matching_core::{Order, OrderStatus, OrderType, PersistenceStore, Side};
use rust_decimal_macros::dec;

async fn store_at(path: &std::path::Path) -> PersistenceStore {
    PersistenceStore::connect(path.to_str().expect("utf8 path"))
        .await
        .expect("open store")
}

fn order(price: rust_decimal::Decimal, qty: rust_decimal::Decimal) -> Order {
    Order::new("BTC/USD", Side::Buy, OrderType::Limit, Some(price), qty, "trader-1", Utc::now())
}

#[tokio::test]
async fn data_survives_a_close_and_reopen_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("durable.db");

    let written = order(dec!(100), dec!(1.5));
    {
        let store = store_at(&path).await;
        store.save_orders(&[written.clone()]).await.unwrap();
        store.close().await;
    }

    let reopened = store_at(&path).await;
    let replayed = reopened.replay_resting_orders("BTC/USD", None).await.unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].order_id, written.order_id);
    assert_eq!(replayed[0].price, written.price);
}

#[tokio::test]
async fn cleanup_removes_only_terminal_rows_older_than_the_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(&dir.path().join("cleanup.db")).await;

    let mut old_filled = order(dec!(100), dec!(1));
    old_filled.status = OrderStatus::Filled;
    let still_resting = order(dec!(101), dec!(1));

    store.save_orders(&[old_filled.clone(), still_resting.clone()]).await.unwrap();

    let cutoff = Utc::now() + ChronoDuration::seconds(1);
    store.cleanup(cutoff).await.unwrap();

    let resting_after = store.replay_resting_orders("BTC/USD", None).await.unwrap();
    assert_eq!(resting_after.len(), 1);
    assert_eq!(resting_after[0].order_id, still_resting.order_id);
}

#[tokio::test]
async fn compact_runs_without_error_after_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_at(&dir.path().join("compact.db")).await;
    store.save_orders(&[order(dec!(100), dec!(1))]).await.unwrap();
    store.cleanup(Utc::now() + ChronoDuration::seconds(1)).await.unwrap();
    store.compact().await.expect("vacuum succeeds on a quiescent database");
}

#[tokio::test]
async fn snapshot_retention_survives_reopen() {
    use matching_core::OrderBook;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshots.db");
    {
        let store = store_at(&path).await;
        let mut book = OrderBook::new("BTC/USD");
        book.add_order(order(dec!(100), dec!(1))).unwrap();
        store.save_snapshot("BTC/USD", &book).await.unwrap();
        store.close().await;
    }

    let reopened = store_at(&path).await;
    let (restored, _taken_at) = reopened
        .load_latest_snapshot("BTC/USD")
        .await
        .unwrap()
        .expect("snapshot persisted across reopen");
    assert_eq!(restored.order_count(), 1);
}
