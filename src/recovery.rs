//! Startup recovery: snapshot load plus incremental replay of orders
//! durably written after the snapshot was taken.
//!
//! Trades are never replayed into the book — a trade is a historical fact,
//! not state to restore. Only resting LIMIT orders matter to a freshly
//! reconstructed [`OrderBook`], and only those newer than the snapshot
//! need replaying at all; everything at or before the snapshot's timestamp
//! is already reflected in it.

use crate::orderbook::OrderBook;
use crate::persistence::PersistenceError;
use crate::persistence::PersistenceStore;
use chrono::{DateTime, Utc};
use tracing::info;

/// Outcome of one [`recover`] call, for logging/observability at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    pub snapshot_found: bool,
    pub resting_from_snapshot: usize,
    pub replayed_inserted: usize,
    pub replayed_skipped_duplicate: usize,
}

impl RecoveryReport {
    #[must_use]
    pub fn total_resting(&self) -> usize {
        self.resting_from_snapshot + self.replayed_inserted
    }
}

/// Reconstructs `symbol`'s book from its latest snapshot plus every
/// resting LIMIT order persisted after that snapshot's timestamp, in
/// ascending timestamp order. Orders already present (from the snapshot)
/// are skipped rather than treated as an error, matching `OrderBook`'s
/// recovery-time duplicate-insert tolerance.
pub async fn recover(symbol: &str, store: &PersistenceStore) -> Result<(OrderBook, RecoveryReport), PersistenceError> {
    let mut report = RecoveryReport::default();

    let (mut book, since) = match store.load_latest_snapshot(symbol).await? {
        Some((book, taken_at)) => {
            report.snapshot_found = true;
            report.resting_from_snapshot = book.order_count();
            (book, Some(taken_at))
        }
        None => (OrderBook::new(symbol), None),
    };

    let resting = store.replay_resting_orders(symbol, since).await?;
    for order in resting {
        if book.contains(order.order_id) {
            report.replayed_skipped_duplicate += 1;
            continue;
        }
        if book.add_order(order).is_ok() {
            report.replayed_inserted += 1;
        }
    }

    info!(
        %symbol,
        snapshot_found = report.snapshot_found,
        resting_from_snapshot = report.resting_from_snapshot,
        replayed_inserted = report.replayed_inserted,
        replayed_skipped_duplicate = report.replayed_skipped_duplicate,
        "recovery complete"
    );
    Ok((book, report))
}

/// Convenience wrapper returning just the snapshot's timestamp, if any —
/// useful for callers that want to report recovery freshness without
/// reconstructing the whole book.
pub async fn latest_snapshot_timestamp(
    symbol: &str,
    store: &PersistenceStore,
) -> Result<Option<DateTime<Utc>>, PersistenceError> {
    Ok(store.load_latest_snapshot(symbol).await?.map(|(_book, ts)| ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Order, OrderStatus, OrderType, Side};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn memory_store() -> PersistenceStore {
        PersistenceStore::connect(":memory:").await.expect("open in-memory db")
    }

    fn limit_order(price: rust_decimal::Decimal, qty: rust_decimal::Decimal) -> Order {
        Order::new("BTC/USD", Side::Buy, OrderType::Limit, Some(price), qty, "u1", Utc::now())
    }

    #[tokio::test]
    async fn recovers_from_snapshot_alone_when_nothing_newer_exists() {
        let store = memory_store().await;
        let mut book = OrderBook::new("BTC/USD");
        book.add_order(limit_order(dec!(100), dec!(1))).unwrap();
        book.add_order(limit_order(dec!(99), dec!(2))).unwrap();
        store.save_snapshot("BTC/USD", &book).await.unwrap();

        let (recovered, report) = recover("BTC/USD", &store).await.unwrap();
        assert!(report.snapshot_found);
        assert_eq!(report.resting_from_snapshot, 2);
        assert_eq!(report.replayed_inserted, 0);
        assert_eq!(recovered.order_count(), 2);
    }

    #[tokio::test]
    async fn replays_orders_persisted_after_the_snapshot() {
        let store = memory_store().await;
        let book = OrderBook::new("BTC/USD");
        store.save_snapshot("BTC/USD", &book).await.unwrap();

        let later = limit_order(dec!(101), dec!(1));
        store.save_orders(&[later.clone()]).await.unwrap();

        let (recovered, report) = recover("BTC/USD", &store).await.unwrap();
        assert_eq!(report.replayed_inserted, 1);
        assert!(recovered.contains(later.order_id));
    }

    #[tokio::test]
    async fn skips_orders_already_present_from_the_snapshot() {
        let store = memory_store().await;
        let mut book = OrderBook::new("BTC/USD");
        let resting = limit_order(dec!(100), dec!(1));
        book.add_order(resting.clone()).unwrap();
        store.save_snapshot("BTC/USD", &book).await.unwrap();
        store.save_orders(&[resting.clone()]).await.unwrap();

        let (recovered, report) = recover("BTC/USD", &store).await.unwrap();
        assert_eq!(report.resting_from_snapshot, 1);
        assert_eq!(report.replayed_skipped_duplicate, 1);
        assert_eq!(report.replayed_inserted, 0);
        assert_eq!(recovered.order_count(), 1);
    }

    #[tokio::test]
    async fn terminal_orders_are_never_replayed() {
        let store = memory_store().await;
        store.save_snapshot("BTC/USD", &OrderBook::new("BTC/USD")).await.unwrap();
        let mut filled = limit_order(dec!(100), dec!(1));
        filled.status = OrderStatus::Filled;
        store.save_orders(&[filled]).await.unwrap();

        let (recovered, report) = recover("BTC/USD", &store).await.unwrap();
        assert_eq!(report.replayed_inserted, 0);
        assert_eq!(recovered.order_count(), 0);
    }
}
