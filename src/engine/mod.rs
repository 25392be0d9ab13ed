//! The matching state machine: validate → match → settle → emit.
//!
//! `MatchingEngine` owns one symbol's [`OrderBook`] behind a `tokio::Mutex`
//! and wires it to the three things that run outside that lock: the
//! [`Metrics`] recorder, the [`Broadcaster`], and (optionally) a durable
//! [`PersistenceStore`] fed through a bounded channel. The lock is held for
//! exactly the span of one `submit`/`cancel` call — matching, book
//! mutation, trade construction, and channel enqueue all happen inside it;
//! nothing inside ever awaits anything that can suspend indefinitely.

mod clock;
mod config;

pub use clock::MonotonicClock;
pub use config::EngineConfig;

use crate::broadcaster::Broadcaster;
use crate::broadcaster::{MarketDataSink, TradeSink};
use crate::fees::FeeSchedule;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::orderbook::{Bbo, DepthSnapshot, MatchFill, OrderBook};
use crate::persistence::PersistenceStore;
use crate::types::{Order, OrderId, OrderStatus, OrderType, Side, Trade};
use crossbeam::atomic::AtomicCell;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

/// A record queued for durable persistence. Enqueued from inside the book
/// lock; drained by a background worker that batches by size or time.
#[derive(Debug, Clone)]
enum PersistenceRecord {
    Order(Order),
    Trade(Trade),
}

/// Lock-free mirror of the book's best bid/ask, published at the end of
/// every mutating critical section. Always at least as fresh as the last
/// completed mutation; readers that only need a quote may read this
/// without ever touching the book mutex.
#[derive(Debug, Clone, Copy, Default)]
pub struct BboSnapshot {
    pub best_bid_price: Option<Decimal>,
    pub best_bid_quantity: Option<Decimal>,
    pub best_ask_price: Option<Decimal>,
    pub best_ask_quantity: Option<Decimal>,
}

impl From<&OrderBook> for BboSnapshot {
    fn from(book: &OrderBook) -> Self {
        let (best_bid_price, best_bid_quantity) = match book.best_bid() {
            Some((p, q)) => (Some(p), Some(q)),
            None => (None, None),
        };
        let (best_ask_price, best_ask_quantity) = match book.best_ask() {
            Some((p, q)) => (Some(p), Some(q)),
            None => (None, None),
        };
        Self {
            best_bid_price,
            best_bid_quantity,
            best_ask_price,
            best_ask_quantity,
        }
    }
}

/// One per-symbol instance of the full engine: book, matching, metrics,
/// broadcast, and (optionally) durable persistence.
pub struct MatchingEngine {
    symbol: String,
    book: Arc<AsyncMutex<OrderBook>>,
    fee_schedule: FeeSchedule,
    clock: MonotonicClock,
    metrics: Metrics,
    broadcaster: Broadcaster,
    bbo_cache: AtomicCell<BboSnapshot>,
    trade_ring: AsyncMutex<VecDeque<Trade>>,
    trade_ring_capacity: usize,
    persistence_tx: Option<mpsc::Sender<PersistenceRecord>>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl MatchingEngine {
    /// Builds a fully-wired engine with an empty book. `store` is optional:
    /// without it the engine matches, broadcasts, and records metrics
    /// exactly as with it, it simply never durably persists state.
    pub fn new(config: EngineConfig, store: Option<Arc<PersistenceStore>>) -> Arc<Self> {
        let symbol = config.symbol.clone();
        Self::with_book(config, store, OrderBook::new(symbol))
    }

    /// Runs [`crate::recovery::recover`] against `store` and builds an
    /// engine seeded from the reconstructed book.
    pub async fn recover(
        config: EngineConfig,
        store: Arc<PersistenceStore>,
    ) -> Result<(Arc<Self>, crate::recovery::RecoveryReport), crate::persistence::PersistenceError> {
        let (book, report) = crate::recovery::recover(&config.symbol, &store).await?;
        Ok((Self::with_book(config, Some(store), book), report))
    }

    /// Builds an engine seeded from an already-reconstructed book (the
    /// recovery path hands this in after loading a snapshot and replaying
    /// resting orders).
    pub fn with_book(config: EngineConfig, store: Option<Arc<PersistenceStore>>, mut book: OrderBook) -> Arc<Self> {
        book.symbol = config.symbol.clone();
        let bbo_cache = AtomicCell::new(BboSnapshot::from(&book));
        let book = Arc::new(AsyncMutex::new(book));

        let broadcaster = {
            let book_for_snapshot = book.clone();
            let symbol = config.symbol.clone();
            let depth_levels = config.broadcaster.depth_levels;
            Broadcaster::spawn(symbol.clone(), config.broadcaster, move || match book_for_snapshot.try_lock() {
                Ok(b) => (b.get_bbo(), b.get_depth(depth_levels)),
                Err(_) => (
                    Bbo {
                        symbol: symbol.clone(),
                        best_bid: None,
                        best_ask: None,
                        spread: None,
                    },
                    DepthSnapshot {
                        symbol: symbol.clone(),
                        bids: Vec::new(),
                        asks: Vec::new(),
                    },
                ),
            })
        };

        let (persistence_tx, persistence_rx) = if store.is_some() {
            let (tx, rx) = mpsc::channel(config.persistence_channel_capacity);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let mut workers = Vec::new();
        if let (Some(store), Some(rx)) = (store.clone(), persistence_rx) {
            workers.push(spawn_persistence_worker(
                rx,
                store.clone(),
                config.persistence_batch_size,
                config.persistence_batch_interval,
            ));
            workers.push(spawn_snapshot_worker(
                book.clone(),
                store,
                config.symbol.clone(),
                config.snapshot_interval,
            ));
        }

        Arc::new(Self {
            symbol: config.symbol,
            book,
            fee_schedule: config.fee_schedule,
            clock: MonotonicClock::new(),
            metrics: Metrics::new(),
            broadcaster,
            bbo_cache,
            trade_ring: AsyncMutex::new(VecDeque::with_capacity(config.trade_ring_capacity)),
            trade_ring_capacity: config.trade_ring_capacity,
            persistence_tx,
            workers: AsyncMutex::new(workers),
        })
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// The current best bid/ask without acquiring the book lock at all.
    /// May lag the book by at most one in-flight mutation.
    #[must_use]
    pub fn bbo_snapshot(&self) -> BboSnapshot {
        self.bbo_cache.load()
    }

    pub async fn get_bbo(&self) -> Bbo {
        self.book.lock().await.get_bbo()
    }

    pub async fn get_depth(&self, n: usize) -> DepthSnapshot {
        self.book.lock().await.get_depth(n)
    }

    pub async fn order_count(&self) -> usize {
        self.book.lock().await.order_count()
    }

    /// Writes an out-of-band snapshot of the current book to `store`
    /// immediately, independent of the periodic snapshot worker. Useful
    /// around a graceful shutdown, where waiting for the next tick isn't
    /// acceptable.
    pub async fn save_snapshot(&self, store: &PersistenceStore) -> Result<(), crate::persistence::PersistenceError> {
        let book = self.book.lock().await;
        store.save_snapshot(&self.symbol, &book).await
    }

    pub fn subscribe_market_data(&self, sink: MarketDataSink) {
        self.broadcaster.subscribe_market_data(sink);
    }

    pub fn subscribe_trades(&self, sink: TradeSink) {
        self.broadcaster.subscribe_trades(sink);
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn performance_report(&self) -> String {
        self.metrics.performance_report()
    }

    fn validate(order: &Order) -> Result<(), &'static str> {
        if order.quantity <= Decimal::ZERO {
            return Err("quantity must be positive");
        }
        if order.order_type == OrderType::Limit && order.price.is_none() {
            return Err("LIMIT order requires a price");
        }
        if order.order_type == OrderType::Market && order.price.is_some() {
            return Err("MARKET order must not specify a price");
        }
        if let Some(price) = order.price {
            if price <= Decimal::ZERO {
                return Err("price must be positive");
            }
        }
        Ok(())
    }

    /// Validates, matches, settles, and emits one order. Returns
    /// `(accepted, message, trades)` — rejection is a normal outcome, not
    /// an error, per the engine's return-tuple contract.
    pub async fn submit(&self, mut order: Order) -> (bool, String, Vec<Trade>) {
        let start = std::time::Instant::now();

        if let Err(reason) = Self::validate(&order) {
            order.status = OrderStatus::Rejected;
            warn!(order_id = %order.order_id, reason, "order rejected at validation");
            self.metrics.record_order_latency(start.elapsed().as_secs_f64() * 1000.0);
            return (false, reason.to_string(), Vec::new());
        }

        order.timestamp = self.clock.now();

        let (message, trades) = {
            let mut book = self.book.lock().await;
            let fills = match order.order_type {
                OrderType::Market => self.match_market(&mut book, &mut order),
                OrderType::Limit => self.match_limit(&mut book, &mut order),
                OrderType::Ioc => self.match_ioc(&mut book, &mut order),
                OrderType::Fok => self.match_fok(&mut book, &mut order),
            };

            let trades = self.build_trades(&order, &fills);

            self.enqueue_persistence(&order, &fills, &trades);
            for trade in &trades {
                self.broadcaster.publish_trade(trade.clone());
            }
            self.broadcaster.mark_bbo_dirty();
            self.bbo_cache.store(BboSnapshot::from(&*book));

            let message = match order.status {
                OrderStatus::Cancelled if trades.is_empty() => "no liquidity available".to_string(),
                OrderStatus::Cancelled => "killed: insufficient liquidity for full fill".to_string(),
                _ => "ok".to_string(),
            };

            info!(order_id = %order.order_id, status = %order.status, trade_count = trades.len(), "order processed");
            (message, trades)
        };

        self.append_trade_ring(&trades).await;
        self.metrics.record_trades(trades.len() as u64);
        self.metrics.record_order_latency(start.elapsed().as_secs_f64() * 1000.0);

        (true, message, trades)
    }

    /// Cancels a resting order. Returns `(cancelled, order)`.
    pub async fn cancel(&self, order_id: OrderId) -> (bool, Option<Order>) {
        let start = std::time::Instant::now();
        let mut book = self.book.lock().await;
        let Some(mut order) = book.cancel_order(order_id) else {
            drop(book);
            self.metrics.record_order_latency(start.elapsed().as_secs_f64() * 1000.0);
            return (false, None);
        };
        order.status = OrderStatus::Cancelled;

        if let Some(tx) = &self.persistence_tx {
            if tx.try_send(PersistenceRecord::Order(order.clone())).is_err() {
                warn!(order_id = %order.order_id, "persistence channel full, dropping cancel write");
            }
        }
        self.broadcaster.mark_bbo_dirty();
        self.bbo_cache.store(BboSnapshot::from(&*book));
        drop(book);

        self.metrics.record_order_latency(start.elapsed().as_secs_f64() * 1000.0);
        info!(order_id = %order.order_id, "order cancelled");
        (true, Some(order))
    }

    fn match_market(&self, book: &mut OrderBook, order: &mut Order) -> Vec<MatchFill> {
        let (remaining, fills) = book.sweep(order.side, order.quantity, None);
        Self::finalize_after_sweep(order, remaining, &fills);
        fills
    }

    fn match_limit(&self, book: &mut OrderBook, order: &mut Order) -> Vec<MatchFill> {
        let limit_price = order.price;
        let (remaining, fills) = book.sweep(order.side, order.quantity, limit_price);
        let filled_qty = order.quantity - remaining;
        if filled_qty > Decimal::ZERO {
            order.apply_fill(filled_qty);
        }
        if remaining > Decimal::ZERO {
            // `is_restable()` holds here: still LIMIT, priced, positive
            // remainder, and status is PENDING or PARTIALLY_FILLED.
            let _ = book.add_order(order.clone());
        }
        fills
    }

    fn match_ioc(&self, book: &mut OrderBook, order: &mut Order) -> Vec<MatchFill> {
        let limit_price = order.price;
        let (remaining, fills) = book.sweep(order.side, order.quantity, limit_price);
        Self::finalize_after_sweep(order, remaining, &fills);
        fills
    }

    fn match_fok(&self, book: &mut OrderBook, order: &mut Order) -> Vec<MatchFill> {
        let limit_price = order.price;
        let available = book.liquidity_up_to(order.side, order.quantity, limit_price);
        if available < order.quantity {
            order.status = OrderStatus::Cancelled;
            return Vec::new();
        }
        // Lock is held continuously from pre-check through execution, so
        // the liquidity just counted cannot have moved underneath this.
        let (remaining, fills) = book.sweep(order.side, order.quantity, limit_price);
        debug_assert!(remaining <= Decimal::ZERO, "FOK pre-check guaranteed a full fill");
        order.apply_fill(order.quantity - remaining.max(Decimal::ZERO));
        fills
    }

    /// Shared tail of MARKET/IOC: apply whatever filled, then override to
    /// CANCELLED when nothing matched at all (MARKET/IOC never rest).
    fn finalize_after_sweep(order: &mut Order, remaining: Decimal, fills: &[MatchFill]) {
        let filled_qty = order.quantity - remaining;
        if filled_qty > Decimal::ZERO {
            order.apply_fill(filled_qty);
        }
        if fills.is_empty() {
            order.status = OrderStatus::Cancelled;
        }
    }

    fn build_trades(&self, taker: &Order, fills: &[MatchFill]) -> Vec<Trade> {
        fills
            .iter()
            .map(|fill| {
                let notional = fill.maker_price * fill.quantity;
                let maker_fee = self.fee_schedule.calculate_fee(notional, true);
                let taker_fee = self.fee_schedule.calculate_fee(notional, false);
                Trade {
                    trade_id: crate::types::TradeId::new(),
                    symbol: self.symbol.clone(),
                    price: fill.maker_price,
                    quantity: fill.quantity,
                    aggressor_side: taker.side,
                    maker_order_id: fill.maker_order_id,
                    taker_order_id: taker.order_id,
                    timestamp: self.clock.now(),
                    maker_fee,
                    taker_fee,
                }
            })
            .collect()
    }

    fn enqueue_persistence(&self, taker: &Order, fills: &[MatchFill], trades: &[Trade]) {
        let Some(tx) = &self.persistence_tx else {
            return;
        };
        if tx.try_send(PersistenceRecord::Order(taker.clone())).is_err() {
            warn!(order_id = %taker.order_id, "persistence channel full, dropping order write");
        }
        for fill in fills {
            if tx.try_send(PersistenceRecord::Order(fill.maker.clone())).is_err() {
                warn!(order_id = %fill.maker_order_id, "persistence channel full, dropping maker write");
            }
        }
        for trade in trades {
            if tx.try_send(PersistenceRecord::Trade(trade.clone())).is_err() {
                warn!(trade_id = %trade.trade_id, "persistence channel full, dropping trade write");
            }
        }
    }

    async fn append_trade_ring(&self, trades: &[Trade]) {
        if trades.is_empty() {
            return;
        }
        let mut ring = self.trade_ring.lock().await;
        for trade in trades {
            if ring.len() >= self.trade_ring_capacity {
                ring.pop_front();
            }
            ring.push_back(trade.clone());
        }
    }

    /// The most recent trades still held in the in-memory ring, oldest
    /// first. Bounded at construction's `trade_ring_capacity`.
    pub async fn recent_trades(&self) -> Vec<Trade> {
        self.trade_ring.lock().await.iter().cloned().collect()
    }

    /// Aborts background workers. Buffered, undelivered broadcasts and
    /// unflushed persistence records are dropped, per the shutdown
    /// semantics in the concurrency model.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine").field("symbol", &self.symbol).finish_non_exhaustive()
    }
}

fn spawn_persistence_worker(
    mut rx: mpsc::Receiver<PersistenceRecord>,
    store: Arc<PersistenceStore>,
    batch_size: usize,
    batch_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut orders: Vec<Order> = Vec::with_capacity(batch_size);
        let mut trades: Vec<Trade> = Vec::with_capacity(batch_size);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    flush(&store, &mut orders, &mut trades).await;
                }
                record = rx.recv() => {
                    match record {
                        Some(PersistenceRecord::Order(order)) => orders.push(order),
                        Some(PersistenceRecord::Trade(trade)) => trades.push(trade),
                        None => {
                            flush(&store, &mut orders, &mut trades).await;
                            return;
                        }
                    }
                    if orders.len() >= batch_size || trades.len() >= batch_size {
                        flush(&store, &mut orders, &mut trades).await;
                    }
                }
            }
        }
    })
}

async fn flush(store: &Arc<PersistenceStore>, orders: &mut Vec<Order>, trades: &mut Vec<Trade>) {
    if !orders.is_empty() {
        if let Err(err) = store.save_orders(orders).await {
            warn!(%err, count = orders.len(), "order batch write failed, will retry next window");
        } else {
            orders.clear();
        }
    }
    if !trades.is_empty() {
        if let Err(err) = store.save_trades(trades).await {
            warn!(%err, count = trades.len(), "trade batch write failed, will retry next window");
        } else {
            trades.clear();
        }
    }
}

fn spawn_snapshot_worker(
    book: Arc<AsyncMutex<OrderBook>>,
    store: Arc<PersistenceStore>,
    symbol: String,
    interval_duration: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let guard = book.lock().await;
            if let Err(err) = store.save_snapshot(&symbol, &guard).await {
                warn!(%err, %symbol, "periodic snapshot write failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderType as OT;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn engine(symbol: &str) -> Arc<MatchingEngine> {
        MatchingEngine::new(EngineConfig::new(symbol), None)
    }

    fn order(symbol: &str, side: Side, order_type: OT, price: Option<Decimal>, qty: Decimal) -> Order {
        Order::new(symbol, side, order_type, price, qty, "u1", Utc::now())
    }

    #[tokio::test]
    async fn s1_market_sweep_consumes_best_levels_first() {
        let engine = engine("BTC/USD");
        engine
            .submit(order("BTC/USD", Side::Sell, OT::Limit, Some(dec!(50000)), dec!(1.0)))
            .await;
        engine
            .submit(order("BTC/USD", Side::Sell, OT::Limit, Some(dec!(50100)), dec!(0.5)))
            .await;

        let (accepted, _msg, trades) = engine
            .submit(order("BTC/USD", Side::Buy, OT::Market, None, dec!(1.2)))
            .await;

        assert!(accepted);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].price, dec!(50000));
        assert_eq!(trades[0].quantity, dec!(1.0));
        assert_eq!(trades[1].price, dec!(50100));
        assert_eq!(trades[1].quantity, dec!(0.2));

        let depth = engine.get_depth(10).await;
        assert_eq!(depth.asks[0].price, dec!(50100));
        assert_eq!(depth.asks[0].quantity, dec!(0.3));
    }

    #[tokio::test]
    async fn s2_limit_rests_when_nothing_to_match() {
        let engine = engine("BTC/USD");
        let (accepted, _msg, trades) = engine
            .submit(order("BTC/USD", Side::Buy, OT::Limit, Some(dec!(49000)), dec!(2.0)))
            .await;

        assert!(accepted);
        assert!(trades.is_empty());
        let bbo = engine.get_bbo().await;
        assert_eq!(bbo.best_bid.unwrap().price, dec!(49000));
    }

    #[tokio::test]
    async fn s3_ioc_partial_does_not_rest() {
        let engine = engine("BTC/USD");
        engine
            .submit(order("BTC/USD", Side::Sell, OT::Limit, Some(dec!(50000)), dec!(0.5)))
            .await;

        let (_accepted, _msg, trades) = engine
            .submit(order("BTC/USD", Side::Buy, OT::Ioc, None, dec!(1.0)))
            .await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, dec!(0.5));
        assert!(engine.get_bbo().await.best_bid.is_none());
    }

    #[tokio::test]
    async fn s4_fok_kills_on_insufficient_liquidity() {
        let engine = engine("BTC/USD");
        engine
            .submit(order("BTC/USD", Side::Sell, OT::Limit, Some(dec!(50000)), dec!(0.5)))
            .await;

        let (_accepted, _msg, trades) = engine
            .submit(order("BTC/USD", Side::Buy, OT::Fok, None, dec!(1.0)))
            .await;
        assert!(trades.is_empty());
        let depth = engine.get_depth(10).await;
        assert_eq!(depth.asks[0].quantity, dec!(0.5));
    }

    #[tokio::test]
    async fn s5_fok_fills_when_liquidity_sufficient() {
        let engine = engine("BTC/USD");
        engine
            .submit(order("BTC/USD", Side::Sell, OT::Limit, Some(dec!(50000)), dec!(2.0)))
            .await;

        let (_accepted, _msg, trades) = engine
            .submit(order("BTC/USD", Side::Buy, OT::Fok, None, dec!(1.5)))
            .await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, dec!(1.5));
        let depth = engine.get_depth(10).await;
        assert_eq!(depth.asks[0].quantity, dec!(0.5));
    }

    #[tokio::test]
    async fn s8_time_priority_fills_earliest_order_first() {
        let engine = engine("BTC/USD");
        let a = order("BTC/USD", Side::Sell, OT::Limit, Some(dec!(50000)), dec!(1.0));
        let a_id = a.order_id;
        engine.submit(a).await;
        engine
            .submit(order("BTC/USD", Side::Sell, OT::Limit, Some(dec!(50000)), dec!(1.0)))
            .await;

        let (_accepted, _msg, trades) = engine
            .submit(order("BTC/USD", Side::Buy, OT::Market, None, dec!(0.5)))
            .await;
        assert_eq!(trades[0].maker_order_id, a_id);
    }

    #[tokio::test]
    async fn market_order_with_no_liquidity_is_cancelled_not_pending() {
        let engine = engine("BTC/USD");
        let (accepted, message, trades) = engine
            .submit(order("BTC/USD", Side::Buy, OT::Market, None, dec!(1.0)))
            .await;
        assert!(accepted);
        assert!(trades.is_empty());
        assert!(message.contains("no liquidity"));
    }

    #[tokio::test]
    async fn cancel_removes_a_resting_order() {
        let engine = engine("BTC/USD");
        let resting = order("BTC/USD", Side::Buy, OT::Limit, Some(dec!(100)), dec!(1));
        let id = resting.order_id;
        engine.submit(resting).await;

        let (cancelled, returned) = engine.cancel(id).await;
        assert!(cancelled);
        assert_eq!(returned.unwrap().status, OrderStatus::Cancelled);
        assert!(engine.get_bbo().await.best_bid.is_none());
    }

    #[tokio::test]
    async fn rejects_non_positive_quantity_without_touching_the_book() {
        let engine = engine("BTC/USD");
        let (accepted, _msg, trades) = engine
            .submit(order("BTC/USD", Side::Buy, OT::Limit, Some(dec!(100)), dec!(0)))
            .await;
        assert!(!accepted);
        assert!(trades.is_empty());
        assert_eq!(engine.order_count().await, 0);
    }
}
