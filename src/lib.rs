//! Core of a crypto-asset limit-order matching engine: per-symbol order
//! book, price-time-priority matching for LIMIT/MARKET/IOC/FOK/CANCEL,
//! durable persistence with snapshot/replay recovery, and coalesced
//! market-data/trade fan-out.
//!
//! The transport layer (WebSocket/REST), authentication, balance checks,
//! and symbol lifecycle management are external collaborators and live
//! outside this crate; see [`engine::MatchingEngine`] for the interface
//! they're expected to drive.

pub mod broadcaster;
pub mod engine;
pub mod fees;
pub mod metrics;
pub mod orderbook;
pub mod persistence;
pub mod recovery;
pub mod types;

pub use broadcaster::{Broadcaster, BroadcasterConfig, MarketDataEvent, MarketDataSink, TradeEvent, TradeSink};
pub use engine::{BboSnapshot, EngineConfig, MatchingEngine, MonotonicClock};
pub use fees::FeeSchedule;
pub use metrics::{Metrics, MetricsSnapshot};
pub use orderbook::{Bbo, BookLevel, DepthSnapshot, OrderBook, OrderBookError};
pub use persistence::{PersistenceError, PersistenceStore};
pub use recovery::RecoveryReport;
pub use types::{Order, OrderId, OrderStatus, OrderType, Side, Trade, TradeId};
