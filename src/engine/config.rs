//! Tunables for one [`super::MatchingEngine`] instance.

use crate::broadcaster::BroadcasterConfig;
use crate::fees::FeeSchedule;
use tokio::time::Duration;

/// Capacity of the in-memory trade ring before the oldest entries are
/// evicted. Evicted trades remain durable via the persistence channel
/// independent of the ring, per the trade-ring eviction note.
pub const DEFAULT_TRADE_RING_CAPACITY: usize = 10_000;

/// Depth of the bounded channel orders/trades are enqueued on for durable
/// writes before the persistence worker batches them.
pub const DEFAULT_PERSISTENCE_CHANNEL_CAPACITY: usize = 10_000;

/// Aggregates the constructor parameters for a fully-wired per-symbol
/// engine in one call. Each field still has a sensible, documented
/// default — this struct exists for convenience, not as a global
/// configuration object; nothing here is read from process-wide state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: String,
    pub fee_schedule: FeeSchedule,
    pub broadcaster: BroadcasterConfig,
    /// Records are flushed to the persistence store once this many have
    /// accumulated, or `persistence_batch_interval` elapses, whichever
    /// comes first.
    pub persistence_batch_size: usize,
    pub persistence_batch_interval: Duration,
    pub persistence_channel_capacity: usize,
    /// How often a full order-book snapshot is durably written.
    pub snapshot_interval: Duration,
    pub trade_ring_capacity: usize,
}

impl EngineConfig {
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            fee_schedule: FeeSchedule::zero_fee(),
            broadcaster: BroadcasterConfig::default(),
            persistence_batch_size: 200,
            persistence_batch_interval: Duration::from_millis(100),
            persistence_channel_capacity: DEFAULT_PERSISTENCE_CHANNEL_CAPACITY,
            snapshot_interval: Duration::from_secs(30),
            trade_ring_capacity: DEFAULT_TRADE_RING_CAPACITY,
        }
    }

    #[must_use]
    pub fn with_fee_schedule(mut self, fee_schedule: FeeSchedule) -> Self {
        self.fee_schedule = fee_schedule;
        self
    }
}
