//! Core order and trade record types.
//!
//! Every price, quantity, and fee in this module is a [`Decimal`] — no
//! floating point reaches the matching path. Orders are plain data; the
//! state machine that moves them through their lifecycle lives in
//! [`crate::engine`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a [`Trade`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeId(pub Uuid);

impl TradeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TradeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the book an order rests on, or which side aggressed a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side an order on this side would cross against.
    #[must_use]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// The matching behavior requested for an order.
///
/// Stop orders and other special order types that the original engine's
/// enum carries are not implemented by this core; only the four types
/// below participate in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
    /// Immediate-or-cancel: matches what it can immediately, the rest is cancelled.
    Ioc,
    /// Fill-or-kill: matches in full immediately, or not at all.
    Fok,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Ioc => "IOC",
            OrderType::Fok => "FOK",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of an [`Order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

/// A client instruction to trade, and its current fill state.
///
/// `timestamp` is assigned by the engine at submission time (via
/// [`crate::engine::MonotonicClock`]) and is strictly increasing across
/// an engine's lifetime, which is what gives FIFO-within-a-price-level
/// its meaning on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Required for LIMIT, optional constraint for IOC/FOK, forbidden for MARKET.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
}

impl Order {
    /// Builds a new order in `Pending` state with zero fill.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
        user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            symbol: symbol.into(),
            side,
            order_type,
            price,
            quantity,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Pending,
            timestamp,
            user_id: user_id.into(),
        }
    }

    /// Quantity still open for matching. Never negative.
    #[must_use]
    pub fn remaining_quantity(&self) -> Decimal {
        let remaining = self.quantity - self.filled_quantity;
        if remaining < Decimal::ZERO {
            Decimal::ZERO
        } else {
            remaining
        }
    }

    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.filled_quantity >= self.quantity
    }

    /// True if this order is eligible to rest on the book: a LIMIT order
    /// with a price and a positive remainder, not yet terminal.
    #[must_use]
    pub fn is_restable(&self) -> bool {
        self.order_type == OrderType::Limit
            && self.price.is_some()
            && self.remaining_quantity() > Decimal::ZERO
            && matches!(
                self.status,
                OrderStatus::Pending | OrderStatus::PartiallyFilled
            )
    }

    /// Applies a fill of `quantity`, updating `filled_quantity` and `status`.
    pub fn apply_fill(&mut self, quantity: Decimal) {
        self.filled_quantity += quantity;
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }
}

/// A confirmed execution between a resting maker order and an aggressing taker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub symbol: String,
    /// Always the maker's price.
    pub price: Decimal,
    pub quantity: Decimal,
    pub aggressor_side: Side,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
}
