//! Order book error types.

use crate::types::{OrderId, Side};
use rust_decimal::Decimal;
use std::fmt;

/// Errors that can occur within the [`crate::orderbook::OrderBook`].
#[derive(Debug)]
#[non_exhaustive]
pub enum OrderBookError {
    /// Order not found in the book.
    OrderNotFound(OrderId),

    /// An order with this id is already resting in the book.
    DuplicateOrder(OrderId),

    /// Attempted to rest an order that isn't eligible to rest (wrong type,
    /// no price, or zero remaining quantity).
    NotRestable(OrderId),

    /// A LIMIT order was submitted without a price.
    MissingPrice,

    /// A MARKET order was submitted with a price.
    UnexpectedPrice,

    /// Quantity must be strictly positive.
    InvalidQuantity(Decimal),

    /// Price must be strictly positive.
    InvalidPrice(Decimal),

    /// Error while serializing snapshot data.
    SerializationError {
        message: String,
    },

    /// Error while deserializing snapshot data.
    DeserializationError {
        message: String,
    },

    /// Snapshot integrity check failed.
    ChecksumMismatch {
        expected: String,
        actual: String,
    },

    /// Snapshot envelope version is not one this build understands.
    UnsupportedSnapshotVersion {
        found: u32,
        supported: u32,
    },
}

impl fmt::Display for OrderBookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderBookError::OrderNotFound(id) => write!(f, "order not found: {id}"),
            OrderBookError::DuplicateOrder(id) => write!(f, "order already resting: {id}"),
            OrderBookError::NotRestable(id) => write!(f, "order is not restable: {id}"),
            OrderBookError::MissingPrice => write!(f, "LIMIT order requires a price"),
            OrderBookError::UnexpectedPrice => write!(f, "MARKET order must not carry a price"),
            OrderBookError::InvalidQuantity(q) => write!(f, "invalid quantity: {q}"),
            OrderBookError::InvalidPrice(p) => write!(f, "invalid price: {p}"),
            OrderBookError::SerializationError { message } => {
                write!(f, "serialization error: {message}")
            }
            OrderBookError::DeserializationError { message } => {
                write!(f, "deserialization error: {message}")
            }
            OrderBookError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            OrderBookError::UnsupportedSnapshotVersion { found, supported } => {
                write!(
                    f,
                    "unsupported snapshot version {found}, this build understands {supported}"
                )
            }
        }
    }
}

impl std::error::Error for OrderBookError {}

/// Surfaced when a price crosses the book in a way the caller didn't expect.
/// Not currently raised by matching itself (crossing is the normal case
/// that drives a match), kept for callers building stricter order
/// validation on top of this core.
#[derive(Debug)]
pub struct PriceCrossing {
    pub price: Decimal,
    pub side: Side,
    pub opposite_price: Decimal,
}

impl fmt::Display for PriceCrossing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "price crossing: {} {} would cross opposite at {}",
            self.side, self.price, self.opposite_price
        )
    }
}
