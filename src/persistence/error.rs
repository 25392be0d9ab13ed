//! Persistence-layer error taxonomy.

use thiserror::Error;

/// Errors surfaced by [`super::PersistenceStore`].
///
/// Kept separate from [`crate::orderbook::OrderBookError`] since this is a
/// distinct component seam (I/O and (de)serialization failures) with its own
/// retry/drop policy, per the error taxonomy in the spec's error-handling
/// section.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid decimal in column {column}: {value:?}")]
    InvalidDecimal { column: &'static str, value: String },

    #[error("invalid timestamp in column {column}: {value:?}")]
    InvalidTimestamp { column: &'static str, value: String },

    #[error("unrecognized {what} in column {column}: {value:?}")]
    InvalidEnumValue {
        what: &'static str,
        column: &'static str,
        value: String,
    },

    #[error("snapshot envelope error: {0}")]
    Snapshot(#[from] crate::orderbook::OrderBookError),

    #[error("no snapshot found for symbol {symbol}")]
    NoSnapshot { symbol: String },
}
