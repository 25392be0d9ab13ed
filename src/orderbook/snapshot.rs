//! Versioned, checksummed snapshot envelope for a durable [`OrderBook`] dump.
//!
//! The reference engine this core is built from pickles the book opaquely;
//! that ties the on-disk format to one language's object serializer and
//! makes corruption invisible until something downstream chokes on it.
//! This crate instead wraps the serialized book in a small envelope
//! carrying a format version and a SHA-256 checksum of the payload, so
//! both schema drift and corruption are caught at load time, not mid-replay.

use super::OrderBookError;
use crate::types::Order;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current snapshot envelope format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The plain data captured in a snapshot: every resting order, as of `taken_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub taken_at: DateTime<Utc>,
    pub resting_orders: Vec<Order>,
}

/// A snapshot plus the version and checksum needed to validate it on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshotPackage {
    pub version: u32,
    pub snapshot: OrderBookSnapshot,
    pub checksum: String,
}

impl OrderBookSnapshotPackage {
    /// Builds a package from a snapshot, computing its checksum.
    pub fn new(snapshot: OrderBookSnapshot) -> Result<Self, OrderBookError> {
        let payload = serde_json::to_vec(&snapshot).map_err(|e| OrderBookError::SerializationError {
            message: e.to_string(),
        })?;
        let checksum = Self::checksum_of(&payload);
        Ok(Self {
            version: SNAPSHOT_VERSION,
            snapshot,
            checksum,
        })
    }

    fn checksum_of(payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            use std::fmt::Write;
            write!(hex, "{byte:02x}").expect("writing to a String never fails");
        }
        hex
    }

    /// Validates the version and checksum, returning the snapshot if both
    /// check out.
    pub fn into_snapshot(self) -> Result<OrderBookSnapshot, OrderBookError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(OrderBookError::UnsupportedSnapshotVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        let payload =
            serde_json::to_vec(&self.snapshot).map_err(|e| OrderBookError::SerializationError {
                message: e.to_string(),
            })?;
        let actual = Self::checksum_of(&payload);
        if actual != self.checksum {
            return Err(OrderBookError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(self.snapshot)
    }
}
