//! Durable storage for orders, trades, and periodic order-book snapshots.
//!
//! Realizes the reference SQL schema against SQLite via `sqlx`, opened in
//! WAL mode with relaxed synchronous durability — the same PRAGMA set the
//! Python original uses to allow concurrent reads while a batch write is in
//! flight. Every price/quantity/fee column is stored as its canonical
//! [`Decimal`] string so the round-trip requirement holds independent of
//! SQLite's native numeric affinity.

pub mod error;

pub use error::PersistenceError;

use crate::orderbook::snapshot::{OrderBookSnapshot, OrderBookSnapshotPackage};
use crate::orderbook::OrderBook;
use crate::types::{Order, OrderId, OrderStatus, OrderType, Side, Trade, TradeId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Number of most-recent snapshots retained per symbol.
pub const SNAPSHOT_RETENTION: i64 = 10;

/// Batched, WAL-mode durable store for one engine's orders/trades/snapshots.
///
/// Writers serialize on the pool's connection (SQLite only allows one
/// writer at a time regardless), but `journal_mode=WAL` lets readers proceed
/// concurrently with an in-flight write, satisfying the "configured for
/// concurrent reads during writes" contract.
pub struct PersistenceStore {
    pool: SqlitePool,
}

impl PersistenceStore {
    /// Opens (creating if absent) a SQLite database at `path`, wires up the
    /// WAL/synchronous/cache PRAGMAs, and ensures the schema exists.
    pub async fn connect(path: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(PersistenceError::Database)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("cache_size", "-10000")
            .pragma("temp_store", "memory")
            .pragma("busy_timeout", "2000");

        // A distinct `:memory:` database is created per connection, so a
        // pool with more than one connection would each see an empty,
        // unrelated database. Tests that pass ":memory:" need a single
        // connection to keep all statements on the same in-memory db.
        let max_connections = if path == ":memory:" { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(%path, "persistence store opened");
        Ok(store)
    }

    /// Builds a store around an already-open pool (used by tests against an
    /// in-memory database shared across connections).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, PersistenceError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                price TEXT,
                quantity TEXT NOT NULL,
                filled_quantity TEXT NOT NULL,
                status TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                user_id TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                aggressor_side TEXT NOT NULL,
                maker_order_id TEXT NOT NULL,
                taker_order_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                maker_fee TEXT NOT NULL,
                taker_fee TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS orderbook_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                snapshot_data BLOB NOT NULL,
                timestamp TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
            "CREATE INDEX IF NOT EXISTS idx_orders_symbol_status ON orders(symbol, status)",
            "CREATE INDEX IF NOT EXISTS idx_orders_timestamp ON orders(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol_timestamp ON trades(symbol, timestamp)",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// `INSERT OR REPLACE` of a batch of orders, as a single transaction.
    pub async fn save_orders(&self, orders: &[Order]) -> Result<(), PersistenceError> {
        if orders.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for order in orders {
            sqlx::query(
                "INSERT OR REPLACE INTO orders
                 (order_id, symbol, side, order_type, price, quantity, filled_quantity, status, timestamp, user_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(order.order_id.0.to_string())
            .bind(&order.symbol)
            .bind(order.side.to_string())
            .bind(order.order_type.to_string())
            .bind(order.price.map(|p| p.to_string()))
            .bind(order.quantity.to_string())
            .bind(order.filled_quantity.to_string())
            .bind(order.status.to_string())
            .bind(order.timestamp.to_rfc3339())
            .bind(&order.user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = orders.len(), "persisted order batch");
        Ok(())
    }

    /// `INSERT OR REPLACE` of a batch of trades, as a single transaction.
    pub async fn save_trades(&self, trades: &[Trade]) -> Result<(), PersistenceError> {
        if trades.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for trade in trades {
            sqlx::query(
                "INSERT OR REPLACE INTO trades
                 (trade_id, symbol, price, quantity, aggressor_side, maker_order_id, taker_order_id, timestamp, maker_fee, taker_fee)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(trade.trade_id.0.to_string())
            .bind(&trade.symbol)
            .bind(trade.price.to_string())
            .bind(trade.quantity.to_string())
            .bind(trade.aggressor_side.to_string())
            .bind(trade.maker_order_id.0.to_string())
            .bind(trade.taker_order_id.0.to_string())
            .bind(trade.timestamp.to_rfc3339())
            .bind(trade.maker_fee.to_string())
            .bind(trade.taker_fee.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = trades.len(), "persisted trade batch");
        Ok(())
    }

    /// Appends a new checksummed snapshot of `book`, then trims to the
    /// [`SNAPSHOT_RETENTION`] most recent rows for that symbol.
    pub async fn save_snapshot(&self, symbol: &str, book: &OrderBook) -> Result<(), PersistenceError> {
        let snapshot = OrderBookSnapshot {
            symbol: symbol.to_string(),
            taken_at: Utc::now(),
            resting_orders: book.resting_orders(),
        };
        let package = OrderBookSnapshotPackage::new(snapshot)?;
        let payload = serde_json::to_vec(&package).map_err(|e| PersistenceError::InvalidDecimal {
            column: "snapshot_data",
            value: e.to_string(),
        })?;

        sqlx::query(
            "INSERT INTO orderbook_snapshots (symbol, snapshot_data, timestamp) VALUES (?, ?, ?)",
        )
        .bind(symbol)
        .bind(payload)
        .bind(package.snapshot.taken_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "DELETE FROM orderbook_snapshots
             WHERE symbol = ? AND id NOT IN (
                 SELECT id FROM orderbook_snapshots WHERE symbol = ? ORDER BY timestamp DESC LIMIT ?
             )",
        )
        .bind(symbol)
        .bind(symbol)
        .bind(SNAPSHOT_RETENTION)
        .execute(&self.pool)
        .await?;

        info!(%symbol, "order book snapshot saved");
        Ok(())
    }

    /// Loads the most recent snapshot for `symbol`, reconstructing an
    /// [`OrderBook`] and returning it alongside the snapshot's timestamp.
    pub async fn load_latest_snapshot(
        &self,
        symbol: &str,
    ) -> Result<Option<(OrderBook, DateTime<Utc>)>, PersistenceError> {
        let row = sqlx::query(
            "SELECT snapshot_data FROM orderbook_snapshots
             WHERE symbol = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: Vec<u8> = row.try_get("snapshot_data")?;
        let package: OrderBookSnapshotPackage =
            serde_json::from_slice(&payload).map_err(|e| PersistenceError::InvalidDecimal {
                column: "snapshot_data",
                value: e.to_string(),
            })?;
        let snapshot = package.into_snapshot()?;
        let taken_at = snapshot.taken_at;

        let mut book = OrderBook::new(symbol);
        for order in snapshot.resting_orders {
            // A snapshot only ever contains orders that were resting at
            // capture time, so this should never fail; a failure here means
            // the snapshot itself is corrupt in a way the checksum missed.
            let _ = book.add_order(order);
        }
        info!(%symbol, %taken_at, "order book snapshot loaded");
        Ok(Some((book, taken_at)))
    }

    /// Orders for `symbol` eligible to rest on the book — `LIMIT`, priced,
    /// status `PENDING`/`PARTIALLY_FILLED` — strictly newer than `since` if
    /// given, in ascending timestamp order.
    pub async fn replay_resting_orders(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Order>, PersistenceError> {
        let rows = match since {
            Some(ts) => {
                sqlx::query(
                    "SELECT order_id, symbol, side, order_type, price, quantity, filled_quantity, status, timestamp, user_id
                     FROM orders
                     WHERE symbol = ? AND status IN ('PENDING', 'PARTIALLY_FILLED')
                       AND order_type = 'LIMIT' AND price IS NOT NULL AND timestamp > ?
                     ORDER BY timestamp ASC",
                )
                .bind(symbol)
                .bind(ts.to_rfc3339())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT order_id, symbol, side, order_type, price, quantity, filled_quantity, status, timestamp, user_id
                     FROM orders
                     WHERE symbol = ? AND status IN ('PENDING', 'PARTIALLY_FILLED')
                       AND order_type = 'LIMIT' AND price IS NOT NULL
                     ORDER BY timestamp ASC",
                )
                .bind(symbol)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(row_to_order).collect()
    }

    /// Deletes terminal orders, trades, and snapshots older than `older_than`.
    pub async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<(), PersistenceError> {
        let cutoff = older_than.to_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM orders WHERE status IN ('FILLED', 'CANCELLED', 'REJECTED') AND timestamp < ?",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM trades WHERE timestamp < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM orderbook_snapshots WHERE timestamp < ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(%cutoff, "cleaned up data older than cutoff");
        Ok(())
    }

    /// Reclaims disk space freed by `cleanup`. Run during low traffic; holds
    /// an exclusive lock on the whole database for its duration.
    pub async fn compact(&self) -> Result<(), PersistenceError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        info!("database compacted");
        Ok(())
    }

    /// Closes the pool, waiting for in-flight connections to finish.
    pub async fn close(self) {
        self.pool.close().await;
        info!("persistence store closed");
    }
}

fn row_to_order(row: sqlx::sqlite::SqliteRow) -> Result<Order, PersistenceError> {
    let order_id: String = row.try_get("order_id")?;
    let symbol: String = row.try_get("symbol")?;
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let price: Option<String> = row.try_get("price")?;
    let quantity: String = row.try_get("quantity")?;
    let filled_quantity: String = row.try_get("filled_quantity")?;
    let status: String = row.try_get("status")?;
    let timestamp: String = row.try_get("timestamp")?;
    let user_id: String = row.try_get("user_id")?;

    Ok(Order {
        order_id: OrderId(parse_uuid("order_id", &order_id)?),
        symbol,
        side: parse_side(&side)?,
        order_type: parse_order_type(&order_type)?,
        price: price.map(|p| parse_decimal("price", &p)).transpose()?,
        quantity: parse_decimal("quantity", &quantity)?,
        filled_quantity: parse_decimal("filled_quantity", &filled_quantity)?,
        status: parse_status(&status)?,
        timestamp: parse_timestamp("timestamp", &timestamp)?,
        user_id,
    })
}

fn parse_uuid(column: &'static str, value: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(value).map_err(|_| PersistenceError::InvalidDecimal {
        column,
        value: value.to_string(),
    })
}

fn parse_decimal(column: &'static str, value: &str) -> Result<Decimal, PersistenceError> {
    Decimal::from_str(value).map_err(|_| PersistenceError::InvalidDecimal {
        column,
        value: value.to_string(),
    })
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| PersistenceError::InvalidTimestamp {
            column,
            value: value.to_string(),
        })
}

fn parse_side(value: &str) -> Result<Side, PersistenceError> {
    match value {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(PersistenceError::InvalidEnumValue {
            what: "side",
            column: "side",
            value: other.to_string(),
        }),
    }
}

fn parse_order_type(value: &str) -> Result<OrderType, PersistenceError> {
    match value {
        "LIMIT" => Ok(OrderType::Limit),
        "MARKET" => Ok(OrderType::Market),
        "IOC" => Ok(OrderType::Ioc),
        "FOK" => Ok(OrderType::Fok),
        other => Err(PersistenceError::InvalidEnumValue {
            what: "order_type",
            column: "order_type",
            value: other.to_string(),
        }),
    }
}

fn parse_status(value: &str) -> Result<OrderStatus, PersistenceError> {
    match value {
        "PENDING" => Ok(OrderStatus::Pending),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELLED" => Ok(OrderStatus::Cancelled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        other => Err(PersistenceError::InvalidEnumValue {
            what: "status",
            column: "status",
            value: other.to_string(),
        }),
    }
}
