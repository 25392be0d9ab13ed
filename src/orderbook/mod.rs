//! The in-memory limit order book: price levels, FIFO within a level,
//! and the primitives the matching engine sweeps through.
//!
//! Price-time priority is kept with a [`BTreeMap<Decimal, PriceLevel>`]
//! per side rather than a binary heap with lazy deletion — an ordered map
//! keeps "every key present is a non-empty level" true on its own, so
//! there's no separate cleanup pass the way a heap needs one. FIFO within
//! a level falls out of a `VecDeque` and insertion order.

pub mod error;
pub mod snapshot;

pub use error::OrderBookError;

use crate::types::{Order, OrderId, Side};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// One fill produced while sweeping the book against an aggressing order.
/// The taker side of the fill is tracked by the caller; this only reports
/// what happened to the maker.
#[derive(Debug, Clone)]
pub struct MatchFill {
    pub maker_order_id: OrderId,
    pub maker_price: Decimal,
    pub quantity: Decimal,
    /// True if this fill fully consumed the maker (it left the book).
    pub maker_filled: bool,
    /// The maker's remaining quantity after this fill (0 if fully filled).
    pub maker_remaining_after: Decimal,
    /// A clone of the maker's full state immediately after this fill was
    /// applied, whether or not it went on to leave the book. Lets callers
    /// durably persist the maker's updated fill state without having to
    /// separately look it up (it may already be gone from the book).
    pub maker: Order,
}

/// The resting orders at one exact price, in FIFO order.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Decimal,
    orders: VecDeque<Order>,
    total_quantity: Decimal,
}

impl PriceLevel {
    fn new(price: Decimal) -> Self {
        Self {
            price,
            orders: VecDeque::new(),
            total_quantity: Decimal::ZERO,
        }
    }

    fn push(&mut self, order: Order) {
        self.total_quantity += order.remaining_quantity();
        self.orders.push_back(order);
    }

    /// Removes the order at `id`, wherever it sits in the FIFO queue.
    fn remove(&mut self, id: OrderId) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.order_id == id)?;
        let order = self.orders.remove(pos)?;
        self.total_quantity -= order.remaining_quantity();
        Some(order)
    }

    pub fn total_quantity(&self) -> Decimal {
        self.total_quantity
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    fn is_empty(&self) -> bool {
        self.total_quantity <= Decimal::ZERO || self.orders.is_empty()
    }

    /// Recomputes `total_quantity` from the resting orders. Used as a
    /// defensive repair path: if accumulated decimal arithmetic ever
    /// drifts from the true sum, this brings it back in line.
    fn reconcile(&mut self) {
        self.total_quantity = self.orders.iter().map(Order::remaining_quantity).sum();
    }
}

/// One side (bids or asks) of an [`OrderBook`].
#[derive(Debug, Clone)]
pub struct OrderBookSide {
    side: Side,
    levels: BTreeMap<Decimal, PriceLevel>,
}

impl OrderBookSide {
    fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    /// The best (highest-priority) non-empty price: lowest for asks,
    /// highest for bids.
    pub fn best_price(&self) -> Option<Decimal> {
        match self.side {
            Side::Sell => self.levels.keys().next().copied(),
            Side::Buy => self.levels.keys().next_back().copied(),
        }
    }

    pub fn best_level(&self) -> Option<&PriceLevel> {
        self.best_price().and_then(|p| self.levels.get(&p))
    }

    pub fn level(&self, price: Decimal) -> Option<&PriceLevel> {
        self.levels.get(&price)
    }

    /// Prices in priority order (best first), each with its resting quantity.
    pub fn depth(&self, n: usize) -> Vec<(Decimal, Decimal)> {
        let iter = self.levels.iter().map(|(p, l)| (*p, l.total_quantity));
        match self.side {
            Side::Sell => iter.take(n).collect(),
            Side::Buy => {
                let mut v: Vec<_> = iter.collect();
                v.reverse();
                v.truncate(n);
                v
            }
        }
    }

    fn insert(&mut self, order: Order) {
        self.levels
            .entry(order.price.expect("restable order always has a price"))
            .or_insert_with(|| PriceLevel::new(order.price.unwrap()))
            .push(order);
    }

    fn remove_at(&mut self, price: Decimal, id: OrderId) -> Option<Order> {
        let level = self.levels.get_mut(&price)?;
        let order = level.remove(id)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(order)
    }

    /// Whether `price` would cross this side for an incoming limit at that
    /// price: does the best level on this side qualify as a counterparty?
    fn crosses(&self, limit_price: Option<Decimal>) -> bool {
        let Some(best) = self.best_price() else {
            return false;
        };
        match limit_price {
            None => true, // MARKET: any price on the book qualifies
            Some(limit) => match self.side {
                // this side is asks, taker is buying: ask must be <= limit
                Side::Sell => best <= limit,
                // this side is bids, taker is selling: bid must be >= limit
                Side::Buy => best >= limit,
            },
        }
    }

    /// Sums resting quantity across qualifying levels, best-first, until
    /// `target` is reached or the side runs out. Used by FOK's pre-check;
    /// does not mutate anything.
    fn liquidity_up_to(&self, target: Decimal, limit_price: Option<Decimal>) -> Decimal {
        let mut sum = Decimal::ZERO;
        let prices: Vec<Decimal> = match self.side {
            Side::Sell => self.levels.keys().copied().collect(),
            Side::Buy => self.levels.keys().rev().copied().collect(),
        };
        for price in prices {
            let qualifies = match limit_price {
                None => true,
                Some(limit) => match self.side {
                    Side::Sell => price <= limit,
                    Side::Buy => price >= limit,
                },
            };
            if !qualifies {
                break;
            }
            sum += self.levels[&price].total_quantity;
            if sum >= target {
                break;
            }
        }
        sum
    }

    /// Consumes resting liquidity best-first against `remaining`, down to
    /// whatever `limit_price` allows (`None` means MARKET: no limit).
    /// Mutates maker orders in place; fully-filled makers leave the book.
    fn sweep(&mut self, mut remaining: Decimal, limit_price: Option<Decimal>) -> (Decimal, Vec<MatchFill>) {
        let mut fills = Vec::new();
        while remaining > Decimal::ZERO && self.crosses(limit_price) {
            let price = self
                .best_price()
                .expect("crosses() only returns true when a best price exists");
            let level = self.levels.get_mut(&price).expect("price came from levels");
            // front() is always a live order: levels are removed eagerly
            // whenever they empty out, so a present level always has one.
            let front = level.orders.front_mut().expect("non-empty level has a front order");
            let fill_qty = remaining.min(front.remaining_quantity());
            front.apply_fill(fill_qty);
            level.total_quantity -= fill_qty;
            remaining -= fill_qty;

            let maker_filled = front.is_filled();
            let maker_order_id = front.order_id;
            let maker_remaining_after = front.remaining_quantity();
            let maker_snapshot = front.clone();
            if maker_filled {
                level.orders.pop_front();
            }
            if level.is_empty() {
                self.levels.remove(&price);
            }

            fills.push(MatchFill {
                maker_order_id,
                maker_price: price,
                quantity: fill_qty,
                maker_filled,
                maker_remaining_after,
                maker: maker_snapshot,
            });
        }
        (remaining, fills)
    }
}

/// A composite best-bid/best-offer snapshot with string-serialized decimals,
/// matching the wire schema in the external-interfaces section of the spec.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Bbo {
    pub symbol: String,
    pub best_bid: Option<BookLevel>,
    pub best_ask: Option<BookLevel>,
    pub spread: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Top-N depth on both sides, best-first.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// The full order book for one symbol: both sides plus an index for O(1)
/// cancel dispatch by order id.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pub symbol: String,
    bids: OrderBookSide,
    asks: OrderBookSide,
    index: HashMap<OrderId, (Decimal, Side)>,
}

impl OrderBook {
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: OrderBookSide::new(Side::Buy),
            asks: OrderBookSide::new(Side::Sell),
            index: HashMap::new(),
        }
    }

    fn side(&self, side: Side) -> &OrderBookSide {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut OrderBookSide {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Rests `order` on the book. The order must be [`Order::is_restable`]
    /// and must not already be indexed.
    pub fn add_order(&mut self, order: Order) -> Result<(), OrderBookError> {
        if !order.is_restable() {
            return Err(OrderBookError::NotRestable(order.order_id));
        }
        if self.index.contains_key(&order.order_id) {
            return Err(OrderBookError::DuplicateOrder(order.order_id));
        }
        let price = order.price.expect("is_restable() guarantees a price");
        let side = order.side;
        let id = order.order_id;
        self.side_mut(side).insert(order);
        self.index.insert(id, (price, side));
        Ok(())
    }

    /// Removes and returns the order at `id`, or `None` if it isn't resting.
    /// Caller is responsible for setting `status = Cancelled` on the result.
    pub fn cancel_order(&mut self, id: OrderId) -> Option<Order> {
        let (price, side) = self.index.remove(&id)?;
        self.side_mut(side).remove_at(price, id)
    }

    /// Sweeps resting liquidity on the opposite side of `taker_side`
    /// against `remaining`, honoring `limit_price` (`None` for MARKET).
    /// Returns the quantity left unfilled and the fills produced, and
    /// removes the index entry for every maker that left the book.
    pub(crate) fn sweep(
        &mut self,
        taker_side: Side,
        remaining: Decimal,
        limit_price: Option<Decimal>,
    ) -> (Decimal, Vec<MatchFill>) {
        let (remaining_after, fills) = self.side_mut(taker_side.opposite()).sweep(remaining, limit_price);
        for fill in &fills {
            if fill.maker_filled {
                self.index.remove(&fill.maker_order_id);
            }
        }
        (remaining_after, fills)
    }

    /// Liquidity reachable on the opposite side of `taker_side` within
    /// `limit_price`, capped at `target` (stops summing once reached).
    /// Used by FOK's fill-completely pre-check.
    pub(crate) fn liquidity_up_to(
        &self,
        taker_side: Side,
        target: Decimal,
        limit_price: Option<Decimal>,
    ) -> Decimal {
        self.side(taker_side.opposite()).liquidity_up_to(target, limit_price)
    }

    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.best_level().map(|l| (l.price, l.total_quantity))
    }

    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.best_level().map(|l| (l.price, l.total_quantity))
    }

    pub fn get_bbo(&self) -> Bbo {
        let best_bid = self.best_bid().map(|(price, quantity)| BookLevel { price, quantity });
        let best_ask = self.best_ask().map(|(price, quantity)| BookLevel { price, quantity });
        let spread = match (&best_bid, &best_ask) {
            (Some(b), Some(a)) => Some(a.price - b.price),
            _ => None,
        };
        Bbo {
            symbol: self.symbol.clone(),
            best_bid,
            best_ask,
            spread,
        }
    }

    pub fn get_depth(&self, n: usize) -> DepthSnapshot {
        DepthSnapshot {
            symbol: self.symbol.clone(),
            bids: self
                .bids
                .depth(n)
                .into_iter()
                .map(|(price, quantity)| BookLevel { price, quantity })
                .collect(),
            asks: self
                .asks
                .depth(n)
                .into_iter()
                .map(|(price, quantity)| BookLevel { price, quantity })
                .collect(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.index.contains_key(&id)
    }

    /// Recomputes every level's aggregate quantity from its resting
    /// orders. Invariant-repair path, not part of the normal hot path.
    pub fn reconcile(&mut self) {
        for level in self.bids.levels.values_mut() {
            level.reconcile();
        }
        for level in self.asks.levels.values_mut() {
            level.reconcile();
        }
    }

    /// All resting orders on both sides, in no particular order. Used to
    /// build a snapshot.
    pub fn resting_orders(&self) -> Vec<Order> {
        self.bids
            .levels
            .values()
            .chain(self.asks.levels.values())
            .flat_map(PriceLevel::orders)
            .cloned()
            .collect()
    }
}
