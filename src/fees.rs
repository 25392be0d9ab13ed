//! Maker/taker fee schedule.
//!
//! The upstream `orderbook-rs` lineage expresses fees in integer basis
//! points over an integer notional. This core's prices and quantities are
//! [`Decimal`], so the schedule is expressed directly as decimal rates
//! (`0.001` = 10 bps) applied to the exact decimal notional of a trade —
//! same shape, no bps/integer conversion layer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Configurable fee schedule for maker and taker fees.
///
/// Rates are fractions of notional (`price * quantity`): `0.001` means
/// 0.1%. A negative maker rate is a rebate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Fee rate applied to the maker side of a trade. Negative is a rebate.
    pub maker_fee_rate: Decimal,
    /// Fee rate applied to the taker side of a trade.
    pub taker_fee_rate: Decimal,
}

impl FeeSchedule {
    #[must_use]
    pub fn new(maker_fee_rate: Decimal, taker_fee_rate: Decimal) -> Self {
        Self {
            maker_fee_rate,
            taker_fee_rate,
        }
    }

    /// Fee for one side of a trade, given its notional (`price * quantity`).
    #[must_use]
    pub fn calculate_fee(&self, notional: Decimal, is_maker: bool) -> Decimal {
        let rate = if is_maker {
            self.maker_fee_rate
        } else {
            self.taker_fee_rate
        };
        notional * rate
    }

    #[must_use]
    pub fn has_maker_rebate(&self) -> bool {
        self.maker_fee_rate < Decimal::ZERO
    }

    #[must_use]
    pub fn is_zero_fee(&self) -> bool {
        self.maker_fee_rate.is_zero() && self.taker_fee_rate.is_zero()
    }

    #[must_use]
    pub fn zero_fee() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO)
    }

    #[must_use]
    pub fn taker_only(taker_fee_rate: Decimal) -> Self {
        Self::new(Decimal::ZERO, taker_fee_rate)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::zero_fee()
    }
}
