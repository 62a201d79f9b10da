//! Cost model — commission and slippage charged on each trade.
//!
//! Both legs are charged as cash against notional; the execution price itself
//! is the unadjusted close. Commission has a per-trade floor for non-zero
//! trades. Slippage is symmetric in basis points.

use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn of_delta(delta: i64) -> Self {
        if delta >= 0 {
            Self::Buy
        } else {
            Self::Sell
        }
    }
}

/// Cost breakdown of a single trade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeCost {
    pub commission: f64,
    pub slippage: f64,
}

impl TradeCost {
    pub fn total(&self) -> f64 {
        self.commission + self.slippage
    }
}

/// Cost of trading `shares` of `ticker` at `price`. Must be pure.
pub trait TransactionCostModel: Send + Sync {
    fn cost(&self, ticker: &str, shares: u64, price: f64, side: TradeSide) -> TradeCost;
}

/// Commission as a fraction of notional (floored at a minimum) plus
/// slippage in basis points of notional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProportionalCostModel {
    pub commission_rate: f64,
    pub commission_min: f64,
    pub slippage_bps: f64,
}

impl ProportionalCostModel {
    pub fn new(commission_rate: f64, commission_min: f64, slippage_bps: f64) -> Self {
        Self {
            commission_rate,
            commission_min,
            slippage_bps,
        }
    }

    pub fn frictionless() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl TransactionCostModel for ProportionalCostModel {
    fn cost(&self, _ticker: &str, shares: u64, price: f64, _side: TradeSide) -> TradeCost {
        if shares == 0 {
            return TradeCost::default();
        }
        let notional = shares as f64 * price.abs();
        TradeCost {
            commission: (notional * self.commission_rate).max(self.commission_min),
            slippage: notional * self.slippage_bps / 10_000.0,
        }
    }
}
