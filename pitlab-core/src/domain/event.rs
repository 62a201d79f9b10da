//! Rebalance events and equity curve points — the ordered outputs of a run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Why a rebalance happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceTrigger {
    /// Calendar cadence passed.
    Scheduled,
    /// Initial allocation once enough history exists.
    Forced,
    /// Weight drift exceeded the configured threshold.
    Opportunistic,
}

/// One completed rebalance. Immutable once appended to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    pub trigger: RebalanceTrigger,
    /// Signed share delta per ticker (buys positive). Zero deltas are omitted.
    pub trades: BTreeMap<String, i64>,
    /// Commission + slippage across all trades, liquidations included.
    pub total_cost: f64,
    /// Absolute notional traded at execution prices.
    pub traded_notional: f64,
    pub value_before: f64,
    pub value_after: f64,
    pub cash_before: f64,
    pub cash_after: f64,
    /// Tickers force-liquidated because their data disappears.
    pub liquidated: Vec<String>,
    /// Uniform factor applied to all deltas to keep cash non-negative (1.0 = unscaled).
    pub scale_factor: f64,
    /// Weights the strategy asked for.
    pub target_weights: BTreeMap<String, f64>,
}

impl RebalanceEvent {
    /// Traded notional as a fraction of pre-trade portfolio value.
    pub fn turnover(&self) -> f64 {
        if self.value_before <= 0.0 {
            return 0.0;
        }
        self.traded_notional / self.value_before
    }
}

/// End-of-day portfolio value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}
