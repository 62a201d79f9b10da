//! Mutable per-run state and the run result.

use crate::data::panel::AssetPanel;
use crate::domain::{EquityPoint, HoldingsState, RebalanceEvent};
use crate::membership::MembershipState;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State that evolves day-by-day during one run. Owned by that run alone.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub holdings: HoldingsState,
    pub membership: MembershipState,
    pub last_rebalance: Option<NaiveDate>,
    /// Weights requested at the last rebalance.
    pub last_targets: BTreeMap<String, f64>,
    /// Last valid (finite, positive) price per asset, for marking and liquidation.
    pub last_prices: BTreeMap<String, f64>,
    pub events: Vec<RebalanceEvent>,
    pub equity_curve: Vec<EquityPoint>,
}

impl EngineState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            holdings: HoldingsState::new(initial_capital),
            membership: MembershipState::new(),
            last_rebalance: None,
            last_targets: BTreeMap::new(),
            last_prices: BTreeMap::new(),
            events: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    /// Carry forward the last valid price of each asset through `row`.
    pub fn update_prices(&mut self, prices: &AssetPanel, row: usize) {
        for (j, asset) in prices.assets().iter().enumerate() {
            let p = prices.get(row, j);
            if p.is_finite() && p > 0.0 {
                self.last_prices.insert(asset.clone(), p);
            }
        }
    }

    /// Portfolio value marked at last valid prices.
    pub fn equity(&self) -> f64 {
        self.holdings.total_value(&self.last_prices)
    }

    /// Largest absolute gap between current weights and the last targets
    /// (scaled by the invested fraction).
    pub fn max_drift(&self, invested_fraction: f64) -> f64 {
        let current = self.holdings.weights(&self.last_prices);
        current
            .keys()
            .chain(self.last_targets.keys())
            .map(|asset| {
                let w = current.get(asset).copied().unwrap_or(0.0);
                let target = self.last_targets.get(asset).copied().unwrap_or(0.0) * invested_fraction;
                (w - target).abs()
            })
            .fold(0.0, f64::max)
    }
}

/// Output of a complete simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// End-of-day value for every simulated trading day.
    pub equity_curve: Vec<EquityPoint>,
    /// Rebalances in date order.
    pub events: Vec<RebalanceEvent>,
    pub final_holdings: HoldingsState,
}

impl SimulationResult {
    pub fn final_equity(&self) -> Option<f64> {
        self.equity_curve.last().map(|p| p.equity)
    }
}
