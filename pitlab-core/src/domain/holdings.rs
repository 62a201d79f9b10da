//! Holdings — integer share counts plus a cash balance.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HoldingsError {
    #[error("selling {requested} shares of {ticker} but only {held} held")]
    Oversold {
        ticker: String,
        held: u64,
        requested: u64,
    },
}

/// Share counts per ticker and the cash balance of one simulation run.
///
/// Owned by exactly one run. Only the trade executor mutates it, so the
/// mutators are crate-private. Zero-share positions are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HoldingsState {
    positions: BTreeMap<String, u64>,
    cash: f64,
}

impl HoldingsState {
    pub fn new(cash: f64) -> Self {
        Self {
            positions: BTreeMap::new(),
            cash,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn positions(&self) -> &BTreeMap<String, u64> {
        &self.positions
    }

    pub fn shares(&self, ticker: &str) -> u64 {
        self.positions.get(ticker).copied().unwrap_or(0)
    }

    pub fn is_held(&self, ticker: &str) -> bool {
        self.positions.contains_key(ticker)
    }

    /// Held tickers in sorted order.
    pub fn tickers(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    /// Sum of position market values. Positions without a price contribute nothing.
    pub fn market_value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.positions
            .iter()
            .filter_map(|(t, &n)| prices.get(t).map(|p| n as f64 * p))
            .sum()
    }

    /// Total value = cash + sum of position market values.
    pub fn total_value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.cash + self.market_value(prices)
    }

    /// Fraction of total value held in each position.
    pub fn weights(&self, prices: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
        let total = self.total_value(prices);
        if total <= 0.0 {
            return BTreeMap::new();
        }
        self.positions
            .iter()
            .filter_map(|(t, &n)| prices.get(t).map(|p| (t.clone(), n as f64 * p / total)))
            .collect()
    }

    /// Apply a signed share delta. Positions that net to zero are removed.
    pub(crate) fn apply_delta(&mut self, ticker: &str, delta: i64) -> Result<(), HoldingsError> {
        let held = self.shares(ticker);
        let next = if delta >= 0 {
            held + delta as u64
        } else {
            let sell = delta.unsigned_abs();
            if sell > held {
                return Err(HoldingsError::Oversold {
                    ticker: ticker.to_string(),
                    held,
                    requested: sell,
                });
            }
            held - sell
        };
        if next == 0 {
            self.positions.remove(ticker);
        } else {
            self.positions.insert(ticker.to_string(), next);
        }
        Ok(())
    }

    pub(crate) fn set_cash(&mut self, cash: f64) {
        self.cash = cash;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    #[test]
    fn value_with_no_positions() {
        let h = HoldingsState::new(100_000.0);
        assert_eq!(h.total_value(&BTreeMap::new()), 100_000.0);
    }

    #[test]
    fn value_with_position() {
        let mut h = HoldingsState::new(90_000.0);
        h.apply_delta("SPY", 100).unwrap();
        // 90_000 + 100 * 110 = 101_000
        assert_eq!(h.total_value(&prices(&[("SPY", 110.0)])), 101_000.0);
    }

    #[test]
    fn netting_to_zero_removes_position() {
        let mut h = HoldingsState::new(0.0);
        h.apply_delta("SPY", 10).unwrap();
        h.apply_delta("SPY", -10).unwrap();
        assert!(!h.is_held("SPY"));
        assert!(h.positions().is_empty());
    }

    #[test]
    fn overselling_is_rejected() {
        let mut h = HoldingsState::new(0.0);
        h.apply_delta("SPY", 5).unwrap();
        let err = h.apply_delta("SPY", -6).unwrap_err();
        assert_eq!(
            err,
            HoldingsError::Oversold {
                ticker: "SPY".into(),
                held: 5,
                requested: 6
            }
        );
        assert_eq!(h.shares("SPY"), 5);
    }

    #[test]
    fn weights_sum_with_cash() {
        let mut h = HoldingsState::new(500.0);
        h.apply_delta("A", 5).unwrap();
        h.apply_delta("B", 5).unwrap();
        let w = h.weights(&prices(&[("A", 100.0), ("B", 100.0)]));
        assert!((w["A"] - 1.0 / 3.0).abs() < 1e-12);
        assert!((w["B"] - 1.0 / 3.0).abs() < 1e-12);
    }
}
