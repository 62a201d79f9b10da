//! Portfolio construction — turns a return window into target weights.
//!
//! Strategies are opaque to the engine: it hands over the lookback window
//! restricted to the selected assets and validates whatever comes back.

use crate::data::panel::AssetPanel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Tolerance on the weight sum.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Hard limits on constructed weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConstraints {
    /// Upper bound on any single weight.
    pub max_weight: Option<f64>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StrategyError {
    #[error("strategy {name} failed: {reason}")]
    Failed { name: String, reason: String },
}

/// A weight vector that breaks a hard constraint.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WeightViolation {
    #[error("weight for {asset} is not finite")]
    NonFinite { asset: String },

    #[error("weight for {asset} is negative ({weight})")]
    Negative { asset: String, weight: f64 },

    #[error("weight for {asset} exceeds max {max} ({weight})")]
    AboveMax { asset: String, weight: f64, max: f64 },

    #[error("weight assigned to unselected asset {asset}")]
    UnselectedAsset { asset: String },

    #[error("weights sum to {sum}, expected 1")]
    Sum { sum: f64 },
}

/// The "construct" capability.
pub trait PortfolioStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Rows of history required before the first allocation.
    fn min_history_rows(&self) -> usize {
        1
    }

    /// Target weights over `returns.assets()`, summing to 1.
    fn construct(
        &self,
        returns: &AssetPanel,
        constraints: &PortfolioConstraints,
        asset_classes: Option<&BTreeMap<String, String>>,
    ) -> Result<BTreeMap<String, f64>, StrategyError>;
}

/// Check `weights` against the hard constraints for the `selected` asset set.
///
/// An empty selection must produce empty weights (all cash).
pub fn validate_weights(
    weights: &BTreeMap<String, f64>,
    selected: &BTreeSet<String>,
    constraints: &PortfolioConstraints,
) -> Result<(), WeightViolation> {
    for (asset, &weight) in weights {
        if !selected.contains(asset) {
            return Err(WeightViolation::UnselectedAsset {
                asset: asset.clone(),
            });
        }
        if !weight.is_finite() {
            return Err(WeightViolation::NonFinite {
                asset: asset.clone(),
            });
        }
        if weight < 0.0 {
            return Err(WeightViolation::Negative {
                asset: asset.clone(),
                weight,
            });
        }
        if let Some(max) = constraints.max_weight {
            if weight > max + WEIGHT_SUM_TOLERANCE {
                return Err(WeightViolation::AboveMax {
                    asset: asset.clone(),
                    weight,
                    max,
                });
            }
        }
    }
    if selected.is_empty() && weights.is_empty() {
        return Ok(());
    }
    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(WeightViolation::Sum { sum });
    }
    Ok(())
}

/// 1/N across every asset in the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualWeight;

impl PortfolioStrategy for EqualWeight {
    fn name(&self) -> &str {
        "equal_weight"
    }

    fn construct(
        &self,
        returns: &AssetPanel,
        _constraints: &PortfolioConstraints,
        _asset_classes: Option<&BTreeMap<String, String>>,
    ) -> Result<BTreeMap<String, f64>, StrategyError> {
        let n = returns.n_assets();
        if n == 0 {
            return Ok(BTreeMap::new());
        }
        let w = 1.0 / n as f64;
        Ok(returns.assets().iter().map(|a| (a.clone(), w)).collect())
    }
}
