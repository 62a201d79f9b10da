//! Performance metrics — pure functions that compute run statistics.
//!
//! Every metric is a pure function: equity curve and/or event log in, scalar out.
//! No dependencies on the runner, config layer, or engine internals.

use pitlab_core::domain::{EquityPoint, RebalanceEvent};
use pitlab_core::SimulationResult;
use serde::{Deserialize, Serialize};

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Aggregate performance metrics for a single simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub rebalance_count: usize,
    pub total_costs: f64,
    /// Mean of traded notional / pre-trade value across rebalances.
    pub avg_turnover: f64,
}

impl PerformanceMetrics {
    /// Compute all metrics from a finished run.
    pub fn compute(result: &SimulationResult, risk_free_rate: f64) -> Self {
        let equity = equity_values(&result.equity_curve);
        Self::from_parts(&equity, &result.events, risk_free_rate)
    }

    pub fn from_parts(equity_curve: &[f64], events: &[RebalanceEvent], risk_free_rate: f64) -> Self {
        Self {
            total_return: total_return(equity_curve),
            cagr: cagr(equity_curve),
            volatility: annualized_volatility(equity_curve),
            sharpe: sharpe_ratio(equity_curve, risk_free_rate),
            sortino: sortino_ratio(equity_curve, risk_free_rate),
            max_drawdown: max_drawdown(equity_curve),
            rebalance_count: events.len(),
            total_costs: events.iter().map(|e| e.total_cost).sum(),
            avg_turnover: average_turnover(events),
        }
    }
}

pub fn equity_values(points: &[EquityPoint]) -> Vec<f64> {
    points.iter().map(|p| p.equity).collect()
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(equity_curve: &[f64]) -> f64 {
    let (Some(&initial), Some(&final_eq)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    if equity_curve.len() < 2 || initial <= 0.0 {
        return 0.0;
    }
    (final_eq - initial) / initial
}

/// Compound Annual Growth Rate.
///
/// Assumes 252 trading days per year. Returns 0.0 for a single point or
/// non-positive endpoints.
pub fn cagr(equity_curve: &[f64]) -> f64 {
    let (Some(&initial), Some(&final_eq)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    if equity_curve.len() < 2 || initial <= 0.0 || final_eq <= 0.0 {
        return 0.0;
    }
    let years = equity_curve.len() as f64 / TRADING_DAYS_PER_YEAR;
    (final_eq / initial).powf(1.0 / years) - 1.0
}

/// Annualized standard deviation of daily returns.
pub fn annualized_volatility(equity_curve: &[f64]) -> f64 {
    std_dev(&daily_returns(equity_curve)) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sharpe ratio from daily returns.
///
/// Sharpe = mean(daily returns - rf) / std(daily returns) * sqrt(252).
/// Returns 0.0 if variance is zero or fewer than 2 returns.
pub fn sharpe_ratio(equity_curve: &[f64], risk_free_rate: f64) -> f64 {
    let returns = daily_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let std = std_dev(&excess);
    if std < 1e-15 {
        return 0.0;
    }
    (mean_f64(&excess) / std) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Annualized Sortino ratio (downside deviation only).
///
/// Returns 0.0 when there is no downside or fewer than 2 returns.
pub fn sortino_ratio(equity_curve: &[f64], risk_free_rate: f64) -> f64 {
    let returns = daily_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();

    let downside_sq: f64 = excess.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    if downside_sq == 0.0 {
        return 0.0;
    }
    let downside_std = (downside_sq / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    (mean_f64(&excess) / downside_std) * TRADING_DAYS_PER_YEAR.sqrt()
}

/// Maximum drawdown as a negative fraction (e.g., -0.15 = 15% drawdown).
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let Some(&first) = equity_curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

/// Mean turnover per rebalance.
pub fn average_turnover(events: &[RebalanceEvent]) -> f64 {
    if events.is_empty() {
        return 0.0;
    }
    events.iter().map(RebalanceEvent::turnover).sum::<f64>() / events.len() as f64
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Compute daily returns from an equity curve.
pub fn daily_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
