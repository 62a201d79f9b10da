//! Trade executor — turns target weights into share deltas and applies them.
//!
//! Stateless apart from configuration. Borrows the holdings for the duration
//! of one rebalance and leaves cash non-negative on success.

use super::cost_model::{TradeCost, TradeSide, TransactionCostModel};
use crate::domain::holdings::{HoldingsError, HoldingsState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Rounding slack tolerated on final cash before it counts as negative.
const CASH_EPSILON: f64 = 1e-6;

/// Per-step shrink applied while a scaled plan still overdraws cash.
const SCALE_STEP: f64 = 0.95;

/// Below this the plan collapses to no trades.
const MIN_SCALE: f64 = 1e-6;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("no price for {ticker}")]
    MissingPrice { ticker: String },

    #[error("price for {ticker} must be positive and finite (got {price})")]
    InvalidPrice { ticker: String, price: f64 },

    #[error("trades would leave cash at {cash}")]
    NegativeCash { cash: f64 },

    #[error(transparent)]
    Holdings(#[from] HoldingsError),
}

/// One executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub ticker: String,
    /// Signed share delta, buys positive.
    pub delta: i64,
    pub price: f64,
    pub cost: TradeCost,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.delta.unsigned_abs() as f64 * self.price
    }
}

/// Outcome of one execution pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub fills: Vec<Fill>,
    /// Uniform factor applied to every delta (1.0 = unscaled).
    pub scale_factor: f64,
    pub cash_before: f64,
    pub cash_after: f64,
}

impl ExecutionReport {
    fn empty(cash: f64) -> Self {
        Self {
            fills: Vec::new(),
            scale_factor: 1.0,
            cash_before: cash,
            cash_after: cash,
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.fills.iter().map(|f| f.cost.total()).sum()
    }

    pub fn traded_notional(&self) -> f64 {
        self.fills.iter().map(Fill::notional).sum()
    }

    /// Net share delta per ticker.
    pub fn trades(&self) -> BTreeMap<String, i64> {
        let mut out = BTreeMap::new();
        for fill in &self.fills {
            *out.entry(fill.ticker.clone()).or_insert(0) += fill.delta;
        }
        out.retain(|_, d| *d != 0);
        out
    }
}

/// Converts target weights into trades against a [`HoldingsState`].
#[derive(Clone)]
pub struct TradeExecutor {
    cost_model: Arc<dyn TransactionCostModel>,
    cash_reserve: f64,
}

impl std::fmt::Debug for TradeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeExecutor")
            .field("cash_reserve", &self.cash_reserve)
            .finish_non_exhaustive()
    }
}

impl TradeExecutor {
    pub fn new(cost_model: Arc<dyn TransactionCostModel>, cash_reserve: f64) -> Self {
        Self {
            cost_model,
            cash_reserve,
        }
    }

    pub fn cost_model(&self) -> &Arc<dyn TransactionCostModel> {
        &self.cost_model
    }

    /// Whole-share targets: floor(investable × weight / price).
    pub fn target_shares(
        &self,
        holdings: &HoldingsState,
        targets: &BTreeMap<String, f64>,
        prices: &BTreeMap<String, f64>,
    ) -> Result<BTreeMap<String, u64>, ExecutionError> {
        for ticker in holdings.positions().keys() {
            price_of(prices, ticker)?;
        }
        let investable = holdings.total_value(prices) * (1.0 - self.cash_reserve);
        let mut out = BTreeMap::new();
        for (ticker, &weight) in targets {
            let price = price_of(prices, ticker)?;
            let shares = (investable * weight / price).floor();
            out.insert(ticker.clone(), if shares > 0.0 { shares as u64 } else { 0 });
        }
        Ok(out)
    }

    /// Trade holdings toward `targets`. Tickers held but absent from `targets`
    /// are sold in full.
    ///
    /// If buys and costs exceed cash plus sell proceeds, every delta is scaled
    /// by one factor (truncated toward zero) until cash stays non-negative.
    pub fn rebalance(
        &self,
        holdings: &mut HoldingsState,
        targets: &BTreeMap<String, f64>,
        prices: &BTreeMap<String, f64>,
    ) -> Result<ExecutionReport, ExecutionError> {
        let target_shares = self.target_shares(holdings, targets, prices)?;

        let tickers: BTreeSet<&String> = holdings
            .positions()
            .keys()
            .chain(target_shares.keys())
            .collect();
        let mut deltas = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let held = holdings.shares(ticker) as i64;
            let target = target_shares.get(ticker).copied().unwrap_or(0) as i64;
            if target != held {
                deltas.push((ticker.clone(), target - held, price_of(prices, ticker)?));
            }
        }

        let cash = holdings.cash();
        let mut scale = 1.0;
        let mut plan = self.scaled_plan(&deltas, scale);
        if cash + net_cash_flow(&plan) < 0.0 {
            let buys: f64 = plan.iter().map(|f| f.delta as f64 * f.price).sum();
            let costs: f64 = plan.iter().map(|f| f.cost.total()).sum();
            let demand = buys + costs;
            scale = if demand > 0.0 {
                (cash / demand).clamp(0.0, 1.0)
            } else {
                0.0
            };
            plan = self.scaled_plan(&deltas, scale);
            while cash + net_cash_flow(&plan) < 0.0 {
                scale *= SCALE_STEP;
                if scale < MIN_SCALE {
                    scale = 0.0;
                    plan.clear();
                    break;
                }
                plan = self.scaled_plan(&deltas, scale);
            }
        }

        self.apply(holdings, plan, scale)
    }

    /// Sell every share of `tickers` at the given prices.
    ///
    /// Costs on a liquidation never exceed its proceeds.
    pub fn liquidate(
        &self,
        holdings: &mut HoldingsState,
        tickers: &[String],
        prices: &BTreeMap<String, f64>,
    ) -> Result<ExecutionReport, ExecutionError> {
        let mut plan = Vec::new();
        for ticker in tickers {
            let held = holdings.shares(ticker);
            if held == 0 {
                continue;
            }
            let price = price_of(prices, ticker)?;
            let mut cost = self.cost_model.cost(ticker, held, price, TradeSide::Sell);
            let proceeds = held as f64 * price;
            if cost.total() > proceeds {
                let ratio = proceeds / cost.total();
                cost.commission *= ratio;
                cost.slippage *= ratio;
            }
            plan.push(Fill {
                ticker: ticker.clone(),
                delta: -(held as i64),
                price,
                cost,
            });
        }
        self.apply(holdings, plan, 1.0)
    }

    fn scaled_plan(&self, deltas: &[(String, i64, f64)], scale: f64) -> Vec<Fill> {
        deltas
            .iter()
            .filter_map(|(ticker, delta, price)| {
                let scaled = (*delta as f64 * scale).trunc() as i64;
                if scaled == 0 {
                    return None;
                }
                let side = TradeSide::of_delta(scaled);
                let cost = self
                    .cost_model
                    .cost(ticker, scaled.unsigned_abs(), *price, side);
                Some(Fill {
                    ticker: ticker.clone(),
                    delta: scaled,
                    price: *price,
                    cost,
                })
            })
            .collect()
    }

    fn apply(
        &self,
        holdings: &mut HoldingsState,
        plan: Vec<Fill>,
        scale_factor: f64,
    ) -> Result<ExecutionReport, ExecutionError> {
        let cash_before = holdings.cash();
        if plan.is_empty() {
            let mut report = ExecutionReport::empty(cash_before);
            report.scale_factor = scale_factor;
            return Ok(report);
        }
        let cash_after = cash_before + net_cash_flow(&plan);
        if cash_after < -CASH_EPSILON {
            return Err(ExecutionError::NegativeCash { cash: cash_after });
        }
        // Sells before buys so a failed sell leaves no buy applied.
        let mut ordered: Vec<&Fill> = plan.iter().collect();
        ordered.sort_by_key(|f| f.delta > 0);
        for fill in ordered {
            holdings.apply_delta(&fill.ticker, fill.delta)?;
        }
        holdings.set_cash(cash_after.max(0.0));
        Ok(ExecutionReport {
            fills: plan,
            scale_factor,
            cash_before,
            cash_after: holdings.cash(),
        })
    }
}

/// Cash change from executing `plan`: sell proceeds minus buys minus costs.
fn net_cash_flow(plan: &[Fill]) -> f64 {
    plan.iter()
        .map(|f| -(f.delta as f64) * f.price - f.cost.total())
        .sum()
}

fn price_of(prices: &BTreeMap<String, f64>, ticker: &str) -> Result<f64, ExecutionError> {
    match prices.get(ticker) {
        None => Err(ExecutionError::MissingPrice {
            ticker: ticker.to_string(),
        }),
        Some(&p) if !p.is_finite() || p <= 0.0 => Err(ExecutionError::InvalidPrice {
            ticker: ticker.to_string(),
            price: p,
        }),
        Some(&p) => Ok(p),
    }
}
