//! Day-by-day simulation loop.
//!
//! Each trading day:
//! 1. Carry forward last valid prices
//! 2. Decide the trigger: FORCED (first allocation), SCHEDULED, OPPORTUNISTIC
//! 3. On a trigger: liquidate disappearing assets, filter eligibility, rank,
//!    apply membership rules, construct weights, execute
//! 4. Record the end-of-day equity value

use crate::components::preselection::Preselection;
use crate::components::strategy::{validate_weights, PortfolioConstraints, PortfolioStrategy};
use crate::config::{ConfigurationError, SimulationConfig};
use crate::data::cache::FactorValueCache;
use crate::data::panel::AssetPanel;
use crate::domain::{EquityPoint, RebalanceEvent, RebalanceTrigger};
use crate::eligibility::EligibilityFilter;
use crate::engine::execution::{
    ExecutionReport, ProportionalCostModel, TradeExecutor, TransactionCostModel,
};
use crate::membership::{self, CandidateRanking, MembershipPolicy};

use super::error::{RebalanceCause, RebalanceError, SimulationError};
use super::schedule::is_due;
use super::state::{EngineState, SimulationResult};

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Calendar days the data may start after `start` (or end before `end`)
/// and still count as covering the window. Absorbs holidays at the edges.
pub const COVERAGE_TOLERANCE_DAYS: i64 = 5;

/// The simulation engine: collaborators plus configuration, no run state.
///
/// `run` may be called any number of times; each call owns its own state.
#[derive(Clone)]
pub struct TemporalSimulationEngine {
    config: SimulationConfig,
    strategy: Arc<dyn PortfolioStrategy>,
    fallback: Option<Arc<dyn PortfolioStrategy>>,
    preselection: Option<Arc<dyn Preselection>>,
    membership: MembershipPolicy,
    top_k: Option<usize>,
    constraints: PortfolioConstraints,
    asset_classes: Option<BTreeMap<String, String>>,
    eligibility: EligibilityFilter,
    executor: TradeExecutor,
}

impl std::fmt::Debug for TemporalSimulationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalSimulationEngine")
            .field("config", &self.config)
            .field("strategy", &self.strategy.name())
            .field("membership", &self.membership)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TemporalSimulationEngine`].
pub struct EngineBuilder {
    config: SimulationConfig,
    strategy: Arc<dyn PortfolioStrategy>,
    fallback: Option<Arc<dyn PortfolioStrategy>>,
    preselection: Option<Arc<dyn Preselection>>,
    membership: MembershipPolicy,
    top_k: Option<usize>,
    constraints: PortfolioConstraints,
    asset_classes: Option<BTreeMap<String, String>>,
    cache: Option<Arc<FactorValueCache>>,
    cost_model: Option<Arc<dyn TransactionCostModel>>,
}

impl EngineBuilder {
    pub fn fallback_strategy(mut self, strategy: Arc<dyn PortfolioStrategy>) -> Self {
        self.fallback = Some(strategy);
        self
    }

    pub fn preselection(mut self, preselection: Arc<dyn Preselection>) -> Self {
        self.preselection = Some(preselection);
        self
    }

    pub fn membership(mut self, policy: MembershipPolicy) -> Self {
        self.membership = policy;
        self
    }

    /// Number of top-ranked assets targeted; `None` takes every candidate.
    pub fn top_k(mut self, top_k: Option<usize>) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn constraints(mut self, constraints: PortfolioConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn asset_classes(mut self, classes: BTreeMap<String, String>) -> Self {
        self.asset_classes = Some(classes);
        self
    }

    /// Back eligibility computation with a shared cache.
    pub fn cache(mut self, cache: Arc<FactorValueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the proportional cost model derived from the config.
    pub fn cost_model(mut self, model: Arc<dyn TransactionCostModel>) -> Self {
        self.cost_model = Some(model);
        self
    }

    pub fn build(self) -> Result<TemporalSimulationEngine, SimulationError> {
        self.membership
            .validate()
            .map_err(|e| ConfigurationError::Invalid {
                field: "membership",
                reason: e.to_string(),
            })?;
        if self.top_k == Some(0) {
            return Err(ConfigurationError::ZeroLength { field: "top_k" }.into());
        }
        if let Some(max) = self.constraints.max_weight {
            if max.is_nan() || max <= 0.0 || max > 1.0 {
                return Err(ConfigurationError::Invalid {
                    field: "max_weight",
                    reason: format!("must be in (0, 1], got {max}"),
                }
                .into());
            }
        }
        if let Some(t) = self.membership.max_turnover.filter(|_| self.membership.enabled) {
            warn!(max_turnover = t, "max_turnover is validated but not enforced");
        }

        let cost_model = self.cost_model.unwrap_or_else(|| {
            Arc::new(ProportionalCostModel::new(
                self.config.commission_rate(),
                self.config.commission_min(),
                self.config.slippage_bps(),
            ))
        });
        let executor = TradeExecutor::new(cost_model, self.config.cash_reserve());
        let eligibility = match self.cache {
            Some(cache) => EligibilityFilter::cached(cache),
            None => EligibilityFilter::uncached(),
        };

        Ok(TemporalSimulationEngine {
            config: self.config,
            strategy: self.strategy,
            fallback: self.fallback,
            preselection: self.preselection,
            membership: self.membership,
            top_k: self.top_k,
            constraints: self.constraints,
            asset_classes: self.asset_classes,
            eligibility,
            executor,
        })
    }
}

impl TemporalSimulationEngine {
    pub fn builder(config: SimulationConfig, strategy: Arc<dyn PortfolioStrategy>) -> EngineBuilder {
        EngineBuilder {
            config,
            strategy,
            fallback: None,
            preselection: None,
            membership: MembershipPolicy::disabled(),
            top_k: None,
            constraints: PortfolioConstraints::default(),
            asset_classes: None,
            cache: None,
            cost_model: None,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Simulate every price date in `[start, end]`.
    ///
    /// `prices` drives the calendar and valuation; `returns` feeds eligibility,
    /// ranking and construction and may begin before `start` for lookback.
    pub fn run(
        &self,
        prices: &AssetPanel,
        returns: &AssetPanel,
    ) -> Result<SimulationResult, SimulationError> {
        let start = self.config.start_date();
        let end = self.config.end_date();
        self.check_coverage(prices, returns)?;

        let dates = prices.dates();
        let first_row = dates.partition_point(|d| *d < start);
        let last_row = prices.rows_through(end);

        info!(
            %start,
            %end,
            days = last_row - first_row,
            assets = prices.n_assets(),
            strategy = self.strategy.name(),
            "simulation started"
        );

        let mut state = EngineState::new(self.config.initial_capital());
        for row in first_row..last_row {
            let date = dates[row];
            state.update_prices(prices, row);

            if let Some(trigger) = self.trigger_for(&state, date, returns) {
                let event = self.rebalance(&mut state, prices, returns, row, date, trigger)?;
                state.events.push(event);
            }

            let equity = state.equity();
            state.equity_curve.push(EquityPoint { date, equity });
        }

        info!(
            events = state.events.len(),
            final_equity = state.equity(),
            "simulation finished"
        );

        Ok(SimulationResult {
            equity_curve: state.equity_curve,
            events: state.events,
            final_holdings: state.holdings,
        })
    }

    fn check_coverage(&self, prices: &AssetPanel, returns: &AssetPanel) -> Result<(), SimulationError> {
        let start = self.config.start_date();
        let end = self.config.end_date();
        let insufficient = || SimulationError::InsufficientHistory {
            start,
            end,
            data_start: prices.first_date(),
            data_end: prices.last_date(),
        };
        let (Some(first), Some(last)) = (prices.first_date(), prices.last_date()) else {
            return Err(insufficient());
        };
        let tolerance = Duration::days(COVERAGE_TOLERANCE_DAYS);
        if first > start + tolerance || last < end - tolerance {
            return Err(insufficient());
        }
        if returns.is_empty() || prices.n_assets() == 0 {
            return Err(insufficient());
        }
        Ok(())
    }

    fn trigger_for(
        &self,
        state: &EngineState,
        date: NaiveDate,
        returns: &AssetPanel,
    ) -> Option<RebalanceTrigger> {
        let Some(last) = state.last_rebalance else {
            let history = returns.rows_through(date);
            return (history >= self.strategy.min_history_rows().max(1))
                .then_some(RebalanceTrigger::Forced);
        };
        if is_due(self.config.frequency(), last, date) {
            return Some(RebalanceTrigger::Scheduled);
        }
        let threshold = self.config.drift_threshold()?;
        let invested = 1.0 - self.config.cash_reserve();
        (date > last && state.max_drift(invested) > threshold)
            .then_some(RebalanceTrigger::Opportunistic)
    }

    /// Assets whose every row in `(row, row + window]` is missing, given at
    /// least one such row exists.
    ///
    /// This reads ahead of `row` and is used only to force liquidation,
    /// never to allocate.
    fn disappearing_assets(&self, prices: &AssetPanel, row: usize) -> BTreeSet<String> {
        let horizon = (row + self.config.liquidation_window()).min(prices.n_rows().saturating_sub(1));
        if horizon <= row {
            return BTreeSet::new();
        }
        prices
            .assets()
            .iter()
            .enumerate()
            .filter(|(j, _)| (row + 1..=horizon).all(|i| prices.get_finite(i, *j).is_none()))
            .map(|(_, a)| a.clone())
            .collect()
    }

    fn rebalance(
        &self,
        state: &mut EngineState,
        prices: &AssetPanel,
        returns: &AssetPanel,
        row: usize,
        date: NaiveDate,
        trigger: RebalanceTrigger,
    ) -> Result<RebalanceEvent, SimulationError> {
        let fail = |cause: RebalanceCause| SimulationError::from(RebalanceError::new(date, cause));
        let value_before = state.equity();

        // 1. Forced liquidation of assets whose data is about to vanish.
        let disappearing = self.disappearing_assets(prices, row);
        let to_liquidate: Vec<String> = state
            .holdings
            .tickers()
            .into_iter()
            .filter(|t| disappearing.contains(t))
            .collect();
        let liquidation = self
            .executor
            .liquidate(&mut state.holdings, &to_liquidate, &state.last_prices)
            .map_err(|e| fail(e.into()))?;
        if !to_liquidate.is_empty() {
            warn!(%date, assets = ?to_liquidate, "force-liquidating disappearing assets");
        }

        // 2. Lookback window: rows on or before `date` only.
        let visible = returns.rows_through(date);
        let window = if visible == 0 {
            returns.truncate_through(date)
        } else {
            returns.window_ending_at(visible - 1, self.config.lookback_rows())
        };

        // 3. Candidates: priced today, present in returns, not disappearing.
        let mut candidates: Vec<String> = prices
            .assets()
            .iter()
            .enumerate()
            .filter(|(j, a)| {
                prices.get_finite(row, *j).is_some_and(|p| p > 0.0)
                    && returns.asset_index(a).is_some()
                    && !disappearing.contains(*a)
            })
            .map(|(_, a)| a.clone())
            .collect();

        let pit = self.config.pit();
        if pit.enabled {
            let mask = self
                .eligibility
                .compute(returns, date, pit.min_history_days, pit.min_price_rows)
                .map_err(|e| fail(e.into()))?;
            candidates.retain(|a| mask.is_eligible(a));
        }

        // 4. Ranking.
        let ranked: Vec<String> = match &self.preselection {
            Some(pre) => {
                let allowed: BTreeSet<&String> = candidates.iter().collect();
                pre.select_assets(&window.select_assets(&candidates), date)
                    .into_iter()
                    .filter(|a| allowed.contains(a))
                    .collect()
            }
            None => {
                let mut sorted = candidates.clone();
                sorted.sort();
                sorted
            }
        };
        let ranks: CandidateRanking = ranked
            .iter()
            .enumerate()
            .map(|(i, a)| (a.clone(), i + 1))
            .collect();

        // 5. Membership.
        let held: BTreeSet<String> = state.holdings.positions().keys().cloned().collect();
        let top_k = self.top_k.unwrap_or(ranks.len());
        let selected = membership::apply(
            &held,
            &ranks,
            &self.membership,
            Some(state.membership.holding_periods()),
            top_k,
        )
        .map_err(|e| fail(e.into()))?;
        let selected_set: BTreeSet<String> = selected.iter().cloned().collect();

        // 6. Target weights.
        let targets = if selected.is_empty() {
            BTreeMap::new()
        } else {
            self.construct_weights(&window.select_assets(&selected), &selected_set, date)?
        };

        // 7. Execution.
        let execution = self
            .executor
            .rebalance(&mut state.holdings, &targets, &state.last_prices)
            .map_err(|e| fail(e.into()))?;

        state.membership.record_rebalance(state.holdings.positions().keys());
        state.last_rebalance = Some(date);
        state.last_targets = targets.clone();

        let event = build_event(
            date,
            trigger,
            &liquidation,
            &execution,
            value_before,
            state.equity(),
            to_liquidate,
            targets,
        );
        debug!(
            %date,
            trigger = ?event.trigger,
            assets = selected.len(),
            trades = event.trades.len(),
            cost = event.total_cost,
            scale = event.scale_factor,
            "rebalanced"
        );
        Ok(event)
    }

    fn construct_weights(
        &self,
        window: &AssetPanel,
        selected: &BTreeSet<String>,
        date: NaiveDate,
    ) -> Result<BTreeMap<String, f64>, SimulationError> {
        let weights = self
            .strategy
            .construct(window, &self.constraints, self.asset_classes.as_ref())
            .map_err(|e| SimulationError::from(RebalanceError::new(date, e)))?;
        let violation = match validate_weights(&weights, selected, &self.constraints) {
            Ok(()) => return Ok(weights),
            Err(v) => v,
        };

        let Some(fallback) = &self.fallback else {
            return Err(SimulationError::ConstraintViolation {
                date,
                strategy: self.strategy.name().to_string(),
                violation,
            });
        };
        warn!(
            %date,
            strategy = self.strategy.name(),
            fallback = fallback.name(),
            %violation,
            "invalid weights; using fallback strategy"
        );
        let weights = fallback
            .construct(window, &self.constraints, self.asset_classes.as_ref())
            .map_err(|e| SimulationError::from(RebalanceError::new(date, e)))?;
        validate_weights(&weights, selected, &self.constraints).map_err(|violation| {
            SimulationError::ConstraintViolation {
                date,
                strategy: fallback.name().to_string(),
                violation,
            }
        })?;
        Ok(weights)
    }
}

#[allow(clippy::too_many_arguments)]
fn build_event(
    date: NaiveDate,
    trigger: RebalanceTrigger,
    liquidation: &ExecutionReport,
    execution: &ExecutionReport,
    value_before: f64,
    value_after: f64,
    liquidated: Vec<String>,
    target_weights: BTreeMap<String, f64>,
) -> RebalanceEvent {
    let mut trades = liquidation.trades();
    for (ticker, delta) in execution.trades() {
        *trades.entry(ticker).or_insert(0) += delta;
    }
    trades.retain(|_, d| *d != 0);
    RebalanceEvent {
        date,
        trigger,
        trades,
        total_cost: liquidation.total_cost() + execution.total_cost(),
        traded_notional: liquidation.traded_notional() + execution.traded_notional(),
        value_before,
        value_after,
        cash_before: liquidation.cash_before,
        cash_after: execution.cash_after,
        liquidated,
        scale_factor: execution.scale_factor,
        target_weights,
    }
}
