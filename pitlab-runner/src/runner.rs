//! Simulation runner — wires file config, engine, and metrics.
//!
//! Two entry points:
//! - `build_engine()`: file config → ready engine. Used by sweeps.
//! - `run_simulation()`: build, run, and summarize one configuration.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use pitlab_core::data::{AssetPanel, FactorValueCache};
use pitlab_core::{SimulationError, SimulationResult, TemporalSimulationEngine};

use crate::config::{ConfigError, FileConfig};
use crate::metrics::PerformanceMetrics;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub config_hash: String,
    pub config: FileConfig,
    pub metrics: PerformanceMetrics,
    pub result: SimulationResult,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Build an engine from a file config.
///
/// `cache` overrides the config's `[cache]` section; pass `None` to use it.
pub fn build_engine(
    config: &FileConfig,
    cache: Option<Arc<FactorValueCache>>,
) -> Result<TemporalSimulationEngine, RunError> {
    let mut builder = TemporalSimulationEngine::builder(config.simulation_config()?, config.strategy())
        .membership(config.membership_policy()?)
        .top_k(config.top_k()?)
        .constraints(config.constraints());
    if let Some(fallback) = config.fallback_strategy() {
        builder = builder.fallback_strategy(fallback);
    }
    if let Some(pre) = config.preselection() {
        builder = builder.preselection(pre);
    }
    let cache = match cache {
        Some(cache) => Some(cache),
        None => config.open_cache()?,
    };
    if let Some(cache) = cache {
        builder = builder.cache(cache);
    }
    Ok(builder.build()?)
}

/// Run one configuration against pre-loaded panels.
pub fn run_simulation(
    config: &FileConfig,
    prices: &AssetPanel,
    returns: &AssetPanel,
    cache: Option<Arc<FactorValueCache>>,
) -> Result<SimulationReport, RunError> {
    let config_hash = config.config_hash()?;
    let engine = build_engine(config, cache)?;
    let result = engine.run(prices, returns)?;
    let metrics = PerformanceMetrics::compute(&result, config.simulation.risk_free_rate);

    let short_hash = &config_hash[..12];
    info!(
        config_hash = %short_hash,
        total_return = metrics.total_return,
        sharpe = metrics.sharpe,
        rebalances = metrics.rebalance_count,
        "run complete"
    );

    Ok(SimulationReport {
        schema_version: SCHEMA_VERSION,
        config_hash,
        config: config.clone(),
        metrics,
        result,
    })
}
