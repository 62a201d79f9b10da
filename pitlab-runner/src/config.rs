//! TOML run configuration.
//!
//! A file config mirrors the engine's knobs section by section:
//!
//! ```toml
//! [simulation]
//! start_date = "2020-01-01"
//! end_date = "2020-12-31"
//! initial_capital = 100000.0
//! frequency = "MONTHLY"
//!
//! [pit]
//! enabled = true
//! min_history_days = 252
//! min_price_rows = 200
//!
//! [costs]
//! commission_rate = 0.0005
//!
//! [membership]
//! enabled = true
//! buffer_rank = 15
//! min_holding_periods = 2
//!
//! [cache]
//! root = ".pitlab-cache"
//! max_age_days = 30
//!
//! [strategy]
//! kind = "equal_weight"
//!
//! [preselection]
//! kind = "momentum"
//! lookback_rows = 126
//! top_k = 10
//! ```
//!
//! Every section except `[simulation]` is optional. Parsing only checks shape;
//! the `*_config`/`*_policy` accessors convert into validated engine types.

use chrono::NaiveDate;
use pitlab_core::components::{
    EqualWeight, MomentumPreselection, PortfolioConstraints, PortfolioStrategy, Preselection,
};
use pitlab_core::config::{DEFAULT_LIQUIDATION_WINDOW, DEFAULT_LOOKBACK_ROWS};
use pitlab_core::data::FactorValueCache;
use pitlab_core::membership::MembershipPolicy;
use pitlab_core::{ConfigurationError, PitSettings, RebalanceFrequency, SimulationConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors from loading or converting a file config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} must be non-negative (got {value})")]
    Negative { field: &'static str, value: i64 },
    #[error("{field} is out of range (got {value})")]
    OutOfRange { field: &'static str, value: i64 },
    #[error(transparent)]
    Simulation(#[from] ConfigurationError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Complete run configuration as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub simulation: SimulationSection,
    #[serde(default)]
    pub pit: PitSection,
    #[serde(default)]
    pub costs: CostsSection,
    #[serde(default)]
    pub membership: MembershipSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub strategy: StrategySection,
    #[serde(default)]
    pub preselection: PreselectionSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationSection {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    #[serde(default = "default_frequency")]
    pub frequency: RebalanceFrequency,
    #[serde(default)]
    pub cash_reserve: f64,
    #[serde(default = "default_lookback_rows")]
    pub lookback_rows: usize,
    #[serde(default)]
    pub drift_threshold: Option<f64>,
    #[serde(default = "default_liquidation_window")]
    pub liquidation_window: usize,
    /// Annual rate used by Sharpe and Sortino.
    #[serde(default)]
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PitSection {
    pub enabled: bool,
    pub min_history_days: u32,
    pub min_price_rows: u32,
}

impl Default for PitSection {
    fn default() -> Self {
        let off = PitSettings::disabled();
        Self {
            enabled: off.enabled,
            min_history_days: off.min_history_days,
            min_price_rows: off.min_price_rows,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CostsSection {
    pub commission_rate: f64,
    pub commission_min: f64,
    pub slippage_bps: f64,
}

/// Membership knobs. Counts are signed here so a negative value is reported
/// by name instead of as a TOML type error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MembershipSection {
    pub enabled: bool,
    pub buffer_rank: Option<i64>,
    pub min_holding_periods: i64,
    pub max_turnover: Option<f64>,
    pub max_new_assets: Option<i64>,
    pub max_removed_assets: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// Cache directory; no root means no caching.
    pub root: Option<PathBuf>,
    pub max_age_days: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    EqualWeight,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategySection {
    pub kind: StrategyKind,
    pub fallback: Option<StrategyKind>,
    pub max_weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreselectionKind {
    /// Every candidate, ranked by asset id.
    #[default]
    None,
    /// Trailing compounded return, best first.
    Momentum,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreselectionSection {
    pub kind: PreselectionKind,
    pub lookback_rows: Option<usize>,
    pub top_k: Option<i64>,
}

fn default_frequency() -> RebalanceFrequency {
    RebalanceFrequency::Monthly
}

fn default_lookback_rows() -> usize {
    DEFAULT_LOOKBACK_ROWS
}

fn default_liquidation_window() -> usize {
    DEFAULT_LIQUIDATION_WINDOW
}

impl FileConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Deterministic identity of this configuration.
    ///
    /// BLAKE3 over the JSON serialization: identical configs share a hash,
    /// any changed field changes it.
    pub fn config_hash(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn simulation_config(&self) -> Result<SimulationConfig, ConfigError> {
        let s = &self.simulation;
        let pit = if self.pit.enabled {
            PitSettings::enabled(self.pit.min_history_days, self.pit.min_price_rows)
        } else {
            PitSettings::disabled()
        };
        Ok(
            SimulationConfig::builder(s.start_date, s.end_date, s.initial_capital)
                .frequency(s.frequency)
                .commission(self.costs.commission_rate, self.costs.commission_min)
                .slippage_bps(self.costs.slippage_bps)
                .cash_reserve(s.cash_reserve)
                .lookback_rows(s.lookback_rows)
                .pit(pit)
                .drift_threshold(s.drift_threshold)
                .liquidation_window(s.liquidation_window)
                .build()?,
        )
    }

    pub fn membership_policy(&self) -> Result<MembershipPolicy, ConfigError> {
        let m = &self.membership;
        let policy = MembershipPolicy {
            enabled: m.enabled,
            buffer_rank: optional_count("membership.buffer_rank", m.buffer_rank)?,
            min_holding_periods: count("membership.min_holding_periods", m.min_holding_periods)?,
            max_turnover: m.max_turnover,
            max_new_assets: optional_count("membership.max_new_assets", m.max_new_assets)?,
            max_removed_assets: optional_count(
                "membership.max_removed_assets",
                m.max_removed_assets,
            )?,
        };
        policy
            .validate()
            .map_err(|e| ConfigurationError::Invalid {
                field: "membership",
                reason: e.to_string(),
            })?;
        Ok(policy)
    }

    pub fn top_k(&self) -> Result<Option<usize>, ConfigError> {
        optional_count("preselection.top_k", self.preselection.top_k)
    }

    pub fn constraints(&self) -> PortfolioConstraints {
        PortfolioConstraints {
            max_weight: self.strategy.max_weight,
        }
    }

    pub fn strategy(&self) -> Arc<dyn PortfolioStrategy> {
        strategy_for(self.strategy.kind)
    }

    pub fn fallback_strategy(&self) -> Option<Arc<dyn PortfolioStrategy>> {
        self.strategy.fallback.map(strategy_for)
    }

    pub fn preselection(&self) -> Option<Arc<dyn Preselection>> {
        match self.preselection.kind {
            PreselectionKind::None => None,
            PreselectionKind::Momentum => Some(Arc::new(MomentumPreselection::new(
                self.preselection.lookback_rows,
            ))),
        }
    }

    /// Open the configured cache, if any.
    pub fn open_cache(&self) -> Result<Option<Arc<FactorValueCache>>, ConfigError> {
        let Some(root) = self.cache.root.as_ref() else {
            return Ok(None);
        };
        let cache = FactorValueCache::new(root);
        let cache = match self.cache.max_age_days {
            Some(days) => cache.with_max_age_days(max_age_days(days)?),
            None => cache,
        };
        Ok(Some(Arc::new(cache)))
    }
}

fn strategy_for(kind: StrategyKind) -> Arc<dyn PortfolioStrategy> {
    match kind {
        StrategyKind::EqualWeight => Arc::new(EqualWeight),
    }
}

fn count<T: TryFrom<i64>>(field: &'static str, value: i64) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::Negative { field, value })
}

fn max_age_days(value: i64) -> Result<u32, ConfigError> {
    const FIELD: &str = "cache.max_age_days";
    if value < 0 {
        return Err(ConfigError::Negative { field: FIELD, value });
    }
    u32::try_from(value).map_err(|_| ConfigError::OutOfRange { field: FIELD, value })
}

fn optional_count<T: TryFrom<i64>>(
    field: &'static str,
    value: Option<i64>,
) -> Result<Option<T>, ConfigError> {
    value.map(|v| count(field, v)).transpose()
}
