//! Simulation configuration — immutable once built, validated at construction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of forward rows inspected for disappearing assets.
pub const DEFAULT_LIQUIDATION_WINDOW: usize = 5;

/// Default lookback window, in rows (one trading year).
pub const DEFAULT_LOOKBACK_ROWS: usize = 252;

/// Invalid simulation or policy configuration. Fatal at construction.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("start date {start} must be before end date {end}")]
    DateOrder { start: NaiveDate, end: NaiveDate },

    #[error("initial capital must be positive (got {0})")]
    NonPositiveCapital(f64),

    #[error("{field} must be non-negative (got {value})")]
    NegativeValue { field: &'static str, value: f64 },

    #[error("{field} must be in [0, 1) (got {value})")]
    FractionOutOfRange { field: &'static str, value: f64 },

    #[error("{field} must be at least 1")]
    ZeroLength { field: &'static str },

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// How often scheduled rebalances fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceFrequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

/// Point-in-time eligibility thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitSettings {
    pub enabled: bool,
    /// Calendar days since an asset's first observation.
    pub min_history_days: u32,
    /// Non-missing observations on or before the evaluation date.
    pub min_price_rows: u32,
}

impl PitSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_history_days: 1,
            min_price_rows: 1,
        }
    }

    pub fn enabled(min_history_days: u32, min_price_rows: u32) -> Self {
        Self {
            enabled: true,
            min_history_days,
            min_price_rows,
        }
    }
}

/// Complete, validated configuration of one simulation run.
///
/// Construct through [`SimulationConfig::builder`]; fields are read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationConfig {
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_capital: f64,
    frequency: RebalanceFrequency,
    /// Commission as a fraction of traded notional.
    commission_rate: f64,
    /// Minimum commission charged on any non-zero trade.
    commission_min: f64,
    slippage_bps: f64,
    /// Fraction of portfolio value held back from investment.
    cash_reserve: f64,
    lookback_rows: usize,
    pit: PitSettings,
    drift_threshold: Option<f64>,
    liquidation_window: usize,
}

impl SimulationConfig {
    pub fn builder(
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: f64,
    ) -> SimulationConfigBuilder {
        SimulationConfigBuilder {
            config: SimulationConfig {
                start_date,
                end_date,
                initial_capital,
                frequency: RebalanceFrequency::Monthly,
                commission_rate: 0.0,
                commission_min: 0.0,
                slippage_bps: 0.0,
                cash_reserve: 0.0,
                lookback_rows: DEFAULT_LOOKBACK_ROWS,
                pit: PitSettings::disabled(),
                drift_threshold: None,
                liquidation_window: DEFAULT_LIQUIDATION_WINDOW,
            },
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn frequency(&self) -> RebalanceFrequency {
        self.frequency
    }

    pub fn commission_rate(&self) -> f64 {
        self.commission_rate
    }

    pub fn commission_min(&self) -> f64 {
        self.commission_min
    }

    pub fn slippage_bps(&self) -> f64 {
        self.slippage_bps
    }

    pub fn cash_reserve(&self) -> f64 {
        self.cash_reserve
    }

    pub fn lookback_rows(&self) -> usize {
        self.lookback_rows
    }

    pub fn pit(&self) -> PitSettings {
        self.pit
    }

    pub fn drift_threshold(&self) -> Option<f64> {
        self.drift_threshold
    }

    pub fn liquidation_window(&self) -> usize {
        self.liquidation_window
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.start_date >= self.end_date {
            return Err(ConfigurationError::DateOrder {
                start: self.start_date,
                end: self.end_date,
            });
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(ConfigurationError::NonPositiveCapital(self.initial_capital));
        }
        for (field, value) in [
            ("commission_rate", self.commission_rate),
            ("commission_min", self.commission_min),
            ("slippage_bps", self.slippage_bps),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::NegativeValue { field, value });
            }
        }
        for (field, value) in [
            ("commission_rate", self.commission_rate),
            ("cash_reserve", self.cash_reserve),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ConfigurationError::FractionOutOfRange { field, value });
            }
        }
        if let Some(value) = self.drift_threshold {
            if value.is_nan() || value <= 0.0 || value >= 1.0 {
                return Err(ConfigurationError::FractionOutOfRange {
                    field: "drift_threshold",
                    value,
                });
            }
        }
        if self.lookback_rows == 0 {
            return Err(ConfigurationError::ZeroLength {
                field: "lookback_rows",
            });
        }
        if self.liquidation_window == 0 {
            return Err(ConfigurationError::ZeroLength {
                field: "liquidation_window",
            });
        }
        if self.pit.enabled {
            if self.pit.min_history_days == 0 {
                return Err(ConfigurationError::ZeroLength {
                    field: "min_history_days",
                });
            }
            if self.pit.min_price_rows == 0 {
                return Err(ConfigurationError::ZeroLength {
                    field: "min_price_rows",
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`SimulationConfig`]. `build()` validates.
#[derive(Debug, Clone)]
pub struct SimulationConfigBuilder {
    config: SimulationConfig,
}

impl SimulationConfigBuilder {
    pub fn frequency(mut self, frequency: RebalanceFrequency) -> Self {
        self.config.frequency = frequency;
        self
    }

    /// Commission as a fraction of notional, with a per-trade floor.
    pub fn commission(mut self, rate: f64, minimum: f64) -> Self {
        self.config.commission_rate = rate;
        self.config.commission_min = minimum;
        self
    }

    pub fn slippage_bps(mut self, bps: f64) -> Self {
        self.config.slippage_bps = bps;
        self
    }

    pub fn cash_reserve(mut self, fraction: f64) -> Self {
        self.config.cash_reserve = fraction;
        self
    }

    pub fn lookback_rows(mut self, rows: usize) -> Self {
        self.config.lookback_rows = rows;
        self
    }

    pub fn pit(mut self, pit: PitSettings) -> Self {
        self.config.pit = pit;
        self
    }

    /// Enable opportunistic rebalancing when any weight drifts past `threshold`.
    pub fn drift_threshold(mut self, threshold: Option<f64>) -> Self {
        self.config.drift_threshold = threshold;
        self
    }

    pub fn liquidation_window(mut self, rows: usize) -> Self {
        self.config.liquidation_window = rows;
        self
    }

    pub fn build(self) -> Result<SimulationConfig, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
