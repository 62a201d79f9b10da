//! Parameter sweeps over rebalance frequency × top_k × buffer_rank.
//!
//! Each variant gets its own engine and run state. All variants share one
//! `FactorValueCache`, so eligibility masks computed by one variant are hits
//! for the others.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use pitlab_core::data::{AssetPanel, FactorValueCache};
use pitlab_core::RebalanceFrequency;

use crate::config::{ConfigError, FileConfig};
use crate::runner::{run_simulation, RunError, SimulationReport};

/// Parameter grid specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepGrid {
    pub frequencies: Vec<RebalanceFrequency>,
    /// `None` keeps every candidate.
    pub top_ks: Vec<Option<u32>>,
    /// `None` leaves the base membership section untouched.
    pub buffer_ranks: Vec<Option<u32>>,
}

/// One point of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepVariant {
    pub frequency: RebalanceFrequency,
    pub top_k: Option<u32>,
    pub buffer_rank: Option<u32>,
}

impl SweepGrid {
    /// Returns the total number of variants in this grid.
    pub fn size(&self) -> usize {
        self.frequencies.len() * self.top_ks.len() * self.buffer_ranks.len()
    }

    /// All variants, frequency-major.
    pub fn variants(&self) -> Vec<SweepVariant> {
        let mut out = Vec::with_capacity(self.size());
        for &frequency in &self.frequencies {
            for &top_k in &self.top_ks {
                for &buffer_rank in &self.buffer_ranks {
                    out.push(SweepVariant {
                        frequency,
                        top_k,
                        buffer_rank,
                    });
                }
            }
        }
        out
    }
}

impl SweepVariant {
    /// The base config with this variant's parameters applied.
    ///
    /// A buffer rank turns the membership policy on.
    pub fn apply(&self, base: &FileConfig) -> FileConfig {
        let mut config = base.clone();
        config.simulation.frequency = self.frequency;
        config.preselection.top_k = self.top_k.map(i64::from);
        if let Some(rank) = self.buffer_rank {
            config.membership.enabled = true;
            config.membership.buffer_rank = Some(i64::from(rank));
        }
        config
    }
}

#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub variant: SweepVariant,
    pub report: SimulationReport,
}

/// Parameter sweep executor.
///
/// Runs every variant of a grid against the same panels, optionally in parallel.
pub struct ParamSweep {
    base: FileConfig,
    cache: Option<Arc<FactorValueCache>>,
    parallel: bool,
}

impl ParamSweep {
    /// Fails if the base config's `[cache]` section is invalid.
    pub fn new(base: FileConfig) -> Result<Self, ConfigError> {
        let cache = base.open_cache()?;
        Ok(Self {
            base,
            cache,
            parallel: true,
        })
    }

    /// Share `cache` across all variants instead of the base config's `[cache]`.
    pub fn with_cache(mut self, cache: Arc<FactorValueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Run every variant. Results come back in `grid.variants()` order;
    /// the first failing variant fails the sweep.
    pub fn run(
        &self,
        grid: &SweepGrid,
        prices: &AssetPanel,
        returns: &AssetPanel,
    ) -> Result<Vec<SweepOutcome>, RunError> {
        let variants = grid.variants();
        info!(variants = variants.len(), parallel = self.parallel, "sweep started");

        let run_one = |variant: &SweepVariant| -> Result<SweepOutcome, RunError> {
            let config = variant.apply(&self.base);
            let report = run_simulation(&config, prices, returns, self.cache.clone())?;
            Ok(SweepOutcome {
                variant: *variant,
                report,
            })
        };

        if self.parallel {
            variants.par_iter().map(run_one).collect()
        } else {
            variants.iter().map(run_one).collect()
        }
    }
}

/// Outcomes sorted by Sharpe ratio, best first.
pub fn rank_by_sharpe(outcomes: &[SweepOutcome]) -> Vec<&SweepOutcome> {
    let mut sorted: Vec<&SweepOutcome> = outcomes.iter().collect();
    sorted.sort_by(|a, b| b.report.metrics.sharpe.total_cmp(&a.report.metrics.sharpe));
    sorted
}
