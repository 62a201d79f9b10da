//! PitLab Runner — simulation orchestration on top of `pitlab-core`.
//!
//! This crate provides:
//! - TOML run configuration with a deterministic config hash
//! - Single-run wiring from config to engine to metrics
//! - Performance metrics over the equity curve and rebalance log
//! - Parallel parameter sweeps sharing one factor cache
//! - JSON and CSV artifact export

pub mod config;
pub mod export;
pub mod metrics;
pub mod runner;
pub mod sweep;

pub use config::{ConfigError, FileConfig};
pub use metrics::PerformanceMetrics;
pub use runner::{build_engine, run_simulation, RunError, SimulationReport, SCHEMA_VERSION};
pub use sweep::{ParamSweep, SweepGrid, SweepOutcome, SweepVariant};
