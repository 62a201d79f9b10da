//! PitLab Core — point-in-time portfolio simulation engine.
//!
//! This crate contains the heart of the simulator:
//! - Domain types (holdings, rebalance events, equity points) and panels
//! - Day-by-day loop with FORCED / SCHEDULED / OPPORTUNISTIC triggers
//! - Point-in-time eligibility filtering with no lookahead
//! - Content-addressed factor cache with TTL and corruption-tolerant reads
//! - Membership policy with buffer, holding-period and turnover caps
//! - Cost-aware trade execution that never overdraws cash
//! - Collaborator traits for preselection and portfolio construction

pub mod components;
pub mod config;
pub mod data;
pub mod domain;
pub mod eligibility;
pub mod engine;
pub mod fingerprint;
pub mod membership;

pub use config::{ConfigurationError, PitSettings, RebalanceFrequency, SimulationConfig};
pub use engine::{SimulationError, SimulationResult, TemporalSimulationEngine};
