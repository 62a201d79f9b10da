//! Collaborator traits — the capabilities the engine delegates to.
//!
//! - Preselection: ranks candidate assets at a rebalance date
//! - Portfolio strategy: turns a return window into target weights
//!
//! Plus one simple reference implementation of each.

pub mod preselection;
pub mod strategy;

pub use preselection::{MomentumPreselection, Preselection};
pub use strategy::{
    validate_weights, EqualWeight, PortfolioConstraints, PortfolioStrategy, StrategyError,
    WeightViolation,
};
