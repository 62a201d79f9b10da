//! Simulation engine — day-by-day loop and supporting infrastructure.
//!
//! The engine consumes a price panel (calendar and valuation) and a return
//! panel (eligibility, ranking, construction), then for each trading day
//! marks holdings to market and rebalances when a trigger fires.

pub mod error;
pub mod execution;
pub mod loop_runner;
pub mod schedule;
pub mod state;

pub use error::{RebalanceCause, RebalanceError, RebalanceStage, SimulationError};
pub use execution::{
    ExecutionError, ExecutionReport, Fill, ProportionalCostModel, TradeCost, TradeExecutor,
    TradeSide, TransactionCostModel,
};
pub use loop_runner::{EngineBuilder, TemporalSimulationEngine, COVERAGE_TOLERANCE_DAYS};
pub use schedule::is_due;
pub use state::{EngineState, SimulationResult};
