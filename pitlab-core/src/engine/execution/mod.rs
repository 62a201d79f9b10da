//! Execution — trade costs and the executor that applies trades to holdings.

pub mod cost_model;
pub mod executor;

pub use cost_model::{ProportionalCostModel, TradeCost, TradeSide, TransactionCostModel};
pub use executor::{ExecutionError, ExecutionReport, Fill, TradeExecutor};
