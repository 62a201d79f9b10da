//! Domain types: holdings, rebalance events, equity points.

pub mod event;
pub mod holdings;

pub use event::{EquityPoint, RebalanceEvent, RebalanceTrigger};
pub use holdings::{HoldingsError, HoldingsState};
