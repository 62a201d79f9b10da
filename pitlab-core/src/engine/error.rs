//! Simulation error taxonomy.

use crate::components::strategy::{StrategyError, WeightViolation};
use crate::config::ConfigurationError;
use crate::eligibility::EligibilityError;
use crate::engine::execution::ExecutionError;
use crate::membership::MembershipError;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

/// Stage of a rebalance that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceStage {
    Eligibility,
    Membership,
    Strategy,
    Execution,
}

impl fmt::Display for RebalanceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Eligibility => "eligibility",
            Self::Membership => "membership",
            Self::Strategy => "strategy",
            Self::Execution => "execution",
        };
        f.write_str(name)
    }
}

/// Root cause of a failed rebalance.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RebalanceCause {
    #[error(transparent)]
    Eligibility(#[from] EligibilityError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl RebalanceCause {
    pub fn stage(&self) -> RebalanceStage {
        match self {
            Self::Eligibility(_) => RebalanceStage::Eligibility,
            Self::Membership(_) => RebalanceStage::Membership,
            Self::Strategy(_) => RebalanceStage::Strategy,
            Self::Execution(_) => RebalanceStage::Execution,
        }
    }
}

/// A single rebalance step failed; the run aborts.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("rebalance on {date} failed during {kind}: {source}")]
pub struct RebalanceError {
    pub date: NaiveDate,
    pub kind: RebalanceStage,
    #[source]
    pub source: RebalanceCause,
}

impl RebalanceError {
    pub fn new(date: NaiveDate, cause: impl Into<RebalanceCause>) -> Self {
        let source = cause.into();
        Self {
            date,
            kind: source.stage(),
            source,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(
        "data {data_start:?}..={data_end:?} does not cover the window {start}..={end}"
    )]
    InsufficientHistory {
        start: NaiveDate,
        end: NaiveDate,
        data_start: Option<NaiveDate>,
        data_end: Option<NaiveDate>,
    },

    #[error(transparent)]
    Rebalance(#[from] RebalanceError),

    #[error("strategy {strategy} produced invalid weights on {date}: {violation}")]
    ConstraintViolation {
        date: NaiveDate,
        strategy: String,
        #[source]
        violation: WeightViolation,
    },
}
