//! Downlink/uplink scheduling with fairness metrics.
//!
//! Per-user throughput state is updated once per scheduling iteration, and a
//! fairness policy ranks users each time a resource-block group is handed out.

mod policy;
mod resources;
mod scheduler;
mod ue_info;

pub use policy::{
    pf_metric, rank_users, FairnessPolicy, MaxRate, PolicyKind, ProportionalFair, RoundRobin,
};
pub use resources::{Direction, ResourceQuantity};
pub use scheduler::{AllocationDecision, IterationResult, PfScheduler, Ranking};
pub use ue_info::{ewma, LinkState, UserSchedulingRecord};

use thiserror::Error;

use crate::amc::AmcError;

/// Errors raised by the DL/UL metric engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PfError {
    #[error("Symbol count must be non-zero when used as a divisor")]
    ZeroSymbols,
    #[error("Time window must be >= 1 iteration, got {0}")]
    InvalidTimeWindow(f64),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unknown fairness policy: {0}")]
    UnknownPolicy(String),
    #[error("User not attached: {0}")]
    UnknownUser(u16),
    #[error("User already attached: {0}")]
    UserAlreadyAttached(u16),
    #[error("Rate model failure for user {rnti}: {source}")]
    Amc { rnti: u16, source: AmcError },
}
