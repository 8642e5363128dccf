//! NR sidelink mode-2 scheduling: candidate selection, grants with
//! reselection counters, and the SAP traits the MAC talks through.

mod grant;
mod sap;
mod scheduler;
pub mod selection;
mod sfn;
mod types;

use thiserror::Error;

use crate::amc::AmcError;

pub use grant::{ConsumeOutcome, GrantInfo, GrantState, PeriodOutcome};
pub use sap::{SidelinkSchedProvider, SidelinkSchedUser, TriggerReport};
pub use scheduler::SidelinkScheduler;
pub use sfn::{SfnSf, MAX_NUMEROLOGY};
pub use types::{
    BufferStatusReport, LogicalChannelConfig, RlcPduInfo, SidelinkGrant, SlotAlloc, SlotInfo,
    TransmissionParams,
};

/// Errors raised by the sidelink scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SidelinkError {
    #[error("Unknown destination L2 id {0}")]
    UnknownDestination(u32),

    #[error("Unknown logical channel {lcid} for destination {dst_l2_id}")]
    UnknownLogicalChannel { dst_l2_id: u32, lcid: u8 },

    #[error("Invalid slot id: frame {frame} subframe {subframe} slot {slot} numerology {numerology}")]
    InvalidSlotId {
        frame: u32,
        subframe: u8,
        slot: u8,
        numerology: u8,
    },

    #[error("Subchannel size must be > 0")]
    ZeroSubchannelSize,

    #[error("Unsupported resource reservation interval {0} ms")]
    UnsupportedRri(i64),

    #[error("Invalid sidelink configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Amc(#[from] AmcError),
}
