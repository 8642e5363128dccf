//! Interfaces between the sidelink scheduler and the MAC around it.
//!
//! The MAC calls into the scheduler through [`SidelinkSchedProvider`]; the
//! scheduler hands grants back through a [`SidelinkSchedUser`] the MAC
//! passes in. Neither side holds a pointer to the other.

use super::sfn::SfnSf;
use super::types::{BufferStatusReport, SidelinkGrant, SlotInfo};
use super::SidelinkError;

/// Receiver of the grants produced by the scheduler.
pub trait SidelinkSchedUser {
    /// A new or re-armed grant for `dst_l2_id`.
    fn on_grant(&mut self, dst_l2_id: u32, grant: &SidelinkGrant);
}

/// Collects grants in the order they were produced.
impl SidelinkSchedUser for Vec<SidelinkGrant> {
    fn on_grant(&mut self, _dst_l2_id: u32, grant: &SidelinkGrant) {
        self.push(grant.clone());
    }
}

/// Summary of one scheduling trigger.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriggerReport {
    /// Destinations that received a new grant, in service order.
    pub granted: Vec<u32>,
    /// Destinations with data for which no eligible slot was found.
    pub starved: Vec<u32>,
    /// Destinations skipped because every HARQ process id was taken.
    pub harq_unavailable: Vec<u32>,
    /// Destinations whose selection raised an error; the others still ran.
    pub failed: Vec<(u32, SidelinkError)>,
}

/// Notifications the MAC sends to the scheduler.
pub trait SidelinkSchedProvider {
    /// Replace the queue state of one logical channel.
    fn notify_buffer_status(&mut self, report: &BufferStatusReport) -> Result<(), SidelinkError>;

    /// `size` bytes of a logical channel were handed to the PHY.
    fn notify_pdu_dequeue(&mut self, dst_l2_id: u32, lcid: u8, size: u32)
        -> Result<(), SidelinkError>;

    /// Candidate slots for the next selection; replaces the previous set.
    fn provide_slot_info(&mut self, slots: Vec<SlotInfo>);

    /// Run candidate selection for every destination that needs a grant.
    ///
    /// `harq_ids` lists the HARQ processes the MAC currently has free. A
    /// destination that fails is listed in [`TriggerReport::failed`].
    fn trigger<U: SidelinkSchedUser>(&mut self, now: SfnSf, harq_ids: &[u8], user: &mut U)
        -> TriggerReport;

    /// Advance to `now`: handle period boundaries and release finished grants.
    fn slot_indication<U: SidelinkSchedUser>(&mut self, now: SfnSf, harq_ids: &[u8], user: &mut U);
}
