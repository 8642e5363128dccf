//! Per-destination grant state and its transitions.

use chrono::Duration;
use std::fmt;

use super::sfn::SfnSf;
use super::types::{SidelinkGrant, SlotAlloc, TransmissionParams};

/// Lifecycle of a destination's grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrantState {
    /// No reservation; the destination waits for candidate selection.
    Unscheduled,
    /// Searching the selection window.
    CandidateSelection,
    /// Slots reserved; transmissions in progress.
    ActiveGrant,
    /// All transmissions of the current TB are done.
    ExhaustedReselecting,
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GrantState::Unscheduled => "Unscheduled",
            GrantState::CandidateSelection => "CandidateSelection",
            GrantState::ActiveGrant => "ActiveGrant",
            GrantState::ExhaustedReselecting => "ExhaustedReselecting",
        };
        write!(f, "{}", name)
    }
}

/// Result of trying to transmit on one slot.
#[derive(Clone, Debug, PartialEq)]
pub enum ConsumeOutcome {
    /// The slot was used; carries the allocation and the transmission count.
    Transmitted { alloc: SlotAlloc, tb_tx_counter: u8 },
    /// The grant has no allocation in this slot.
    NoAllocation,
    /// The TB already went out the maximum number of times.
    Exhausted,
}

/// What a reservation-period boundary did to an SPS grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeriodOutcome {
    /// Pattern shifted to the next period.
    Rearmed,
    /// Reselection counter hit zero; the caller decides to keep or drop.
    CounterExpired,
}

/// Grant state owned by the scheduler for one destination.
#[derive(Clone, Debug, PartialEq)]
pub struct GrantInfo {
    pub dst_l2_id: u32,
    pub state: GrantState,
    /// Periods left before the reservation must be reselected regardless of keep.
    pub c_resel_counter: u16,
    pub sl_reso_resel_counter: u8,
    /// Counter drawn at selection, restored when the reservation is kept.
    pub prev_sl_reso_resel_counter: u8,
    pub harq_id: u8,
    pub n_selected: u8,
    pub tb_tx_counter: u8,
    /// Transmissions allowed per TB for this flow's priority.
    pub max_tx: u8,
    pub is_dynamic: bool,
    pub rri: Duration,
    /// Reservation period in slots, zero for dynamic grants.
    pub rri_slots: u64,
    /// First slot of the next period's pattern.
    pub next_period_start: u64,
    /// Bytes of RLC data per TB.
    pub tb_size: u32,
    /// Remaining allocations of the current period, ascending.
    pub slot_allocations: Vec<SlotAlloc>,
    /// Parameters the selection ran with.
    pub params: Option<TransmissionParams>,
    /// Allocations of the current period as selected.
    pattern: Vec<SlotAlloc>,
}

impl GrantInfo {
    /// Grant for one TB that is released once transmitted.
    pub fn dynamic(dst_l2_id: u32, harq_id: u8, max_tx: u8, allocs: Vec<SlotAlloc>) -> Self {
        Self::build(dst_l2_id, harq_id, max_tx, allocs, true, Duration::zero(), 0, 0)
    }

    /// Periodic reservation over `rri_slots`, valid for `resel_counter`
    /// periods before reselection.
    #[allow(clippy::too_many_arguments)]
    pub fn sps(
        dst_l2_id: u32,
        harq_id: u8,
        max_tx: u8,
        allocs: Vec<SlotAlloc>,
        rri: Duration,
        rri_slots: u64,
        resel_counter: u8,
    ) -> Self {
        Self::build(
            dst_l2_id,
            harq_id,
            max_tx,
            allocs,
            false,
            rri,
            rri_slots,
            resel_counter,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        dst_l2_id: u32,
        harq_id: u8,
        max_tx: u8,
        mut allocs: Vec<SlotAlloc>,
        is_dynamic: bool,
        rri: Duration,
        rri_slots: u64,
        resel_counter: u8,
    ) -> Self {
        allocs.sort_by(|a, b| a.sfn.cmp(&b.sfn));
        let next_period_start = allocs
            .first()
            .map(|a| a.sfn.normalize() + rri_slots)
            .unwrap_or(0);
        let state = if allocs.is_empty() {
            GrantState::Unscheduled
        } else {
            GrantState::ActiveGrant
        };
        Self {
            dst_l2_id,
            state,
            c_resel_counter: resel_counter as u16 * 10,
            sl_reso_resel_counter: resel_counter,
            prev_sl_reso_resel_counter: resel_counter,
            harq_id,
            n_selected: allocs.len() as u8,
            tb_tx_counter: 0,
            max_tx,
            is_dynamic,
            rri,
            rri_slots,
            next_period_start,
            tb_size: allocs.first().map(SlotAlloc::tb_bytes).unwrap_or(0),
            pattern: allocs.clone(),
            slot_allocations: allocs,
            params: None,
        }
    }

    pub fn with_params(mut self, params: TransmissionParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn is_active(&self) -> bool {
        self.state == GrantState::ActiveGrant
    }

    /// Whether any pending allocation falls in `sfn`.
    pub fn uses_slot(&self, sfn: &SfnSf) -> bool {
        self.slot_allocations.iter().any(|a| a.sfn == *sfn)
    }

    /// Transmit on `sfn` if the grant has an allocation there.
    ///
    /// Allocations before `sfn` are dropped as missed. A TB that already
    /// reached the maximum transmission count is never sent again.
    pub fn consume_slot(&mut self, sfn: SfnSf) -> ConsumeOutcome {
        if self.state != GrantState::ActiveGrant {
            return if self.state == GrantState::ExhaustedReselecting {
                ConsumeOutcome::Exhausted
            } else {
                ConsumeOutcome::NoAllocation
            };
        }
        if self.tb_tx_counter >= self.max_tx {
            self.state = GrantState::ExhaustedReselecting;
            return ConsumeOutcome::Exhausted;
        }

        self.slot_allocations.retain(|a| a.sfn >= sfn);
        let outcome = match self.slot_allocations.first() {
            Some(first) if first.sfn == sfn => {
                let alloc = self.slot_allocations.remove(0);
                self.tb_tx_counter = if alloc.ndi { 1 } else { self.tb_tx_counter + 1 };
                ConsumeOutcome::Transmitted {
                    alloc,
                    tb_tx_counter: self.tb_tx_counter,
                }
            }
            _ => ConsumeOutcome::NoAllocation,
        };

        if self.tb_tx_counter >= self.max_tx || self.slot_allocations.is_empty() {
            self.state = GrantState::ExhaustedReselecting;
        }
        outcome
    }

    /// Handle reaching the start of the next reservation period.
    ///
    /// Both counters step down by one. While the reselection counter is
    /// non-zero the pattern is reused shifted by one period.
    pub fn period_boundary(&mut self) -> PeriodOutcome {
        self.sl_reso_resel_counter = self.sl_reso_resel_counter.saturating_sub(1);
        self.c_resel_counter = self.c_resel_counter.saturating_sub(1);
        if self.sl_reso_resel_counter == 0 {
            return PeriodOutcome::CounterExpired;
        }
        self.rearm();
        PeriodOutcome::Rearmed
    }

    /// Keep the reservation after the counter expired.
    pub fn keep_reservation(&mut self) {
        self.sl_reso_resel_counter = self.prev_sl_reso_resel_counter;
        self.rearm();
    }

    fn rearm(&mut self) {
        for alloc in &mut self.pattern {
            alloc.sfn.add(self.rri_slots);
        }
        self.slot_allocations = self.pattern.clone();
        self.next_period_start += self.rri_slots;
        self.tb_tx_counter = 0;
        self.state = GrantState::ActiveGrant;
    }

    /// The grant as handed to the transmission pipeline.
    pub fn to_grant(&self) -> SidelinkGrant {
        SidelinkGrant {
            dst_l2_id: self.dst_l2_id,
            harq_id: self.harq_id,
            n_selected: self.n_selected,
            tb_size: self.tb_size,
            rri: self.rri,
            is_dynamic: self.is_dynamic,
            slot_allocations: self.slot_allocations.clone(),
        }
    }
}

impl fmt::Display for GrantInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cReselCounter: {} slResoReselCounter: {} prevSlResoReselCounter: {} \
             nrSlHarqId: {} nSelected: {} tbTxCounter: {}",
            self.c_resel_counter,
            self.sl_reso_resel_counter,
            self.prev_sl_reso_resel_counter,
            self.harq_id,
            self.n_selected,
            self.tb_tx_counter
        )?;
        if !self.slot_allocations.is_empty() {
            write!(f, " slots: ")?;
            for alloc in &self.slot_allocations {
                write!(f, "\n    {}", alloc)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidelink::selection::{build_allocations, AllocationTemplate, Candidate};
    use crate::sidelink::types::{RlcPduInfo, SlotInfo};

    fn allocs(slots: &[u8]) -> Vec<SlotAlloc> {
        let cands: Vec<Candidate> = slots
            .iter()
            .map(|&n| Candidate {
                slot: SlotInfo::new(SfnSf::new(0, 0, n, 2).unwrap(), 10, 1),
                subch_start: 0,
            })
            .collect();
        build_allocations(
            &cands,
            &AllocationTemplate {
                dst_l2_id: 9,
                priority: 1,
                mcs: 14,
                l_subch: 1,
                rlc_pdus: vec![RlcPduInfo::new(1, 300)],
            },
        )
    }

    fn sfn(slot: u8) -> SfnSf {
        SfnSf::new(0, 0, slot, 2).unwrap()
    }

    #[test]
    fn test_consume_counts_transmissions() {
        let mut grant = GrantInfo::dynamic(9, 0, 3, allocs(&[1, 2, 3]));
        assert_eq!(grant.state, GrantState::ActiveGrant);
        assert_eq!(grant.tb_size, 300);

        match grant.consume_slot(sfn(1)) {
            ConsumeOutcome::Transmitted { alloc, tb_tx_counter } => {
                assert!(alloc.ndi);
                assert_eq!(tb_tx_counter, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(grant.consume_slot(sfn(2)), ConsumeOutcome::Transmitted {
            alloc: allocs(&[1, 2, 3])[1].clone(),
            tb_tx_counter: 2,
        });
        assert!(grant.is_active());
        assert!(matches!(
            grant.consume_slot(sfn(3)),
            ConsumeOutcome::Transmitted { tb_tx_counter: 3, .. }
        ));
        assert_eq!(grant.state, GrantState::ExhaustedReselecting);
    }

    #[test]
    fn test_counter_at_max_is_exhausted_without_increment() {
        let mut grant = GrantInfo::dynamic(9, 0, 2, allocs(&[1, 2, 3]));
        grant.tb_tx_counter = 2;
        assert_eq!(grant.consume_slot(sfn(1)), ConsumeOutcome::Exhausted);
        assert_eq!(grant.tb_tx_counter, 2);
        assert_eq!(grant.state, GrantState::ExhaustedReselecting);
        // Stays exhausted
        assert_eq!(grant.consume_slot(sfn(2)), ConsumeOutcome::Exhausted);
        assert_eq!(grant.tb_tx_counter, 2);
    }

    #[test]
    fn test_counter_never_exceeds_max() {
        let mut grant = GrantInfo::dynamic(9, 0, 2, allocs(&[1, 2, 3, 4]));
        for n in 1..=4 {
            grant.consume_slot(sfn(n));
            assert!(grant.tb_tx_counter <= grant.max_tx);
        }
        assert_eq!(grant.tb_tx_counter, 2);
        assert_eq!(grant.state, GrantState::ExhaustedReselecting);
    }

    #[test]
    fn test_missed_slots_dropped() {
        let mut grant = GrantInfo::dynamic(9, 0, 5, allocs(&[1, 2, 5]));
        assert_eq!(grant.consume_slot(sfn(4)), ConsumeOutcome::NoAllocation);
        assert_eq!(grant.slot_allocations.len(), 1);
        assert!(grant.uses_slot(&sfn(5)));
        assert!(matches!(
            grant.consume_slot(sfn(5)),
            ConsumeOutcome::Transmitted { tb_tx_counter: 1, .. }
        ));
        assert_eq!(grant.state, GrantState::ExhaustedReselecting);
    }

    #[test]
    fn test_sps_rearm_shifts_pattern() {
        let mut grant =
            GrantInfo::sps(9, 3, 5, allocs(&[1, 2]), Duration::milliseconds(100), 400, 3);
        assert_eq!(grant.c_resel_counter, 30);
        assert_eq!(grant.next_period_start, 401);

        grant.consume_slot(sfn(1));
        grant.consume_slot(sfn(2));
        assert_eq!(grant.state, GrantState::ExhaustedReselecting);

        assert_eq!(grant.period_boundary(), PeriodOutcome::Rearmed);
        assert_eq!(grant.state, GrantState::ActiveGrant);
        assert_eq!(grant.sl_reso_resel_counter, 2);
        assert_eq!(grant.prev_sl_reso_resel_counter, 3);
        assert_eq!(grant.c_resel_counter, 29);
        assert_eq!(grant.tb_tx_counter, 0);
        let slots: Vec<u64> = grant.slot_allocations.iter().map(|a| a.sfn.normalize()).collect();
        assert_eq!(slots, vec![401, 402]);
        assert_eq!(grant.next_period_start, 801);

        assert_eq!(grant.period_boundary(), PeriodOutcome::Rearmed);
        assert_eq!(grant.period_boundary(), PeriodOutcome::CounterExpired);
        assert_eq!(grant.sl_reso_resel_counter, 0);

        grant.keep_reservation();
        assert_eq!(grant.sl_reso_resel_counter, 3);
        assert!(grant.is_active());
    }

    #[test]
    fn test_allocations_stay_sorted() {
        let mut shuffled = allocs(&[1, 2, 3]);
        shuffled.reverse();
        let mut grant =
            GrantInfo::sps(9, 0, 5, shuffled, Duration::milliseconds(100), 400, 5);
        assert!(grant.slot_allocations.windows(2).all(|w| w[0].sfn < w[1].sfn));
        grant.consume_slot(sfn(1));
        grant.period_boundary();
        assert!(grant.slot_allocations.windows(2).all(|w| w[0].sfn < w[1].sfn));
    }

    #[test]
    fn test_display_dump() {
        let grant = GrantInfo::dynamic(9, 4, 5, allocs(&[1]));
        let text = grant.to_string();
        assert!(text.starts_with(
            "cReselCounter: 0 slResoReselCounter: 0 prevSlResoReselCounter: 0 \
             nrSlHarqId: 4 nSelected: 1 tbTxCounter: 0 slots: \n    SfnSf: FrameNum: 0"
        ));

        let mut empty = GrantInfo::dynamic(9, 4, 5, Vec::new());
        empty.n_selected = 0;
        assert_eq!(
            empty.to_string(),
            "cReselCounter: 0 slResoReselCounter: 0 prevSlResoReselCounter: 0 \
             nrSlHarqId: 4 nSelected: 0 tbTxCounter: 0"
        );
        assert_eq!(empty.state, GrantState::Unscheduled);
    }
}
