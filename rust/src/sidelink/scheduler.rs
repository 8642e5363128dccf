//! Sidelink grant registry.
//!
//! Keeps one grant per destination. Candidate selection runs on trigger for
//! every destination with data and no grant; SPS grants are re-armed each
//! reservation period until their reselection counter expires.

use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, HashSet};

use crate::amc::{Amc, McsTable, RateModel};
use crate::config::SidelinkConfig;
use crate::{log_changes, log_checks, log_debug};

use super::grant::{ConsumeOutcome, GrantInfo, GrantState, PeriodOutcome};
use super::sap::{SidelinkSchedProvider, SidelinkSchedUser, TriggerReport};
use super::selection::{
    build_allocations, draw_resel_counter, eligible_candidates, resel_counter_bounds,
    slot_layout, subchannels_needed, unused_harq_id, AllocationTemplate, Candidate,
    SCI2A_OVERHEAD_BYTES,
};
use super::sfn::{SfnSf, MAX_NUMEROLOGY};
use super::types::{
    BufferStatusReport, LogicalChannelConfig, RlcPduInfo, SlotInfo, TransmissionParams,
};
use super::SidelinkError;

/// Queue state of one logical channel.
#[derive(Clone, Debug)]
struct LcState {
    config: LogicalChannelConfig,
    tx_queue: u32,
    retx_queue: u32,
    status_pdu: u32,
}

impl LcState {
    fn new(config: LogicalChannelConfig) -> Self {
        Self {
            config,
            tx_queue: 0,
            retx_queue: 0,
            status_pdu: 0,
        }
    }

    fn buffer(&self) -> u32 {
        self.tx_queue
            .saturating_add(self.retx_queue)
            .saturating_add(self.status_pdu)
    }

    /// Remove `size` bytes, status PDUs first, then retransmissions.
    fn dequeue(&mut self, mut size: u32) {
        for queue in [&mut self.status_pdu, &mut self.retx_queue, &mut self.tx_queue] {
            let taken = size.min(*queue);
            *queue -= taken;
            size -= taken;
        }
    }
}

#[derive(Clone, Debug)]
struct Destination {
    mcs: u8,
    lcs: BTreeMap<u8, LcState>,
}

impl Destination {
    /// Best (lowest) priority value among LCs with data.
    fn best_priority(&self) -> Option<u8> {
        self.lcs
            .values()
            .filter(|lc| lc.buffer() > 0)
            .map(|lc| lc.config.priority)
            .min()
    }
}

/// The LCs chosen for one grant and the grant's attributes.
#[derive(Debug)]
struct LcSelection {
    /// LC ids by priority level, best first.
    levels: Vec<Vec<u8>>,
    reference: LogicalChannelConfig,
    is_dynamic: bool,
}

/// Sidelink scheduler owning every destination's grant.
pub struct SidelinkScheduler<R: RateModel> {
    config: SidelinkConfig,
    rate: R,
    rng: StdRng,
    destinations: FxHashMap<u32, Destination>,
    grants: BTreeMap<u32, GrantInfo>,
    slot_pool: Vec<SlotInfo>,
}

impl SidelinkScheduler<Amc> {
    /// Build a scheduler with the table-driven rate model named in the config.
    pub fn from_config(config: SidelinkConfig) -> Result<Self, SidelinkError> {
        let table = McsTable::from_index(config.mcs_table)
            .map_err(|e| SidelinkError::InvalidConfig(e.to_string()))?;
        Self::new(config, Amc::new(table))
    }
}

impl<R: RateModel> SidelinkScheduler<R> {
    pub fn new(config: SidelinkConfig, rate: R) -> Result<Self, SidelinkError> {
        if config.subchannel_size == 0 {
            return Err(SidelinkError::ZeroSubchannelSize);
        }
        if config.total_subchannels == 0 {
            return Err(SidelinkError::InvalidConfig(
                "total_subchannels must be > 0".to_string(),
            ));
        }
        if config.max_tx_trans_num_pssch == 0 || config.max_tx_per_priority.values().any(|&n| n == 0)
        {
            return Err(SidelinkError::InvalidConfig(
                "maximum transmissions must be > 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&config.prob_resource_keep) {
            return Err(SidelinkError::InvalidConfig(format!(
                "prob_resource_keep must be in [0, 1], got {}",
                config.prob_resource_keep
            )));
        }
        if config.numerology > MAX_NUMEROLOGY {
            return Err(SidelinkError::InvalidConfig(format!(
                "numerology must be <= {}, got {}",
                MAX_NUMEROLOGY, config.numerology
            )));
        }
        if config.pssch_symbols_per_slot == 0 {
            return Err(SidelinkError::InvalidConfig(
                "pssch_symbols_per_slot must be > 0".to_string(),
            ));
        }
        // Every destination transmits at the configured MCS
        rate.tb_size_bits(config.mcs, 1)?;
        if config.t1 > config.t2 {
            return Err(SidelinkError::InvalidConfig(format!(
                "t1 ({}) must not exceed t2 ({})",
                config.t1, config.t2
            )));
        }

        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            rate,
            rng,
            destinations: FxHashMap::default(),
            grants: BTreeMap::new(),
            slot_pool: Vec::new(),
        })
    }

    pub fn config(&self) -> &SidelinkConfig {
        &self.config
    }

    /// Add or replace a logical channel of `dst_l2_id`.
    ///
    /// SPS channels must use a reservation period with a defined
    /// reselection-counter range.
    pub fn configure_lc(
        &mut self,
        dst_l2_id: u32,
        lc: LogicalChannelConfig,
    ) -> Result<(), SidelinkError> {
        if !lc.is_dynamic {
            resel_counter_bounds(lc.rri.num_milliseconds())?;
        }
        log_changes!(
            self.config.verbosity,
            "Configured LC {} (prio {}, {}) for destination {}",
            lc.lcid,
            lc.priority,
            if lc.is_dynamic { "dynamic" } else { "SPS" },
            dst_l2_id
        );
        let mcs = self.config.mcs;
        let dst = self
            .destinations
            .entry(dst_l2_id)
            .or_insert_with(|| Destination {
                mcs,
                lcs: BTreeMap::new(),
            });
        dst.lcs.insert(lc.lcid, LcState::new(lc));
        Ok(())
    }

    /// Forget a destination and release its grant.
    pub fn remove_destination(&mut self, dst_l2_id: u32) -> bool {
        self.grants.remove(&dst_l2_id);
        self.destinations.remove(&dst_l2_id).is_some()
    }

    pub fn grant(&self, dst_l2_id: u32) -> Option<&GrantInfo> {
        self.grants.get(&dst_l2_id)
    }

    pub fn grant_state(&self, dst_l2_id: u32) -> Result<GrantState, SidelinkError> {
        if !self.destinations.contains_key(&dst_l2_id) {
            return Err(SidelinkError::UnknownDestination(dst_l2_id));
        }
        Ok(self
            .grants
            .get(&dst_l2_id)
            .map(|g| g.state)
            .unwrap_or(GrantState::Unscheduled))
    }

    /// Pending bytes of one logical channel.
    pub fn buffer_size(&self, dst_l2_id: u32, lcid: u8) -> Result<u32, SidelinkError> {
        Ok(self.lc(dst_l2_id, lcid)?.buffer())
    }

    /// Transmit on `sfn` with the destination's grant, if it has one there.
    pub fn consume_slot(
        &mut self,
        dst_l2_id: u32,
        sfn: SfnSf,
    ) -> Result<ConsumeOutcome, SidelinkError> {
        if !self.destinations.contains_key(&dst_l2_id) {
            return Err(SidelinkError::UnknownDestination(dst_l2_id));
        }
        let Some(grant) = self.grants.get_mut(&dst_l2_id) else {
            return Ok(ConsumeOutcome::NoAllocation);
        };
        let outcome = grant.consume_slot(sfn);
        match &outcome {
            ConsumeOutcome::Transmitted { tb_tx_counter, .. } => log_debug!(
                self.config.verbosity,
                "Destination {} tx {}/{} at {}",
                dst_l2_id,
                tb_tx_counter,
                grant.max_tx,
                sfn
            ),
            ConsumeOutcome::Exhausted => log_checks!(
                self.config.verbosity,
                "Destination {} grant exhausted at {}",
                dst_l2_id,
                sfn
            ),
            ConsumeOutcome::NoAllocation => {}
        }
        Ok(outcome)
    }

    /// Every grant with its counters and remaining slots, by destination.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (dst, grant) in &self.grants {
            out.push_str(&format!("DstL2Id: {} State: {} {}", dst, grant.state, grant));
            if let Some(params) = &grant.params {
                out.push_str(&format!("\n    TxParams: {}", params));
            }
            out.push('\n');
        }
        out
    }

    fn lc(&self, dst_l2_id: u32, lcid: u8) -> Result<&LcState, SidelinkError> {
        self.destinations
            .get(&dst_l2_id)
            .ok_or(SidelinkError::UnknownDestination(dst_l2_id))?
            .lcs
            .get(&lcid)
            .ok_or(SidelinkError::UnknownLogicalChannel { dst_l2_id, lcid })
    }

    fn lc_mut(&mut self, dst_l2_id: u32, lcid: u8) -> Result<&mut LcState, SidelinkError> {
        self.destinations
            .get_mut(&dst_l2_id)
            .ok_or(SidelinkError::UnknownDestination(dst_l2_id))?
            .lcs
            .get_mut(&lcid)
            .ok_or(SidelinkError::UnknownLogicalChannel { dst_l2_id, lcid })
    }

    fn harq_ids_in_use(&self, except: Option<u32>) -> HashSet<u8> {
        self.grants
            .iter()
            .filter(|(dst, _)| Some(**dst) != except)
            .map(|(_, g)| g.harq_id)
            .collect()
    }

    /// Destinations with data and no grant, in service order: best LC
    /// priority first, then smallest id.
    fn destinations_needing_grant(&self) -> Vec<u32> {
        let mut pending: Vec<(u8, u32)> = self
            .destinations
            .iter()
            .filter(|(dst, _)| !self.grants.contains_key(*dst))
            .filter_map(|(dst, info)| info.best_priority().map(|prio| (prio, *dst)))
            .collect();
        pending.sort_unstable();
        pending.into_iter().map(|(_, dst)| dst).collect()
    }

    /// Pick the LCs of one destination that can share a grant.
    fn select_lcs(&self, dst: &Destination) -> Option<LcSelection> {
        let mut by_prio: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        for (lcid, lc) in &dst.lcs {
            if lc.buffer() > 0 {
                by_prio.entry(lc.config.priority).or_default().push(*lcid);
            }
        }
        let best = by_prio.values().next()?;

        let n_dynamic = best
            .iter()
            .filter(|id| dst.lcs.get(*id).is_some_and(|lc| lc.config.is_dynamic))
            .count();
        let n_sps = best.len() - n_dynamic;
        let is_dynamic = if self.config.prio_to_sps {
            n_sps == 0
        } else {
            n_dynamic > 0 || n_sps == 0
        };

        // Reference LC: selected type, best priority, smallest id
        let reference = best
            .iter()
            .filter_map(|id| dst.lcs.get(id))
            .find(|lc| lc.config.is_dynamic == is_dynamic)?
            .config
            .clone();

        let levels: Vec<Vec<u8>> = by_prio
            .into_values()
            .map(|ids| {
                ids.into_iter()
                    .filter(|id| {
                        dst.lcs.get(id).is_some_and(|lc| {
                            lc.config.is_dynamic == is_dynamic
                                && (is_dynamic || lc.config.rri == reference.rri)
                        })
                    })
                    .collect::<Vec<u8>>()
            })
            .filter(|ids| !ids.is_empty())
            .collect();

        Some(LcSelection {
            levels,
            reference,
            is_dynamic,
        })
    }

    /// Share `tb_bytes` (less the SCI-2A) between the selected LCs. LCs of
    /// one priority level get equal shares; better levels go first.
    fn share_bytes(dst: &Destination, levels: &[Vec<u8>], tb_bytes: u32) -> Vec<RlcPduInfo> {
        let mut pdus: Vec<RlcPduInfo> = Vec::new();
        let mut allocated = 0u32;
        for level in levels {
            let min_buffer = level
                .iter()
                .filter_map(|id| dst.lcs.get(id))
                .map(LcState::buffer)
                .min()
                .unwrap_or(0);
            let room = tb_bytes.saturating_sub(allocated + SCI2A_OVERHEAD_BYTES);
            let share = min_buffer.min(room / level.len() as u32);
            if share == 0 {
                break;
            }
            for id in level {
                pdus.push(RlcPduInfo::new(*id, share));
                allocated += share;
            }
        }
        pdus
    }

    /// Run candidate selection for one destination and create its grant.
    fn schedule_destination<U: SidelinkSchedUser>(
        &mut self,
        dst_l2_id: u32,
        now: SfnSf,
        harq_ids: &[u8],
        user: &mut U,
        report: &mut TriggerReport,
    ) -> Result<(), SidelinkError> {
        let verbosity = self.config.verbosity;
        let Some(dst) = self.destinations.get(&dst_l2_id) else {
            return Ok(());
        };
        let Some(selection) = self.select_lcs(dst) else {
            return Ok(());
        };
        log_changes!(
            verbosity,
            "Destination {}: {} -> {}",
            dst_l2_id,
            GrantState::Unscheduled,
            GrantState::CandidateSelection
        );

        let buffer: u32 = selection
            .levels
            .iter()
            .flatten()
            .filter_map(|id| dst.lcs.get(id))
            .map(LcState::buffer)
            .fold(0u32, u32::saturating_add);
        let slots_per_ms = self.config.slots_per_ms() as u64;
        let reference = &selection.reference;
        let pdb_slots =
            reference.packet_delay_budget.num_milliseconds().max(0) as u64 * slots_per_ms;
        let rri_slots = reference.rri.num_milliseconds().max(0) as u64 * slots_per_ms;
        let mut window = (self.config.t2 as u64).min(pdb_slots);
        if !selection.is_dynamic {
            window = window.min(rri_slots);
        }
        let first = now.normalize() + self.config.t1 as u64;
        let last = now.normalize() + window;

        let used: HashSet<SfnSf> = self
            .grants
            .values()
            .flat_map(|g| g.slot_allocations.iter().map(|a| a.sfn))
            .collect();

        // The earliest free slot in the window fixes the layout the TB is
        // sized for; slots laid out differently cannot carry the same TB.
        let (default_size, default_symbols) =
            (self.config.subchannel_size, self.config.pssch_symbols_per_slot);
        let layout = self
            .slot_pool
            .iter()
            .filter(|slot| {
                let n = slot.sfn.normalize();
                n >= first && n <= last && !used.contains(&slot.sfn)
            })
            .min_by_key(|slot| slot.sfn)
            .map(|slot| slot_layout(slot, default_size, default_symbols));
        let Some((subchannel_size, symbols)) = layout else {
            log_checks!(
                verbosity,
                "Destination {}: no free slot in [{}, {}], stays {}",
                dst_l2_id,
                first,
                last,
                GrantState::Unscheduled
            );
            report.starved.push(dst_l2_id);
            return Ok(());
        };

        let (l_subch, tb_bytes) = subchannels_needed(
            &self.rate,
            dst.mcs,
            buffer,
            symbols,
            subchannel_size,
            self.config.total_subchannels,
        )?;
        let candidates: Vec<Candidate> = eligible_candidates(
            &self.slot_pool,
            first,
            last,
            &used,
            self.config.total_subchannels,
            l_subch,
        )
        .into_iter()
        .filter(|c| {
            slot_layout(&c.slot, default_size, default_symbols) == (subchannel_size, symbols)
        })
        .collect();
        log_debug!(
            verbosity,
            "Destination {}: {} bytes need {} subchannels of {} RBs x {} symbols (TB {} bytes), \
             {} candidate slots in [{}, {}]",
            dst_l2_id,
            buffer,
            l_subch,
            subchannel_size,
            symbols,
            tb_bytes,
            candidates.len(),
            first,
            last
        );

        let rlc_pdus = Self::share_bytes(dst, &selection.levels, tb_bytes);
        if candidates.is_empty() || rlc_pdus.is_empty() {
            log_checks!(
                verbosity,
                "Destination {}: no eligible slot, stays {}",
                dst_l2_id,
                GrantState::Unscheduled
            );
            report.starved.push(dst_l2_id);
            return Ok(());
        }

        let resel_counter = if selection.is_dynamic {
            0
        } else {
            draw_resel_counter(&mut self.rng, reference.rri.num_milliseconds())?
        };
        let Some(harq_id) = unused_harq_id(harq_ids, &self.harq_ids_in_use(None)) else {
            log_checks!(
                verbosity,
                "Destination {}: no HARQ process available",
                dst_l2_id
            );
            report.harq_unavailable.push(dst_l2_id);
            return Ok(());
        };

        let max_tx = self.config.max_tx_for_priority(reference.priority);
        let selected = &candidates[..candidates.len().min(max_tx as usize)];
        let allocs = build_allocations(
            selected,
            &AllocationTemplate {
                dst_l2_id,
                priority: reference.priority,
                mcs: dst.mcs,
                l_subch,
                rlc_pdus,
            },
        );

        let params = TransmissionParams {
            priority: reference.priority,
            packet_delay_budget: reference.packet_delay_budget,
            l_subch: l_subch as u16,
            p_rsvp_tx: if selection.is_dynamic {
                Duration::zero()
            } else {
                reference.rri
            },
            c_resel: resel_counter as u16 * 10,
        };
        let grant = if selection.is_dynamic {
            GrantInfo::dynamic(dst_l2_id, harq_id, max_tx, allocs)
        } else {
            GrantInfo::sps(
                dst_l2_id,
                harq_id,
                max_tx,
                allocs,
                reference.rri,
                rri_slots,
                resel_counter,
            )
        }
        .with_params(params);
        log_changes!(
            verbosity,
            "Destination {}: {} -> {} {}",
            dst_l2_id,
            GrantState::CandidateSelection,
            grant.state,
            grant
        );
        user.on_grant(dst_l2_id, &grant.to_grant());
        self.grants.insert(dst_l2_id, grant);
        report.granted.push(dst_l2_id);
        Ok(())
    }
}

/// Next free HARQ id after `current` in `available`, cycling; `current` if
/// nothing else is free.
fn next_harq_id(available: &[u8], current: u8, in_use: &HashSet<u8>) -> u8 {
    let start = available
        .iter()
        .position(|id| *id == current)
        .map(|p| p + 1)
        .unwrap_or(0);
    (0..available.len())
        .map(|offset| available[(start + offset) % available.len()])
        .find(|id| *id != current && !in_use.contains(id))
        .unwrap_or(current)
}

impl<R: RateModel> SidelinkSchedProvider for SidelinkScheduler<R> {
    fn notify_buffer_status(&mut self, report: &BufferStatusReport) -> Result<(), SidelinkError> {
        log_debug!(self.config.verbosity, "Buffer status {}", report);
        let lc = self.lc_mut(report.dst_l2_id, report.lcid)?;
        lc.tx_queue = report.tx_queue_size;
        lc.retx_queue = report.retx_queue_size;
        lc.status_pdu = report.status_pdu_size as u32;
        Ok(())
    }

    fn notify_pdu_dequeue(
        &mut self,
        dst_l2_id: u32,
        lcid: u8,
        size: u32,
    ) -> Result<(), SidelinkError> {
        self.lc_mut(dst_l2_id, lcid)?.dequeue(size);
        Ok(())
    }

    fn provide_slot_info(&mut self, slots: Vec<SlotInfo>) {
        log_debug!(self.config.verbosity, "{} candidate slots provided", slots.len());
        self.slot_pool = slots;
    }

    fn trigger<U: SidelinkSchedUser>(
        &mut self,
        now: SfnSf,
        harq_ids: &[u8],
        user: &mut U,
    ) -> TriggerReport {
        let mut report = TriggerReport::default();
        let pending = self.destinations_needing_grant();
        log_checks!(
            self.config.verbosity,
            "Trigger at {}: {} destinations need a grant",
            now,
            pending.len()
        );
        for dst_l2_id in pending {
            if let Err(e) = self.schedule_destination(dst_l2_id, now, harq_ids, user, &mut report) {
                log_checks!(
                    self.config.verbosity,
                    "Destination {}: selection failed: {}",
                    dst_l2_id,
                    e
                );
                report.failed.push((dst_l2_id, e));
            }
        }
        report
    }

    fn slot_indication<U: SidelinkSchedUser>(&mut self, now: SfnSf, harq_ids: &[u8], user: &mut U) {
        let verbosity = self.config.verbosity;
        let now_index = now.normalize();
        let mut released: Vec<u32> = Vec::new();

        let dsts: Vec<u32> = self.grants.keys().copied().collect();
        for dst_l2_id in dsts {
            let in_use = self.harq_ids_in_use(Some(dst_l2_id));
            let Some(grant) = self.grants.get_mut(&dst_l2_id) else {
                continue;
            };
            let all_passed = grant.slot_allocations.last().map_or(true, |a| a.sfn < now);

            if grant.is_dynamic {
                if grant.state == GrantState::ExhaustedReselecting || all_passed {
                    released.push(dst_l2_id);
                }
                continue;
            }

            if grant.is_active() && all_passed {
                grant.state = GrantState::ExhaustedReselecting;
            }

            let mut rearmed = false;
            let mut dropped = false;
            while grant.rri_slots > 0 && grant.next_period_start <= now_index {
                match grant.period_boundary() {
                    PeriodOutcome::Rearmed => rearmed = true,
                    PeriodOutcome::CounterExpired => {
                        let draw: f64 = self.rng.random();
                        if grant.c_resel_counter > 0 && draw < self.config.prob_resource_keep {
                            log_changes!(
                                verbosity,
                                "Destination {}: keeping reservation ({} < {})",
                                dst_l2_id,
                                draw,
                                self.config.prob_resource_keep
                            );
                            grant.keep_reservation();
                            rearmed = true;
                        } else {
                            dropped = true;
                            break;
                        }
                    }
                }
            }

            if dropped {
                released.push(dst_l2_id);
            } else if rearmed {
                grant.harq_id = next_harq_id(harq_ids, grant.harq_id, &in_use);
                log_changes!(
                    verbosity,
                    "Destination {}: re-armed at {} {}",
                    dst_l2_id,
                    now,
                    grant
                );
                user.on_grant(dst_l2_id, &grant.to_grant());
            }
        }

        for dst_l2_id in released {
            if let Some(grant) = self.grants.remove(&dst_l2_id) {
                log_changes!(
                    verbosity,
                    "Destination {}: {} -> {} {}",
                    dst_l2_id,
                    grant.state,
                    GrantState::Unscheduled,
                    grant
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amc::AmcError;
    use crate::sidelink::types::SidelinkGrant;

    /// One byte per resource block, refusing more than 200 RBs.
    struct CappedRate;

    impl RateModel for CappedRate {
        fn tb_size_bits(&self, mcs: u8, num_rb: u32) -> Result<u32, AmcError> {
            if num_rb > 200 {
                return Err(AmcError::McsOutOfRange { mcs, max: 0 });
            }
            Ok(8 * num_rb)
        }
    }

    fn sfn(index: u64) -> SfnSf {
        SfnSf::from_normalized(index, 2).unwrap()
    }

    fn pool(range: std::ops::Range<u64>) -> Vec<SlotInfo> {
        range.map(|n| SlotInfo::new(sfn(n), 10, 1)).collect()
    }

    fn bsr(dst: u32, lcid: u8, bytes: u32) -> BufferStatusReport {
        BufferStatusReport {
            lcid,
            tx_queue_size: bytes,
            dst_l2_id: dst,
            ..Default::default()
        }
    }

    fn make_scheduler(config: SidelinkConfig) -> SidelinkScheduler<Amc> {
        SidelinkScheduler::from_config(config).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = [
            SidelinkConfig {
                subchannel_size: 0,
                ..Default::default()
            },
            SidelinkConfig {
                total_subchannels: 0,
                ..Default::default()
            },
            SidelinkConfig {
                max_tx_trans_num_pssch: 0,
                ..Default::default()
            },
            SidelinkConfig {
                prob_resource_keep: 1.5,
                ..Default::default()
            },
            SidelinkConfig {
                mcs_table: 4,
                ..Default::default()
            },
            SidelinkConfig {
                mcs: 30,
                ..Default::default()
            },
            SidelinkConfig {
                numerology: 7,
                ..Default::default()
            },
            SidelinkConfig {
                numerology: 40,
                ..Default::default()
            },
            SidelinkConfig {
                pssch_symbols_per_slot: 0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(SidelinkScheduler::from_config(config).is_err());
        }
    }

    #[test]
    fn test_unknown_destination_and_lc() {
        let mut sched = make_scheduler(SidelinkConfig::default());
        assert_eq!(
            sched.notify_buffer_status(&bsr(5, 1, 10)),
            Err(SidelinkError::UnknownDestination(5))
        );
        sched.configure_lc(5, LogicalChannelConfig::dynamic(1, 1, 20)).unwrap();
        assert_eq!(
            sched.notify_buffer_status(&bsr(5, 2, 10)),
            Err(SidelinkError::UnknownLogicalChannel {
                dst_l2_id: 5,
                lcid: 2
            })
        );
        assert!(matches!(
            sched.consume_slot(6, sfn(0)),
            Err(SidelinkError::UnknownDestination(6))
        ));
        assert_eq!(
            sched.configure_lc(5, LogicalChannelConfig::sps(3, 1, 100, 650)),
            Err(SidelinkError::UnsupportedRri(650))
        );
    }

    #[test]
    fn test_picks_first_slot_with_room() {
        let mut sched = make_scheduler(SidelinkConfig {
            total_subchannels: 2,
            max_tx_trans_num_pssch: 1,
            t1: 0,
            ..Default::default()
        });
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        // Enough data to need both subchannels of a 10 RB x 12 symbol slot
        sched.notify_buffer_status(&bsr(1, 1, 700)).unwrap();
        sched.provide_slot_info(vec![
            SlotInfo::new(sfn(1), 10, 1).with_occupied([0, 1]),
            SlotInfo::new(sfn(2), 10, 1),
            SlotInfo::new(sfn(3), 10, 1),
        ]);

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        let report = sched.trigger(sfn(0), &[0, 1, 2], &mut grants);
        assert_eq!(report.granted, vec![1]);
        assert_eq!(grants.len(), 1);
        let allocs = &grants[0].slot_allocations;
        assert_eq!(allocs.len(), 1);
        assert_eq!(allocs[0].sfn, sfn(2));
        assert_eq!(allocs[0].subch_length, 2);
        assert!(allocs[0].ndi && allocs[0].tx_sci1a);
        assert_eq!(sched.grant_state(1).unwrap(), GrantState::ActiveGrant);
    }

    #[test]
    fn test_tb_sized_from_slot_layout() {
        let mut sched = make_scheduler(SidelinkConfig {
            max_tx_trans_num_pssch: 1,
            ..Default::default()
        });
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 600)).unwrap();
        // 50 RBs x 12 symbols per subchannel, wider than the configured 10 x 9
        sched.provide_slot_info((0..40).map(|n| SlotInfo::new(sfn(n), 50, 1)).collect());

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(0), &[0], &mut grants);
        assert_eq!(grants[0].slot_allocations[0].subch_length, 1);
    }

    #[test]
    fn test_unset_slot_layout_uses_config() {
        let mut sched = make_scheduler(SidelinkConfig {
            max_tx_trans_num_pssch: 1,
            ..Default::default()
        });
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 600)).unwrap();
        let slots = (0..40)
            .map(|n| {
                let mut slot = SlotInfo::new(sfn(n), 0, 1);
                slot.pssch_sym_length = 0;
                slot
            })
            .collect();
        sched.provide_slot_info(slots);

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(0), &[0], &mut grants);
        assert_eq!(grants[0].slot_allocations[0].subch_length, 2);
    }

    #[test]
    fn test_grant_slots_share_one_layout() {
        let mut sched = make_scheduler(SidelinkConfig {
            max_tx_trans_num_pssch: 2,
            t1: 0,
            ..Default::default()
        });
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 100)).unwrap();
        sched.provide_slot_info(vec![
            SlotInfo::new(sfn(1), 50, 1),
            SlotInfo::new(sfn(2), 10, 1),
            SlotInfo::new(sfn(3), 50, 1),
        ]);

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(0), &[0], &mut grants);
        let slots: Vec<SfnSf> = grants[0].slot_allocations.iter().map(|a| a.sfn).collect();
        assert_eq!(slots, vec![sfn(1), sfn(3)]);
    }

    #[test]
    fn test_failed_destination_does_not_block_others() {
        let config = SidelinkConfig {
            max_tx_trans_num_pssch: 1,
            ..Default::default()
        };
        let mut sched = SidelinkScheduler::new(config, CappedRate).unwrap();
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.configure_lc(2, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        // 120 bytes per subchannel; a second subchannel exceeds the rate model
        sched.notify_buffer_status(&bsr(1, 1, 500)).unwrap();
        sched.notify_buffer_status(&bsr(2, 1, 50)).unwrap();
        sched.provide_slot_info(pool(0..40));

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        let report = sched.trigger(sfn(0), &[0, 1], &mut grants);
        assert_eq!(report.granted, vec![2]);
        assert_eq!(
            report.failed,
            vec![(
                1,
                SidelinkError::Amc(AmcError::McsOutOfRange { mcs: 14, max: 0 })
            )]
        );
        assert_eq!(grants.len(), 1);
        assert_eq!(sched.grant_state(1).unwrap(), GrantState::Unscheduled);
    }

    #[test]
    fn test_starved_destination_stays_unscheduled() {
        let mut sched = make_scheduler(SidelinkConfig {
            total_subchannels: 2,
            ..Default::default()
        });
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 100)).unwrap();
        sched.provide_slot_info(vec![SlotInfo::new(sfn(5), 10, 1).with_occupied([0, 1])]);

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        let report = sched.trigger(sfn(0), &[0], &mut grants);
        assert_eq!(report.starved, vec![1]);
        assert!(grants.is_empty());
        assert_eq!(sched.grant_state(1).unwrap(), GrantState::Unscheduled);

        // Retried on the next trigger once capacity appears
        sched.provide_slot_info(vec![SlotInfo::new(sfn(6), 10, 1)]);
        let report = sched.trigger(sfn(0), &[0], &mut grants);
        assert_eq!(report.granted, vec![1]);
    }

    #[test]
    fn test_window_bounds_selection() {
        let mut sched = make_scheduler(SidelinkConfig {
            t1: 2,
            t2: 33,
            ..Default::default()
        });
        // PDB of 2 ms = 8 slots at numerology 2
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 2)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 50)).unwrap();
        sched.provide_slot_info(pool(100..140));

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(100), &[0], &mut grants);
        let slots: Vec<u64> = grants[0]
            .slot_allocations
            .iter()
            .map(|a| a.sfn.normalize())
            .collect();
        assert_eq!(slots, vec![102, 103, 104, 105, 106]);
    }

    #[test]
    fn test_lcp_serves_best_priority_then_smallest_id() {
        let mut sched = make_scheduler(SidelinkConfig {
            max_tx_trans_num_pssch: 1,
            ..Default::default()
        });
        sched.configure_lc(30, LogicalChannelConfig::dynamic(1, 3, 50)).unwrap();
        sched.configure_lc(20, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.configure_lc(10, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        for dst in [10, 20, 30] {
            sched.notify_buffer_status(&bsr(dst, 1, 40)).unwrap();
        }
        sched.provide_slot_info(pool(0..40));

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        let report = sched.trigger(sfn(0), &[0, 1, 2, 3], &mut grants);
        assert_eq!(report.granted, vec![10, 20, 30]);
        // One PSSCH per slot, distinct HARQ processes
        let slots: Vec<u64> = grants
            .iter()
            .map(|g| g.slot_allocations[0].sfn.normalize())
            .collect();
        assert_eq!(slots, vec![2, 3, 4]);
        let harq: Vec<u8> = grants.iter().map(|g| g.harq_id).collect();
        assert_eq!(harq, vec![0, 1, 2]);
    }

    #[test]
    fn test_harq_exhaustion_is_skipped() {
        let mut sched = make_scheduler(SidelinkConfig::default());
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.configure_lc(2, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 40)).unwrap();
        sched.notify_buffer_status(&bsr(2, 1, 40)).unwrap();
        sched.provide_slot_info(pool(0..40));

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        let report = sched.trigger(sfn(0), &[7], &mut grants);
        assert_eq!(report.granted, vec![1]);
        assert_eq!(report.harq_unavailable, vec![2]);
        assert_eq!(grants[0].harq_id, 7);
    }

    #[test]
    fn test_equal_share_within_priority() {
        let mut sched = make_scheduler(SidelinkConfig::default());
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 2, 50)).unwrap();
        sched.configure_lc(1, LogicalChannelConfig::dynamic(2, 2, 50)).unwrap();
        sched.configure_lc(1, LogicalChannelConfig::sps(3, 1, 50, 100)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 30)).unwrap();
        sched.notify_buffer_status(&bsr(1, 2, 80)).unwrap();
        sched.provide_slot_info(pool(0..40));

        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(0), &[0], &mut grants);
        // LC 3 has no data; the two dynamic LCs share their level equally
        let pdus = &grants[0].slot_allocations[0].rlc_pdus;
        assert_eq!(pdus, &vec![RlcPduInfo::new(1, 30), RlcPduInfo::new(2, 30)]);
        assert!(grants[0].is_dynamic);
    }

    #[test]
    fn test_prio_to_sps_breaks_mixed_tie() {
        for (prio_to_sps, expect_dynamic) in [(true, false), (false, true)] {
            let mut sched = make_scheduler(SidelinkConfig {
                prio_to_sps,
                ..Default::default()
            });
            sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 100)).unwrap();
            sched.configure_lc(1, LogicalChannelConfig::sps(2, 1, 100, 100)).unwrap();
            sched.notify_buffer_status(&bsr(1, 1, 20)).unwrap();
            sched.notify_buffer_status(&bsr(1, 2, 20)).unwrap();
            sched.provide_slot_info(pool(0..40));

            let mut grants: Vec<SidelinkGrant> = Vec::new();
            sched.trigger(sfn(0), &[0], &mut grants);
            assert_eq!(grants[0].is_dynamic, expect_dynamic);
            let lcids: Vec<u8> = grants[0].slot_allocations[0]
                .rlc_pdus
                .iter()
                .map(|p| p.lcid)
                .collect();
            assert_eq!(lcids, vec![if expect_dynamic { 1 } else { 2 }]);
        }
    }

    #[test]
    fn test_dynamic_grant_consumed_then_released() {
        let mut sched = make_scheduler(SidelinkConfig {
            max_tx_trans_num_pssch: 2,
            ..Default::default()
        });
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 40)).unwrap();
        sched.provide_slot_info(pool(0..40));
        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(0), &[0], &mut grants);

        assert!(matches!(
            sched.consume_slot(1, sfn(2)).unwrap(),
            ConsumeOutcome::Transmitted { tb_tx_counter: 1, .. }
        ));
        assert!(matches!(
            sched.consume_slot(1, sfn(3)).unwrap(),
            ConsumeOutcome::Transmitted { tb_tx_counter: 2, .. }
        ));
        assert_eq!(sched.grant_state(1).unwrap(), GrantState::ExhaustedReselecting);
        assert_eq!(sched.consume_slot(1, sfn(4)).unwrap(), ConsumeOutcome::Exhausted);
        assert_eq!(sched.grant(1).unwrap().tb_tx_counter, 2);

        sched.notify_pdu_dequeue(1, 1, 40).unwrap();
        sched.slot_indication(sfn(4), &[0], &mut grants);
        assert!(sched.grant(1).is_none());
        assert_eq!(sched.buffer_size(1, 1).unwrap(), 0);

        // No data, no new grant
        let report = sched.trigger(sfn(5), &[0], &mut grants);
        assert!(report.granted.is_empty());
    }

    #[test]
    fn test_sps_grant_rearms_until_counter_expires() {
        let mut sched = make_scheduler(SidelinkConfig {
            max_tx_trans_num_pssch: 1,
            prob_resource_keep: 0.0,
            ..Default::default()
        });
        sched.configure_lc(1, LogicalChannelConfig::sps(1, 1, 100, 100)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 40)).unwrap();
        sched.provide_slot_info(pool(0..40));
        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(0), &[0, 1], &mut grants);

        let grant = sched.grant(1).unwrap();
        let counter = grant.sl_reso_resel_counter;
        assert!((5..=15).contains(&counter));
        assert_eq!(grant.c_resel_counter, counter as u16 * 10);
        assert_eq!(grant.rri_slots, 400);
        let first = grant.slot_allocations[0].sfn.normalize();
        assert_eq!(first, 2);

        let mut periods = 0u64;
        loop {
            let slot = first + periods * 400;
            assert!(matches!(
                sched.consume_slot(1, sfn(slot)).unwrap(),
                ConsumeOutcome::Transmitted { .. }
            ));
            periods += 1;
            sched.slot_indication(sfn(first + periods * 400), &[0, 1], &mut grants);
            match sched.grant(1) {
                Some(g) => {
                    assert_eq!(g.sl_reso_resel_counter as u64, counter as u64 - periods);
                    assert_eq!(g.prev_sl_reso_resel_counter, counter);
                    assert_eq!(g.slot_allocations[0].sfn.normalize(), first + periods * 400);
                    assert!(g.is_active());
                }
                None => break,
            }
        }
        assert_eq!(periods, counter as u64);
        // One grant at creation plus one per re-arm
        assert_eq!(grants.len() as u64, counter as u64);
        // New TB each period, so the HARQ id alternates
        assert_eq!(grants[0].harq_id, 0);
        assert_eq!(grants[1].harq_id, 1);
        assert_eq!(sched.grant_state(1).unwrap(), GrantState::Unscheduled);
    }

    #[test]
    fn test_sps_reservation_kept_with_certain_probability() {
        let mut sched = make_scheduler(SidelinkConfig {
            max_tx_trans_num_pssch: 1,
            prob_resource_keep: 1.0,
            ..Default::default()
        });
        sched.configure_lc(1, LogicalChannelConfig::sps(1, 1, 100, 100)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 40)).unwrap();
        sched.provide_slot_info(pool(0..40));
        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(0), &[0], &mut grants);
        let counter = sched.grant(1).unwrap().sl_reso_resel_counter as u64;

        // Jump past the counter's lifetime in one step
        sched.slot_indication(sfn(2 + counter * 400), &[0], &mut grants);
        let g = sched.grant(1).unwrap();
        assert_eq!(g.sl_reso_resel_counter as u64, counter);
        assert_eq!(g.c_resel_counter as u64, counter * 10 - counter);
        // Only id 0 available: kept across TBs
        assert_eq!(g.harq_id, 0);
    }

    #[test]
    fn test_existing_grant_slots_excluded() {
        let mut sched = make_scheduler(SidelinkConfig::default());
        sched.configure_lc(1, LogicalChannelConfig::sps(1, 1, 100, 100)).unwrap();
        sched.configure_lc(2, LogicalChannelConfig::dynamic(1, 1, 100)).unwrap();
        sched.notify_buffer_status(&bsr(1, 1, 40)).unwrap();
        sched.provide_slot_info(pool(0..40));
        let mut grants: Vec<SidelinkGrant> = Vec::new();
        sched.trigger(sfn(0), &[0, 1], &mut grants);

        sched.notify_buffer_status(&bsr(2, 1, 40)).unwrap();
        sched.trigger(sfn(0), &[0, 1], &mut grants);
        let first: HashSet<SfnSf> = grants[0].slot_allocations.iter().map(|a| a.sfn).collect();
        assert_eq!(first.len(), 5);
        assert!(grants[1]
            .slot_allocations
            .iter()
            .all(|a| !first.contains(&a.sfn)));
        assert_eq!(grants[1].slot_allocations[0].sfn.normalize(), 7);
    }

    #[test]
    fn test_dump_lists_grants() {
        let mut sched = make_scheduler(SidelinkConfig {
            max_tx_trans_num_pssch: 1,
            ..Default::default()
        });
        sched.configure_lc(4, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched.notify_buffer_status(&bsr(4, 1, 40)).unwrap();
        sched.provide_slot_info(pool(0..40));
        sched.trigger(sfn(0), &[3], &mut Vec::<SidelinkGrant>::new());

        let dump = sched.dump();
        assert!(dump.starts_with(
            "DstL2Id: 4 State: ActiveGrant cReselCounter: 0 slResoReselCounter: 0 \
             prevSlResoReselCounter: 0 nrSlHarqId: 3 nSelected: 1 tbTxCounter: 0 slots: "
        ));
        assert!(dump.ends_with("\n    TxParams: Prio: 1, PDB: 50 ms, subchannels: 1, RRI: 0 ms\n"));
    }

    #[test]
    fn test_pdu_dequeue_drains_queues() {
        let mut sched = make_scheduler(SidelinkConfig::default());
        sched.configure_lc(1, LogicalChannelConfig::dynamic(1, 1, 50)).unwrap();
        sched
            .notify_buffer_status(&BufferStatusReport {
                lcid: 1,
                dst_l2_id: 1,
                tx_queue_size: 100,
                retx_queue_size: 20,
                status_pdu_size: 5,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sched.buffer_size(1, 1).unwrap(), 125);
        sched.notify_pdu_dequeue(1, 1, 30).unwrap();
        assert_eq!(sched.buffer_size(1, 1).unwrap(), 95);
        sched.notify_pdu_dequeue(1, 1, 500).unwrap();
        assert_eq!(sched.buffer_size(1, 1).unwrap(), 0);
    }

    #[test]
    fn test_next_harq_id_cycles() {
        let none = HashSet::new();
        assert_eq!(next_harq_id(&[0, 1, 2], 0, &none), 1);
        assert_eq!(next_harq_id(&[0, 1, 2], 2, &none), 0);
        let busy: HashSet<u8> = [1].into_iter().collect();
        assert_eq!(next_harq_id(&[0, 1, 2], 0, &busy), 2);
        assert_eq!(next_harq_id(&[0], 0, &none), 0);
        assert_eq!(next_harq_id(&[], 5, &none), 5);
    }
}
