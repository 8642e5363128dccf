//! Candidate-slot selection and reselection-counter draws.

use rand::Rng;
use std::collections::{BTreeSet, HashSet};

use crate::amc::RateModel;

use super::sfn::SfnSf;
use super::types::{RlcPduInfo, SlotAlloc, SlotInfo};
use super::SidelinkError;

/// Bytes of SCI format 2-A carried inside every sidelink TB.
pub const SCI2A_OVERHEAD_BYTES: u32 = 5;

/// Reservation periods of 100 ms and above that may be configured.
const SUPPORTED_LONG_RRI_MS: [i64; 18] = [
    100, 150, 200, 250, 300, 350, 400, 450, 500, 550, 600, 700, 750, 800, 850, 900, 950, 1000,
];

/// A slot that can carry the transmission, with the first subchannel of the
/// range it would use.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub slot: SlotInfo,
    pub subch_start: u8,
}

/// Lowest start index of `l_subch` contiguous subchannels not in `occupied`.
pub fn lowest_contiguous_start(occupied: &BTreeSet<u8>, total: u8, l_subch: u8) -> Option<u8> {
    if l_subch == 0 || l_subch > total {
        return None;
    }
    let mut run = 0u8;
    for sbch in 0..total {
        if occupied.contains(&sbch) {
            run = 0;
            continue;
        }
        run += 1;
        if run == l_subch {
            return Some(sbch + 1 - l_subch);
        }
    }
    None
}

/// Slots in `[first, last]` (normalized) that no existing grant uses and that
/// leave `l_subch` contiguous free subchannels, in ascending slot order.
pub fn eligible_candidates(
    pool: &[SlotInfo],
    first: u64,
    last: u64,
    used: &HashSet<SfnSf>,
    total_subchannels: u8,
    l_subch: u8,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = pool
        .iter()
        .filter(|slot| {
            let n = slot.sfn.normalize();
            n >= first && n <= last && !used.contains(&slot.sfn)
        })
        .filter_map(|slot| {
            lowest_contiguous_start(&slot.occupied_subchannels, total_subchannels, l_subch).map(
                |subch_start| Candidate {
                    slot: slot.clone(),
                    subch_start,
                },
            )
        })
        .collect();

    candidates.sort_by(|a, b| a.slot.sfn.cmp(&b.slot.sfn));
    candidates.dedup_by(|b, a| a.slot.sfn == b.slot.sfn);
    candidates
}

/// Subchannel size in RBs and PSSCH symbols of `slot`, taking the
/// configured defaults for fields the PHY left at zero.
pub fn slot_layout(
    slot: &SlotInfo,
    default_subchannel_size: u16,
    default_symbols: u16,
) -> (u16, u16) {
    let size = if slot.subchannel_size > 0 {
        slot.subchannel_size
    } else {
        default_subchannel_size
    };
    let symbols = if slot.pssch_sym_length > 0 {
        slot.pssch_sym_length
    } else {
        default_symbols
    };
    (size, symbols)
}

/// Redundancy version of the `tx_index`-th transmission of a TB.
pub fn redundancy_version(tx_index: usize) -> u8 {
    match tx_index % 4 {
        0 => 0,
        1 => 2,
        2 => 3,
        _ => 1,
    }
}

/// What every slot of a new grant carries.
#[derive(Clone, Debug)]
pub struct AllocationTemplate {
    pub dst_l2_id: u32,
    pub priority: u8,
    pub mcs: u8,
    pub l_subch: u8,
    pub rlc_pdus: Vec<RlcPduInfo>,
}

/// Turn the selected candidates (ascending) into slot allocations.
///
/// The first slot carries new data. SCI 1-A goes out on every
/// `max_num_per_reserve`-th slot and indicates how many slots it reserves.
pub fn build_allocations(selected: &[Candidate], template: &AllocationTemplate) -> Vec<SlotAlloc> {
    let total = selected.len();
    let mut allocs: Vec<SlotAlloc> = Vec::with_capacity(total);

    for (index, cand) in selected.iter().enumerate() {
        let per_reserve = cand.slot.max_num_per_reserve.max(1) as usize;
        let tx_sci1a = index % per_reserve == 0;
        let slot_num_ind = if !tx_sci1a {
            0
        } else if index + per_reserve <= total {
            per_reserve as u16
        } else {
            (total - index) as u16
        };

        allocs.push(SlotAlloc {
            sfn: cand.slot.sfn,
            dst_l2_id: template.dst_l2_id,
            priority: template.priority,
            rlc_pdus: template.rlc_pdus.clone(),
            mcs: template.mcs,
            num_pscch_rbs: cand.slot.num_pscch_rbs,
            pscch_sym_start: cand.slot.pscch_sym_start,
            pscch_sym_length: cand.slot.pscch_sym_length,
            pssch_sym_start: cand.slot.pssch_sym_start,
            pssch_sym_length: cand.slot.pssch_sym_length,
            subch_start: cand.subch_start,
            subch_length: template.l_subch,
            max_num_per_reserve: cand.slot.max_num_per_reserve,
            ndi: index == 0,
            rv: redundancy_version(index),
            tx_sci1a,
            slot_num_ind,
        });
    }
    allocs
}

/// Smallest subchannel count whose TB covers `buffer_bytes` plus the SCI-2A
/// overhead, capped at `total_subchannels`. Returns the count and the TB size
/// in bytes.
pub fn subchannels_needed<R: RateModel>(
    rate: &R,
    mcs: u8,
    buffer_bytes: u32,
    symbols_per_slot: u16,
    subchannel_size: u16,
    total_subchannels: u8,
) -> Result<(u8, u32), SidelinkError> {
    if subchannel_size == 0 {
        return Err(SidelinkError::ZeroSubchannelSize);
    }
    let mut l_subch = 0u8;
    let mut tb_bytes;
    loop {
        l_subch += 1;
        let num_rb = subchannel_size as u32 * l_subch as u32 * symbols_per_slot as u32;
        tb_bytes = rate.tb_size_bits(mcs, num_rb)? / 8;
        let covered = tb_bytes >= buffer_bytes.saturating_add(SCI2A_OVERHEAD_BYTES);
        if covered || l_subch >= total_subchannels {
            break;
        }
    }
    Ok((l_subch, tb_bytes))
}

/// Range of the resource reselection counter for a reservation period.
pub fn resel_counter_bounds(rri_ms: i64) -> Result<(u8, u8), SidelinkError> {
    if SUPPORTED_LONG_RRI_MS.contains(&rri_ms) {
        return Ok((5, 15));
    }
    if rri_ms > 0 && rri_ms < 100 {
        let period = rri_ms.max(20);
        let scale = ((100 + period - 1) / period) as u8;
        return Ok((5 * scale, 15 * scale));
    }
    Err(SidelinkError::UnsupportedRri(rri_ms))
}

/// Draw a reselection counter uniformly from its range.
pub fn draw_resel_counter<G: Rng>(rng: &mut G, rri_ms: i64) -> Result<u8, SidelinkError> {
    let (min, max) = resel_counter_bounds(rri_ms)?;
    Ok(rng.random_range(min..=max))
}

/// First id of `available` that no other grant holds.
pub fn unused_harq_id(available: &[u8], in_use: &HashSet<u8>) -> Option<u8> {
    available.iter().copied().find(|id| !in_use.contains(id))
}
