//! Records exchanged between the sidelink scheduler and its collaborators.

use chrono::Duration;
use pyo3::prelude::*;
use std::collections::BTreeSet;
use std::fmt;

use super::sfn::SfnSf;

/// Immutable descriptor of one flow's transmission needs.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct TransmissionParams {
    /// Lower value = higher priority
    #[pyo3(get)]
    pub priority: u8,
    #[pyo3(get)]
    pub packet_delay_budget: Duration,
    /// Contiguous subchannels needed per transmission
    #[pyo3(get)]
    pub l_subch: u16,
    /// Reservation period; zero for non-periodic traffic
    #[pyo3(get)]
    pub p_rsvp_tx: Duration,
    #[pyo3(get)]
    pub c_resel: u16,
}

impl TransmissionParams {
    pub fn is_periodic(&self) -> bool {
        self.p_rsvp_tx > Duration::zero()
    }
}

impl fmt::Display for TransmissionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Prio: {}, PDB: {} ms, subchannels: {}, RRI: {} ms",
            self.priority,
            self.packet_delay_budget.num_milliseconds(),
            self.l_subch,
            self.p_rsvp_tx.num_milliseconds()
        )
    }
}

#[pymethods]
impl TransmissionParams {
    fn __repr__(&self) -> String {
        self.to_string()
    }
}

/// Queue state of one logical channel, reported by the link-control layer.
#[pyclass]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferStatusReport {
    #[pyo3(get, set)]
    pub rnti: u16,
    #[pyo3(get, set)]
    pub lcid: u8,
    /// Bytes
    #[pyo3(get, set)]
    pub tx_queue_size: u32,
    /// Milliseconds
    #[pyo3(get, set)]
    pub tx_queue_hol_delay: u16,
    #[pyo3(get, set)]
    pub retx_queue_size: u32,
    #[pyo3(get, set)]
    pub retx_queue_hol_delay: u16,
    #[pyo3(get, set)]
    pub status_pdu_size: u16,
    #[pyo3(get, set)]
    pub src_l2_id: u32,
    #[pyo3(get, set)]
    pub dst_l2_id: u32,
}

impl fmt::Display for BufferStatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RNTI: {} LCId: {} RLCTxQueueSize: {} B, RLCTXHolDel: {} ms, \
             RLCReTXQueueSize: {} B, RLCReTXHolDel: {} ms, RLCStatusPduSize: {} B, \
             source layer 2 id: {}, destination layer 2 id {}",
            self.rnti,
            self.lcid,
            self.tx_queue_size,
            self.tx_queue_hol_delay,
            self.retx_queue_size,
            self.retx_queue_hol_delay,
            self.status_pdu_size,
            self.src_l2_id,
            self.dst_l2_id
        )
    }
}

#[pymethods]
impl BufferStatusReport {
    #[new]
    #[pyo3(signature = (
        dst_l2_id,
        lcid,
        tx_queue_size,
        rnti=0,
        tx_queue_hol_delay=0,
        retx_queue_size=0,
        retx_queue_hol_delay=0,
        status_pdu_size=0,
        src_l2_id=0
    ))]
    #[allow(clippy::too_many_arguments)]
    fn py_new(
        dst_l2_id: u32,
        lcid: u8,
        tx_queue_size: u32,
        rnti: u16,
        tx_queue_hol_delay: u16,
        retx_queue_size: u32,
        retx_queue_hol_delay: u16,
        status_pdu_size: u16,
        src_l2_id: u32,
    ) -> Self {
        Self {
            rnti,
            lcid,
            tx_queue_size,
            tx_queue_hol_delay,
            retx_queue_size,
            retx_queue_hol_delay,
            status_pdu_size,
            src_l2_id,
            dst_l2_id,
        }
    }

    fn __repr__(&self) -> String {
        self.to_string()
    }
}

/// Physical layout of one candidate sidelink slot.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotInfo {
    #[pyo3(get)]
    pub sfn: SfnSf,
    #[pyo3(get)]
    pub num_pscch_rbs: u16,
    #[pyo3(get)]
    pub pscch_sym_start: u16,
    #[pyo3(get)]
    pub pscch_sym_length: u16,
    #[pyo3(get)]
    pub pssch_sym_start: u16,
    #[pyo3(get)]
    pub pssch_sym_length: u16,
    /// Resource blocks per subchannel
    #[pyo3(get)]
    pub subchannel_size: u16,
    #[pyo3(get)]
    pub max_num_per_reserve: u16,
    /// Subchannels already taken by other transmitters
    #[pyo3(get)]
    pub occupied_subchannels: BTreeSet<u8>,
}

impl SlotInfo {
    /// Slot with a default control/data layout and nothing occupied.
    pub fn new(sfn: SfnSf, subchannel_size: u16, max_num_per_reserve: u16) -> Self {
        Self {
            sfn,
            num_pscch_rbs: 10,
            pscch_sym_start: 1,
            pscch_sym_length: 3,
            pssch_sym_start: 1,
            pssch_sym_length: 12,
            subchannel_size,
            max_num_per_reserve,
            occupied_subchannels: BTreeSet::new(),
        }
    }

    pub fn with_occupied(mut self, occupied: impl IntoIterator<Item = u8>) -> Self {
        self.occupied_subchannels = occupied.into_iter().collect();
        self
    }
}

impl fmt::Display for SlotInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SfnSf: {} PscchRbs: {} PscchSymStart: {} PscchSymLength: {} \
             PsschSymStart: {} PsschSymLength: {} SubchannelSize: {} MaxNumPerReserve: {}",
            self.sfn,
            self.num_pscch_rbs,
            self.pscch_sym_start,
            self.pscch_sym_length,
            self.pssch_sym_start,
            self.pssch_sym_length,
            self.subchannel_size,
            self.max_num_per_reserve
        )?;
        if self.occupied_subchannels.is_empty() {
            write!(f, " OccupiedSbCh: None")
        } else {
            write!(f, " OccupiedSbCh:")?;
            for sbch in &self.occupied_subchannels {
                write!(f, " {}", sbch)?;
            }
            Ok(())
        }
    }
}

#[pymethods]
impl SlotInfo {
    #[new]
    #[pyo3(signature = (
        sfn,
        subchannel_size,
        max_num_per_reserve=1,
        occupied_subchannels=None,
        pssch_sym_length=12
    ))]
    fn py_new(
        sfn: SfnSf,
        subchannel_size: u16,
        max_num_per_reserve: u16,
        occupied_subchannels: Option<BTreeSet<u8>>,
        pssch_sym_length: u16,
    ) -> Self {
        let mut info = Self::new(sfn, subchannel_size, max_num_per_reserve);
        info.occupied_subchannels = occupied_subchannels.unwrap_or_default();
        info.pssch_sym_length = pssch_sym_length;
        info
    }

    fn __repr__(&self) -> String {
        self.to_string()
    }
}

/// Bytes of one logical channel carried in a transport block.
#[pyclass]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RlcPduInfo {
    #[pyo3(get)]
    pub lcid: u8,
    #[pyo3(get)]
    pub size: u32,
}

impl RlcPduInfo {
    pub fn new(lcid: u8, size: u32) -> Self {
        Self { lcid, size }
    }
}

/// One concrete (slot, subchannel range) transmission of a grant.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotAlloc {
    #[pyo3(get)]
    pub sfn: SfnSf,
    #[pyo3(get)]
    pub dst_l2_id: u32,
    #[pyo3(get)]
    pub priority: u8,
    #[pyo3(get)]
    pub rlc_pdus: Vec<RlcPduInfo>,
    #[pyo3(get)]
    pub mcs: u8,
    #[pyo3(get)]
    pub num_pscch_rbs: u16,
    #[pyo3(get)]
    pub pscch_sym_start: u16,
    #[pyo3(get)]
    pub pscch_sym_length: u16,
    #[pyo3(get)]
    pub pssch_sym_start: u16,
    #[pyo3(get)]
    pub pssch_sym_length: u16,
    #[pyo3(get)]
    pub subch_start: u8,
    #[pyo3(get)]
    pub subch_length: u8,
    #[pyo3(get)]
    pub max_num_per_reserve: u16,
    /// New data indicator: set on the first transmission of a TB
    #[pyo3(get)]
    pub ndi: bool,
    /// Redundancy version
    #[pyo3(get)]
    pub rv: u8,
    /// Whether this slot carries SCI format 1-A
    #[pyo3(get)]
    pub tx_sci1a: bool,
    /// Number of slots indicated by the SCI 1-A, including this one
    #[pyo3(get)]
    pub slot_num_ind: u16,
}

impl SlotAlloc {
    /// Subchannels this transmission occupies.
    pub fn subchannels(&self) -> std::ops::Range<u8> {
        self.subch_start..self.subch_start + self.subch_length
    }

    pub fn tb_bytes(&self) -> u32 {
        self.rlc_pdus.iter().map(|pdu| pdu.size).sum()
    }
}

impl fmt::Display for SlotAlloc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SfnSf: {} DstL2Id: {} Prio: {} MCS: {} SubChStart: {} SubChLength: {} \
             NDI: {} RV: {} TxSci1A: {} SlotNumInd: {}",
            self.sfn,
            self.dst_l2_id,
            self.priority,
            self.mcs,
            self.subch_start,
            self.subch_length,
            u8::from(self.ndi),
            self.rv,
            u8::from(self.tx_sci1a),
            self.slot_num_ind
        )
    }
}

#[pymethods]
impl SlotAlloc {
    fn __repr__(&self) -> String {
        self.to_string()
    }
}

/// Configuration of one sidelink logical channel.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalChannelConfig {
    #[pyo3(get, set)]
    pub lcid: u8,
    #[pyo3(get, set)]
    pub priority: u8,
    #[pyo3(get, set)]
    pub packet_delay_budget: Duration,
    /// Dynamic (per-PDU) grants instead of SPS
    #[pyo3(get, set)]
    pub is_dynamic: bool,
    /// Reservation period for SPS traffic
    #[pyo3(get, set)]
    pub rri: Duration,
}

impl LogicalChannelConfig {
    pub fn sps(lcid: u8, priority: u8, pdb_ms: i64, rri_ms: i64) -> Self {
        Self {
            lcid,
            priority,
            packet_delay_budget: Duration::milliseconds(pdb_ms),
            is_dynamic: false,
            rri: Duration::milliseconds(rri_ms),
        }
    }

    pub fn dynamic(lcid: u8, priority: u8, pdb_ms: i64) -> Self {
        Self {
            lcid,
            priority,
            packet_delay_budget: Duration::milliseconds(pdb_ms),
            is_dynamic: true,
            rri: Duration::zero(),
        }
    }
}

#[pymethods]
impl LogicalChannelConfig {
    #[new]
    #[pyo3(signature = (lcid, priority, packet_delay_budget, is_dynamic=false, rri=None))]
    fn py_new(
        lcid: u8,
        priority: u8,
        packet_delay_budget: Duration,
        is_dynamic: bool,
        rri: Option<Duration>,
    ) -> Self {
        Self {
            lcid,
            priority,
            packet_delay_budget,
            is_dynamic,
            rri: rri.unwrap_or_else(Duration::zero),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "LogicalChannelConfig(lcid={}, priority={}, pdb={} ms, dynamic={}, rri={} ms)",
            self.lcid,
            self.priority,
            self.packet_delay_budget.num_milliseconds(),
            self.is_dynamic,
            self.rri.num_milliseconds()
        )
    }
}

/// A grant handed to the transmission pipeline: the slots of one TB
/// (first transmission plus retransmissions) and its HARQ process.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct SidelinkGrant {
    #[pyo3(get)]
    pub dst_l2_id: u32,
    #[pyo3(get)]
    pub harq_id: u8,
    #[pyo3(get)]
    pub n_selected: u8,
    /// Bytes of RLC data in the TB
    #[pyo3(get)]
    pub tb_size: u32,
    #[pyo3(get)]
    pub rri: Duration,
    #[pyo3(get)]
    pub is_dynamic: bool,
    #[pyo3(get)]
    pub slot_allocations: Vec<SlotAlloc>,
}

impl fmt::Display for SidelinkGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DstL2Id: {} nrSlHarqId: {} nSelected: {} tbSize: {} RRI: {} ms",
            self.dst_l2_id,
            self.harq_id,
            self.n_selected,
            self.tb_size,
            self.rri.num_milliseconds()
        )
    }
}

#[pymethods]
impl SidelinkGrant {
    fn __repr__(&self) -> String {
        self.to_string()
    }
}
