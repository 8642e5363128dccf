//! Rust implementation of the NR MAC schedulers.
//!
//! Two engines: a fairness-metric scheduler for downlink/uplink resource-block
//! groups, and a sidelink mode-2 grant registry with reselection counters and
//! HARQ bookkeeping.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

pub mod amc;
mod config;
pub mod logging;
pub mod pf;
pub mod sidelink;

pub use amc::{Amc, AmcError, McsTable, RateModel};
pub use config::{PfConfig, SidelinkConfig};
pub use pf::{
    AllocationDecision, Direction, PfError, PfScheduler, ResourceQuantity, UserSchedulingRecord,
};
pub use sidelink::{
    BufferStatusReport, ConsumeOutcome, GrantState, LogicalChannelConfig, RlcPduInfo, SfnSf,
    SidelinkError, SidelinkGrant, SidelinkSchedProvider, SidelinkScheduler, SlotAlloc, SlotInfo,
    TransmissionParams, TriggerReport,
};

fn to_py_err(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn parse_direction(direction: &str) -> PyResult<Direction> {
    Direction::parse(direction)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown direction: {}", direction)))
}

/// Transport block size in bits for `num_rb` resource blocks at `mcs`.
///
/// # Raises
/// * ValueError if the MCS is outside the table or the table is unknown
#[pyfunction]
#[pyo3(signature = (mcs, num_rb, mcs_table=2))]
fn estimate_tb_size(mcs: u8, num_rb: u32, mcs_table: u8) -> PyResult<u32> {
    let table = McsTable::from_index(mcs_table).map_err(to_py_err)?;
    Amc::new(table).tb_size_bits(mcs, num_rb).map_err(to_py_err)
}

/// Proportional-fair metric `potential^alpha / max(epsilon, average)`.
#[pyfunction]
#[pyo3(name = "pf_metric", signature = (potential_tput, avg_tput, alpha=1.0, epsilon=1e-9))]
fn py_pf_metric(potential_tput: f64, avg_tput: f64, alpha: f64, epsilon: f64) -> f64 {
    pf::pf_metric(potential_tput, avg_tput, alpha, epsilon)
}

/// One step of the exponential moving average over `time_window` iterations.
#[pyfunction]
fn update_average(old_avg: f64, instantaneous: f64, time_window: f64) -> f64 {
    pf::ewma(old_avg, instantaneous, time_window)
}

/// Inclusive range of the reselection counter for a reservation period.
///
/// # Raises
/// * ValueError if the period is not a supported value
#[pyfunction]
fn resel_counter_bounds(rri_ms: i64) -> PyResult<(u8, u8)> {
    sidelink::selection::resel_counter_bounds(rri_ms).map_err(to_py_err)
}

/// DL/UL scheduler (PyO3 wrapper).
#[pyclass(name = "PfScheduler")]
pub struct PyPfScheduler {
    inner: PfScheduler<Amc>,
}

#[pymethods]
impl PyPfScheduler {
    #[new]
    #[pyo3(signature = (config=None))]
    fn new(config: Option<PfConfig>) -> PyResult<Self> {
        let inner = PfScheduler::from_config(config.unwrap_or_default()).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn config(&self) -> PfConfig {
        self.inner.config().clone()
    }

    fn attach_user(&mut self, rnti: u16, dl_mcs: u8, ul_mcs: u8) -> PyResult<()> {
        self.inner
            .attach_user(rnti, dl_mcs, ul_mcs)
            .map_err(to_py_err)
    }

    /// Remove a user; returns False if it was not attached.
    fn detach_user(&mut self, rnti: u16) -> bool {
        self.inner.detach_user(rnti).is_some()
    }

    fn user(&self, rnti: u16) -> Option<UserSchedulingRecord> {
        self.inner.user(rnti).cloned()
    }

    fn notify_buffer_status(&mut self, rnti: u16, direction: &str, bytes: u32) -> PyResult<()> {
        let dir = parse_direction(direction)?;
        self.inner
            .notify_buffer_status(rnti, dir, bytes)
            .map_err(to_py_err)
    }

    fn set_mcs(&mut self, rnti: u16, direction: &str, mcs: u8) -> PyResult<()> {
        let dir = parse_direction(direction)?;
        self.inner.set_mcs(rnti, dir, mcs).map_err(to_py_err)
    }

    /// User RNTIs in priority order for the given resources.
    ///
    /// # Returns
    /// * (order, rejected) where rejected lists (rnti, reason) pairs
    fn rank(
        &mut self,
        direction: &str,
        rbg: u32,
        sym: u32,
    ) -> PyResult<(Vec<u16>, Vec<(u16, String)>)> {
        let dir = parse_direction(direction)?;
        let ranking = self
            .inner
            .rank(dir, ResourceQuantity::new(rbg, sym))
            .map_err(to_py_err)?;
        let rejected = ranking
            .rejected
            .into_iter()
            .map(|(rnti, e)| (rnti, e.to_string()))
            .collect();
        Ok((ranking.order, rejected))
    }

    /// Run one iteration.
    ///
    /// # Returns
    /// * (decisions, rejected) where rejected lists (rnti, reason) pairs
    fn schedule_iteration(
        &mut self,
        direction: &str,
        rbg: u32,
        sym: u32,
    ) -> PyResult<(Vec<AllocationDecision>, Vec<(u16, String)>)> {
        let dir = parse_direction(direction)?;
        let result = self
            .inner
            .schedule_iteration(dir, ResourceQuantity::new(rbg, sym))
            .map_err(to_py_err)?;
        let rejected = result
            .rejected
            .into_iter()
            .map(|(rnti, e)| (rnti, e.to_string()))
            .collect();
        Ok((result.decisions, rejected))
    }

    fn __repr__(&self) -> String {
        format!(
            "PfScheduler(policy={}, users={})",
            self.inner.config().policy,
            self.inner.users().count()
        )
    }
}

/// Sidelink grant registry (PyO3 wrapper).
///
/// Grants are returned as lists instead of being pushed to a callback.
#[pyclass(name = "SidelinkScheduler")]
pub struct PySidelinkScheduler {
    inner: SidelinkScheduler<Amc>,
}

#[pymethods]
impl PySidelinkScheduler {
    #[new]
    #[pyo3(signature = (config=None))]
    fn new(config: Option<SidelinkConfig>) -> PyResult<Self> {
        let inner =
            SidelinkScheduler::from_config(config.unwrap_or_default()).map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn config(&self) -> SidelinkConfig {
        self.inner.config().clone()
    }

    fn configure_lc(&mut self, dst_l2_id: u32, lc: LogicalChannelConfig) -> PyResult<()> {
        self.inner.configure_lc(dst_l2_id, lc).map_err(to_py_err)
    }

    fn remove_destination(&mut self, dst_l2_id: u32) -> bool {
        self.inner.remove_destination(dst_l2_id)
    }

    fn notify_buffer_status(&mut self, report: BufferStatusReport) -> PyResult<()> {
        self.inner.notify_buffer_status(&report).map_err(to_py_err)
    }

    fn notify_pdu_dequeue(&mut self, dst_l2_id: u32, lcid: u8, size: u32) -> PyResult<()> {
        self.inner
            .notify_pdu_dequeue(dst_l2_id, lcid, size)
            .map_err(to_py_err)
    }

    fn buffer_size(&self, dst_l2_id: u32, lcid: u8) -> PyResult<u32> {
        self.inner.buffer_size(dst_l2_id, lcid).map_err(to_py_err)
    }

    fn provide_slot_info(&mut self, slots: Vec<SlotInfo>) {
        self.inner.provide_slot_info(slots);
    }

    /// Run candidate selection.
    ///
    /// # Returns
    /// * (grants, granted, starved, harq_unavailable, failed) where failed
    ///   lists (dst_l2_id, reason) pairs
    #[allow(clippy::type_complexity)]
    fn trigger(
        &mut self,
        now: SfnSf,
        harq_ids: Vec<u8>,
    ) -> (
        Vec<SidelinkGrant>,
        Vec<u32>,
        Vec<u32>,
        Vec<u32>,
        Vec<(u32, String)>,
    ) {
        let mut grants: Vec<SidelinkGrant> = Vec::new();
        let report = self.inner.trigger(now, &harq_ids, &mut grants);
        let failed = report
            .failed
            .into_iter()
            .map(|(dst, e)| (dst, e.to_string()))
            .collect();
        (
            grants,
            report.granted,
            report.starved,
            report.harq_unavailable,
            failed,
        )
    }

    /// Advance to `now`; returns the grants re-armed for a new period.
    fn slot_indication(&mut self, now: SfnSf, harq_ids: Vec<u8>) -> Vec<SidelinkGrant> {
        let mut grants: Vec<SidelinkGrant> = Vec::new();
        self.inner.slot_indication(now, &harq_ids, &mut grants);
        grants
    }

    /// Transmit on `now`; returns the allocation used, or None.
    fn consume_slot(&mut self, dst_l2_id: u32, now: SfnSf) -> PyResult<Option<SlotAlloc>> {
        match self.inner.consume_slot(dst_l2_id, now).map_err(to_py_err)? {
            ConsumeOutcome::Transmitted { alloc, .. } => Ok(Some(alloc)),
            ConsumeOutcome::NoAllocation | ConsumeOutcome::Exhausted => Ok(None),
        }
    }

    fn grant_state(&self, dst_l2_id: u32) -> PyResult<String> {
        self.inner
            .grant_state(dst_l2_id)
            .map(|s| s.to_string())
            .map_err(to_py_err)
    }

    fn grant(&self, dst_l2_id: u32) -> Option<SidelinkGrant> {
        self.inner.grant(dst_l2_id).map(|g| g.to_grant())
    }

    fn dump(&self) -> String {
        self.inner.dump()
    }
}

/// The nrsched.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Config types
    m.add_class::<PfConfig>()?;
    m.add_class::<SidelinkConfig>()?;

    // DL/UL
    m.add_class::<ResourceQuantity>()?;
    m.add_class::<UserSchedulingRecord>()?;
    m.add_class::<AllocationDecision>()?;
    m.add_class::<PyPfScheduler>()?;

    // Sidelink
    m.add_class::<SfnSf>()?;
    m.add_class::<TransmissionParams>()?;
    m.add_class::<BufferStatusReport>()?;
    m.add_class::<SlotInfo>()?;
    m.add_class::<RlcPduInfo>()?;
    m.add_class::<SlotAlloc>()?;
    m.add_class::<LogicalChannelConfig>()?;
    m.add_class::<SidelinkGrant>()?;
    m.add_class::<PySidelinkScheduler>()?;

    // Functions
    m.add_function(wrap_pyfunction!(estimate_tb_size, m)?)?;
    m.add_function(wrap_pyfunction!(py_pf_metric, m)?)?;
    m.add_function(wrap_pyfunction!(update_average, m)?)?;
    m.add_function(wrap_pyfunction!(resel_counter_bounds, m)?)?;

    Ok(())
}
