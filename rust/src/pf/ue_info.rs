//! Per-user scheduling state and its per-direction update paths.

use pyo3::prelude::*;

use crate::amc::RateModel;

use super::resources::{Direction, ResourceQuantity};
use super::PfError;

/// First-order IIR update of an average throughput.
///
/// new = (1 - 1/W) * old + (1/W) * instantaneous
#[inline]
pub fn ewma(old_avg: f64, instantaneous: f64, time_window: f64) -> f64 {
    (1.0 - (1.0 / time_window)) * old_avg + (1.0 / time_window) * instantaneous
}

/// Throughput bookkeeping for one link direction of one user.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinkState {
    /// MCS in use.
    pub mcs: u8,
    /// RBGs assigned in the current iteration.
    pub rbg: u32,
    /// Symbols assigned in the current iteration.
    pub sym: u32,
    /// TB size (bits) achieved with the current assignment.
    pub tb_size: u32,
    /// Pending bytes reported by the link-control layer.
    pub buffer_bytes: u32,
    /// Instantaneous throughput (bits/symbol) of the current iteration.
    pub curr_tput: f64,
    /// Exponentially-averaged throughput.
    pub avg_tput: f64,
    /// Average as of the start of the current iteration.
    pub last_avg_tput: f64,
    /// Throughput the user would get with the resources offered this step.
    pub potential_tput: f64,
    /// Number of completed averaging updates.
    pub updates: u64,
}

impl LinkState {
    fn with_mcs(mcs: u8) -> Self {
        Self {
            mcs,
            ..Default::default()
        }
    }

    /// Whether the TB assigned so far covers the pending buffer.
    pub fn buffer_satisfied(&self) -> bool {
        self.tb_size / 8 >= self.buffer_bytes
    }
}

/// Scheduling record of one attached user, keyed by RNTI.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct UserSchedulingRecord {
    #[pyo3(get)]
    pub rnti: u16,
    pub dl: LinkState,
    pub ul: LinkState,
}

impl UserSchedulingRecord {
    pub fn new(rnti: u16, dl_mcs: u8, ul_mcs: u8) -> Self {
        Self {
            rnti,
            dl: LinkState::with_mcs(dl_mcs),
            ul: LinkState::with_mcs(ul_mcs),
        }
    }

    pub fn link(&self, dir: Direction) -> &LinkState {
        match dir {
            Direction::Downlink => &self.dl,
            Direction::Uplink => &self.ul,
        }
    }

    pub fn link_mut(&mut self, dir: Direction) -> &mut LinkState {
        match dir {
            Direction::Downlink => &mut self.dl,
            Direction::Uplink => &mut self.ul,
        }
    }

    /// Clear the previous assignment and snapshot the average as the
    /// baseline every update in this iteration filters against.
    pub fn begin_iteration(&mut self, dir: Direction) {
        let link = self.link_mut(dir);
        link.rbg = 0;
        link.sym = 0;
        link.tb_size = 0;
        link.curr_tput = 0.0;
        link.last_avg_tput = link.avg_tput;
    }

    /// Add one unit of resources to the user's assignment.
    pub fn assign(&mut self, dir: Direction, unit: ResourceQuantity) {
        let link = self.link_mut(dir);
        link.rbg += unit.rbg;
        link.sym = unit.sym;
    }

    /// Recompute TB size and the averaged throughput after an assignment.
    ///
    /// `total_assigned` is the aggregate handed out in this iteration so far;
    /// its symbol count is the divisor and must be non-zero.
    pub fn update_metric<R: RateModel>(
        &mut self,
        dir: Direction,
        total_assigned: ResourceQuantity,
        time_window: f64,
        rb_per_rbg: u32,
        rate: &R,
    ) -> Result<(), PfError> {
        if total_assigned.sym == 0 {
            return Err(PfError::ZeroSymbols);
        }
        if time_window < 1.0 {
            return Err(PfError::InvalidTimeWindow(time_window));
        }
        let rnti = self.rnti;
        let link = self.link_mut(dir);
        link.tb_size = rate
            .tb_size_bits(link.mcs, link.rbg * rb_per_rbg)
            .map_err(|source| PfError::Amc { rnti, source })?;
        link.curr_tput = link.tb_size as f64 / total_assigned.sym as f64;
        link.avg_tput = ewma(link.last_avg_tput, link.curr_tput, time_window);
        link.updates += 1;
        Ok(())
    }

    /// Average update for a user that took part in the iteration but
    /// received nothing: the instantaneous sample is zero.
    pub fn update_metric_unassigned(
        &mut self,
        dir: Direction,
        time_window: f64,
    ) -> Result<(), PfError> {
        if time_window < 1.0 {
            return Err(PfError::InvalidTimeWindow(time_window));
        }
        let link = self.link_mut(dir);
        link.tb_size = 0;
        link.curr_tput = 0.0;
        link.avg_tput = ewma(link.last_avg_tput, 0.0, time_window);
        link.updates += 1;
        Ok(())
    }

    /// Throughput per symbol achievable with `assignable`, stored as the
    /// potential throughput. Leaves the average untouched.
    pub fn calculate_potential_tput<R: RateModel>(
        &mut self,
        dir: Direction,
        assignable: ResourceQuantity,
        rb_per_rbg: u32,
        rate: &R,
    ) -> Result<f64, PfError> {
        if assignable.sym == 0 {
            return Err(PfError::ZeroSymbols);
        }
        let rnti = self.rnti;
        let link = self.link_mut(dir);
        let tbs = rate
            .tb_size_bits(link.mcs, assignable.assignable_rbs(rb_per_rbg))
            .map_err(|source| PfError::Amc { rnti, source })?;
        link.potential_tput = tbs as f64 / assignable.sym as f64;
        Ok(link.potential_tput)
    }
}

#[pymethods]
impl UserSchedulingRecord {
    #[getter]
    fn dl_mcs(&self) -> u8 {
        self.dl.mcs
    }

    #[getter]
    fn ul_mcs(&self) -> u8 {
        self.ul.mcs
    }

    #[getter]
    fn dl_avg_tput(&self) -> f64 {
        self.dl.avg_tput
    }

    #[getter]
    fn ul_avg_tput(&self) -> f64 {
        self.ul.avg_tput
    }

    #[getter]
    fn dl_potential_tput(&self) -> f64 {
        self.dl.potential_tput
    }

    #[getter]
    fn ul_potential_tput(&self) -> f64 {
        self.ul.potential_tput
    }

    #[getter]
    fn dl_tb_size(&self) -> u32 {
        self.dl.tb_size
    }

    #[getter]
    fn ul_tb_size(&self) -> u32 {
        self.ul.tb_size
    }

    fn __repr__(&self) -> String {
        format!(
            "UserSchedulingRecord(rnti={}, dl_mcs={}, ul_mcs={}, dl_avg={:.3}, ul_avg={:.3})",
            self.rnti, self.dl.mcs, self.ul.mcs, self.dl.avg_tput, self.ul.avg_tput
        )
    }
}
