//! Configuration types for the DL/UL and sidelink schedulers.

use pyo3::prelude::*;
use std::collections::HashMap;

/// Configuration for the DL/UL metric engine.
#[pyclass]
#[derive(Clone, Debug)]
pub struct PfConfig {
    /// Fairness policy: "pf", "mr" or "rr"
    #[pyo3(get, set)]
    pub policy: String,
    /// Averaging time constant in iterations (>= 1)
    #[pyo3(get, set)]
    pub time_window: f64,
    /// PF exponent applied to the potential throughput
    #[pyo3(get, set)]
    pub fairness_index: f64,
    /// Resource blocks per resource-block group
    #[pyo3(get, set)]
    pub rb_per_rbg: u32,
    /// Floor for the average throughput in the PF ratio
    #[pyo3(get, set)]
    pub epsilon: f64,
    /// MCS table (1 = 64QAM, 2 = 256QAM)
    #[pyo3(get, set)]
    pub mcs_table: u8,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug
    #[pyo3(get, set)]
    pub verbosity: u8,
}

impl Default for PfConfig {
    fn default() -> Self {
        Self {
            policy: "pf".to_string(),
            time_window: 99.0,
            fairness_index: 1.0,
            rb_per_rbg: 1,
            epsilon: 1e-9,
            mcs_table: 2,
            verbosity: 0,
        }
    }
}

#[pymethods]
impl PfConfig {
    #[new]
    #[pyo3(signature = (
        policy=None,
        time_window=None,
        fairness_index=None,
        rb_per_rbg=None,
        epsilon=None,
        mcs_table=None,
        verbosity=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        policy: Option<String>,
        time_window: Option<f64>,
        fairness_index: Option<f64>,
        rb_per_rbg: Option<u32>,
        epsilon: Option<f64>,
        mcs_table: Option<u8>,
        verbosity: Option<u8>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            policy: policy.unwrap_or(defaults.policy),
            time_window: time_window.unwrap_or(defaults.time_window),
            fairness_index: fairness_index.unwrap_or(defaults.fairness_index),
            rb_per_rbg: rb_per_rbg.unwrap_or(defaults.rb_per_rbg),
            epsilon: epsilon.unwrap_or(defaults.epsilon),
            mcs_table: mcs_table.unwrap_or(defaults.mcs_table),
            verbosity: verbosity.unwrap_or(defaults.verbosity),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "PfConfig(policy={:?}, time_window={}, fairness_index={}, rb_per_rbg={})",
            self.policy, self.time_window, self.fairness_index, self.rb_per_rbg
        )
    }
}

/// Configuration for the sidelink grant registry.
#[pyclass]
#[derive(Clone, Debug)]
pub struct SidelinkConfig {
    /// Subchannels in the sidelink bandwidth part
    #[pyo3(get, set)]
    pub total_subchannels: u8,
    /// Default maximum PSSCH transmissions per TB (first tx + retx)
    #[pyo3(get, set)]
    pub max_tx_trans_num_pssch: u8,
    /// Per-priority override of the maximum transmissions
    #[pyo3(get, set)]
    pub max_tx_per_priority: HashMap<u8, u8>,
    /// Probability of keeping an SPS reservation when its counter expires
    #[pyo3(get, set)]
    pub prob_resource_keep: f64,
    /// Processing delay before the first selectable slot
    #[pyo3(get, set)]
    pub t1: u16,
    /// Length of the selection window in slots
    #[pyo3(get, set)]
    pub t2: u16,
    /// Prefer SPS when dynamic and SPS LCs share the highest priority
    #[pyo3(get, set)]
    pub prio_to_sps: bool,
    /// Fixed sidelink MCS
    #[pyo3(get, set)]
    pub mcs: u8,
    /// Resource blocks per subchannel
    #[pyo3(get, set)]
    pub subchannel_size: u16,
    /// PSSCH symbols per slot used for TB sizing
    #[pyo3(get, set)]
    pub pssch_symbols_per_slot: u16,
    /// Numerology (slots per ms = 2^numerology)
    #[pyo3(get, set)]
    pub numerology: u8,
    /// MCS table (1 = 64QAM, 2 = 256QAM)
    #[pyo3(get, set)]
    pub mcs_table: u8,
    /// Seed for reselection-counter and resource-keep draws
    #[pyo3(get, set)]
    pub seed: u64,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug
    #[pyo3(get, set)]
    pub verbosity: u8,
}

impl Default for SidelinkConfig {
    fn default() -> Self {
        Self {
            total_subchannels: 5,
            max_tx_trans_num_pssch: 5,
            max_tx_per_priority: HashMap::new(),
            prob_resource_keep: 0.0,
            t1: 2,
            t2: 33,
            prio_to_sps: true,
            mcs: 14,
            subchannel_size: 10,
            pssch_symbols_per_slot: 9,
            numerology: 2,
            mcs_table: 2,
            seed: 1,
            verbosity: 0,
        }
    }
}

impl SidelinkConfig {
    /// Maximum transmissions per TB for a flow of the given priority.
    pub fn max_tx_for_priority(&self, priority: u8) -> u8 {
        self.max_tx_per_priority
            .get(&priority)
            .copied()
            .unwrap_or(self.max_tx_trans_num_pssch)
    }

    /// Slots per millisecond for the configured numerology.
    pub fn slots_per_ms(&self) -> u32 {
        1u32 << self.numerology
    }
}

#[pymethods]
impl SidelinkConfig {
    #[new]
    #[pyo3(signature = (
        total_subchannels=None,
        max_tx_trans_num_pssch=None,
        max_tx_per_priority=None,
        prob_resource_keep=None,
        t1=None,
        t2=None,
        prio_to_sps=None,
        mcs=None,
        subchannel_size=None,
        pssch_symbols_per_slot=None,
        numerology=None,
        mcs_table=None,
        seed=None,
        verbosity=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        total_subchannels: Option<u8>,
        max_tx_trans_num_pssch: Option<u8>,
        max_tx_per_priority: Option<HashMap<u8, u8>>,
        prob_resource_keep: Option<f64>,
        t1: Option<u16>,
        t2: Option<u16>,
        prio_to_sps: Option<bool>,
        mcs: Option<u8>,
        subchannel_size: Option<u16>,
        pssch_symbols_per_slot: Option<u16>,
        numerology: Option<u8>,
        mcs_table: Option<u8>,
        seed: Option<u64>,
        verbosity: Option<u8>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            total_subchannels: total_subchannels.unwrap_or(defaults.total_subchannels),
            max_tx_trans_num_pssch: max_tx_trans_num_pssch
                .unwrap_or(defaults.max_tx_trans_num_pssch),
            max_tx_per_priority: max_tx_per_priority.unwrap_or_default(),
            prob_resource_keep: prob_resource_keep.unwrap_or(defaults.prob_resource_keep),
            t1: t1.unwrap_or(defaults.t1),
            t2: t2.unwrap_or(defaults.t2),
            prio_to_sps: prio_to_sps.unwrap_or(defaults.prio_to_sps),
            mcs: mcs.unwrap_or(defaults.mcs),
            subchannel_size: subchannel_size.unwrap_or(defaults.subchannel_size),
            pssch_symbols_per_slot: pssch_symbols_per_slot
                .unwrap_or(defaults.pssch_symbols_per_slot),
            numerology: numerology.unwrap_or(defaults.numerology),
            mcs_table: mcs_table.unwrap_or(defaults.mcs_table),
            seed: seed.unwrap_or(defaults.seed),
            verbosity: verbosity.unwrap_or(defaults.verbosity),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "SidelinkConfig(total_subchannels={}, max_tx_trans_num_pssch={}, t1={}, t2={}, mcs={})",
            self.total_subchannels, self.max_tx_trans_num_pssch, self.t1, self.t2, self.mcs
        )
    }
}
