//! Allocatable capacity of one scheduling iteration.

use pyo3::prelude::*;
use std::fmt;
use std::ops::AddAssign;

/// Link direction of a scheduling decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Downlink,
    Uplink,
}

impl Direction {
    /// Parse "dl"/"ul" (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dl" | "downlink" => Some(Self::Downlink),
            "ul" | "uplink" => Some(Self::Uplink),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Downlink => write!(f, "DL"),
            Self::Uplink => write!(f, "UL"),
        }
    }
}

/// Frequency/time resources: resource-block groups x OFDM symbols.
///
/// Unsigned by construction, so "negative" quantities cannot be expressed.
/// `sym` must be non-zero wherever it is used as a divisor; the metric
/// functions check this and fail instead of clamping.
#[pyclass]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceQuantity {
    #[pyo3(get, set)]
    pub rbg: u32,
    #[pyo3(get, set)]
    pub sym: u32,
}

impl ResourceQuantity {
    pub fn new(rbg: u32, sym: u32) -> Self {
        Self { rbg, sym }
    }

    /// Resource blocks implied by the RBG count.
    pub fn assignable_rbs(&self, rb_per_rbg: u32) -> u32 {
        self.rbg * rb_per_rbg
    }

    pub fn is_empty(&self) -> bool {
        self.rbg == 0 || self.sym == 0
    }
}

impl AddAssign for ResourceQuantity {
    fn add_assign(&mut self, rhs: Self) {
        self.rbg += rhs.rbg;
        self.sym += rhs.sym;
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RBG: {} Sym: {}", self.rbg, self.sym)
    }
}

#[pymethods]
impl ResourceQuantity {
    #[new]
    fn py_new(rbg: u32, sym: u32) -> Self {
        Self::new(rbg, sym)
    }

    #[pyo3(name = "assignable_rbs")]
    fn py_assignable_rbs(&self, rb_per_rbg: u32) -> u32 {
        self.assignable_rbs(rb_per_rbg)
    }

    fn __repr__(&self) -> String {
        format!("ResourceQuantity(rbg={}, sym={})", self.rbg, self.sym)
    }
}
