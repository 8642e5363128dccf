//! Frame/subframe/slot identity.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::cmp::Ordering;
use std::fmt;

use super::SidelinkError;

const SUBFRAMES_PER_FRAME: u64 = 10;

/// Highest NR numerology (960 kHz subcarrier spacing).
pub const MAX_NUMEROLOGY: u8 = 6;

/// A slot identity at a given numerology.
///
/// Every identity is in range: `subframe < 10`, `slot < 2^numerology` and
/// `numerology <= MAX_NUMEROLOGY`. Slots are ordered by their normalized
/// index, so two identities compare the way the slots they name follow each
/// other in time.
#[pyclass]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SfnSf {
    #[pyo3(get)]
    pub(crate) frame: u32,
    #[pyo3(get)]
    pub(crate) subframe: u8,
    #[pyo3(get)]
    pub(crate) slot: u8,
    #[pyo3(get)]
    pub(crate) numerology: u8,
}

impl SfnSf {
    pub fn new(frame: u32, subframe: u8, slot: u8, numerology: u8) -> Result<Self, SidelinkError> {
        let invalid = SidelinkError::InvalidSlotId {
            frame,
            subframe,
            slot,
            numerology,
        };
        if numerology > MAX_NUMEROLOGY
            || subframe as u64 >= SUBFRAMES_PER_FRAME
            || slot as u64 >= 1u64 << numerology
        {
            return Err(invalid);
        }
        Ok(Self {
            frame,
            subframe,
            slot,
            numerology,
        })
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn subframe(&self) -> u8 {
        self.subframe
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    pub fn slots_per_subframe(&self) -> u64 {
        1u64 << self.numerology
    }

    /// Slots elapsed since frame 0, subframe 0, slot 0.
    pub fn normalize(&self) -> u64 {
        (self.frame as u64 * SUBFRAMES_PER_FRAME + self.subframe as u64)
            * self.slots_per_subframe()
            + self.slot as u64
    }

    pub fn from_normalized(index: u64, numerology: u8) -> Result<Self, SidelinkError> {
        if numerology > MAX_NUMEROLOGY {
            return Err(SidelinkError::InvalidConfig(format!(
                "numerology must be <= {}, got {}",
                MAX_NUMEROLOGY, numerology
            )));
        }
        Ok(Self::at_index(index, numerology))
    }

    fn at_index(index: u64, numerology: u8) -> Self {
        let per_subframe = 1u64 << numerology;
        let slot = (index % per_subframe) as u8;
        let subframes = index / per_subframe;
        Self {
            frame: (subframes / SUBFRAMES_PER_FRAME) as u32,
            subframe: (subframes % SUBFRAMES_PER_FRAME) as u8,
            slot,
            numerology,
        }
    }

    /// The identity `slots` slots later.
    pub fn plus(&self, slots: u64) -> Self {
        Self::at_index(self.normalize() + slots, self.numerology)
    }

    pub fn add(&mut self, slots: u64) {
        *self = self.plus(slots);
    }
}

impl Ord for SfnSf {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalize()
            .cmp(&other.normalize())
            .then(self.numerology.cmp(&other.numerology))
    }
}

impl PartialOrd for SfnSf {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SfnSf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FrameNum: {} SubFrameNum: {} SlotNum: {}",
            self.frame, self.subframe, self.slot
        )
    }
}

#[pymethods]
impl SfnSf {
    #[new]
    #[pyo3(signature = (frame, subframe, slot, numerology=2))]
    fn py_new(frame: u32, subframe: u8, slot: u8, numerology: u8) -> PyResult<Self> {
        Self::new(frame, subframe, slot, numerology)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    #[pyo3(name = "normalize")]
    fn py_normalize(&self) -> u64 {
        self.normalize()
    }

    #[pyo3(name = "plus")]
    fn py_plus(&self, slots: u64) -> Self {
        self.plus(slots)
    }

    fn __repr__(&self) -> String {
        format!(
            "SfnSf({}, {}, {}, numerology={})",
            self.frame, self.subframe, self.slot, self.numerology
        )
    }

    fn __str__(&self) -> String {
        self.to_string()
    }
}
