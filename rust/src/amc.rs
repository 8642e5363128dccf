//! Throughput-rate model (adaptive modulation and coding).
//!
//! Maps an MCS index and a resource-block count to a transport block size
//! following the TS 38.214 §5.1.3.2 procedure, single layer, with 12 resource
//! elements per resource block.

use thiserror::Error;

/// Errors raised by the rate model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmcError {
    #[error("MCS {mcs} outside table range 0..={max}")]
    McsOutOfRange { mcs: u8, max: u8 },
    #[error("Unknown MCS table: {0}")]
    UnknownTable(u8),
}

/// Anything that can turn (mcs, resource blocks) into a transport block size.
///
/// The schedulers are generic over this so that a fixed-rate model can be
/// plugged in without virtual dispatch in the per-slot loop.
pub trait RateModel {
    /// Transport block size in bits. Zero resource blocks yield zero bits.
    fn tb_size_bits(&self, mcs: u8, num_rb: u32) -> Result<u32, AmcError>;
}

/// MCS index tables from TS 38.214.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum McsTable {
    /// Table 5.1.3.1-1, up to 64QAM (MCS 0..=28).
    ///
    /// The standard's spectral efficiency dips slightly from MCS 16 to 17, so
    /// the TB size is only monotone in MCS outside that step.
    Qam64,
    /// Table 5.1.3.1-2, up to 256QAM (MCS 0..=27). Strictly monotone.
    Qam256,
}

impl McsTable {
    /// Select a table by its 38.214 number (1 or 2).
    pub fn from_index(index: u8) -> Result<Self, AmcError> {
        match index {
            1 => Ok(Self::Qam64),
            2 => Ok(Self::Qam256),
            other => Err(AmcError::UnknownTable(other)),
        }
    }

    /// (modulation order, target code rate x 1024) rows.
    fn rows(self) -> &'static [(u8, f64)] {
        match self {
            Self::Qam64 => &MCS_TABLE_QAM64,
            Self::Qam256 => &MCS_TABLE_QAM256,
        }
    }

    /// Highest valid MCS index.
    pub fn max_mcs(self) -> u8 {
        (self.rows().len() - 1) as u8
    }
}

const MCS_TABLE_QAM64: [(u8, f64); 29] = [
    (2, 120.0),
    (2, 157.0),
    (2, 193.0),
    (2, 251.0),
    (2, 308.0),
    (2, 379.0),
    (2, 449.0),
    (2, 526.0),
    (2, 602.0),
    (2, 679.0),
    (4, 340.0),
    (4, 378.0),
    (4, 434.0),
    (4, 490.0),
    (4, 553.0),
    (4, 616.0),
    (4, 658.0),
    (6, 438.0),
    (6, 466.0),
    (6, 517.0),
    (6, 567.0),
    (6, 616.0),
    (6, 666.0),
    (6, 719.0),
    (6, 772.0),
    (6, 822.0),
    (6, 873.0),
    (6, 910.0),
    (6, 948.0),
];

const MCS_TABLE_QAM256: [(u8, f64); 28] = [
    (2, 120.0),
    (2, 193.0),
    (2, 308.0),
    (2, 449.0),
    (2, 602.0),
    (4, 378.0),
    (4, 434.0),
    (4, 490.0),
    (4, 553.0),
    (4, 616.0),
    (4, 658.0),
    (6, 466.0),
    (6, 517.0),
    (6, 567.0),
    (6, 616.0),
    (6, 666.0),
    (6, 719.0),
    (6, 772.0),
    (6, 822.0),
    (6, 873.0),
    (8, 682.5),
    (8, 711.0),
    (8, 754.0),
    (8, 797.0),
    (8, 841.0),
    (8, 885.0),
    (8, 916.5),
    (8, 948.0),
];

/// TS 38.214 Table 5.1.3.2-1, TBS for N_info <= 3824.
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176, 184,
    192, 208, 224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480, 504, 528,
    552, 576, 608, 640, 672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064, 1128, 1160, 1192,
    1224, 1256, 1288, 1320, 1352, 1416, 1480, 1544, 1608, 1672, 1736, 1800, 1864, 1928, 2024, 2088,
    2152, 2216, 2280, 2408, 2472, 2536, 2600, 2664, 2728, 2792, 2856, 2976, 3104, 3240, 3368, 3496,
    3624, 3752, 3824,
];

/// Subcarriers per resource block.
const RE_PER_RB: u32 = 12;

/// Table-driven rate model.
#[derive(Clone, Copy, Debug)]
pub struct Amc {
    table: McsTable,
}

impl Amc {
    pub fn new(table: McsTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> McsTable {
        self.table
    }
}

impl Default for Amc {
    fn default() -> Self {
        Self::new(McsTable::Qam256)
    }
}

impl RateModel for Amc {
    fn tb_size_bits(&self, mcs: u8, num_rb: u32) -> Result<u32, AmcError> {
        let rows = self.table.rows();
        let (qm, rate_x1024) = *rows.get(mcs as usize).ok_or(AmcError::McsOutOfRange {
            mcs,
            max: self.table.max_mcs(),
        })?;
        if num_rb == 0 {
            return Ok(0);
        }

        let code_rate = rate_x1024 / 1024.0;
        let n_re = (RE_PER_RB as f64) * (num_rb as f64);
        let n_info = n_re * code_rate * qm as f64;

        Ok(quantize_tbs(n_info, code_rate))
    }
}

/// Quantize N_info to a valid transport block size (TS 38.214 §5.1.3.2 steps 3-4).
fn quantize_tbs(n_info: f64, code_rate: f64) -> u32 {
    if n_info <= 3824.0 {
        let n = (n_info.log2().floor() as i32 - 6).max(3);
        let step = 2f64.powi(n);
        let n_info_q = (step * (n_info / step).floor()).max(24.0) as u32;
        // Table tops out at 3824 and n_info_q <= n_info <= 3824
        let idx = TBS_TABLE.partition_point(|&tbs| tbs < n_info_q);
        TBS_TABLE[idx.min(TBS_TABLE.len() - 1)]
    } else {
        let n = (n_info - 24.0).log2().floor() as i32 - 5;
        let step = 2f64.powi(n);
        let n_info_q = (step * ((n_info - 24.0) / step).round()).max(3840.0);
        let with_crc = n_info_q + 24.0;
        let segments = if code_rate <= 0.25 {
            (with_crc / 3816.0).ceil()
        } else if n_info_q > 8424.0 {
            (with_crc / 8424.0).ceil()
        } else {
            1.0
        };
        (8.0 * segments * (with_crc / (8.0 * segments)).ceil() - 24.0) as u32
    }
}
