use serde::{Deserialize, Serialize};
use std::fmt;

/// A transaction fee rate in satoshis per kilo-virtual-byte.
///
/// Fees are stored and reported per 1000 bytes of transaction size, matching
/// the node's wire and disk conventions. Construction from a fee and a size
/// uses integer division, so sub-satoshi remainders are truncated.
///
/// # Example
/// ```
/// use bitcoin_policy::FeeRate;
///
/// let rate = FeeRate::from_fee_and_size(10_000, 1_000);
/// assert_eq!(rate.fee_per_kb(), 10_000);
/// assert_eq!(rate.fee_for_size(250), 2_500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeeRate {
    sat_per_kb: i64,
}

impl FeeRate {
    /// The zero fee rate, also used as the failure value of fee estimation.
    pub const ZERO: FeeRate = FeeRate { sat_per_kb: 0 };

    /// Creates a fee rate from satoshis per 1000 bytes.
    pub const fn from_sat_per_kb(sat_per_kb: i64) -> Self {
        Self { sat_per_kb }
    }

    /// Creates a fee rate from a total fee paid and the transaction size in
    /// bytes. Returns [`FeeRate::ZERO`] when `size` is zero.
    pub fn from_fee_and_size(fee: i64, size: usize) -> Self {
        if size == 0 {
            return Self::ZERO;
        }
        Self {
            sat_per_kb: fee * 1000 / size as i64,
        }
    }

    /// Returns the fee rate in satoshis per 1000 bytes.
    pub const fn fee_per_kb(&self) -> i64 {
        self.sat_per_kb
    }

    /// Returns the fee this rate charges for a transaction of `size` bytes.
    pub fn fee_for_size(&self, size: usize) -> i64 {
        self.sat_per_kb * size as i64 / 1000
    }

    /// Returns true for the zero rate.
    pub const fn is_zero(&self) -> bool {
        self.sat_per_kb == 0
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat/kvB", self.sat_per_kb)
    }
}
