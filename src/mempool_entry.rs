use serde::{Deserialize, Serialize};

use crate::fee_rate::FeeRate;

/// A mempool transaction sample fed to the policy estimator.
///
/// This carries the minimal data the estimator reads off a mempool entry:
/// the fee paid, the serialized size, the height at which the transaction
/// entered the pool, and the inputs needed to age its priority forward to
/// the height it confirmed at.
///
/// # Example
/// ```
/// use bitcoin_policy::MempoolEntry;
///
/// let entry = MempoolEntry::new(10_000, 1_000, 850_000, 0.0, true)
///     .with_input_value(2_500_000);
///
/// // Priority grows as the inputs age in the chain
/// assert!(entry.priority_at(850_010) > entry.priority_at(850_001));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolEntry {
    /// Fee paid, in satoshis
    fee: i64,

    /// Serialized transaction size in bytes
    tx_size: usize,

    /// Size used as the priority divisor (serialized size less the
    /// per-input discount); defaults to the serialized size
    mod_size: usize,

    /// Chain height when the transaction entered the mempool
    height: u32,

    /// Priority when the transaction entered the mempool
    entry_priority: f64,

    /// Total value of the spent outputs, in satoshis; drives priority aging
    input_value: i64,

    /// Whether the transaction had no unconfirmed in-mempool ancestors when
    /// it entered
    clear_at_entry: bool,
}

impl MempoolEntry {
    /// Creates a new mempool entry sample.
    pub fn new(
        fee: i64,
        tx_size: usize,
        height: u32,
        entry_priority: f64,
        clear_at_entry: bool,
    ) -> Self {
        Self {
            fee,
            tx_size,
            mod_size: tx_size,
            height,
            entry_priority,
            input_value: 0,
            clear_at_entry,
        }
    }

    /// Sets the total input value used for priority aging.
    pub fn with_input_value(mut self, input_value: i64) -> Self {
        self.input_value = input_value;
        self
    }

    /// Sets the modified size used as the priority divisor.
    pub fn with_modified_size(mut self, mod_size: usize) -> Self {
        self.mod_size = mod_size;
        self
    }

    /// The fee paid, in satoshis.
    pub fn fee(&self) -> i64 {
        self.fee
    }

    /// The serialized transaction size in bytes.
    pub fn tx_size(&self) -> usize {
        self.tx_size
    }

    /// The chain height at which the transaction entered the mempool.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether the transaction had no unconfirmed mempool ancestors on
    /// arrival. Only such transactions give an unbiased confirmation-latency
    /// sample, since their inclusion never waited on a parent.
    pub fn was_clear_at_entry(&self) -> bool {
        self.clear_at_entry
    }

    /// The entry's fee rate.
    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::from_fee_and_size(self.fee, self.tx_size)
    }

    /// The transaction's priority at `current_height`.
    ///
    /// Priority increases as the spent outputs age: each block of depth adds
    /// `input_value / mod_size` to the priority the transaction entered with.
    pub fn priority_at(&self, current_height: u32) -> f64 {
        if self.mod_size == 0 {
            return self.entry_priority;
        }
        let depth = current_height.saturating_sub(self.height);
        self.entry_priority + depth as f64 * self.input_value as f64 / self.mod_size as f64
    }
}
