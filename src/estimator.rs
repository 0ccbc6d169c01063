use std::io::{Read, Write};
use tracing::debug;

use crate::error::{PolicyError, Result};
use crate::fee_rate::FeeRate;
use crate::internal::{codec, TxConfirmStat};
use crate::mempool_entry::MempoolEntry;

/// Track confirm delays up to 25 blocks; estimates beyond that aren't made.
pub const MAX_BLOCK_CONFIRMS: usize = 25;

/// Decay of .998 is a half-life of 346 blocks, or about 2.4 days.
pub const DEFAULT_DECAY: f64 = 0.998;

/// Required confirmation rate within the target for a bucket range to count
/// as a success.
pub const MIN_SUCCESS_PCT: f64 = 0.85;

/// Required average of 1 fee-bucket tx per block for statistical significance.
pub const SUFFICIENT_FEETXS: f64 = 1.0;

/// Priority txs are far rarer; an average of 1 per 10 blocks suffices.
pub const SUFFICIENT_PRITXS: f64 = 0.1;

/// Approximately the free-relay priority cutoff.
pub const MIN_PRIORITY_VAL: f64 = 1e8;

/// Lowest format version able to read the current layout. Files whose
/// required version is below this carry the legacy layout.
pub const ESTIMATES_FORMAT_VERSION: i32 = 100_000;

/// Version stamped on freshly written estimates data.
pub const ESTIMATES_WRITER_VERSION: i32 = 110_000;

/// Default fee-rate buckets in sat/kvB, spaced by a factor of 10^(1/12)
/// above 1000 so that powers of ten stay on bucket bounds, with a leading
/// zero bucket and a sentinel top bucket.
pub const DEFAULT_FEE_BUCKETS: [f64; 39] = [
    0.0, 1000.0, 1212.0, 1468.0, 1778.0, 2154.0, 2610.0, 3162.0, 3831.0, 4642.0, 5623.0, 6813.0,
    8254.0, 10000.0, 12115.0, 14678.0, 17783.0, 21544.0, 26102.0, 31622.0, 38312.0, 46416.0,
    56234.0, 68129.0, 82540.0, 100000.0, 121153.0, 146780.0, 177828.0, 215443.0, 261016.0,
    316228.0, 383119.0, 464159.0, 562341.0, 681292.0, 825404.0, 1000000.0, 1e16,
];

/// Default priority buckets spaced by a factor of 10.
pub const DEFAULT_PRIORITY_BUCKETS: [f64; 13] = [
    1e5, 1e6, 1e7, 1e8, 1e9, 1e10, 1e11, 1e12, 1e13, 1e14, 1e15, 1e16, 1e99,
];

/// Default minimum relay fee used to separate low-fee from high-fee
/// transactions.
pub const DEFAULT_MIN_RELAY_FEE: FeeRate = FeeRate::from_sat_per_kb(1000);

/// How high the fee or priority of a confirmed transaction was, relative to
/// the relevant cutoff. Used to decide which table a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueBand {
    Zero,
    Low,
    High,
}

/// Records statistics about the transactions included in each new chain-tip
/// block and answers fee and priority estimates for a confirmation target.
///
/// Two tables are kept: one for transactions that were plausibly included on
/// fee, one for those included on priority. Each incoming sample is routed
/// to at most one of them; samples whose inclusion can't be attributed to
/// either dimension alone are dropped rather than polluting both.
///
/// The estimator is not thread-safe; callers serialize access.
///
/// # Example
/// ```
/// use bitcoin_policy::{BlockPolicyEstimator, MempoolEntry};
///
/// let mut estimator = BlockPolicyEstimator::default();
///
/// let entries: Vec<MempoolEntry> = (0..300)
///     .map(|_| MempoolEntry::new(10_000, 1_000, 849_998, 0.0, true))
///     .collect();
/// estimator.process_block(850_000, &entries);
///
/// // Not enough history yet for an estimate
/// assert!(estimator.estimate_fee(3).is_zero());
/// ```
pub struct BlockPolicyEstimator {
    /// Highest chain height seen; blocks at or below it are side-chain or
    /// re-org noise and are ignored
    best_seen_height: u32,

    /// Cutoff between the low-fee and high-fee bands
    min_relay_fee: FeeRate,

    fee_stats: TxConfirmStat,
    pri_stats: TxConfirmStat,
}

impl BlockPolicyEstimator {
    /// Creates an estimator with the default buckets, decay, and horizon.
    pub fn new(min_relay_fee: FeeRate) -> Self {
        Self {
            best_seen_height: 0,
            min_relay_fee,
            fee_stats: TxConfirmStat::new(
                DEFAULT_FEE_BUCKETS.to_vec(),
                MAX_BLOCK_CONFIRMS,
                DEFAULT_DECAY,
                "FeeRate",
            ),
            pri_stats: TxConfirmStat::new(
                DEFAULT_PRIORITY_BUCKETS.to_vec(),
                MAX_BLOCK_CONFIRMS,
                DEFAULT_DECAY,
                "Priority",
            ),
        }
    }

    /// Creates an estimator with custom buckets and tuning.
    ///
    /// # Arguments
    /// * `fee_buckets` / `priority_buckets` - strictly increasing bucket
    ///   upper bounds, between 2 and 1000 of each
    /// * `max_confirms` - confirmation horizon to track, 1 to 1008 blocks
    /// * `decay` - per-block moving-average decay, strictly between 0 and 1
    /// * `min_relay_fee` - cutoff between the low-fee and high-fee bands
    pub fn with_config(
        fee_buckets: Vec<f64>,
        priority_buckets: Vec<f64>,
        max_confirms: usize,
        decay: f64,
        min_relay_fee: FeeRate,
    ) -> Result<Self> {
        for (label, buckets) in [("fee", &fee_buckets), ("priority", &priority_buckets)] {
            if buckets.len() < 2 || buckets.len() > 1000 {
                return Err(PolicyError::invalid_config(format!(
                    "between 2 and 1000 {label} buckets must be provided"
                )));
            }
            if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(PolicyError::invalid_config(format!(
                    "{label} bucket bounds must be strictly increasing"
                )));
            }
        }
        if max_confirms < 1 || max_confirms > 1008 {
            return Err(PolicyError::invalid_config(
                "confirmation horizon must be between 1 and 1008 blocks",
            ));
        }
        if !(decay > 0.0 && decay < 1.0) {
            return Err(PolicyError::invalid_config(
                "decay must be between 0 and 1 (non-inclusive)",
            ));
        }

        Ok(Self {
            best_seen_height: 0,
            min_relay_fee,
            fee_stats: TxConfirmStat::new(fee_buckets, max_confirms, decay, "FeeRate"),
            pri_stats: TxConfirmStat::new(priority_buckets, max_confirms, decay, "Priority"),
        })
    }

    /// The highest chain height processed so far.
    pub fn best_seen_height(&self) -> u32 {
        self.best_seen_height
    }

    /// Records one transaction confirmed at `block_height` into the
    /// current-block accumulators.
    ///
    /// Transactions that waited on in-mempool ancestors give biased latency
    /// samples and are skipped, as are entries whose recorded height is not
    /// below the confirming block (re-org leftovers).
    pub fn process_transaction(&mut self, block_height: u32, entry: &MempoolEntry) {
        if !entry.was_clear_at_entry() {
            return;
        }

        let blocks_to_confirm = block_height as i64 - entry.height() as i64;
        if blocks_to_confirm <= 0 {
            return;
        }

        let fee_rate = entry.fee_rate();
        // Priority at confirmation, not at entry: the entry-time priority can
        // be tiny and change quickly as inputs age
        let cur_pri = entry.priority_at(block_height);

        let fee_band = if entry.fee() == 0 {
            ValueBand::Zero
        } else if fee_rate <= self.min_relay_fee {
            ValueBand::Low
        } else {
            ValueBand::High
        };
        let pri_band = if cur_pri < MIN_PRIORITY_VAL {
            ValueBand::Low
        } else {
            ValueBand::High
        };

        match (fee_band, pri_band) {
            (ValueBand::High, ValueBand::Low) => self
                .fee_stats
                .record(blocks_to_confirm, fee_rate.fee_per_kb() as f64),
            (ValueBand::Zero, _) | (ValueBand::Low, ValueBand::High) => {
                self.pri_stats.record(blocks_to_confirm, cur_pri)
            }
            // Inclusion can't be attributed to fee or priority alone
            _ => {}
        }
    }

    /// Processes all the transactions that confirmed in a new chain-tip
    /// block, folding them into the moving averages.
    ///
    /// Blocks at or below the best seen height are ignored: assuming
    /// side-chains and re-orgs are random, they don't affect the estimates.
    pub fn process_block(&mut self, block_height: u32, entries: &[MempoolEntry]) {
        if block_height <= self.best_seen_height {
            return;
        }
        self.best_seen_height = block_height;

        self.fee_stats.clear_current();
        self.pri_stats.clear_current();

        for entry in entries {
            self.process_transaction(block_height, entry);
        }

        self.fee_stats.update_moving_averages();
        self.pri_stats.update_moving_averages();

        debug!(
            target: "estimatefee",
            "processed block {} with {} entries",
            block_height,
            entries.len()
        );
    }

    /// Estimates the fee rate needed to confirm within `conf_target` blocks.
    ///
    /// Returns [`FeeRate::ZERO`] when the target is zero or beyond the
    /// tracked horizon, or when there isn't enough data yet.
    pub fn estimate_fee(&self, conf_target: u32) -> FeeRate {
        if conf_target == 0 || conf_target as usize > self.fee_stats.max_confirms() {
            return FeeRate::ZERO;
        }

        let median =
            self.fee_stats
                .estimate_median(conf_target as usize, SUFFICIENT_FEETXS, MIN_SUCCESS_PCT);
        if median < 0.0 {
            return FeeRate::ZERO;
        }
        FeeRate::from_sat_per_kb(median as i64)
    }

    /// Estimates the priority needed to confirm within `conf_target` blocks.
    ///
    /// Returns `-1.0` when the target is zero or beyond the tracked horizon,
    /// or when there isn't enough data yet.
    pub fn estimate_priority(&self, conf_target: u32) -> f64 {
        if conf_target == 0 || conf_target as usize > self.pri_stats.max_confirms() {
            return -1.0;
        }

        self.pri_stats
            .estimate_median(conf_target as usize, SUFFICIENT_PRITXS, MIN_SUCCESS_PCT)
    }

    /// Writes the estimation state in the current format.
    pub fn serialize<W: Write>(&self, sink: &mut W) -> Result<()> {
        self.serialize_version(sink, ESTIMATES_WRITER_VERSION)
    }

    /// Writes the estimation state, using the legacy layout when `version`
    /// predates the current format.
    pub(crate) fn serialize_version<W: Write>(&self, sink: &mut W, version: i32) -> Result<()> {
        let required = version.min(ESTIMATES_FORMAT_VERSION);
        codec::write_i32(sink, required)?;
        codec::write_i32(sink, version)?;
        codec::write_i32(sink, self.best_seen_height as i32)?;
        self.fee_stats.serialize(sink, required)?;
        self.pri_stats.serialize(sink, required)?;
        Ok(())
    }

    /// Reads estimation state previously written by [`serialize`], accepting
    /// both supported format versions.
    ///
    /// Any structural or value-range violation aborts the read with
    /// [`PolicyError::CorruptEstimatesFile`] and nothing is constructed.
    ///
    /// [`serialize`]: BlockPolicyEstimator::serialize
    pub fn deserialize<R: Read>(source: &mut R, min_relay_fee: FeeRate) -> Result<Self> {
        let version_required = codec::read_i32(source)?;
        let version_written = codec::read_i32(source)?;
        if version_required > ESTIMATES_WRITER_VERSION {
            return Err(PolicyError::UnsupportedVersion {
                file_version: version_required,
                supported: ESTIMATES_WRITER_VERSION,
            });
        }

        let best_seen_height = codec::read_i32(source)?;
        if best_seen_height < 0 {
            return Err(PolicyError::corrupt("negative best seen height"));
        }

        let fee_stats = TxConfirmStat::deserialize(source, version_required, "FeeRate")?;
        let pri_stats = TxConfirmStat::deserialize(source, version_required, "Priority")?;

        debug!(
            target: "estimatefee",
            "read estimates up to height {} (written by version {})",
            best_seen_height,
            version_written
        );
        fee_stats.debug_print();
        pri_stats.debug_print();

        Ok(Self {
            best_seen_height: best_seen_height as u32,
            min_relay_fee,
            fee_stats,
            pri_stats,
        })
    }
}

impl Default for BlockPolicyEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_RELAY_FEE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// An entry confirming on fee: positive fee above the relay cutoff,
    /// negligible priority.
    fn fee_entry(fee: i64, size: usize, height: u32) -> MempoolEntry {
        MempoolEntry::new(fee, size, height, 0.0, true)
    }

    /// An entry confirming on priority: zero fee, priority far above the
    /// cutoff.
    fn priority_entry(priority: f64, height: u32) -> MempoolEntry {
        MempoolEntry::new(0, 250, height, priority, true)
    }

    fn serialized(estimator: &BlockPolicyEstimator) -> Vec<u8> {
        let mut bytes = Vec::new();
        estimator.serialize(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_ignores_non_clear_entries() {
        let mut estimator = BlockPolicyEstimator::default();
        let before = serialized(&estimator);

        let entry = MempoolEntry::new(10_000, 1_000, 998, 0.0, false);
        estimator.process_block(1_000, &[entry]);

        // The block still advances the height, but no sample lands
        assert_eq!(estimator.best_seen_height(), 1_000);
        assert_ne!(serialized(&estimator), before);
        assert!(estimator.estimate_fee(2).is_zero());
    }

    #[test]
    fn test_reorg_blocks_ignored() {
        let mut estimator = BlockPolicyEstimator::default();
        estimator.process_block(1_000, &[fee_entry(10_000, 1_000, 998)]);
        let after_first = serialized(&estimator);

        estimator.process_block(999, &[fee_entry(20_000, 1_000, 997)]);
        estimator.process_block(1_000, &[fee_entry(20_000, 1_000, 998)]);

        assert_eq!(serialized(&estimator), after_first);
        assert_eq!(estimator.best_seen_height(), 1_000);
    }

    #[test]
    fn test_entry_at_or_above_block_height_skipped() {
        let mut estimator = BlockPolicyEstimator::default();
        let empty = {
            let mut e = BlockPolicyEstimator::default();
            e.process_block(1_000, &[]);
            serialized(&e)
        };

        estimator.process_block(1_000, &[fee_entry(10_000, 1_000, 1_000)]);
        assert_eq!(serialized(&estimator), empty);
    }

    #[test]
    fn test_out_of_range_targets() {
        let estimator = BlockPolicyEstimator::default();
        assert!(estimator.estimate_fee(0).is_zero());
        assert!(estimator.estimate_fee(MAX_BLOCK_CONFIRMS as u32 + 1).is_zero());
        assert_eq!(estimator.estimate_priority(0), -1.0);
        assert_eq!(estimator.estimate_priority(26), -1.0);
    }

    #[test]
    fn test_zero_fee_routes_to_priority() {
        let mut estimator = BlockPolicyEstimator::default();
        for height in 1..=40u32 {
            let entries: Vec<_> = (0..100).map(|_| priority_entry(1e9, height - 1)).collect();
            estimator.process_block(height, &entries);
        }

        assert!(estimator.estimate_fee(5).is_zero());
        let pri = estimator.estimate_priority(5);
        assert!((pri - 1e9).abs() / 1e9 < 1e-9, "priority was {pri}");
    }

    #[test]
    fn test_ambiguous_entries_dropped() {
        let mut estimator = BlockPolicyEstimator::default();
        for height in 1..=40u32 {
            // High fee and high priority: attributable to neither alone
            let entries: Vec<_> = (0..100)
                .map(|_| MempoolEntry::new(10_000, 1_000, height - 1, 1e9, true))
                .collect();
            estimator.process_block(height, &entries);
        }

        assert!(estimator.estimate_fee(5).is_zero());
        assert_eq!(estimator.estimate_priority(5), -1.0);
    }

    #[test]
    fn test_low_fee_high_priority_routes_to_priority() {
        let mut estimator = BlockPolicyEstimator::default();
        for height in 1..=40u32 {
            // 500 sat/kvB is below the 1000 sat/kvB relay cutoff
            let entries: Vec<_> = (0..100)
                .map(|_| MempoolEntry::new(500, 1_000, height - 1, 1e9, true))
                .collect();
            estimator.process_block(height, &entries);
        }

        assert!(estimator.estimate_fee(5).is_zero());
        assert!(estimator.estimate_priority(5) > 0.0);
    }

    #[test]
    fn test_legacy_version_roundtrip() {
        let mut estimator = BlockPolicyEstimator::default();
        for height in 1..=10u32 {
            estimator.process_block(height, &[fee_entry(10_000, 1_000, height - 1)]);
        }

        let legacy = 99_999;
        let mut bytes = Vec::new();
        estimator.serialize_version(&mut bytes, legacy).unwrap();
        let back =
            BlockPolicyEstimator::deserialize(&mut Cursor::new(&bytes), DEFAULT_MIN_RELAY_FEE)
                .unwrap();

        let mut again = Vec::new();
        back.serialize_version(&mut again, legacy).unwrap();
        assert_eq!(again, bytes);
        assert_eq!(back.best_seen_height(), 10);
    }

    #[test]
    fn test_future_version_rejected() {
        let estimator = BlockPolicyEstimator::default();
        let mut bytes = serialized(&estimator);
        bytes[..4].copy_from_slice(&(ESTIMATES_WRITER_VERSION + 1).to_le_bytes());

        let result =
            BlockPolicyEstimator::deserialize(&mut Cursor::new(&bytes), DEFAULT_MIN_RELAY_FEE);
        assert!(matches!(
            result,
            Err(PolicyError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_with_config_validation() {
        let fee = DEFAULT_FEE_BUCKETS.to_vec();
        let pri = DEFAULT_PRIORITY_BUCKETS.to_vec();

        assert!(BlockPolicyEstimator::with_config(
            fee.clone(),
            pri.clone(),
            25,
            0.998,
            DEFAULT_MIN_RELAY_FEE
        )
        .is_ok());

        // Too few buckets
        let result = BlockPolicyEstimator::with_config(
            vec![0.0],
            pri.clone(),
            25,
            0.998,
            DEFAULT_MIN_RELAY_FEE,
        );
        assert!(matches!(result, Err(PolicyError::InvalidConfig(_))));

        // Non-increasing bounds
        let result = BlockPolicyEstimator::with_config(
            vec![0.0, 1000.0, 1000.0],
            pri.clone(),
            25,
            0.998,
            DEFAULT_MIN_RELAY_FEE,
        );
        assert!(matches!(result, Err(PolicyError::InvalidConfig(_))));

        // Horizon too deep
        let result = BlockPolicyEstimator::with_config(
            fee.clone(),
            pri.clone(),
            1009,
            0.998,
            DEFAULT_MIN_RELAY_FEE,
        );
        assert!(matches!(result, Err(PolicyError::InvalidConfig(_))));

        // Decay on the boundary
        let result =
            BlockPolicyEstimator::with_config(fee, pri, 25, 1.0, DEFAULT_MIN_RELAY_FEE);
        assert!(matches!(result, Err(PolicyError::InvalidConfig(_))));
    }
}
