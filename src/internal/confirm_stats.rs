use ndarray::{Array1, Array2};
use std::io::{Read, Write};
use tracing::debug;

use crate::error::{PolicyError, Result};
use crate::estimator::ESTIMATES_FORMAT_VERSION;
use crate::internal::codec;

/// Bucketed confirmation statistics for one data type (fee rate or priority).
///
/// Transactions are lumped into a bucket according to their approximate fee
/// rate or priority, and the tables track how long transactions in each
/// bucket took to be included in a block. Two sets of tables are kept: the
/// exponentially decayed moving averages over all processed blocks, and the
/// raw accumulators for the block currently being assembled.
pub(crate) struct TxConfirmStat {
    /// Upper bound of each bucket's range (non-inclusive), strictly
    /// increasing; the last entry is a sentinel that absorbs everything above
    /// the real bounds
    buckets: Vec<f64>,

    /// Moving average of the number of txs in each bucket
    tx_ct_avg: Array1<f64>,
    /// Totals for the current block, fed into the moving average
    cur_block_tx_ct: Array1<f64>,

    /// Moving average of the number of txs in bucket x confirmed within
    /// y+1 blocks; shape is max_confirms x buckets
    conf_avg: Array2<f64>,
    cur_block_conf: Array2<f64>,

    /// Moving average of the summed fee rate or priority in each bucket
    avg: Array1<f64>,
    cur_block_val: Array1<f64>,

    /// Per-block multiplicative decay of the moving averages
    decay: f64,

    /// Data type label for log output
    label: String,
}

impl TxConfirmStat {
    /// Allocates zeroed tables over the given bucket bounds.
    ///
    /// `buckets` must hold at least two strictly increasing upper bounds,
    /// `max_confirms` at least one block, and `decay` must lie strictly
    /// between zero and one.
    pub(crate) fn new(
        buckets: Vec<f64>,
        max_confirms: usize,
        decay: f64,
        label: impl Into<String>,
    ) -> Self {
        debug_assert!(buckets.len() >= 2);
        debug_assert!(max_confirms >= 1);
        debug_assert!(decay > 0.0 && decay < 1.0);

        let n = buckets.len();
        Self {
            buckets,
            tx_ct_avg: Array1::zeros(n),
            cur_block_tx_ct: Array1::zeros(n),
            conf_avg: Array2::zeros((max_confirms, n)),
            cur_block_conf: Array2::zeros((max_confirms, n)),
            avg: Array1::zeros(n),
            cur_block_val: Array1::zeros(n),
            decay,
            label: label.into(),
        }
    }

    /// The number of confirms these tables track.
    pub(crate) fn max_confirms(&self) -> usize {
        self.conf_avg.nrows()
    }

    /// Maps a value to its bucket: the least index whose upper bound is
    /// strictly greater than the value. Values at or above the largest real
    /// bound saturate into the sentinel top bucket.
    fn bucket_index(&self, val: f64) -> usize {
        self.buckets
            .partition_point(|&bound| bound <= val)
            .min(self.buckets.len() - 1)
    }

    /// Zeroes the current-block accumulators to start counting a new block.
    pub(crate) fn clear_current(&mut self) {
        self.cur_block_conf.fill(0.0);
        self.cur_block_tx_ct.fill(0.0);
        self.cur_block_val.fill(0.0);
    }

    /// Records one confirmed transaction in the current block's stats.
    ///
    /// `blocks_to_confirm` is 1-based; values below 1 are ignored. A
    /// transaction that took longer than the tracked horizon still counts
    /// toward the bucket totals, it just never registers as confirmed.
    pub(crate) fn record(&mut self, blocks_to_confirm: i64, val: f64) {
        if blocks_to_confirm < 1 {
            return;
        }
        let bucket_index = self.bucket_index(val);
        for y in (blocks_to_confirm as usize - 1)..self.max_confirms() {
            self.cur_block_conf[[y, bucket_index]] += 1.0;
        }
        self.cur_block_tx_ct[bucket_index] += 1.0;
        self.cur_block_val[bucket_index] += val;
    }

    /// Folds the current block's accumulators into the moving averages.
    pub(crate) fn update_moving_averages(&mut self) {
        let (max_confirms, n) = self.conf_avg.dim();
        for x in 0..n {
            for y in 0..max_confirms {
                self.conf_avg[[y, x]] =
                    self.conf_avg[[y, x]] * self.decay + self.cur_block_conf[[y, x]];
            }
            self.avg[x] = self.avg[x] * self.decay + self.cur_block_val[x];
            self.tx_ct_avg[x] = self.tx_ct_avg[x] * self.decay + self.cur_block_tx_ct[x];
        }
    }

    /// Estimates the median value whose transactions still confirm within
    /// `conf_target` blocks at the required success rate.
    ///
    /// Buckets are combined, starting from the highest values, until the
    /// combined range holds enough data points (`sufficient_tx_val` scaled by
    /// the moving average's effective window). The walk descends while each
    /// qualifying range keeps confirming at `min_success` or better; the last
    /// range that did is the answer, reported as the average value of its
    /// median bucket. Returns -1 when no range qualifies.
    ///
    /// `conf_target` must be within `1..=max_confirms`; the estimator
    /// short-circuits targets outside that range before calling.
    pub(crate) fn estimate_median(
        &self,
        conf_target: usize,
        sufficient_tx_val: f64,
        min_success: f64,
    ) -> f64 {
        debug_assert!(conf_target >= 1 && conf_target <= self.max_confirms());

        let max_bucket_index = self.buckets.len() - 1;
        let required_samples = sufficient_tx_val / (1.0 - self.decay);

        // Counters for the bucket range currently being combined
        let mut n_conf = 0.0;
        let mut total_num = 0.0;

        // The best range is the last one that still confirmed at the
        // required success rate
        let mut cur_high_bucket = max_bucket_index as isize;
        let mut best_high_bucket = max_bucket_index;
        let mut best_low_bucket = max_bucket_index;
        let mut found_answer = false;

        let mut bucket = max_bucket_index as isize;
        while bucket >= 0 {
            let b = bucket as usize;
            n_conf += self.conf_avg[[conf_target - 1, b]];
            total_num += self.tx_ct_avg[b];

            if total_num >= required_samples {
                let cur_pct = n_conf / total_num;

                // No longer getting confirmed at the success rate
                if cur_pct < min_success {
                    break;
                }

                found_answer = true;
                n_conf = 0.0;
                total_num = 0.0;
                best_high_bucket = cur_high_bucket as usize;
                best_low_bucket = b;
                cur_high_bucket = bucket - 1;
            }
            bucket -= 1;
        }

        // Report the average value of the bucket holding the median
        // transaction of the best range. The true median isn't recoverable
        // since individual transactions aren't kept.
        let mut median = -1.0;
        let mut tx_sum = 0.0;
        for j in best_low_bucket..=best_high_bucket {
            tx_sum += self.tx_ct_avg[j];
        }
        if found_answer && tx_sum != 0.0 {
            tx_sum /= 2.0;
            for j in best_low_bucket..=best_high_bucket {
                if self.tx_ct_avg[j] < tx_sum {
                    tx_sum -= self.tx_ct_avg[j];
                } else {
                    median = self.avg[j] / self.tx_ct_avg[j];
                    break;
                }
            }
        }

        debug!(
            target: "estimatefee",
            "{:3}: {} needed: {:12.5} from buckets {:8} - {:8}  cur range {:6.2}%  {:8.1}/{:8.1}",
            conf_target,
            self.label,
            median,
            self.buckets[best_low_bucket],
            self.buckets[best_high_bucket],
            100.0 * n_conf / total_num,
            n_conf,
            total_num,
        );

        median
    }

    /// Emits one debug line per bucket with the decayed counts and the
    /// confirmation percentages at a few key depths.
    pub(crate) fn debug_print(&self) {
        if self.max_confirms() < 16 {
            return;
        }
        for j in 0..self.buckets.len() {
            debug!(
                target: "estimatefee",
                "{} bucket {:12.5e}: {:12.2} txs, {:6.2}%:1, {:6.2}%:2, {:6.2}%:3, {:6.2}%:4, {:6.2}%:8, {:6.2}%:16, avg {:12.5e}",
                self.label,
                self.buckets[j],
                self.tx_ct_avg[j] * (1.0 - self.decay),
                100.0 * self.conf_avg[[0, j]] / self.tx_ct_avg[j],
                100.0 * self.conf_avg[[1, j]] / self.tx_ct_avg[j],
                100.0 * self.conf_avg[[2, j]] / self.tx_ct_avg[j],
                100.0 * self.conf_avg[[3, j]] / self.tx_ct_avg[j],
                100.0 * self.conf_avg[[7, j]] / self.tx_ct_avg[j],
                100.0 * self.conf_avg[[15, j]] / self.tx_ct_avg[j],
                self.avg[j] / self.tx_ct_avg[j],
            );
        }
    }

    /// Writes the moving-average state in the given format version. The
    /// current-block accumulators are transient and never persisted.
    pub(crate) fn serialize<W: Write>(&self, sink: &mut W, version: i32) -> Result<()> {
        codec::write_f64(sink, self.decay)?;
        if version < ESTIMATES_FORMAT_VERSION {
            codec::write_u64(sink, self.max_confirms() as u64)?;
        }
        codec::write_f64_seq(sink, &self.buckets)?;
        codec::write_f64_seq(sink, self.avg.as_slice().expect("contiguous"))?;
        codec::write_f64_seq(sink, self.tx_ct_avg.as_slice().expect("contiguous"))?;
        if version >= ESTIMATES_FORMAT_VERSION {
            codec::write_compact_size(sink, self.max_confirms() as u64)?;
        }
        for row in self.conf_avg.rows() {
            codec::write_f64_seq(sink, row.as_slice().expect("contiguous"))?;
        }
        Ok(())
    }

    /// Reads saved state, replacing nothing until the whole table has been
    /// read and validated.
    pub(crate) fn deserialize<R: Read>(
        source: &mut R,
        version: i32,
        label: impl Into<String>,
    ) -> Result<Self> {
        const MAX_BUCKETS: u64 = 1000;
        const MAX_CONFIRMS: u64 = 6 * 24 * 7; // one week of blocks

        let decay = codec::read_f64(source)?;
        if !(decay > 0.0 && decay < 1.0) {
            return Err(PolicyError::corrupt(
                "decay must be between 0 and 1 (non-inclusive)",
            ));
        }

        let legacy_max_confirms = if version < ESTIMATES_FORMAT_VERSION {
            let max_confirms = codec::read_u64(source)?;
            if max_confirms < 1 || max_confirms > MAX_CONFIRMS {
                return Err(PolicyError::corrupt(
                    "must maintain estimates for between 1 and 1008 (one week) confirms",
                ));
            }
            Some(max_confirms)
        } else {
            None
        };

        let buckets = codec::read_f64_seq(source, MAX_BUCKETS)?;
        let n = buckets.len();
        if n <= 1 {
            return Err(PolicyError::corrupt(
                "must have between 2 and 1000 fee/pri buckets",
            ));
        }
        let avg = codec::read_f64_seq(source, MAX_BUCKETS)?;
        if avg.len() != n {
            return Err(PolicyError::corrupt("mismatch in average bucket count"));
        }
        let tx_ct_avg = codec::read_f64_seq(source, MAX_BUCKETS)?;
        if tx_ct_avg.len() != n {
            return Err(PolicyError::corrupt("mismatch in tx count bucket count"));
        }

        let max_confirms = match legacy_max_confirms {
            Some(max_confirms) => max_confirms,
            None => {
                let max_confirms = codec::read_compact_size(source)?;
                if max_confirms < 1 || max_confirms > MAX_CONFIRMS {
                    return Err(PolicyError::corrupt(
                        "must maintain estimates for between 1 and 1008 (one week) confirms",
                    ));
                }
                max_confirms
            }
        };

        let mut conf_rows = Vec::with_capacity(max_confirms as usize * n);
        for _ in 0..max_confirms {
            let row = codec::read_f64_seq(source, MAX_BUCKETS)?;
            if row.len() != n {
                return Err(PolicyError::corrupt(
                    "mismatch in conf average bucket count",
                ));
            }
            conf_rows.extend_from_slice(&row);
        }
        let conf_avg = Array2::from_shape_vec((max_confirms as usize, n), conf_rows)
            .expect("row count and width were validated");

        Ok(Self {
            buckets,
            tx_ct_avg: Array1::from_vec(tx_ct_avg),
            cur_block_tx_ct: Array1::zeros(n),
            cur_block_conf: Array2::zeros((max_confirms as usize, n)),
            conf_avg,
            avg: Array1::from_vec(avg),
            cur_block_val: Array1::zeros(n),
            decay,
            label: label.into(),
        })
    }
}
