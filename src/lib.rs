//! Bitcoin Policy - parallel validation and fee estimation primitives
//!
//! This library provides two independent cores extracted from full-node
//! internals:
//!
//! - [`CheckQueue`] / [`QueueScope`]: a master/worker pool that evaluates a
//!   large batch of independent boolean checks across a fixed set of
//!   threads, short-circuiting as soon as any check fails.
//! - [`BlockPolicyEstimator`]: bucketed, exponentially decayed statistics
//!   over confirmed transactions, answering "what fee rate (or priority)
//!   does a transaction need to confirm within N blocks?", with a versioned
//!   binary on-disk format.
//!
//! # Example
//! ```no_run
//! use bitcoin_policy::{BlockPolicyEstimator, CheckQueue, MempoolEntry, QueueScope};
//!
//! // Evaluate a batch of script checks in parallel
//! let queue = CheckQueue::new(4);
//! queue.start();
//! let mut scope = QueueScope::new(Some(&queue));
//! scope.add((0..10_000).map(|_| || true).collect());
//! assert!(scope.wait());
//!
//! // Track confirmed transactions and estimate fees
//! let mut estimator = BlockPolicyEstimator::default();
//! let entries = vec![MempoolEntry::new(10_000, 1_000, 849_999, 0.0, true)];
//! estimator.process_block(850_000, &entries);
//!
//! let rate = estimator.estimate_fee(3);
//! println!("fee for a 3-block target: {rate}");
//! ```

// Public modules
pub mod error;

// Data structures
mod check_queue;
mod estimator;
mod fee_rate;
mod mempool_entry;

// Internal implementation modules
pub(crate) mod internal;

// Public exports
pub use check_queue::{Check, CheckQueue, QueueScope, WORKER_SLOTS};
pub use error::{PolicyError, Result};
pub use estimator::{
    BlockPolicyEstimator, DEFAULT_DECAY, DEFAULT_FEE_BUCKETS, DEFAULT_MIN_RELAY_FEE,
    DEFAULT_PRIORITY_BUCKETS, ESTIMATES_FORMAT_VERSION, ESTIMATES_WRITER_VERSION,
    MAX_BLOCK_CONFIRMS, MIN_PRIORITY_VAL, MIN_SUCCESS_PCT, SUFFICIENT_FEETXS, SUFFICIENT_PRITXS,
};
pub use fee_rate::FeeRate;
pub use mempool_entry::MempoolEntry;
