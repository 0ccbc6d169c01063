/// Internal modules for the bitcoin-policy library.
/// These are implementation details and should not be used directly by library consumers.
pub(crate) mod codec;
pub(crate) mod confirm_stats;

pub(crate) use confirm_stats::TxConfirmStat;
