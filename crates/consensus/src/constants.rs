//! Consensus-wide constants shared by the oracle and the wallet.

/// Coinbase transaction outputs can only be spent after this number of new blocks.
pub const COINBASE_MATURITY: i32 = 100;
/// Headers more than this many seconds ahead of local time are rejected.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;
/// The maximum size of a relayable transaction, in bytes (policy).
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
/// Largest payload a data-carrier output may hold (policy).
pub const MAX_OP_RETURN_RELAY: usize = 80;
/// Current block header version produced by miners.
pub const CURRENT_BLOCK_VERSION: i32 = 4;

/// True once an output mined at `mined_at` has `target` confirmations above it
/// on a chain whose tip is at `best_chain`.
pub fn is_mature(mined_at: i64, best_chain: i64, target: i64) -> bool {
    best_chain.saturating_sub(mined_at) >= target
}
