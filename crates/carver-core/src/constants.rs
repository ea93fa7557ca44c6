//! Protocol and engine constants.

/// Satoshis per coin. Node RPC reports values in coins; the ledger stores
/// integer satoshis.
pub const COIN: i64 = 100_000_000;

/// Confirmations required before a stored block is considered final.
pub const DEFAULT_BLOCK_CONFIRMATIONS: u64 = 21;

/// Normal-tier address cache capacity. Exceeding it drops the whole tier.
pub const DEFAULT_ADDRESS_CACHE_LIMIT: usize = 50_000;

/// Movements fetched per unwind pass.
pub const DEFAULT_UNWIND_BATCH_SIZE: usize = 1_000;

/// Node RPC request timeout in seconds.
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 8;

/// Name of the exclusive lock taken by the sync process.
pub const SYNC_LOCK_NAME: &str = "block";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_coin_is_one_hundred_million_satoshis() {
        assert_eq!(COIN, 100_000_000);
    }

    #[test]
    fn defaults_are_sane() {
        assert!(DEFAULT_BLOCK_CONFIRMATIONS > 0);
        assert!(DEFAULT_ADDRESS_CACHE_LIMIT > 0);
        assert!(DEFAULT_UNWIND_BATCH_SIZE > 0);
    }
}
