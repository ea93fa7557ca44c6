//! Finality confirmation by merkle-root recheck.
//!
//! Walks stored unconfirmed blocks from the lowest up. A block becomes
//! confirmed once the node reports enough confirmations *and* its merkle
//! root still matches what was stored at ingest. A mismatch means the chain
//! reorganized under us: the last stored block is unwound and the scan
//! restarts, shedding one tip block per iteration until the stored prefix
//! agrees with the node again.

use carver_core::error::CarverError;
use carver_core::store::Store;
use tracing::{info, warn};

use crate::cache::AddressCache;
use crate::config::SyncConfig;
use crate::rpc::NodeRpc;
use crate::unwind;

/// Confirm stored blocks up to `node_tip`. Returns the number confirmed.
pub async fn run<S: Store>(
    store: &mut S,
    cache: &mut AddressCache,
    rpc: &dyn NodeRpc,
    node_tip: u64,
    config: &SyncConfig,
) -> Result<u64, CarverError> {
    let mut confirmed = 0;

    loop {
        let Some(block) = store.first_unconfirmed_block()? else {
            return Ok(confirmed);
        };
        if block.height > node_tip {
            return Ok(confirmed);
        }

        let node_hash = rpc.get_block_hash(block.height).await?;
        let node_block = rpc.get_block(&node_hash).await?;

        if node_block.confirmations < config.block_confirmations {
            // Not final yet; everything above it is younger still.
            return Ok(confirmed);
        }

        if node_block.merkleroot != block.merkle_root {
            let last = store
                .last_block()?
                .ok_or_else(|| CarverError::Decode("unconfirmed block without tip".into()))?;
            warn!(
                height = block.height,
                tip = last.height,
                "merkle root mismatch, unwinding tip block"
            );
            unwind::unwind(store, cache, last.height, config.unwind_batch_size)?;
            continue;
        }

        store.set_block_confirmed(block.height)?;
        info!(height = block.height, "block confirmed");
        confirmed += 1;
    }
}
