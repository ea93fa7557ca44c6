//! Top-level sync orchestration.
//!
//! One coordinator per chain, guarded externally by the named process lock.
//! A run is: confirm stored blocks against the node, clean up any partial
//! writes from a crashed predecessor, then ingest every height from the
//! stored tip to the node tip. Errors bubble out; since the block row is
//! the commit marker, an aborted height is simply retried next run.

use carver_core::error::CarverError;
use carver_core::store::Store;
use carver_core::types::BlockRecord;
use tracing::{debug, info, warn};

use crate::applier::SequenceApplier;
use crate::builder::{self, ResolvedTransaction};
use crate::cache::AddressCache;
use crate::config::SyncConfig;
use crate::confirm;
use crate::rpc::NodeRpc;
use crate::unwind::{self, UnwindSummary};
use crate::utxo::UtxoResolver;

/// Result of a completed sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Heights ingested this run.
    pub synced_blocks: u64,
    /// Node tip the run targeted.
    pub node_tip: u64,
}

/// Drives confirmation, crash recovery, and block ingest.
pub struct SyncCoordinator<S: Store, R: NodeRpc> {
    store: S,
    rpc: R,
    cache: AddressCache,
    config: SyncConfig,
}

impl<S: Store, R: NodeRpc> SyncCoordinator<S, R> {
    pub fn new(store: S, rpc: R, config: SyncConfig) -> Self {
        let cache = AddressCache::new(config.address_cache_limit);
        Self {
            store,
            rpc,
            cache,
            config,
        }
    }

    /// Read access to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Administrative rollback: return the store to the state before any
    /// movement at `height` or above.
    pub fn unwind_to(&mut self, height: u64) -> Result<UnwindSummary, CarverError> {
        unwind::unwind(
            &mut self.store,
            &mut self.cache,
            height,
            self.config.unwind_batch_size,
        )
    }

    /// One full sync pass. `force_rpc_height` overrides the node tip.
    pub async fn run(&mut self, force_rpc_height: Option<u64>) -> Result<SyncOutcome, CarverError> {
        let node_tip = match force_rpc_height {
            Some(height) => height,
            None => self.rpc.get_info().await?.blocks,
        };

        confirm::run(
            &mut self.store,
            &mut self.cache,
            &self.rpc,
            node_tip,
            &self.config,
        )
        .await?;

        self.recover()?;

        let last = self.store.last_block()?;
        let start = last.as_ref().map(|b| b.height).unwrap_or(0);
        let mut applier = SequenceApplier::new(last.map(|b| b.sequence_end).unwrap_or(0));
        let mut resolver = UtxoResolver::new();

        let mut synced_blocks = 0;
        let mut height = start + 1;
        while height <= node_tip {
            self.sync_height(&mut applier, &mut resolver, height).await?;
            synced_blocks += 1;

            if self.config.random_rollback_test && rand::random::<f64>() < 0.05 {
                warn!(height, "random rollback self-test triggered");
                self.unwind_to(height)?;
                let end = self
                    .store
                    .last_block()?
                    .map(|b| b.sequence_end)
                    .unwrap_or(0);
                applier = SequenceApplier::new(end);
                continue; // re-ingest the same height
            }
            height += 1;
        }

        info!(synced_blocks, node_tip, "sync complete");
        Ok(SyncOutcome {
            synced_blocks,
            node_tip,
        })
    }

    /// Detect and clean partial writes from a crashed run.
    ///
    /// Movements and addresses are written before the block row; any
    /// sequence beyond the last block's `sequence_end` is orphaned work.
    fn recover(&mut self) -> Result<(), CarverError> {
        match self.store.last_block()? {
            Some(block) => {
                let max_movement = self.store.max_movement_sequence()?;
                let max_address = self.store.max_address_sequence()?;
                if max_movement > block.sequence_end || max_address > block.sequence_end {
                    warn!(
                        height = block.height,
                        sequence_end = block.sequence_end,
                        max_movement,
                        max_address,
                        "partial writes detected, unwinding past the last commit"
                    );
                    unwind::unwind(
                        &mut self.store,
                        &mut self.cache,
                        block.height + 1,
                        self.config.unwind_batch_size,
                    )?;
                }
            }
            None => {
                // No commit marker at all: anything present is orphaned.
                unwind::unwind(
                    &mut self.store,
                    &mut self.cache,
                    0,
                    self.config.unwind_batch_size,
                )?;
            }
        }
        Ok(())
    }

    async fn sync_height(
        &mut self,
        applier: &mut SequenceApplier,
        resolver: &mut UtxoResolver,
        height: u64,
    ) -> Result<(), CarverError> {
        let hash = self.rpc.get_block_hash(height).await?;
        let block = self.rpc.get_block(&hash).await?;

        let sequence_start = applier.sequence();
        let mut vins_count = 0u64;
        let mut vouts_count = 0u64;

        for txid in &block.tx {
            let raw = self.rpc.get_raw_transaction(txid).await?;
            vins_count += raw.vin.len() as u64;
            vouts_count += raw.vout.len() as u64;

            let mut vins = Vec::with_capacity(raw.vin.len());
            for vin in &raw.vin {
                vins.push(resolver.resolve(&self.rpc, vin).await?);
            }
            resolver.record_outputs(txid, height, &raw.vout);

            let resolved = ResolvedTransaction {
                txid: txid.clone(),
                vins,
                vouts: raw.vout,
            };
            let required = builder::required_movements(&resolved, height);
            if required.is_empty() {
                // Empty non-standard transaction; sequence untouched.
                continue;
            }
            let batch =
                builder::parse_movements(required, txid, height, &self.store, &mut self.cache)?;
            let applied = applier.apply_transaction(
                &mut self.store,
                &mut self.cache,
                batch,
                height,
                block.time,
            )?;

            if self.config.verbose_cron_tx {
                info!(%txid, height, movements = applied, "transaction applied");
            } else {
                debug!(%txid, height, movements = applied, "transaction applied");
            }
        }

        // The block row commits the height.
        let record = BlockRecord {
            height,
            hash: block.hash,
            prev_hash: block.previousblockhash.unwrap_or_default(),
            merkle_root: block.merkleroot,
            bits: block.bits,
            nonce: block.nonce,
            difficulty: block.difficulty,
            size: block.size,
            version: block.version,
            confirmations_at_ingest: block.confirmations,
            created_at: block.time,
            vins_count,
            vouts_count,
            sequence_start,
            sequence_end: applier.sequence(),
            is_confirmed: false,
        };
        self.store.insert_block(&record)?;

        if self.config.verbose_cron {
            info!(
                height,
                vins = record.vins_count,
                vouts = record.vouts_count,
                sequence_end = record.sequence_end,
                "block synced"
            );
        } else {
            debug!(height, sequence_end = record.sequence_end, "block synced");
        }
        Ok(())
    }
}
