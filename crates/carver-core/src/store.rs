//! Ledger storage interface and in-memory implementation.
//!
//! Provides the [`Store`] trait over the three collections the engine owns
//! (blocks, movements, addresses). The [`MemoryStore`] is suitable for
//! testing; production uses RocksDB (carver-store).
//!
//! The engine is the sole writer. External readers observe a lagging but
//! consistent view because the block row is the only commit marker for a
//! height.

use std::collections::{BTreeMap, HashMap};

use crate::error::StoreError;
use crate::types::{BlockRecord, CarverAddress, CarverMovement};

/// Ledger storage interface.
///
/// Writers take `&mut self`; the engine owns the store exclusively for the
/// duration of a sync run. Every query below maps to one indexed lookup in
/// the RocksDB implementation.
pub trait Store: Send {
    // --- Blocks ---

    /// Persist a block row. The row is the commit marker for its height.
    fn insert_block(&mut self, block: &BlockRecord) -> Result<(), StoreError>;

    /// Fetch a block by height.
    fn block_by_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError>;

    /// The highest stored block, if any.
    fn last_block(&self) -> Result<Option<BlockRecord>, StoreError>;

    /// The lowest stored block that is not yet confirmed.
    fn first_unconfirmed_block(&self) -> Result<Option<BlockRecord>, StoreError>;

    /// Mark the block at `height` confirmed.
    fn set_block_confirmed(&mut self, height: u64) -> Result<(), StoreError>;

    /// Delete every block row with `height >= height`. Returns the number
    /// removed. Running this first is the unwinder's dirty-state marker.
    fn delete_blocks_from(&mut self, height: u64) -> Result<u64, StoreError>;

    // --- Movements ---

    /// Insert a batch of movements. Sequences are unique; inserting an
    /// existing sequence is a corruption error.
    fn insert_movements(&mut self, movements: &[CarverMovement]) -> Result<(), StoreError>;

    /// Fetch one movement by its sequence.
    fn movement_by_sequence(&self, sequence: u64) -> Result<Option<CarverMovement>, StoreError>;

    /// Highest movement sequence present, or 0 when empty.
    fn max_movement_sequence(&self) -> Result<u64, StoreError>;

    /// Up to `limit` movements with `block_height >= height`, sorted by
    /// sequence descending.
    fn movements_from_height_desc(
        &self,
        height: u64,
        limit: usize,
    ) -> Result<Vec<CarverMovement>, StoreError>;

    /// Delete every movement with `sequence >= sequence`. Returns the number
    /// removed.
    fn delete_movements_from_sequence(&mut self, sequence: u64) -> Result<u64, StoreError>;

    /// Total movements stored.
    fn movement_count(&self) -> Result<u64, StoreError>;

    // --- Addresses ---

    /// Fetch an address by its unique label.
    fn address_by_label(&self, label: &str) -> Result<Option<CarverAddress>, StoreError>;

    /// Upsert a batch of addresses, keyed by label.
    fn save_addresses(&mut self, addresses: &[CarverAddress]) -> Result<(), StoreError>;

    /// Highest address sequence present, or 0 when empty.
    fn max_address_sequence(&self) -> Result<u64, StoreError>;

    /// Delete every address created at `block_height >= height`. Returns the
    /// number removed.
    fn delete_addresses_from_height(&mut self, height: u64) -> Result<u64, StoreError>;

    /// All stored addresses. Used by consistency checks and tests.
    fn all_addresses(&self) -> Result<Vec<CarverAddress>, StoreError>;
}

/// In-memory ledger storage for testing.
///
/// Everything lives in ordered maps with no persistence. Not suitable for
/// production (no crash recovery, unbounded memory growth).
#[derive(Default)]
pub struct MemoryStore {
    blocks: BTreeMap<u64, BlockRecord>,
    movements: BTreeMap<u64, CarverMovement>,
    addresses: HashMap<String, CarverAddress>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of block rows stored.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Store for MemoryStore {
    fn insert_block(&mut self, block: &BlockRecord) -> Result<(), StoreError> {
        self.blocks.insert(block.height, block.clone());
        Ok(())
    }

    fn block_by_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self.blocks.get(&height).cloned())
    }

    fn last_block(&self) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self.blocks.values().next_back().cloned())
    }

    fn first_unconfirmed_block(&self) -> Result<Option<BlockRecord>, StoreError> {
        Ok(self
            .blocks
            .values()
            .find(|b| !b.is_confirmed)
            .cloned())
    }

    fn set_block_confirmed(&mut self, height: u64) -> Result<(), StoreError> {
        let block = self
            .blocks
            .get_mut(&height)
            .ok_or_else(|| StoreError::NotFound(format!("block {height}")))?;
        block.is_confirmed = true;
        Ok(())
    }

    fn delete_blocks_from(&mut self, height: u64) -> Result<u64, StoreError> {
        let doomed: Vec<u64> = self.blocks.range(height..).map(|(h, _)| *h).collect();
        for h in &doomed {
            self.blocks.remove(h);
        }
        Ok(doomed.len() as u64)
    }

    fn insert_movements(&mut self, movements: &[CarverMovement]) -> Result<(), StoreError> {
        for movement in movements {
            if self.movements.contains_key(&movement.sequence) {
                return Err(StoreError::Corruption(format!(
                    "duplicate movement sequence {}",
                    movement.sequence
                )));
            }
            self.movements.insert(movement.sequence, movement.clone());
        }
        Ok(())
    }

    fn movement_by_sequence(&self, sequence: u64) -> Result<Option<CarverMovement>, StoreError> {
        Ok(self.movements.get(&sequence).cloned())
    }

    fn max_movement_sequence(&self) -> Result<u64, StoreError> {
        Ok(self.movements.keys().next_back().copied().unwrap_or(0))
    }

    fn movements_from_height_desc(
        &self,
        height: u64,
        limit: usize,
    ) -> Result<Vec<CarverMovement>, StoreError> {
        Ok(self
            .movements
            .values()
            .rev()
            .filter(|m| m.block_height >= height)
            .take(limit)
            .cloned()
            .collect())
    }

    fn delete_movements_from_sequence(&mut self, sequence: u64) -> Result<u64, StoreError> {
        let doomed: Vec<u64> = self.movements.range(sequence..).map(|(s, _)| *s).collect();
        for s in &doomed {
            self.movements.remove(s);
        }
        Ok(doomed.len() as u64)
    }

    fn movement_count(&self) -> Result<u64, StoreError> {
        Ok(self.movements.len() as u64)
    }

    fn address_by_label(&self, label: &str) -> Result<Option<CarverAddress>, StoreError> {
        Ok(self.addresses.get(label).cloned())
    }

    fn save_addresses(&mut self, addresses: &[CarverAddress]) -> Result<(), StoreError> {
        for address in addresses {
            self.addresses
                .insert(address.label.clone(), address.clone());
        }
        Ok(())
    }

    fn max_address_sequence(&self) -> Result<u64, StoreError> {
        Ok(self
            .addresses
            .values()
            .map(|a| a.sequence)
            .max()
            .unwrap_or(0))
    }

    fn delete_addresses_from_height(&mut self, height: u64) -> Result<u64, StoreError> {
        let doomed: Vec<String> = self
            .addresses
            .values()
            .filter(|a| a.block_height >= height)
            .map(|a| a.label.clone())
            .collect();
        for label in &doomed {
            self.addresses.remove(label);
        }
        Ok(doomed.len() as u64)
    }

    fn all_addresses(&self) -> Result<Vec<CarverAddress>, StoreError> {
        Ok(self.addresses.values().cloned().collect())
    }
}
