//! RocksDB-backed persistent ledger storage.
//!
//! Implements [`Store`] using column families for blocks, movements, and
//! addresses plus two index families for the range queries the engine
//! issues (movements by height, addresses by creation height). Multi-row
//! mutations use atomic [`WriteBatch`].
//!
//! Keys are big-endian integers so that RocksDB's lexicographic ordering is
//! numeric ordering; movement-height index keys are `height ++ sequence`,
//! which sorts identically to plain sequence order because sequences are
//! monotonic across blocks.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use carver_core::error::StoreError;
use carver_core::store::Store;
use carver_core::types::{BlockRecord, CarverAddress, CarverMovement};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_MOVEMENTS: &str = "movements";
const CF_MOVEMENT_HEIGHT: &str = "movement_height_index";
const CF_ADDRESSES: &str = "addresses";
const CF_ADDRESS_HEIGHT: &str = "address_height_index";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_MOVEMENTS,
    CF_MOVEMENT_HEIGHT,
    CF_ADDRESSES,
    CF_ADDRESS_HEIGHT,
    CF_METADATA,
];

// --- Metadata keys ---

/// Highest contiguously confirmed height; scan hint for
/// `first_unconfirmed_block`. 0 means nothing confirmed yet.
const META_CONFIRMED_HEIGHT: &[u8] = b"confirmed_height";

/// RocksDB-backed persistent ledger storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a database at the given path, creating all column
    /// families as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(backend)?;
        Ok(Self { db })
    }

    // --- Internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    fn u64_key(value: u64) -> [u8; 8] {
        value.to_be_bytes()
    }

    /// `height ++ sequence` composite index key.
    fn height_seq_key(height: u64, sequence: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&height.to_be_bytes());
        key[8..].copy_from_slice(&sequence.to_be_bytes());
        key
    }

    /// `height ++ label` composite index key.
    fn height_label_key(height: u64, label: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(8 + label.len());
        key.extend_from_slice(&height.to_be_bytes());
        key.extend_from_slice(label.as_bytes());
        key
    }

    fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(&cf, key).map_err(backend)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(raw))
            }
            Some(_) => Err(StoreError::Corruption("invalid metadata length".into())),
            None => Ok(0),
        }
    }
}

fn backend(err: rocksdb::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl Store for RocksStore {
    fn insert_block(&mut self, block: &BlockRecord) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        self.db
            .put_cf(&cf, Self::u64_key(block.height), Self::encode(block)?)
            .map_err(backend)
    }

    fn block_by_height(&self, height: u64) -> Result<Option<BlockRecord>, StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.get_cf(&cf, Self::u64_key(height)).map_err(backend)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn last_block(&self) -> Result<Option<BlockRecord>, StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.iterator_cf(&cf, IteratorMode::End).next() {
            Some(entry) => {
                let (_, value) = entry.map_err(backend)?;
                Ok(Some(Self::decode(&value)?))
            }
            None => Ok(None),
        }
    }

    fn first_unconfirmed_block(&self) -> Result<Option<BlockRecord>, StoreError> {
        let hint = self.get_meta_u64(META_CONFIRMED_HEIGHT)?;
        let cf = self.cf_handle(CF_BLOCKS)?;
        let start = Self::u64_key(hint.saturating_add(1));
        for entry in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, rocksdb::Direction::Forward))
        {
            let (_, value) = entry.map_err(backend)?;
            let block: BlockRecord = Self::decode(&value)?;
            if !block.is_confirmed {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    fn set_block_confirmed(&mut self, height: u64) -> Result<(), StoreError> {
        let mut block = self
            .block_by_height(height)?
            .ok_or_else(|| StoreError::NotFound(format!("block {height}")))?;
        block.is_confirmed = true;

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_blocks, Self::u64_key(height), Self::encode(&block)?);
        // Blocks are confirmed lowest-first, so the hint stays contiguous.
        if height > self.get_meta_u64(META_CONFIRMED_HEIGHT)? {
            batch.put_cf(cf_meta, META_CONFIRMED_HEIGHT, Self::u64_key(height));
        }
        self.db.write(batch).map_err(backend)
    }

    fn delete_blocks_from(&mut self, height: u64) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let start = Self::u64_key(height);
        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for entry in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, rocksdb::Direction::Forward))
        {
            let (key, _) = entry.map_err(backend)?;
            batch.delete_cf(cf, key);
            removed += 1;
        }

        // The confirmed hint must not point past the surviving blocks.
        let hint = self.get_meta_u64(META_CONFIRMED_HEIGHT)?;
        if hint >= height {
            let cf_meta = self.cf_handle(CF_METADATA)?;
            batch.put_cf(
                cf_meta,
                META_CONFIRMED_HEIGHT,
                Self::u64_key(height.saturating_sub(1)),
            );
        }
        self.db.write(batch).map_err(backend)?;
        Ok(removed)
    }

    fn insert_movements(&mut self, movements: &[CarverMovement]) -> Result<(), StoreError> {
        let cf_movements = self.cf_handle(CF_MOVEMENTS)?;
        let cf_index = self.cf_handle(CF_MOVEMENT_HEIGHT)?;
        let mut batch = WriteBatch::default();
        for movement in movements {
            let key = Self::u64_key(movement.sequence);
            if self.db.get_cf(&cf_movements, key).map_err(backend)?.is_some() {
                return Err(StoreError::Corruption(format!(
                    "duplicate movement sequence {}",
                    movement.sequence
                )));
            }
            batch.put_cf(cf_movements, key, Self::encode(movement)?);
            batch.put_cf(
                cf_index,
                Self::height_seq_key(movement.block_height, movement.sequence),
                b"",
            );
        }
        self.db.write(batch).map_err(backend)
    }

    fn movement_by_sequence(&self, sequence: u64) -> Result<Option<CarverMovement>, StoreError> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        match self
            .db
            .get_cf(&cf, Self::u64_key(sequence))
            .map_err(backend)?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn max_movement_sequence(&self) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        match self.db.iterator_cf(&cf, IteratorMode::End).next() {
            Some(entry) => {
                let (key, _) = entry.map_err(backend)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&key);
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn movements_from_height_desc(
        &self,
        height: u64,
        limit: usize,
    ) -> Result<Vec<CarverMovement>, StoreError> {
        let cf_index = self.cf_handle(CF_MOVEMENT_HEIGHT)?;
        let mut movements = Vec::new();

        // Reverse iteration over `height ++ sequence` keys yields strictly
        // descending sequences; heights below the cutoff terminate the scan.
        for entry in self.db.iterator_cf(&cf_index, IteratorMode::End) {
            if movements.len() >= limit {
                break;
            }
            let (key, _) = entry.map_err(backend)?;
            if key.len() != 16 {
                return Err(StoreError::Corruption("bad movement index key".into()));
            }
            let mut height_raw = [0u8; 8];
            height_raw.copy_from_slice(&key[..8]);
            if u64::from_be_bytes(height_raw) < height {
                break;
            }
            let mut seq_raw = [0u8; 8];
            seq_raw.copy_from_slice(&key[8..]);
            let sequence = u64::from_be_bytes(seq_raw);
            let movement = self
                .movement_by_sequence(sequence)?
                .ok_or_else(|| StoreError::Corruption(format!("dangling index {sequence}")))?;
            movements.push(movement);
        }
        Ok(movements)
    }

    fn delete_movements_from_sequence(&mut self, sequence: u64) -> Result<u64, StoreError> {
        let cf_movements = self.cf_handle(CF_MOVEMENTS)?;
        let cf_index = self.cf_handle(CF_MOVEMENT_HEIGHT)?;
        let start = Self::u64_key(sequence);
        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for entry in self.db.iterator_cf(
            &cf_movements,
            IteratorMode::From(&start, rocksdb::Direction::Forward),
        ) {
            let (key, value) = entry.map_err(backend)?;
            let movement: CarverMovement = Self::decode(&value)?;
            batch.delete_cf(cf_movements, key);
            batch.delete_cf(
                cf_index,
                Self::height_seq_key(movement.block_height, movement.sequence),
            );
            removed += 1;
        }
        self.db.write(batch).map_err(backend)?;
        Ok(removed)
    }

    fn movement_count(&self) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_MOVEMENTS)?;
        let mut count = 0u64;
        for entry in self.db.iterator_cf(&cf, IteratorMode::Start) {
            entry.map_err(backend)?;
            count += 1;
        }
        Ok(count)
    }

    fn address_by_label(&self, label: &str) -> Result<Option<CarverAddress>, StoreError> {
        let cf = self.cf_handle(CF_ADDRESSES)?;
        match self.db.get_cf(&cf, label.as_bytes()).map_err(backend)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save_addresses(&mut self, addresses: &[CarverAddress]) -> Result<(), StoreError> {
        let cf_addresses = self.cf_handle(CF_ADDRESSES)?;
        let cf_index = self.cf_handle(CF_ADDRESS_HEIGHT)?;
        let mut batch = WriteBatch::default();
        for address in addresses {
            batch.put_cf(cf_addresses, address.label.as_bytes(), Self::encode(address)?);
            // Creation height never changes, so re-putting is idempotent.
            batch.put_cf(
                cf_index,
                Self::height_label_key(address.block_height, &address.label),
                b"",
            );
        }
        self.db.write(batch).map_err(backend)
    }

    fn max_address_sequence(&self) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_ADDRESSES)?;
        let mut max = 0u64;
        for entry in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = entry.map_err(backend)?;
            let address: CarverAddress = Self::decode(&value)?;
            max = max.max(address.sequence);
        }
        Ok(max)
    }

    fn delete_addresses_from_height(&mut self, height: u64) -> Result<u64, StoreError> {
        let cf_addresses = self.cf_handle(CF_ADDRESSES)?;
        let cf_index = self.cf_handle(CF_ADDRESS_HEIGHT)?;
        let start = Self::u64_key(height);
        let mut batch = WriteBatch::default();
        let mut removed = 0u64;
        for entry in self.db.iterator_cf(
            &cf_index,
            IteratorMode::From(&start, rocksdb::Direction::Forward),
        ) {
            let (key, _) = entry.map_err(backend)?;
            if key.len() < 8 {
                return Err(StoreError::Corruption("bad address index key".into()));
            }
            let label = &key[8..];
            batch.delete_cf(cf_addresses, label);
            batch.delete_cf(cf_index, &key);
            removed += 1;
        }
        self.db.write(batch).map_err(backend)?;
        Ok(removed)
    }

    fn all_addresses(&self) -> Result<Vec<CarverAddress>, StoreError> {
        let cf = self.cf_handle(CF_ADDRESSES)?;
        let mut addresses = Vec::new();
        for entry in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = entry.map_err(backend)?;
            addresses.push(Self::decode(&value)?);
        }
        Ok(addresses)
    }
}
