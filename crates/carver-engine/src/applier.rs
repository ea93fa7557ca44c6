//! Forward application of parsed movements under the global sequence.
//!
//! The applier owns the monotonic sequence counter for a sync run. It is
//! loaded from the last committed block's `sequence_end`, incremented in
//! memory, and persisted when the coordinator writes the block row.
//!
//! Persistence order per transaction is strict and crash-critical:
//! movements first, then the updated addresses, and only after the whole
//! block the block row itself. A crash between any two steps leaves
//! `max(movement.sequence) > last_block.sequence_end`, which the startup
//! cleanup detects and unwinds.

use std::collections::HashMap;

use carver_core::error::CarverError;
use carver_core::store::Store;
use carver_core::types::{AddressKind, CarverAddress, CarverMovement, MovementType};

use crate::builder::{ParsedBatch, ParsedMovement};
use crate::cache::AddressCache;

/// Applies movements in order, one transaction at a time.
pub struct SequenceApplier {
    sequence: u64,
}

impl SequenceApplier {
    /// Start from the given sequence (the last committed block's
    /// `sequence_end`, or 0 on an empty store).
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    /// The sequence of the last applied movement.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Apply one transaction's parsed movements and persist them.
    ///
    /// Returns the number of movements applied. On a sequence violation
    /// nothing is persisted for the transaction and the in-memory counter
    /// is left unchanged.
    pub fn apply_transaction<S: Store>(
        &mut self,
        store: &mut S,
        cache: &mut AddressCache,
        batch: ParsedBatch,
        block_height: u64,
        date: u64,
    ) -> Result<u64, CarverError> {
        if batch.movements.is_empty() {
            return Ok(0);
        }

        let mut updated: HashMap<String, CarverAddress> = HashMap::new();
        let mut records = Vec::with_capacity(batch.movements.len());
        let mut sequence = self.sequence;

        for movement in &batch.movements {
            sequence += 1;
            let record = apply_one(&mut updated, &batch, movement, sequence, block_height, date)?;
            records.push(record);
        }

        // Movements first, then addresses; the block row comes later.
        store.insert_movements(&records)?;
        let addresses: Vec<CarverAddress> = updated.into_values().collect();
        store.save_addresses(&addresses)?;
        for address in &addresses {
            cache.insert(address.clone());
        }

        self.sequence = sequence;
        Ok(records.len() as u64)
    }
}

/// Apply a single movement against the working copies, producing the
/// immutable ledger record.
fn apply_one(
    updated: &mut HashMap<String, CarverAddress>,
    batch: &ParsedBatch,
    movement: &ParsedMovement,
    sequence: u64,
    block_height: u64,
    date: u64,
) -> Result<CarverMovement, CarverError> {
    let working = |updated: &mut HashMap<String, CarverAddress>, label: &str| {
        if !updated.contains_key(label) {
            // Seeded by the parse sweep for every referenced label.
            if let Some(record) = batch.addresses.get(label) {
                updated.insert(label.to_owned(), record.clone());
            }
        }
        updated.get(label).cloned()
    };

    let from = working(updated, &movement.from).ok_or_else(|| {
        CarverError::Decode(format!("unparsed movement endpoint {}", movement.from))
    })?;
    let to = working(updated, &movement.to).ok_or_else(|| {
        CarverError::Decode(format!("unparsed movement endpoint {}", movement.to))
    })?;

    // Ordering violations are never silently corrected.
    if from.sequence >= sequence {
        return Err(CarverError::Reconciliation {
            label: from.label.clone(),
            address_sequence: from.sequence,
            movement_sequence: sequence,
        });
    }
    if movement.from != movement.to && to.sequence >= sequence {
        return Err(CarverError::Reconciliation {
            label: to.label.clone(),
            address_sequence: to.sequence,
            movement_sequence: sequence,
        });
    }

    // Point-in-time snapshots, taken before the deltas.
    let from_balance = from.balance;
    let to_balance = to.balance;
    let last_from_movement = from.last_movement;
    let last_to_movement = to.last_movement;

    {
        let from = updated.get_mut(&movement.from).ok_or_else(|| {
            CarverError::Decode(format!("unparsed movement endpoint {}", movement.from))
        })?;
        from.balance -= movement.amount;
        from.value_out += movement.amount;
        from.count_out += 1;
        from.sequence = sequence;
        from.last_movement = Some(sequence);
    }
    {
        let to = updated.get_mut(&movement.to).ok_or_else(|| {
            CarverError::Decode(format!("unparsed movement endpoint {}", movement.to))
        })?;
        to.balance += movement.amount;
        to.value_in += movement.amount;
        to.count_in += 1;
        to.sequence = sequence;
        to.last_movement = Some(sequence);

        match movement.movement_type {
            MovementType::PowAddressReward => {
                to.pow_count_in += 1;
                to.pow_value_in += movement.amount;
            }
            MovementType::TxToPosAddress => {
                to.pos_count_in += 1;
                to.pos_value_in += movement.amount;
                to.last_pos_reward = Some(sequence);
            }
            MovementType::TxToMnAddress => {
                to.mn_count_in += 1;
                to.mn_value_in += movement.amount;
                to.last_mn_reward = Some(sequence);
            }
            _ => {}
        }
    }

    let (context_tx, context_address) = contexts(movement);

    Ok(CarverMovement {
        sequence,
        label: movement.label.clone(),
        amount: movement.amount,
        date,
        block_height,
        from: movement.from.clone(),
        to: movement.to.clone(),
        destination_address: movement.destination_address.clone(),
        from_balance,
        to_balance,
        movement_type: movement.movement_type,
        last_from_movement,
        last_to_movement,
        context_address,
        context_tx,
        pos_reward_amount: movement.pos_reward_amount,
        pos_input_amount: movement.pos_input_amount,
        pos_input_block_height_diff: movement.pos_input_block_height_diff,
    })
}

/// The `Tx`-kind endpoint becomes the context tx; for the context address
/// prefer an ordinary address over a special entity.
fn contexts(movement: &ParsedMovement) -> (Option<String>, Option<String>) {
    let sides = [
        (&movement.from, movement.from_kind),
        (&movement.to, movement.to_kind),
    ];
    let context_tx = sides
        .iter()
        .find(|(_, kind)| *kind == AddressKind::Tx)
        .map(|(label, _)| (*label).clone());
    let context_address = sides
        .iter()
        .filter(|(_, kind)| *kind != AddressKind::Tx)
        .min_by_key(|(_, kind)| if *kind == AddressKind::Address { 0 } else { 1 })
        .map(|(label, _)| (*label).clone());
    (context_tx, context_address)
}
