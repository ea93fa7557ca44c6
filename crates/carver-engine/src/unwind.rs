//! Reverse application: roll the ledger back to before a given height.
//!
//! Block rows are deleted first: once they are gone the remaining data is
//! known-dirty and every later pass will keep cleaning until none of it
//! remains. Movements are then reversed in strict descending sequence, in
//! bounded batches, with addresses saved before the batch's movements are
//! deleted so that a crash at any instruction leaves a state the next pass
//! recognizes and continues from.
//!
//! Partial-movement tolerance is what makes the engine crash-safe: an
//! endpoint whose sequence does not match the movement being reversed was
//! either already unwound or never saved, and is skipped silently. An
//! endpoint *ahead* of the movement is impossible in a correct log and
//! aborts the unwind.

use std::collections::HashMap;

use carver_core::error::CarverError;
use carver_core::store::Store;
use carver_core::types::{CarverAddress, CarverMovement, MovementType};
use tracing::debug;

use crate::cache::AddressCache;

/// What an unwind removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnwindSummary {
    pub blocks_removed: u64,
    pub movements_removed: u64,
    pub addresses_removed: u64,
}

/// Roll the store back to the state before any movement with
/// `block_height >= height` was applied. Clears both cache tiers.
pub fn unwind<S: Store>(
    store: &mut S,
    cache: &mut AddressCache,
    height: u64,
    batch_size: usize,
) -> Result<UnwindSummary, CarverError> {
    let mut summary = UnwindSummary {
        blocks_removed: store.delete_blocks_from(height)?,
        ..UnwindSummary::default()
    };

    loop {
        let batch = store.movements_from_height_desc(height, batch_size)?;
        if batch.is_empty() {
            break;
        }

        let mut touched: HashMap<String, CarverAddress> = HashMap::new();
        let mut min_sequence = u64::MAX;

        for movement in &batch {
            min_sequence = min_sequence.min(movement.sequence);
            reverse_endpoint(store, &mut touched, movement, Side::From)?;
            if movement.to != movement.from {
                reverse_endpoint(store, &mut touched, movement, Side::To)?;
            }
        }

        // Addresses before movement deletion: a crash here re-runs the
        // batch, and the mismatched sequences make the re-run skip them.
        let addresses: Vec<CarverAddress> = touched.into_values().collect();
        store.save_addresses(&addresses)?;
        summary.movements_removed += store.delete_movements_from_sequence(min_sequence)?;
    }

    summary.addresses_removed = store.delete_addresses_from_height(height)?;
    cache.clear();

    debug!(
        height,
        blocks = summary.blocks_removed,
        movements = summary.movements_removed,
        addresses = summary.addresses_removed,
        "unwind complete"
    );
    Ok(summary)
}

enum Side {
    From,
    To,
}

fn reverse_endpoint<S: Store>(
    store: &S,
    touched: &mut HashMap<String, CarverAddress>,
    movement: &CarverMovement,
    side: Side,
) -> Result<(), CarverError> {
    let label = match side {
        Side::From => &movement.from,
        Side::To => &movement.to,
    };

    if !touched.contains_key(label) {
        match store.address_by_label(label)? {
            Some(record) => {
                touched.insert(label.clone(), record);
            }
            None => {
                // Deleted by a prior interrupted pass; nothing to reverse.
                debug!(label, sequence = movement.sequence, "endpoint already gone");
                return Ok(());
            }
        }
    }
    let address = touched
        .get_mut(label)
        .ok_or_else(|| CarverError::Decode(format!("lost working copy for {label}")))?;

    if address.sequence > movement.sequence {
        return Err(CarverError::Unreconciliation {
            label: label.clone(),
            address_sequence: address.sequence,
            movement_sequence: movement.sequence,
        });
    }
    if address.sequence < movement.sequence {
        // Already unwound past this movement, or never saved. Skip.
        return Ok(());
    }

    match side {
        Side::From => {
            address.balance += movement.amount;
            address.value_out -= movement.amount;
            address.count_out -= 1;
            address.sequence = movement.last_from_movement.unwrap_or(0);
            address.last_movement = movement.last_from_movement;
        }
        Side::To => {
            address.balance -= movement.amount;
            address.value_in -= movement.amount;
            address.count_in -= 1;
            match movement.movement_type {
                MovementType::PowAddressReward => {
                    address.pow_count_in -= 1;
                    address.pow_value_in -= movement.amount;
                }
                MovementType::TxToPosAddress => {
                    address.pos_count_in -= 1;
                    address.pos_value_in -= movement.amount;
                    if address.last_pos_reward == Some(movement.sequence) {
                        address.last_pos_reward = None;
                    }
                }
                MovementType::TxToMnAddress => {
                    address.mn_count_in -= 1;
                    address.mn_value_in -= movement.amount;
                    if address.last_mn_reward == Some(movement.sequence) {
                        address.last_mn_reward = None;
                    }
                }
                _ => {}
            }
            address.sequence = movement.last_to_movement.unwrap_or(0);
            address.last_movement = movement.last_to_movement;
        }
    }
    Ok(())
}
