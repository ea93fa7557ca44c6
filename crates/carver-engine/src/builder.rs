//! Transaction → movement transformation.
//!
//! Runs in two sweeps. The required-movements sweep is pure: it flattens a
//! resolved transaction into typed movement stubs, fixing which entities
//! will be touched. The parse sweep then batch-ensures every referenced
//! entity exists (cache → store → create) and attaches working address
//! records, so the applier never has to read mid-apply.
//!
//! Ordering is load-bearing: all credits into the tx pseudo-address come
//! first (vin order, then implicit rewards), then all debits in vout order.
//! Stake rewards are computed on the first credit of the matching type and
//! consumed by the matching debits.

use std::collections::HashMap;

use carver_core::error::CarverError;
use carver_core::store::Store;
use carver_core::types::{
    sats_from_coins, AddressKind, CarverAddress, MovementType, COINBASE_LABEL, FEE_LABEL,
    MN_LABEL, POS_LABEL, POW_LABEL, ZEROCOIN_LABEL,
};

use crate::cache::AddressCache;
use crate::rpc::RpcVout;
use crate::script;
use crate::utxo::ResolvedVin;

/// A transaction with all inputs resolved, ready for the builder.
#[derive(Debug, Clone)]
pub struct ResolvedTransaction {
    pub txid: String,
    pub vins: Vec<ResolvedVin>,
    pub vouts: Vec<RpcVout>,
}

/// A typed movement stub produced by the required sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct RequiredMovement {
    pub movement_type: MovementType,
    pub from: String,
    pub to: String,
    pub amount: i64,
    pub destination_address: Option<String>,
    pub pos_reward_amount: Option<i64>,
    pub pos_input_amount: Option<i64>,
    pub pos_input_block_height_diff: Option<u64>,
}

impl RequiredMovement {
    fn transfer(movement_type: MovementType, from: &str, to: &str, amount: i64) -> Self {
        Self {
            movement_type,
            from: from.to_owned(),
            to: to.to_owned(),
            amount,
            destination_address: None,
            pos_reward_amount: None,
            pos_input_amount: None,
            pos_input_block_height_diff: None,
        }
    }
}

/// A movement stub with its endpoints guaranteed to exist.
#[derive(Debug, Clone)]
pub struct ParsedMovement {
    pub label: String,
    pub movement_type: MovementType,
    pub from: String,
    pub from_kind: AddressKind,
    pub to: String,
    pub to_kind: AddressKind,
    pub amount: i64,
    pub destination_address: Option<String>,
    pub pos_reward_amount: Option<i64>,
    pub pos_input_amount: Option<i64>,
    pub pos_input_block_height_diff: Option<u64>,
}

/// Output of the parse sweep: movements plus the working copies of every
/// entity they touch.
pub struct ParsedBatch {
    pub movements: Vec<ParsedMovement>,
    /// Working address records keyed by label. Freshly created entities are
    /// not yet persisted; the applier saves them after the movements.
    pub addresses: HashMap<String, CarverAddress>,
}

/// Required-movements sweep: pure, no I/O.
///
/// Empty non-standard transactions (no valued vins, no valued vouts)
/// produce zero movements and leave the sequence untouched.
pub fn required_movements(tx: &ResolvedTransaction, height: u64) -> Vec<RequiredMovement> {
    let tx_label = tx.txid.as_str();
    let total_in: i64 = tx.vins.iter().map(ResolvedVin::value).sum();
    let total_out: i64 = tx.vouts.iter().map(|v| sats_from_coins(v.value)).sum();
    let is_coinbase = tx.vins.iter().any(|v| matches!(v, ResolvedVin::Coinbase));

    if total_in == 0 && total_out == 0 {
        return Vec::new();
    }

    if is_coinbase {
        return coinbase_movements(tx, tx_label, total_out);
    }

    let spendable: Vec<&RpcVout> = tx.vouts.iter().filter(|v| v.value > 0.0).collect();
    let is_pos = tx
        .vouts
        .first()
        .map(script::is_empty_output)
        .unwrap_or(false)
        && tx
            .vins
            .iter()
            .any(|v| matches!(v, ResolvedVin::Standard(_)))
        && total_out > total_in;

    let mut movements = Vec::new();

    // Credits: vins in input order.
    for vin in &tx.vins {
        match vin {
            ResolvedVin::Standard(out) => movements.push(RequiredMovement::transfer(
                MovementType::AddressToTx,
                &out.label,
                tx_label,
                out.value,
            )),
            ResolvedVin::Zerocoin { value } => movements.push(RequiredMovement::transfer(
                MovementType::ZerocoinToTx,
                ZEROCOIN_LABEL,
                tx_label,
                *value,
            )),
            ResolvedVin::Coinbase => unreachable!("handled above"),
        }
    }

    if is_pos {
        let reward = total_out - total_in;
        let staked_height = tx.vins.iter().find_map(|v| match v {
            ResolvedVin::Standard(out) => out.block_height,
            _ => None,
        });
        movements.push(RequiredMovement {
            pos_reward_amount: Some(reward),
            pos_input_amount: Some(total_in),
            pos_input_block_height_diff: staked_height.map(|h| height.saturating_sub(h)),
            ..RequiredMovement::transfer(MovementType::PosRewardToTx, POS_LABEL, tx_label, reward)
        });
        for vout in &spendable {
            movements.push(RequiredMovement::transfer(
                MovementType::TxToPosAddress,
                tx_label,
                &script::output_label(&vout.script_pub_key),
                sats_from_coins(vout.value),
            ));
        }
        return movements;
    }

    // Standard transaction. A negative fee would leak value out of the
    // zero-sum; close it from FEE and flag it.
    let fee = total_in - total_out;
    if fee < 0 {
        tracing::warn!(txid = %tx.txid, fee, "outputs exceed inputs, crediting from FEE");
        movements.push(RequiredMovement::transfer(
            MovementType::FeeToTx,
            FEE_LABEL,
            tx_label,
            -fee,
        ));
    }

    // Debits: vouts in output order.
    for vout in &spendable {
        if script::is_zerocoin_mint(&vout.script_pub_key) {
            movements.push(RequiredMovement::transfer(
                MovementType::TxToZerocoin,
                tx_label,
                ZEROCOIN_LABEL,
                sats_from_coins(vout.value),
            ));
        } else {
            movements.push(RequiredMovement::transfer(
                MovementType::TxToAddress,
                tx_label,
                &script::output_label(&vout.script_pub_key),
                sats_from_coins(vout.value),
            ));
        }
    }

    if fee > 0 {
        movements.push(RequiredMovement::transfer(
            MovementType::TxToFee,
            tx_label,
            FEE_LABEL,
            fee,
        ));
    }

    movements
}

/// Coinbase classification. With a single payout the whole subsidy flows
/// `COINBASE → tx → payee`. With several payouts the first is the
/// proof-of-work miner (routed through `POW`) and the last the masternode
/// payee; the masternode share enters from `MN` instead of `COINBASE`.
fn coinbase_movements(
    tx: &ResolvedTransaction,
    tx_label: &str,
    total_out: i64,
) -> Vec<RequiredMovement> {
    let spendable: Vec<(String, i64)> = tx
        .vouts
        .iter()
        .filter(|v| v.value > 0.0)
        .map(|v| {
            (
                script::output_label(&v.script_pub_key),
                sats_from_coins(v.value),
            )
        })
        .collect();

    let mut movements = Vec::new();

    if spendable.len() <= 1 {
        movements.push(RequiredMovement::transfer(
            MovementType::CoinbaseToTx,
            COINBASE_LABEL,
            tx_label,
            total_out,
        ));
        for (label, amount) in &spendable {
            movements.push(RequiredMovement::transfer(
                MovementType::TxToAddress,
                tx_label,
                label,
                *amount,
            ));
        }
        return movements;
    }

    let [(pow_label, pow_amount), middle @ .., (mn_label, mn_amount)] = spendable.as_slice()
    else {
        // Two or more payouts, checked above.
        return movements;
    };

    movements.push(RequiredMovement::transfer(
        MovementType::CoinbaseToTx,
        COINBASE_LABEL,
        tx_label,
        total_out - *mn_amount,
    ));
    movements.push(RequiredMovement::transfer(
        MovementType::MasternodeRewardToTx,
        MN_LABEL,
        tx_label,
        *mn_amount,
    ));

    movements.push(RequiredMovement {
        destination_address: Some(pow_label.clone()),
        ..RequiredMovement::transfer(
            MovementType::TxToPowAddress,
            tx_label,
            POW_LABEL,
            *pow_amount,
        )
    });
    movements.push(RequiredMovement::transfer(
        MovementType::PowAddressReward,
        POW_LABEL,
        pow_label,
        *pow_amount,
    ));

    for (label, amount) in middle {
        movements.push(RequiredMovement::transfer(
            MovementType::TxToAddress,
            tx_label,
            label,
            *amount,
        ));
    }

    movements.push(RequiredMovement::transfer(
        MovementType::TxToMnAddress,
        tx_label,
        mn_label,
        *mn_amount,
    ));

    movements
}

/// Parse sweep: ensure every referenced entity exists and attach working
/// records. Reads go cache → store; misses create a fresh record at this
/// block height. Created records are persisted later by the applier, after
/// the movement batch.
pub fn parse_movements<S: Store>(
    required: Vec<RequiredMovement>,
    txid: &str,
    height: u64,
    store: &S,
    cache: &mut AddressCache,
) -> Result<ParsedBatch, CarverError> {
    let mut addresses: HashMap<String, CarverAddress> = HashMap::new();
    let mut movements = Vec::with_capacity(required.len());

    for (index, stub) in required.into_iter().enumerate() {
        for label in [&stub.from, &stub.to] {
            if addresses.contains_key(label.as_str()) {
                continue;
            }
            let record = lookup_or_create(label, txid, height, store, cache)?;
            addresses.insert(label.clone(), record);
        }

        let from_kind = addresses[&stub.from].kind;
        let to_kind = addresses[&stub.to].kind;
        movements.push(ParsedMovement {
            label: format!("{}:{}:{}", stub.movement_type, txid, index),
            movement_type: stub.movement_type,
            from: stub.from,
            from_kind,
            to: stub.to,
            to_kind,
            amount: stub.amount,
            destination_address: stub.destination_address,
            pos_reward_amount: stub.pos_reward_amount,
            pos_input_amount: stub.pos_input_amount,
            pos_input_block_height_diff: stub.pos_input_block_height_diff,
        });
    }

    Ok(ParsedBatch {
        movements,
        addresses,
    })
}

fn lookup_or_create<S: Store>(
    label: &str,
    txid: &str,
    height: u64,
    store: &S,
    cache: &mut AddressCache,
) -> Result<CarverAddress, CarverError> {
    if let Some(cached) = cache.get(label) {
        return Ok(cached.clone());
    }
    if let Some(stored) = store.address_by_label(label)? {
        cache.insert(stored.clone());
        return Ok(stored);
    }
    let kind = AddressKind::for_special_label(label).unwrap_or(if label == txid {
        AddressKind::Tx
    } else {
        AddressKind::Address
    });
    Ok(CarverAddress::new(label, kind, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcScriptPubKey;
    use crate::utxo::ResolvedOutput;
    use carver_core::constants::COIN;
    use carver_core::store::MemoryStore;

    fn vout(n: u32, coins: f64, address: Option<&str>) -> RpcVout {
        RpcVout {
            value: coins,
            n,
            script_pub_key: RpcScriptPubKey {
                addresses: address.map(|a| vec![a.to_string()]),
                script_type: Some(if address.is_some() {
                    "pubkeyhash".into()
                } else {
                    "nonstandard".into()
                }),
            },
        }
    }

    fn standard_vin(label: &str, coins: i64, height: u64) -> ResolvedVin {
        ResolvedVin::Standard(ResolvedOutput {
            label: label.to_string(),
            value: coins * COIN,
            block_height: Some(height),
        })
    }

    fn types_of(movements: &[RequiredMovement]) -> Vec<MovementType> {
        movements.iter().map(|m| m.movement_type).collect()
    }

    #[test]
    fn empty_marker_transaction_produces_nothing() {
        let tx = ResolvedTransaction {
            txid: "t0".into(),
            vins: vec![],
            vouts: vec![vout(0, 0.0, None)],
        };
        assert!(required_movements(&tx, 5).is_empty());
    }

    #[test]
    fn empty_pos_coinbase_marker_produces_nothing() {
        let tx = ResolvedTransaction {
            txid: "t0".into(),
            vins: vec![ResolvedVin::Coinbase],
            vouts: vec![vout(0, 0.0, None)],
        };
        assert!(required_movements(&tx, 5).is_empty());
    }

    #[test]
    fn single_payout_coinbase() {
        let tx = ResolvedTransaction {
            txid: "cb".into(),
            vins: vec![ResolvedVin::Coinbase],
            vouts: vec![vout(0, 50.0, Some("SMiner"))],
        };
        let movements = required_movements(&tx, 1);
        assert_eq!(
            types_of(&movements),
            vec![MovementType::CoinbaseToTx, MovementType::TxToAddress]
        );
        assert_eq!(movements[0].from, "COINBASE");
        assert_eq!(movements[0].to, "cb");
        assert_eq!(movements[0].amount, 50 * COIN);
        assert_eq!(movements[1].to, "SMiner");
        assert_eq!(movements[1].amount, 50 * COIN);
    }

    #[test]
    fn coinbase_with_masternode_split_routes_through_pow() {
        let tx = ResolvedTransaction {
            txid: "cb".into(),
            vins: vec![ResolvedVin::Coinbase],
            vouts: vec![vout(0, 45.0, Some("SMiner")), vout(1, 5.0, Some("SPayee"))],
        };
        let movements = required_movements(&tx, 10);
        assert_eq!(
            types_of(&movements),
            vec![
                MovementType::CoinbaseToTx,
                MovementType::MasternodeRewardToTx,
                MovementType::TxToPowAddress,
                MovementType::PowAddressReward,
                MovementType::TxToMnAddress,
            ]
        );
        assert_eq!(movements[0].amount, 45 * COIN);
        assert_eq!(movements[1].amount, 5 * COIN);
        assert_eq!(movements[2].destination_address.as_deref(), Some("SMiner"));
        assert_eq!(movements[3].from, "POW");
        assert_eq!(movements[3].to, "SMiner");
        assert_eq!(movements[4].to, "SPayee");

        // Zero-sum across the transaction.
        let credits: i64 = movements
            .iter()
            .filter(|m| m.to == "cb")
            .map(|m| m.amount)
            .sum();
        let debits: i64 = movements
            .iter()
            .filter(|m| m.from == "cb")
            .map(|m| m.amount)
            .sum();
        assert_eq!(credits, debits);
    }

    #[test]
    fn proof_of_stake_reward_is_computed_from_the_difference() {
        let tx = ResolvedTransaction {
            txid: "stake".into(),
            vins: vec![standard_vin("SStaker", 100, 90)],
            vouts: vec![
                vout(0, 0.0, None),
                vout(1, 60.0, Some("SStaker")),
                vout(2, 42.0, Some("SStaker")),
            ],
        };
        let movements = required_movements(&tx, 100);
        assert_eq!(
            types_of(&movements),
            vec![
                MovementType::AddressToTx,
                MovementType::PosRewardToTx,
                MovementType::TxToPosAddress,
                MovementType::TxToPosAddress,
            ]
        );
        let reward = &movements[1];
        assert_eq!(reward.amount, 2 * COIN);
        assert_eq!(reward.pos_reward_amount, Some(2 * COIN));
        assert_eq!(reward.pos_input_amount, Some(100 * COIN));
        assert_eq!(reward.pos_input_block_height_diff, Some(10));
    }

    #[test]
    fn standard_transaction_pays_fee_last() {
        let tx = ResolvedTransaction {
            txid: "t1".into(),
            vins: vec![standard_vin("SFrom", 10, 1)],
            vouts: vec![vout(0, 9.9, Some("STo"))],
        };
        let movements = required_movements(&tx, 2);
        assert_eq!(
            types_of(&movements),
            vec![
                MovementType::AddressToTx,
                MovementType::TxToAddress,
                MovementType::TxToFee,
            ]
        );
        assert_eq!(movements[2].amount, COIN / 10);
        assert_eq!(movements[2].to, "FEE");
    }

    #[test]
    fn negative_fee_is_credited_from_fee_entity() {
        let tx = ResolvedTransaction {
            txid: "t1".into(),
            vins: vec![standard_vin("SFrom", 1, 1)],
            vouts: vec![vout(0, 2.0, Some("STo"))],
        };
        let movements = required_movements(&tx, 2);
        assert_eq!(
            types_of(&movements),
            vec![
                MovementType::AddressToTx,
                MovementType::FeeToTx,
                MovementType::TxToAddress,
            ]
        );
        assert_eq!(movements[1].from, "FEE");
        assert_eq!(movements[1].amount, COIN);
    }

    #[test]
    fn zerocoin_mint_and_spend_classification() {
        let mint = ResolvedTransaction {
            txid: "mint".into(),
            vins: vec![standard_vin("SFrom", 2, 1)],
            vouts: vec![RpcVout {
                value: 2.0,
                n: 0,
                script_pub_key: RpcScriptPubKey {
                    addresses: None,
                    script_type: Some("zerocoinmint".into()),
                },
            }],
        };
        let movements = required_movements(&mint, 2);
        assert_eq!(
            types_of(&movements),
            vec![MovementType::AddressToTx, MovementType::TxToZerocoin]
        );

        let spend = ResolvedTransaction {
            txid: "spend".into(),
            vins: vec![ResolvedVin::Zerocoin { value: 2 * COIN }],
            vouts: vec![vout(0, 2.0, Some("STo"))],
        };
        let movements = required_movements(&spend, 3);
        assert_eq!(
            types_of(&movements),
            vec![MovementType::ZerocoinToTx, MovementType::TxToAddress]
        );
    }

    #[test]
    fn undecodable_output_goes_to_unknown() {
        let tx = ResolvedTransaction {
            txid: "t1".into(),
            vins: vec![standard_vin("SFrom", 1, 1)],
            vouts: vec![RpcVout {
                value: 1.0,
                n: 0,
                script_pub_key: RpcScriptPubKey {
                    addresses: None,
                    script_type: Some("nonstandard".into()),
                },
            }],
        };
        let movements = required_movements(&tx, 2);
        // Not mistaken for a stake: value flows to UNKNOWN instead.
        assert_eq!(movements[1].movement_type, MovementType::TxToAddress);
        assert_eq!(movements[1].to, "UNKNOWN");
    }

    #[test]
    fn parse_sweep_creates_missing_entities_once() {
        let store = MemoryStore::new();
        let mut cache = AddressCache::new(100);
        let tx = ResolvedTransaction {
            txid: "cb".into(),
            vins: vec![ResolvedVin::Coinbase],
            vouts: vec![vout(0, 50.0, Some("SMiner"))],
        };
        let required = required_movements(&tx, 1);
        let batch = parse_movements(required, "cb", 1, &store, &mut cache).unwrap();

        assert_eq!(batch.movements.len(), 2);
        assert_eq!(batch.addresses.len(), 3);
        assert_eq!(batch.addresses["COINBASE"].kind, AddressKind::Coinbase);
        assert_eq!(batch.addresses["cb"].kind, AddressKind::Tx);
        assert_eq!(batch.addresses["SMiner"].kind, AddressKind::Address);
        assert_eq!(batch.addresses["SMiner"].block_height, 1);
        assert_eq!(batch.movements[0].from_kind, AddressKind::Coinbase);
        assert_eq!(batch.movements[0].to_kind, AddressKind::Tx);
    }

    #[test]
    fn parse_sweep_prefers_cache_then_store() {
        let mut store = MemoryStore::new();
        let mut seeded = CarverAddress::new("SMiner", AddressKind::Address, 1);
        seeded.balance = 7;
        store.save_addresses(&[seeded]).unwrap();
        let mut cache = AddressCache::new(100);

        let tx = ResolvedTransaction {
            txid: "t9".into(),
            vins: vec![standard_vin("SMiner", 1, 1)],
            vouts: vec![vout(0, 1.0, Some("SMiner"))],
        };
        let required = required_movements(&tx, 9);
        let batch = parse_movements(required, "t9", 9, &store, &mut cache).unwrap();

        // The stored record is used, not a fresh one, and it is now cached.
        assert_eq!(batch.addresses["SMiner"].balance, 7);
        assert_eq!(batch.addresses["SMiner"].block_height, 1);
        assert_eq!(cache.get("SMiner").unwrap().balance, 7);
    }
}
