//! Ledger types: blocks, carver addresses, carver movements.
//!
//! All monetary values are integer satoshis (1 coin = 10^8 satoshis) and are
//! signed: source entities such as `COINBASE` accumulate negative balances by
//! construction. Timestamps are unix seconds as reported by the node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::COIN;

/// Label of the lazily created coinbase source entity.
pub const COINBASE_LABEL: &str = "COINBASE";
/// Label of the fee sink/source entity.
pub const FEE_LABEL: &str = "FEE";
/// Label of the masternode reward source entity.
pub const MN_LABEL: &str = "MN";
/// Label of the proof-of-stake reward source entity.
pub const POS_LABEL: &str = "POS";
/// Label of the proof-of-work routing entity.
pub const POW_LABEL: &str = "POW";
/// Label of the zerocoin mint/spend entity.
pub const ZEROCOIN_LABEL: &str = "ZEROCOIN";
/// Label absorbing outputs whose script yields no decodable address.
pub const UNKNOWN_LABEL: &str = "UNKNOWN";

/// Convert a node-reported coin value (float) to integer satoshis.
pub fn sats_from_coins(coins: f64) -> i64 {
    (coins * COIN as f64).round() as i64
}

/// Kind tag of an accounting entity.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum AddressKind {
    /// Ordinary on-chain address.
    Address,
    /// Per-transaction pseudo-address labelled by txid.
    Tx,
    /// The `COINBASE` source entity.
    Coinbase,
    /// The `FEE` entity.
    Fee,
    /// The `MN` masternode reward source.
    Masternode,
    /// The `POS` stake reward source.
    ProofOfStake,
    /// The `POW` payout routing entity.
    ProofOfWork,
    /// The `ZEROCOIN` mint/spend entity.
    Zerocoin,
}

impl AddressKind {
    /// Kinds that live in the permanent cache tier and are never evicted.
    pub fn is_special(self) -> bool {
        !matches!(self, AddressKind::Address)
    }

    /// Resolve the kind for one of the fixed special labels, if any.
    pub fn for_special_label(label: &str) -> Option<Self> {
        match label {
            COINBASE_LABEL => Some(AddressKind::Coinbase),
            FEE_LABEL => Some(AddressKind::Fee),
            MN_LABEL => Some(AddressKind::Masternode),
            POS_LABEL => Some(AddressKind::ProofOfStake),
            POW_LABEL => Some(AddressKind::ProofOfWork),
            ZEROCOIN_LABEL => Some(AddressKind::Zerocoin),
            _ => None,
        }
    }
}

/// The closed set of movement classifications.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub enum MovementType {
    /// Coinbase credit into the per-transaction pseudo-address.
    CoinbaseToTx,
    /// Transaction routing a proof-of-work payout through `POW`.
    TxToPowAddress,
    /// `POW` forwarding the payout to the miner address.
    PowAddressReward,
    /// Implicit stake reward entering a transaction.
    PosRewardToTx,
    /// Transaction disbursing a stake reward to a payee address.
    TxToPosAddress,
    /// Implicit masternode reward entering a transaction.
    MasternodeRewardToTx,
    /// Transaction paying the masternode payee.
    TxToMnAddress,
    /// `FEE` crediting a transaction (outputs exceed inputs).
    FeeToTx,
    /// Transaction paying its fee into `FEE`.
    TxToFee,
    /// Ordinary input: an address crediting the transaction.
    AddressToTx,
    /// Ordinary output: the transaction paying an address.
    TxToAddress,
    /// Zerocoin spend crediting a transaction.
    ZerocoinToTx,
    /// Zerocoin mint debiting a transaction.
    TxToZerocoin,
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MovementType::CoinbaseToTx => "coinbase_to_tx",
            MovementType::TxToPowAddress => "tx_to_pow_address",
            MovementType::PowAddressReward => "pow_address_reward",
            MovementType::PosRewardToTx => "pos_reward_to_tx",
            MovementType::TxToPosAddress => "tx_to_pos_address",
            MovementType::MasternodeRewardToTx => "masternode_reward_to_tx",
            MovementType::TxToMnAddress => "tx_to_mn_address",
            MovementType::FeeToTx => "fee_to_tx",
            MovementType::TxToFee => "tx_to_fee",
            MovementType::AddressToTx => "address_to_tx",
            MovementType::TxToAddress => "tx_to_address",
            MovementType::ZerocoinToTx => "zerocoin_to_tx",
            MovementType::TxToZerocoin => "tx_to_zerocoin",
        };
        f.write_str(name)
    }
}

/// A persisted block row. Its presence is the commit marker for a height:
/// every movement at `height` carries a sequence in
/// `(sequence_start, sequence_end]`, and a missing row marks the height's
/// writes as incomplete.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockRecord {
    /// Dense, unique chain height.
    pub height: u64,
    /// Block hash as reported by the node.
    pub hash: String,
    /// Previous block hash. Empty for the first synced block.
    pub prev_hash: String,
    /// Merkle root at ingest time; re-checked by the confirmer.
    pub merkle_root: String,
    /// Compact difficulty bits.
    pub bits: String,
    /// Header nonce.
    pub nonce: u64,
    /// Node-reported difficulty.
    pub difficulty: f64,
    /// Serialized block size in bytes.
    pub size: u64,
    /// Block version.
    pub version: i64,
    /// Node-reported confirmations at ingest time.
    pub confirmations_at_ingest: u64,
    /// Block time (unix seconds, node clock).
    pub created_at: u64,
    /// Total transaction inputs across the block.
    pub vins_count: u64,
    /// Total transaction outputs across the block.
    pub vouts_count: u64,
    /// Global sequence before the first movement of this block.
    pub sequence_start: u64,
    /// Global sequence of the last movement of this block.
    pub sequence_end: u64,
    /// Set once the node reports enough confirmations and the merkle root
    /// still matches.
    pub is_confirmed: bool,
}

/// A unique accounting entity, keyed by `label`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq,
    bincode::Encode, bincode::Decode,
)]
pub struct CarverAddress {
    /// Stable unique label: an on-chain address string, a txid
    /// (pseudo-address), or one of the special labels.
    pub label: String,
    /// Entity kind.
    pub kind: AddressKind,
    /// Height of the block that first created this entity.
    pub block_height: u64,
    /// Sequence of the last movement that touched this entity.
    pub sequence: u64,
    /// Sequence of the movement that set `sequence`. `None` before the
    /// first movement.
    pub last_movement: Option<u64>,
    /// Running balance: always `value_in - value_out`.
    pub balance: i64,
    /// Number of credits received.
    pub count_in: u64,
    /// Number of debits sent.
    pub count_out: u64,
    /// Total satoshis credited.
    pub value_in: i64,
    /// Total satoshis debited.
    pub value_out: i64,
    /// Proof-of-work payouts received.
    pub pow_count_in: u64,
    pub pow_value_in: i64,
    /// Stake rewards received.
    pub pos_count_in: u64,
    pub pos_value_in: i64,
    /// Masternode rewards received.
    pub mn_count_in: u64,
    pub mn_value_in: i64,
    /// Sequence of the latest stake-reward movement credited here.
    pub last_pos_reward: Option<u64>,
    /// Sequence of the latest masternode-reward movement credited here.
    pub last_mn_reward: Option<u64>,
}

impl CarverAddress {
    /// A fresh entity with zeroed counters, created at `block_height`.
    pub fn new(label: impl Into<String>, kind: AddressKind, block_height: u64) -> Self {
        Self {
            label: label.into(),
            kind,
            block_height,
            sequence: 0,
            last_movement: None,
            balance: 0,
            count_in: 0,
            count_out: 0,
            value_in: 0,
            value_out: 0,
            pow_count_in: 0,
            pow_value_in: 0,
            pos_count_in: 0,
            pos_value_in: 0,
            mn_count_in: 0,
            mn_value_in: 0,
            last_pos_reward: None,
            last_mn_reward: None,
        }
    }
}

/// An immutable ledger record: one directed value transfer between two
/// accounting entities. Identified by its globally monotonic `sequence`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq,
    bincode::Encode, bincode::Decode,
)]
pub struct CarverMovement {
    /// Global monotonic sequence; dense within a block.
    pub sequence: u64,
    /// Human-readable movement label.
    pub label: String,
    /// Transferred satoshis, non-negative.
    pub amount: i64,
    /// Block time of the containing block.
    pub date: u64,
    /// Height of the containing block.
    pub block_height: u64,
    /// Source entity label.
    pub from: String,
    /// Destination entity label.
    pub to: String,
    /// Final recipient when the value is routed through a special entity.
    pub destination_address: Option<String>,
    /// Source balance before this movement was applied.
    pub from_balance: i64,
    /// Destination balance before this movement was applied.
    pub to_balance: i64,
    /// Classification.
    pub movement_type: MovementType,
    /// Previous movement that touched the source entity, if any.
    pub last_from_movement: Option<u64>,
    /// Previous movement that touched the destination entity, if any.
    pub last_to_movement: Option<u64>,
    /// The non-`Tx` endpoint, for indexed per-address lookups.
    pub context_address: Option<String>,
    /// The `Tx`-kind endpoint, for indexed per-transaction lookups.
    pub context_tx: Option<String>,
    /// Stake reward carried by this movement.
    pub pos_reward_amount: Option<i64>,
    /// Total staked input behind the reward.
    pub pos_input_amount: Option<i64>,
    /// Blocks elapsed since the staked input was created.
    pub pos_input_block_height_diff: Option<u64>,
}
