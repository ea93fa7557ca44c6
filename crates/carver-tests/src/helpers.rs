//! In-memory mock node and transaction builders for E2E tests.
//!
//! The [`MockNode`] serves a mutable fake chain over the [`NodeRpc`] trait:
//! tests append blocks, replace the tip to simulate a reorg, and let the
//! real engine sync against it. Hashes and merkle roots are synthetic but
//! deterministic, so replacing a block's transactions changes its merkle
//! root exactly as a real reorg would.

use std::sync::Mutex;

use async_trait::async_trait;

use carver_core::error::RpcError;
use carver_engine::rpc::{
    NodeInfo, NodeRpc, RawTransaction, RpcBlock, RpcScriptPubKey, RpcVin, RpcVout,
};

/// One fake block: its transactions plus derived hash and merkle root.
#[derive(Debug, Clone)]
pub struct MockBlock {
    pub hash: String,
    pub merkleroot: String,
    pub time: u64,
    pub txs: Vec<RawTransaction>,
}

/// A mutable fake chain served over [`NodeRpc`]. Heights are 1-based; the
/// reported tip equals the number of blocks, so an empty chain has tip 0.
pub struct MockNode {
    blocks: Mutex<Vec<MockBlock>>,
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Append a block containing `txs` at the next height.
    pub fn push_block(&self, txs: Vec<RawTransaction>) -> u64 {
        let mut blocks = self.blocks.lock().unwrap();
        let height = blocks.len() as u64 + 1;
        blocks.push(Self::make_block(height, txs));
        height
    }

    /// Replace the tip block with different transactions: a one-block reorg.
    pub fn replace_tip(&self, txs: Vec<RawTransaction>) {
        let mut blocks = self.blocks.lock().unwrap();
        let height = blocks.len() as u64;
        blocks.pop();
        blocks.push(Self::make_block(height, txs));
    }

    pub fn tip(&self) -> u64 {
        self.blocks.lock().unwrap().len() as u64
    }

    fn make_block(height: u64, txs: Vec<RawTransaction>) -> MockBlock {
        let txids: Vec<&str> = txs.iter().map(|t| t.txid.as_str()).collect();
        let merkleroot = format!("merkle({})", txids.join(","));
        MockBlock {
            hash: format!("hash-{height}-{merkleroot}"),
            merkleroot,
            time: 1_600_000_000 + height * 60,
            txs,
        }
    }
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn get_info(&self) -> Result<NodeInfo, RpcError> {
        Ok(NodeInfo { blocks: self.tip() })
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        let blocks = self.blocks.lock().unwrap();
        height
            .checked_sub(1)
            .and_then(|i| blocks.get(i as usize))
            .map(|b| b.hash.clone())
            .ok_or_else(|| RpcError::Node(format!("block height out of range: {height}")))
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock, RpcError> {
        let blocks = self.blocks.lock().unwrap();
        let tip = blocks.len() as u64;
        let (index, block) = blocks
            .iter()
            .enumerate()
            .find(|(_, b)| b.hash == hash)
            .ok_or_else(|| RpcError::Node(format!("unknown block hash: {hash}")))?;
        let height = index as u64 + 1;
        Ok(RpcBlock {
            height,
            hash: block.hash.clone(),
            time: block.time,
            difficulty: 1.0,
            merkleroot: block.merkleroot.clone(),
            bits: "1d00ffff".into(),
            nonce: height,
            previousblockhash: index
                .checked_sub(1)
                .map(|i| blocks[i].hash.clone()),
            size: 250,
            version: 1,
            confirmations: tip - height + 1,
            tx: block.txs.iter().map(|t| t.txid.clone()).collect(),
        })
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        let blocks = self.blocks.lock().unwrap();
        for (index, block) in blocks.iter().enumerate() {
            if let Some(tx) = block.txs.iter().find(|t| t.txid == txid) {
                let mut tx = tx.clone();
                tx.height = Some(index as u64 + 1);
                return Ok(tx);
            }
        }
        Err(RpcError::Node(format!("unknown transaction: {txid}")))
    }
}

// Lets tests keep hold of the node (to push blocks or reorg the tip)
// while the coordinator owns the RPC handle.
#[async_trait]
impl NodeRpc for &MockNode {
    async fn get_info(&self) -> Result<NodeInfo, RpcError> {
        (**self).get_info().await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        (**self).get_block_hash(height).await
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock, RpcError> {
        (**self).get_block(hash).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        (**self).get_raw_transaction(txid).await
    }
}

/// A spendable output paying one address.
pub fn vout(n: u32, coins: f64, address: &str) -> RpcVout {
    RpcVout {
        value: coins,
        n,
        script_pub_key: RpcScriptPubKey {
            addresses: Some(vec![address.to_string()]),
            script_type: Some("pubkeyhash".into()),
        },
    }
}

/// The empty marker output that opens a proof-of-stake transaction.
pub fn empty_vout(n: u32) -> RpcVout {
    RpcVout {
        value: 0.0,
        n,
        script_pub_key: RpcScriptPubKey {
            addresses: None,
            script_type: Some("nonstandard".into()),
        },
    }
}

/// A coinbase transaction paying the given outputs.
pub fn coinbase_tx(txid: &str, outputs: &[(&str, f64)]) -> RawTransaction {
    RawTransaction {
        txid: txid.to_string(),
        vin: vec![RpcVin {
            txid: None,
            vout: None,
            coinbase: Some("04deadbeef".into()),
            value: None,
        }],
        vout: outputs
            .iter()
            .enumerate()
            .map(|(n, (address, coins))| vout(n as u32, *coins, address))
            .collect(),
        height: None,
    }
}

/// A standard transaction spending the given outpoints.
pub fn standard_tx(
    txid: &str,
    vins: &[(&str, u32)],
    outputs: &[(&str, f64)],
) -> RawTransaction {
    RawTransaction {
        txid: txid.to_string(),
        vin: vins
            .iter()
            .map(|(source, index)| RpcVin {
                txid: Some(source.to_string()),
                vout: Some(*index),
                coinbase: None,
                value: None,
            })
            .collect(),
        vout: outputs
            .iter()
            .enumerate()
            .map(|(n, (address, coins))| vout(n as u32, *coins, address))
            .collect(),
        height: None,
    }
}

/// A proof-of-stake transaction: empty first output, staked inputs, and
/// payouts exceeding the inputs by the reward.
pub fn pos_tx(txid: &str, vins: &[(&str, u32)], outputs: &[(&str, f64)]) -> RawTransaction {
    let mut tx = standard_tx(txid, vins, &[]);
    tx.vout.push(empty_vout(0));
    for (i, (address, coins)) in outputs.iter().enumerate() {
        tx.vout.push(vout(i as u32 + 1, *coins, address));
    }
    tx
}
