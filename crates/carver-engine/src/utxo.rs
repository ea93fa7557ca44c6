//! Input resolution: map each vin to the output it spends.
//!
//! Resolution order: (1) outputs already observed in this sync batch,
//! (2) `getrawtransaction` against the node, (3) fail the block. Coinbase
//! and zerocoin vins resolve to sentinels and never reach the node.

use std::collections::HashMap;

use carver_core::error::{CarverError, RpcError};
use carver_core::types::sats_from_coins;

use crate::rpc::{NodeRpc, RpcVin, RpcVout};
use crate::script;

/// A resolved previous output.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutput {
    /// Label the output paid (address or `UNKNOWN`).
    pub label: String,
    /// Output value in satoshis.
    pub value: i64,
    /// Height of the block that created the output, when known. Used for
    /// the stake-age calculation.
    pub block_height: Option<u64>,
}

/// A transaction input after resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedVin {
    /// Coinbase marker input.
    Coinbase,
    /// Zerocoin spend, with the vin-declared value when reported.
    Zerocoin { value: i64 },
    /// Ordinary spend of a previous output.
    Standard(ResolvedOutput),
}

impl ResolvedVin {
    /// Satoshis this input credits into the transaction. Coinbase inputs
    /// carry no intrinsic value; their credit is derived from the outputs.
    pub fn value(&self) -> i64 {
        match self {
            ResolvedVin::Coinbase => 0,
            ResolvedVin::Zerocoin { value } => *value,
            ResolvedVin::Standard(out) => out.value,
        }
    }
}

/// Resolves inputs for one sync batch.
///
/// Pure relative to the node's view: no cross-batch caching is kept, and
/// the in-memory map only short-circuits lookups for outputs this batch
/// itself created.
pub struct UtxoResolver {
    batch: HashMap<(String, u32), ResolvedOutput>,
}

impl UtxoResolver {
    pub fn new() -> Self {
        Self {
            batch: HashMap::new(),
        }
    }

    /// Record a processed transaction's outputs so later inputs in the same
    /// batch resolve without RPC.
    pub fn record_outputs(&mut self, txid: &str, block_height: u64, vouts: &[RpcVout]) {
        for vout in vouts {
            self.batch.insert(
                (txid.to_owned(), vout.n),
                ResolvedOutput {
                    label: script::output_label(&vout.script_pub_key),
                    value: sats_from_coins(vout.value),
                    block_height: Some(block_height),
                },
            );
        }
    }

    /// Resolve one input. Unresolvable standard inputs fail the block.
    pub async fn resolve(
        &self,
        rpc: &dyn NodeRpc,
        vin: &RpcVin,
    ) -> Result<ResolvedVin, CarverError> {
        if vin.is_coinbase() {
            return Ok(ResolvedVin::Coinbase);
        }
        if vin.is_zerocoin() {
            return Ok(ResolvedVin::Zerocoin {
                value: vin.value.map(sats_from_coins).unwrap_or(0),
            });
        }

        // Guaranteed by the classification above.
        let txid = vin.txid.as_deref().unwrap_or_default();
        let index = vin.vout.unwrap_or(0);

        if let Some(out) = self.batch.get(&(txid.to_owned(), index)) {
            return Ok(ResolvedVin::Standard(out.clone()));
        }

        let raw = rpc.get_raw_transaction(txid).await?;
        let vout = raw
            .vout
            .iter()
            .find(|v| v.n == index)
            .ok_or_else(|| {
                RpcError::Node(format!("{txid}:{index} not found in source transaction"))
            })?;

        Ok(ResolvedVin::Standard(ResolvedOutput {
            label: script::output_label(&vout.script_pub_key),
            value: sats_from_coins(vout.value),
            block_height: raw.height,
        }))
    }
}

impl Default for UtxoResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{NodeInfo, RawTransaction, RpcBlock, RpcScriptPubKey};
    use async_trait::async_trait;
    use carver_core::constants::COIN;

    struct SingleTxNode {
        raw: RawTransaction,
    }

    #[async_trait]
    impl NodeRpc for SingleTxNode {
        async fn get_info(&self) -> Result<NodeInfo, RpcError> {
            unimplemented!()
        }
        async fn get_block_hash(&self, _height: u64) -> Result<String, RpcError> {
            unimplemented!()
        }
        async fn get_block(&self, _hash: &str) -> Result<RpcBlock, RpcError> {
            unimplemented!()
        }
        async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
            if txid == self.raw.txid {
                Ok(self.raw.clone())
            } else {
                Err(RpcError::Node(format!("no such tx {txid}")))
            }
        }
    }

    fn vout(n: u32, coins: f64, address: &str) -> RpcVout {
        RpcVout {
            value: coins,
            n,
            script_pub_key: RpcScriptPubKey {
                addresses: Some(vec![address.to_string()]),
                script_type: Some("pubkeyhash".into()),
            },
        }
    }

    fn standard_vin(txid: &str, index: u32) -> RpcVin {
        RpcVin {
            txid: Some(txid.to_string()),
            vout: Some(index),
            coinbase: None,
            value: None,
        }
    }

    #[tokio::test]
    async fn batch_outputs_short_circuit_rpc() {
        let node = SingleTxNode {
            raw: RawTransaction {
                txid: "never-called".into(),
                vin: vec![],
                vout: vec![],
                height: None,
            },
        };
        let mut resolver = UtxoResolver::new();
        resolver.record_outputs("tx1", 9, &[vout(0, 2.0, "SAbc")]);

        let resolved = resolver
            .resolve(&node, &standard_vin("tx1", 0))
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedVin::Standard(ResolvedOutput {
                label: "SAbc".into(),
                value: 2 * COIN,
                block_height: Some(9),
            })
        );
    }

    #[tokio::test]
    async fn falls_back_to_node_for_unseen_outpoints() {
        let node = SingleTxNode {
            raw: RawTransaction {
                txid: "tx2".into(),
                vin: vec![],
                vout: vec![vout(1, 0.5, "SDef")],
                height: Some(4),
            },
        };
        let resolver = UtxoResolver::new();

        let resolved = resolver
            .resolve(&node, &standard_vin("tx2", 1))
            .await
            .unwrap();
        match resolved {
            ResolvedVin::Standard(out) => {
                assert_eq!(out.label, "SDef");
                assert_eq!(out.value, COIN / 2);
                assert_eq!(out.block_height, Some(4));
            }
            other => panic!("expected standard vin, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_outpoint_fails_the_block() {
        let node = SingleTxNode {
            raw: RawTransaction {
                txid: "tx2".into(),
                vin: vec![],
                vout: vec![vout(0, 0.5, "SDef")],
                height: None,
            },
        };
        let resolver = UtxoResolver::new();
        let err = resolver
            .resolve(&node, &standard_vin("tx2", 7))
            .await
            .unwrap_err();
        assert!(matches!(err, CarverError::Rpc(_)));
    }

    #[tokio::test]
    async fn sentinels_never_reach_the_node() {
        let node = SingleTxNode {
            raw: RawTransaction {
                txid: "unused".into(),
                vin: vec![],
                vout: vec![],
                height: None,
            },
        };
        let resolver = UtxoResolver::new();

        let coinbase = RpcVin {
            txid: None,
            vout: None,
            coinbase: Some("04ff".into()),
            value: None,
        };
        assert_eq!(
            resolver.resolve(&node, &coinbase).await.unwrap(),
            ResolvedVin::Coinbase
        );

        let zerocoin = RpcVin {
            txid: None,
            vout: None,
            coinbase: None,
            value: Some(1.0),
        };
        assert_eq!(
            resolver.resolve(&node, &zerocoin).await.unwrap(),
            ResolvedVin::Zerocoin { value: COIN }
        );
    }
}
