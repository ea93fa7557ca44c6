//! Full-node JSON-RPC client.
//!
//! The engine reaches the node through the [`NodeRpc`] trait so tests can
//! substitute an in-memory chain. [`RpcClient`] is the production
//! implementation: JSON-RPC 2.0 over HTTP with basic auth and a finite
//! per-request timeout. A timeout aborts the current block; the height is
//! retried on the next invocation because no block row was written.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use carver_core::error::RpcError;

/// Subset of `getinfo` the engine consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Current node tip height.
    pub blocks: u64,
}

/// A block as returned by `getblock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcBlock {
    pub height: u64,
    pub hash: String,
    /// Block time, unix seconds.
    pub time: u64,
    pub difficulty: f64,
    pub merkleroot: String,
    pub bits: String,
    pub nonce: u64,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    pub size: u64,
    pub version: i64,
    pub confirmations: u64,
    /// Transaction ids in block order.
    pub tx: Vec<String>,
}

/// A transaction input as returned by `getrawtransaction` (verbose).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcVin {
    /// Outpoint txid. Absent for coinbase and zerocoin spends.
    #[serde(default)]
    pub txid: Option<String>,
    /// Outpoint index.
    #[serde(default)]
    pub vout: Option<u32>,
    /// Coinbase script hex; presence marks a coinbase input.
    #[serde(default)]
    pub coinbase: Option<String>,
    /// Spend value in coins, when the node reports one (zerocoin spends).
    #[serde(default)]
    pub value: Option<f64>,
}

impl RpcVin {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }

    /// A vin with neither an outpoint nor a coinbase marker is a zerocoin
    /// (or otherwise script-only) spend.
    pub fn is_zerocoin(&self) -> bool {
        self.coinbase.is_none() && self.txid.is_none()
    }
}

/// The script of a transaction output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcScriptPubKey {
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    #[serde(rename = "type", default)]
    pub script_type: Option<String>,
}

/// A transaction output as returned by `getrawtransaction` (verbose).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcVout {
    /// Value in coins.
    pub value: f64,
    /// Output index.
    pub n: u32,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: RpcScriptPubKey,
}

/// A verbose raw transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    pub vin: Vec<RpcVin>,
    pub vout: Vec<RpcVout>,
    /// Containing block height, when the node reports it.
    #[serde(default)]
    pub height: Option<u64>,
}

/// The node RPC surface the engine requires.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Node tip summary.
    async fn get_info(&self) -> Result<NodeInfo, RpcError>;

    /// Hash of the block at `height`.
    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError>;

    /// Full block by hash.
    async fn get_block(&self, hash: &str) -> Result<RpcBlock, RpcError>;

    /// Verbose raw transaction by txid.
    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError>;
}

/// Production JSON-RPC client.
pub struct RpcClient {
    client: Client,
    endpoint: String,
    user: Option<String>,
    password: Option<String>,
}

impl RpcClient {
    /// Build a client for `endpoint` with the given request timeout.
    pub fn new(
        endpoint: &str,
        user: Option<String>,
        password: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, RpcError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_owned(),
            user,
            password,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }

        let resp: Value = request
            .send()
            .await
            .map_err(classify_transport)?
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(err) = resp.get("error") {
            if !err.is_null() {
                return Err(RpcError::Node(err.to_string()));
            }
        }
        serde_json::from_value(resp["result"].clone())
            .map_err(|e| RpcError::Decode(format!("{method}: {e}")))
    }
}

fn classify_transport(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout
    } else {
        RpcError::Transport(err.to_string())
    }
}

#[async_trait]
impl NodeRpc for RpcClient {
    async fn get_info(&self) -> Result<NodeInfo, RpcError> {
        self.call("getinfo", json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<RpcBlock, RpcError> {
        self.call("getblock", json!([hash])).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        self.call("getrawtransaction", json!([txid, 1])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vin_classification() {
        let coinbase = RpcVin {
            txid: None,
            vout: None,
            coinbase: Some("04ffff".into()),
            value: None,
        };
        assert!(coinbase.is_coinbase());
        assert!(!coinbase.is_zerocoin());

        let zerocoin = RpcVin {
            txid: None,
            vout: None,
            coinbase: None,
            value: Some(1.0),
        };
        assert!(zerocoin.is_zerocoin());

        let standard = RpcVin {
            txid: Some("aa".into()),
            vout: Some(0),
            coinbase: None,
            value: None,
        };
        assert!(!standard.is_coinbase());
        assert!(!standard.is_zerocoin());
    }

    #[test]
    fn raw_transaction_decodes_node_shape() {
        let raw: RawTransaction = serde_json::from_value(json!({
            "txid": "dead",
            "vin": [{"coinbase": "04ffff"}],
            "vout": [{
                "value": 50.0,
                "n": 0,
                "scriptPubKey": {"addresses": ["SAbc"], "type": "pubkeyhash"}
            }]
        }))
        .unwrap();
        assert!(raw.vin[0].is_coinbase());
        assert_eq!(raw.vout[0].script_pub_key.addresses.as_deref(), Some(&["SAbc".to_string()][..]));
        assert!(raw.height.is_none());
    }

    #[test]
    fn block_decodes_without_prev_hash() {
        let block: RpcBlock = serde_json::from_value(json!({
            "height": 0,
            "hash": "00aa",
            "time": 1_500_000_000u64,
            "difficulty": 1.5,
            "merkleroot": "mm",
            "bits": "1d00ffff",
            "nonce": 42,
            "size": 285,
            "version": 1,
            "confirmations": 10,
            "tx": ["dead"]
        }))
        .unwrap();
        assert!(block.previousblockhash.is_none());
        assert_eq!(block.tx.len(), 1);
    }
}
