//! # carver-engine
//! The Carver movement engine: transforms node blocks into an append-only
//! ledger of value movements with per-address statistics, survives crashes
//! mid-block, and unwinds cleanly across chain reorganizations.

pub mod applier;
pub mod builder;
pub mod cache;
pub mod config;
pub mod confirm;
pub mod coordinator;
pub mod lock;
pub mod rpc;
pub mod script;
pub mod unwind;
pub mod utxo;

pub use config::SyncConfig;
pub use coordinator::SyncCoordinator;
pub use rpc::{NodeRpc, RpcClient};
