//! Error taxonomy for the Carver engine.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("transport: {0}")] Transport(String),
    #[error("node returned error: {0}")] Node(String),
    #[error("request timed out")] Timeout,
    #[error("malformed response: {0}")] Decode(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")] NotFound(String),
    #[error("backend: {0}")] Backend(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("corruption: {0}")] Corruption(String),
}

/// Top-level engine error. Everything bubbles to the sync coordinator,
/// which logs and exits nonzero; the absent block row makes retried heights
/// safe.
#[derive(Error, Debug)]
pub enum CarverError {
    #[error(transparent)] Rpc(#[from] RpcError),
    #[error(transparent)] Store(#[from] StoreError),
    /// Forward apply observed an endpoint already at or beyond the new
    /// sequence. Fatal: indicates a movement-ordering bug upstream.
    #[error("reconciliation: {label} at sequence {address_sequence} >= movement {movement_sequence}")]
    Reconciliation {
        label: String,
        address_sequence: u64,
        movement_sequence: u64,
    },
    /// Unwind observed an endpoint ahead of the movement being reversed.
    /// Fatal: the log is corrupt.
    #[error("unreconciliation: {label} at sequence {address_sequence} > movement {movement_sequence}")]
    Unreconciliation {
        label: String,
        address_sequence: u64,
        movement_sequence: u64,
    },
    #[error("decode: {0}")] Decode(String),
    #[error("lock: {0}")] Lock(String),
    #[error("config: {0}")] Config(String),
}

impl CarverError {
    /// Whether the error is an expected transient condition (node or store
    /// unavailable) that the next sync invocation retries, as opposed to a
    /// fatal consistency violation.
    pub fn is_transient(&self) -> bool {
        matches!(self, CarverError::Rpc(_) | CarverError::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_and_store_errors_are_transient() {
        assert!(CarverError::from(RpcError::Timeout).is_transient());
        assert!(CarverError::from(StoreError::Backend("down".into())).is_transient());
    }

    #[test]
    fn sequence_violations_are_fatal() {
        let err = CarverError::Reconciliation {
            label: "SAbc".into(),
            address_sequence: 9,
            movement_sequence: 9,
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("reconciliation"));
    }
}
