//! Two-tier in-memory address cache.
//!
//! The common tier holds special entities and transaction pseudo-addresses
//! and is never flushed during a run. The normal tier is bounded: exceeding
//! the limit drops the whole tier, forcing authoritative re-reads from the
//! store. Correctness depends only on coherence, not hit rate, so the
//! coarse policy is intentional.
//!
//! Coherence contract: a cached record equals the stored record. Writers
//! persist to the store first and then overwrite the cache entry; any
//! rollback clears both tiers, since the common tier may then hold entities
//! that no longer exist.

use std::collections::HashMap;

use carver_core::types::CarverAddress;

/// Two-tier label → address cache.
pub struct AddressCache {
    common: HashMap<String, CarverAddress>,
    normal: HashMap<String, CarverAddress>,
    normal_limit: usize,
}

impl AddressCache {
    /// Create a cache whose normal tier is dropped past `normal_limit`.
    pub fn new(normal_limit: usize) -> Self {
        Self {
            common: HashMap::new(),
            normal: HashMap::new(),
            normal_limit,
        }
    }

    /// Look up a cached address.
    pub fn get(&self, label: &str) -> Option<&CarverAddress> {
        self.common.get(label).or_else(|| self.normal.get(label))
    }

    /// Insert or overwrite an entry. Special kinds and tx pseudo-addresses
    /// go to the permanent tier; ordinary addresses to the bounded tier.
    pub fn insert(&mut self, address: CarverAddress) {
        if address.kind.is_special() {
            self.common.insert(address.label.clone(), address);
            return;
        }
        self.normal.insert(address.label.clone(), address);
        if self.normal.len() > self.normal_limit {
            tracing::debug!(
                dropped = self.normal.len(),
                "normal address cache tier over limit, dropping"
            );
            self.normal.clear();
        }
    }

    /// Overwrite an entry only if the label is already cached. Used after
    /// store writes to keep present entries coherent without growing tiers.
    pub fn refresh(&mut self, address: &CarverAddress) {
        if self.common.contains_key(&address.label) || self.normal.contains_key(&address.label) {
            self.insert(address.clone());
        }
    }

    /// Drop both tiers. Required after any rollback.
    pub fn clear(&mut self) {
        self.common.clear();
        self.normal.clear();
    }

    /// Entries currently cached across both tiers.
    pub fn len(&self) -> usize {
        self.common.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.common.is_empty() && self.normal.is_empty()
    }
}
