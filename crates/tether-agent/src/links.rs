//! Correlation key → ledger row links

use dashmap::DashMap;
use tether_core::{CorrelationKey, RpcId};

/// Which ledger row an outstanding exchange belongs to.
///
/// A link is taken exactly once, by whichever path finalizes the exchange.
#[derive(Debug, Default)]
pub struct CallLinks {
    links: DashMap<CorrelationKey, RpcId>,
}

impl CallLinks {
    /// Create an empty link table
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `key` to `rpc_id`
    pub fn insert(&self, key: CorrelationKey, rpc_id: RpcId) {
        self.links.insert(key, rpc_id);
    }

    /// Remove and return the row linked to `key`
    pub fn take(&self, key: &CorrelationKey) -> Option<RpcId> {
        self.links.remove(key).map(|(_, id)| id)
    }

    /// Number of live links
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// True when no link is live
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}
