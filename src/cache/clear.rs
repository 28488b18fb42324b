//! Namespace clear.
//!
//! No node holds the whole keyspace, so clearing walks every master with its
//! own SCAN cursor and collects matching keys before deleting anything. Keys
//! written or removed by other clients during the sweep may be missed.

use tracing::{debug, info};

use crate::cache::ClusterCache;
use crate::cluster::{ClusterClient, NodeAddr};
use crate::error::Result;

impl<C: ClusterClient> ClusterCache<C> {
    // == Clear ==
    /// Deletes every key under the namespace prefix on every master.
    pub fn clear(&self) -> Result<bool> {
        self.clear_count().map(|_| true)
    }

    /// Same as `clear`, returning how many keys were removed.
    pub fn clear_count(&self) -> Result<u64> {
        let pattern = self.keys.scan_pattern();
        let masters = self.client.masters()?;

        let mut doomed = Vec::new();
        for node in &masters {
            doomed.extend(self.scan_all(node, &pattern)?);
        }
        // SCAN may report a key more than once
        doomed.sort_unstable();
        doomed.dedup();

        let mut removed = 0;
        if self.keys.same_slot() {
            if !doomed.is_empty() {
                removed = self.client.del(&doomed)?;
            }
        } else {
            self.each_key(doomed.iter(), |key| {
                removed += self.client.del(std::slice::from_ref(key))?;
                Ok(true)
            })?;
        }

        info!(
            "cleared {} keys matching {:?} across {} masters",
            removed,
            pattern,
            masters.len()
        );
        Ok(removed)
    }

    /// Scans one node until its own cursor returns to 0.
    fn scan_all(&self, node: &NodeAddr, pattern: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        let mut pages = 0;
        loop {
            let (next, page) = self.client.scan_node(node, cursor, pattern)?;
            keys.extend(page);
            pages += 1;
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!("{}: {} keys in {} scan pages", node, keys.len(), pages);
        Ok(keys)
    }
}
