//! In-Process Cluster
//!
//! A multi-master store living in memory. Slots are split evenly across the
//! nodes, keys are routed with the same hash-slot function a real cluster uses,
//! and multi-key commands are refused when their keys span slots. Each node can
//! be taken down to simulate a failure.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::debug;

use crate::cluster::entry::{StoredEntry, StoredValue};
use crate::cluster::pattern::glob_match;
use crate::cluster::slot::{key_slot, SLOT_COUNT};
use crate::cluster::topology::{SlotMap, SlotRange};
use crate::cluster::{ClusterClient, NodeAddr};
use crate::error::{CacheError, Result};

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const CROSSSLOT: &str = "CROSSSLOT Keys in request don't hash to the same slot";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";

/// Keys examined per SCAN call unless overridden.
const DEFAULT_SCAN_PAGE: usize = 10;

struct MemoryNode {
    addr: NodeAddr,
    first_slot: u16,
    last_slot: u16,
    entries: Mutex<BTreeMap<String, StoredEntry>>,
    down: AtomicBool,
}

impl MemoryNode {
    /// Locks the keyspace, failing when the node is down.
    fn keyspace(&self) -> Result<MutexGuard<'_, BTreeMap<String, StoredEntry>>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::StoreUnavailable(format!(
                "node {} is unreachable",
                self.addr
            )));
        }
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// == Memory Cluster ==
pub struct MemoryCluster {
    nodes: Vec<MemoryNode>,
    scan_page: usize,
    journal: Mutex<Vec<String>>,
}

impl MemoryCluster {
    /// Creates a cluster of `node_count` masters (at least one).
    pub fn new(node_count: usize) -> Self {
        let count = node_count.clamp(1, SLOT_COUNT as usize);
        let nodes = (0..count)
            .map(|idx| MemoryNode {
                addr: NodeAddr::new("127.0.0.1", 7000 + idx as u16),
                first_slot: (idx * SLOT_COUNT as usize / count) as u16,
                last_slot: ((idx + 1) * SLOT_COUNT as usize / count - 1) as u16,
                entries: Mutex::new(BTreeMap::new()),
                down: AtomicBool::new(false),
            })
            .collect();
        Self {
            nodes,
            scan_page: DEFAULT_SCAN_PAGE,
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Sets how many keys one SCAN call examines.
    pub fn with_scan_page(mut self, keys: usize) -> Self {
        self.scan_page = keys.max(1);
        self
    }

    /// Address of the master owning `key`.
    pub fn node_of(&self, key: &str) -> NodeAddr {
        self.node_for_slot(key_slot(key.as_bytes())).addr.clone()
    }

    /// Slot ownership, in the same shape a real cluster reports.
    pub fn slot_map(&self) -> SlotMap {
        SlotMap::new(
            self.nodes
                .iter()
                .map(|node| SlotRange {
                    start: node.first_slot,
                    end: node.last_slot,
                    master: node.addr.clone(),
                    replicas: Vec::new(),
                })
                .collect(),
        )
    }

    /// Marks a node unreachable (or reachable again).
    pub fn set_node_down(&self, addr: &NodeAddr, down: bool) {
        if let Some(node) = self.nodes.iter().find(|node| &node.addr == addr) {
            node.down.store(down, Ordering::SeqCst);
        }
    }

    /// Removes expired keys on every reachable node, returning how many.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for node in &self.nodes {
            if let Ok(mut entries) = node.keyspace() {
                let before = entries.len();
                entries.retain(|_, entry| !entry.is_expired_at(now));
                removed += before - entries.len();
            }
        }
        removed
    }

    /// Live keys across all nodes, including unreachable ones.
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.nodes
            .iter()
            .map(|node| {
                let entries = node.entries.lock().unwrap_or_else(PoisonError::into_inner);
                entries.values().filter(|e| !e.is_expired_at(now)).count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries held in memory, counting expired ones not yet purged.
    pub fn resident_len(&self) -> usize {
        self.nodes
            .iter()
            .map(|node| node.entries.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Live keys held by one node.
    pub fn node_len(&self, addr: &NodeAddr) -> usize {
        let now = Utc::now();
        self.nodes
            .iter()
            .find(|node| &node.addr == addr)
            .map(|node| {
                let entries = node.entries.lock().unwrap_or_else(PoisonError::into_inner);
                entries.values().filter(|e| !e.is_expired_at(now)).count()
            })
            .unwrap_or(0)
    }

    /// Remaining TTL in seconds; None when the key is missing or never expires.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        let node = self.node_for_slot(key_slot(key.as_bytes()));
        let entries = node.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .and_then(StoredEntry::ttl_remaining)
    }

    /// Command names issued so far, oldest first.
    pub fn commands(&self) -> Vec<String> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset_commands(&self) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, command: &str) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_string());
    }

    fn node_for_slot(&self, slot: u16) -> &MemoryNode {
        let idx = self.nodes.partition_point(|node| node.last_slot < slot);
        &self.nodes[idx.min(self.nodes.len() - 1)]
    }

    fn node_for_key(&self, key: &str) -> &MemoryNode {
        self.node_for_slot(key_slot(key.as_bytes()))
    }

    /// Node owning every key, or CROSSSLOT.
    fn node_for_keys<'a, I>(&self, keys: I) -> Result<Option<&MemoryNode>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut slot = None;
        for key in keys {
            let this_slot = key_slot(key.as_bytes());
            match slot {
                None => slot = Some(this_slot),
                Some(existing) if existing != this_slot => {
                    return Err(CacheError::CommandRejected(CROSSSLOT.to_string()))
                }
                Some(_) => {}
            }
        }
        Ok(slot.map(|slot| self.node_for_slot(slot)))
    }

    fn write_string(&self, key: &str, value: &[u8], ttl: Option<u64>) -> Result<bool> {
        let mut entries = self.node_for_key(key).keyspace()?;
        entries.insert(
            key.to_string(),
            StoredEntry::new(StoredValue::Str(value.to_vec()), ttl),
        );
        Ok(true)
    }

    fn add_to_counter(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.node_for_key(key).keyspace()?;
        drop_expired(&mut entries, key);

        let (current, expires_at) = match entries.get(key) {
            None => (0, None),
            Some(entry) => match &entry.value {
                StoredValue::Str(bytes) => (parse_integer(bytes)?, entry.expires_at),
                StoredValue::Set(_) => {
                    return Err(CacheError::CommandRejected(WRONGTYPE.to_string()))
                }
            },
        };

        let next = current.checked_add(delta).ok_or_else(|| {
            CacheError::CommandRejected("ERR increment or decrement would overflow".to_string())
        })?;

        // INCRBY keeps an existing TTL
        let mut entry = StoredEntry::new(StoredValue::Str(next.to_string().into_bytes()), None);
        entry.expires_at = expires_at;
        entries.insert(key.to_string(), entry);
        Ok(next)
    }
}

impl ClusterClient for MemoryCluster {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.record("GET");
        let mut entries = self.node_for_key(key).keyspace()?;
        drop_expired(&mut entries, key);
        match entries.get(key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(StoredValue::Str(bytes)) => Ok(Some(bytes.clone())),
            Some(StoredValue::Set(_)) => Err(CacheError::CommandRejected(WRONGTYPE.to_string())),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<bool> {
        self.record("SET");
        self.write_string(key, value, None)
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<bool> {
        self.record("SETEX");
        if ttl_secs == 0 {
            return Err(CacheError::CommandRejected(
                "ERR invalid expire time in 'setex' command".to_string(),
            ));
        }
        self.write_string(key, value, Some(ttl_secs))
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.record("EXISTS");
        let mut entries = self.node_for_key(key).keyspace()?;
        drop_expired(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.record("DEL");
        let node = match self.node_for_keys(keys.iter().map(String::as_str))? {
            Some(node) => node,
            None => return Ok(0),
        };
        let mut entries = node.keyspace()?;
        let now = Utc::now();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if !entry.is_expired_at(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn incr_by(&self, key: &str, step: i64) -> Result<i64> {
        self.record("INCRBY");
        self.add_to_counter(key, step)
    }

    fn decr_by(&self, key: &str, step: i64) -> Result<i64> {
        self.record("DECRBY");
        let delta = step.checked_neg().ok_or_else(|| {
            CacheError::CommandRejected("ERR decrement would overflow".to_string())
        })?;
        self.add_to_counter(key, delta)
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        self.record("MGET");
        let node = match self.node_for_keys(keys.iter().map(String::as_str))? {
            Some(node) => node,
            None => return Ok(Vec::new()),
        };
        let mut entries = node.keyspace()?;
        Ok(keys
            .iter()
            .map(|key| {
                drop_expired(&mut entries, key);
                // MGET answers nil for keys of another type
                match entries.get(key).map(|entry| &entry.value) {
                    Some(StoredValue::Str(bytes)) => Some(bytes.clone()),
                    _ => None,
                }
            })
            .collect())
    }

    fn mset(&self, pairs: &[(String, Vec<u8>)]) -> Result<bool> {
        self.record("MSET");
        let node = match self.node_for_keys(pairs.iter().map(|(key, _)| key.as_str()))? {
            Some(node) => node,
            None => return Ok(true),
        };
        let mut entries = node.keyspace()?;
        for (key, value) in pairs {
            entries.insert(
                key.clone(),
                StoredEntry::new(StoredValue::Str(value.clone()), None),
            );
        }
        Ok(true)
    }

    fn masters(&self) -> Result<Vec<NodeAddr>> {
        Ok(self.nodes.iter().map(|node| node.addr.clone()).collect())
    }

    fn scan_node(
        &self,
        node: &NodeAddr,
        cursor: u64,
        pattern: &str,
    ) -> Result<(u64, Vec<String>)> {
        self.record("SCAN");
        let target = self
            .nodes
            .iter()
            .find(|candidate| &candidate.addr == node)
            .ok_or_else(|| CacheError::StoreUnavailable(format!("unknown node {}", node)))?;
        let entries = target.keyspace()?;

        let now = Utc::now();
        let start = cursor as usize;
        let page: Vec<(&String, &StoredEntry)> =
            entries.iter().skip(start).take(self.scan_page).collect();
        let matched = page
            .iter()
            .filter(|(key, entry)| !entry.is_expired_at(now) && glob_match(pattern, key))
            .map(|(key, _)| (*key).clone())
            .collect();

        let next = start + page.len();
        let next_cursor = if next >= entries.len() { 0 } else { next as u64 };
        debug!(
            "scan {} cursor {} -> {} ({} of {} keys)",
            node,
            cursor,
            next_cursor,
            next,
            entries.len()
        );
        Ok((next_cursor, matched))
    }

    fn sadd(&self, key: &str, member: &str) -> Result<u64> {
        self.record("SADD");
        let mut entries = self.node_for_key(key).keyspace()?;
        drop_expired(&mut entries, key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry::new(StoredValue::Set(BTreeSet::new()), None));
        match &mut entry.value {
            StoredValue::Set(members) => Ok(u64::from(members.insert(member.to_string()))),
            StoredValue::Str(_) => Err(CacheError::CommandRejected(WRONGTYPE.to_string())),
        }
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.record("SMEMBERS");
        let mut entries = self.node_for_key(key).keyspace()?;
        drop_expired(&mut entries, key);
        match entries.get(key).map(|entry| &entry.value) {
            None => Ok(Vec::new()),
            Some(StoredValue::Set(members)) => Ok(members.iter().cloned().collect()),
            Some(StoredValue::Str(_)) => Err(CacheError::CommandRejected(WRONGTYPE.to_string())),
        }
    }
}

fn drop_expired(entries: &mut BTreeMap<String, StoredEntry>, key: &str) {
    if entries.get(key).map_or(false, StoredEntry::is_expired) {
        entries.remove(key);
    }
}

fn parse_integer(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| CacheError::CommandRejected(NOT_INTEGER.to_string()))
}
