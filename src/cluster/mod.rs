//! Cluster Module
//!
//! The call surface the cache needs from a sharded store, with two backends:
//! a networked Redis Cluster client and an in-process cluster.

mod client;
mod connection;
mod entry;
mod memory;
mod pattern;
mod resp;
mod slot;
mod topology;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{CacheError, Result};

pub use client::RespClusterClient;
pub use connection::ConnectOptions;
pub use memory::MemoryCluster;
pub use pattern::glob_match;
pub use resp::{encode_command, read_value, RespValue};
pub use slot::{hash_tag, key_slot, SLOT_COUNT};
pub use topology::{SlotMap, SlotRange};

// == Node Address ==
/// `host:port` of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddr {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| CacheError::InvalidArgument(format!("missing port in {:?}", s)))?;
        let port = port
            .parse()
            .map_err(|_| CacheError::InvalidArgument(format!("bad port in {:?}", s)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(CacheError::InvalidArgument(format!("missing host in {:?}", s)));
        }
        Ok(NodeAddr::new(host, port))
    }
}

// == Cluster Client ==
/// Store commands used by the cache.
///
/// Every call is one round trip and nothing is cached between calls, except
/// slot routing inside the implementation. Multi-key calls (`del` with more
/// than one key, `mget`, `mset`) are only valid when all keys share a slot.
pub trait ClusterClient: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<bool>;

    fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<bool>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Deletes keys and returns how many existed.
    fn del(&self, keys: &[String]) -> Result<u64>;

    fn incr_by(&self, key: &str, step: i64) -> Result<i64>;

    fn decr_by(&self, key: &str, step: i64) -> Result<i64>;

    /// Values aligned with `keys`, `None` where absent.
    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    fn mset(&self, entries: &[(String, Vec<u8>)]) -> Result<bool>;

    /// Current master nodes, read from the cluster on every call.
    fn masters(&self) -> Result<Vec<NodeAddr>>;

    /// One SCAN page on `node`. A returned cursor of 0 ends that node's scan.
    fn scan_node(&self, node: &NodeAddr, cursor: u64, pattern: &str)
        -> Result<(u64, Vec<String>)>;

    /// Adds a set member, returns 1 if it was new.
    fn sadd(&self, key: &str, member: &str) -> Result<u64>;

    fn smembers(&self, key: &str) -> Result<Vec<String>>;
}

impl<C: ClusterClient + ?Sized> ClusterClient for Arc<C> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<bool> {
        (**self).set(key, value)
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<bool> {
        (**self).set_ex(key, value, ttl_secs)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }

    fn del(&self, keys: &[String]) -> Result<u64> {
        (**self).del(keys)
    }

    fn incr_by(&self, key: &str, step: i64) -> Result<i64> {
        (**self).incr_by(key, step)
    }

    fn decr_by(&self, key: &str, step: i64) -> Result<i64> {
        (**self).decr_by(key, step)
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        (**self).mget(keys)
    }

    fn mset(&self, entries: &[(String, Vec<u8>)]) -> Result<bool> {
        (**self).mset(entries)
    }

    fn masters(&self) -> Result<Vec<NodeAddr>> {
        (**self).masters()
    }

    fn scan_node(
        &self,
        node: &NodeAddr,
        cursor: u64,
        pattern: &str,
    ) -> Result<(u64, Vec<String>)> {
        (**self).scan_node(node, cursor, pattern)
    }

    fn sadd(&self, key: &str, member: &str) -> Result<u64> {
        (**self).sadd(key, member)
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        (**self).smembers(key)
    }
}
