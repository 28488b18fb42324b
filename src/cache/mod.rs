//! Cache Module
//!
//! `ClusterCache` maps application-level cache operations onto a sharded
//! store. When the namespace is co-located in one slot, batch operations use
//! single multi-key commands; otherwise they fall back to one command per key.

mod batch;
mod clear;
mod ops;
mod tags;


use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::cluster::{ClusterClient, RespClusterClient};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::keys::KeyCodec;

// == Cluster Cache ==
/// Cache client over a cluster store.
///
/// Holds only immutable configuration besides the store handle, so one
/// instance can be shared between threads.
pub struct ClusterCache<C: ClusterClient = RespClusterClient> {
    client: C,
    keys: KeyCodec,
    config: CacheConfig,
}

impl ClusterCache<RespClusterClient> {
    /// Connects to the configured cluster.
    ///
    /// Fails with `ConnectionFailed` when the cluster cannot be reached.
    pub fn connect(config: CacheConfig) -> Result<Self> {
        let client = RespClusterClient::connect(&config)?;
        Ok(Self::with_client(client, config))
    }
}

impl<C: ClusterClient> ClusterCache<C> {
    /// Wraps an already connected store.
    pub fn with_client(client: C, config: CacheConfig) -> Self {
        let keys = KeyCodec::from_config(&config);
        info!(
            "cache ready (prefix={:?}, same_slot_prefix={}, expire={}s)",
            config.prefix, config.same_slot_prefix, config.expire
        );
        Self {
            client,
            keys,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The underlying store handle.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Wire key for a logical name.
    pub fn get_cache_key(&self, name: &str) -> String {
        self.keys.build_key(name)
    }

    /// Explicit positive TTL, else the configured default. 0 means no expiry.
    fn resolve_ttl(&self, ttl: Option<u64>) -> u64 {
        match ttl {
            Some(ttl) if ttl > 0 => ttl,
            _ => self.config.expire,
        }
    }

    /// Writes one encoded value, choosing SETEX or SET by TTL.
    fn write_one(&self, wire_key: &str, bytes: &[u8], ttl: u64) -> Result<bool> {
        if ttl > 0 {
            self.client.set_ex(wire_key, bytes, ttl)
        } else {
            self.client.set(wire_key, bytes)
        }
    }
}

// == Simple Cache ==
/// The fixed capability set a host framework adapter builds on.
pub trait SimpleCache {
    fn has(&self, key: &str) -> Result<bool>;

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>;

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u64>) -> Result<bool>;

    fn delete(&self, key: &str) -> Result<bool>;

    fn increment(&self, key: &str, step: i64) -> Result<i64>;

    fn decrement(&self, key: &str, step: i64) -> Result<i64>;

    fn get_multiple<I, K, T>(&self, keys: I, default: T) -> Result<HashMap<String, T>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        T: DeserializeOwned + Clone;

    fn set_multiple<I, K, V>(&self, values: I, ttl: Option<u64>) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize;

    fn delete_multiple<I, K>(&self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>;
}

impl<C: ClusterClient> SimpleCache for ClusterCache<C> {
    fn has(&self, key: &str) -> Result<bool> {
        ClusterCache::has(self, key)
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        ClusterCache::get(self, key)
    }

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u64>) -> Result<bool> {
        ClusterCache::set(self, key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        ClusterCache::delete(self, key)
    }

    fn increment(&self, key: &str, step: i64) -> Result<i64> {
        self.inc(key, step)
    }

    fn decrement(&self, key: &str, step: i64) -> Result<i64> {
        self.dec(key, step)
    }

    fn get_multiple<I, K, T>(&self, keys: I, default: T) -> Result<HashMap<String, T>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        T: DeserializeOwned + Clone,
    {
        ClusterCache::get_multiple(self, keys, default)
    }

    fn set_multiple<I, K, V>(&self, values: I, ttl: Option<u64>) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        ClusterCache::set_multiple(self, values, ttl)
    }

    fn delete_multiple<I, K>(&self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        ClusterCache::delete_multiple(self, keys)
    }
}
