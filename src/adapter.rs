//! Dynamic Host Adapter
//!
//! Hosts that pass loosely typed values (keys that might not be strings,
//! batches that might not be collections) go through `JsonCacheAdapter`. Every
//! argument is checked before the wrapped cache sees it, so a rejected call
//! never reaches the store.

use serde_json::{Map, Value};

use crate::cache::ClusterCache;
use crate::cluster::{ClusterClient, RespClusterClient};
use crate::error::{CacheError, Result};

// == Json Cache Adapter ==
pub struct JsonCacheAdapter<C: ClusterClient = RespClusterClient> {
    cache: ClusterCache<C>,
}

impl<C: ClusterClient> JsonCacheAdapter<C> {
    pub fn new(cache: ClusterCache<C>) -> Self {
        Self { cache }
    }

    /// The typed cache underneath.
    pub fn inner(&self) -> &ClusterCache<C> {
        &self.cache
    }

    pub fn has(&self, key: &Value) -> Result<bool> {
        self.cache.has(key_str(key)?)
    }

    /// Value for `key`, or `default` when the key is absent.
    pub fn get(&self, key: &Value, default: Value) -> Result<Value> {
        self.cache.get_or(key_str(key)?, default)
    }

    pub fn set(&self, key: &Value, value: &Value, ttl: Option<u64>) -> Result<bool> {
        self.cache.set(key_str(key)?, value, ttl)
    }

    pub fn delete(&self, key: &Value) -> Result<bool> {
        self.cache.delete(key_str(key)?)
    }

    pub fn inc(&self, key: &Value, step: i64) -> Result<i64> {
        self.cache.inc(key_str(key)?, step)
    }

    pub fn dec(&self, key: &Value, step: i64) -> Result<i64> {
        self.cache.dec(key_str(key)?, step)
    }

    pub fn clear(&self) -> Result<bool> {
        self.cache.clear()
    }

    // == Batches ==
    /// `keys` must be an array of strings, or an object whose values are.
    pub fn get_multiple(&self, keys: &Value, default: Value) -> Result<Map<String, Value>> {
        let keys = key_list(keys)?;
        let values = self.cache.get_multiple(keys, default)?;
        Ok(values.into_iter().collect())
    }

    /// `values` must be an object mapping keys to values.
    pub fn set_multiple(&self, values: &Value, ttl: Option<u64>) -> Result<bool> {
        let Value::Object(entries) = values else {
            return Err(CacheError::InvalidArgument(format!(
                "expected an object of key/value pairs, got {}",
                kind(values)
            )));
        };
        self.cache.set_multiple(entries.iter(), ttl)
    }

    pub fn delete_multiple(&self, keys: &Value) -> Result<bool> {
        let keys = key_list(keys)?;
        self.cache.delete_multiple(keys)
    }
}

fn key_str(key: &Value) -> Result<&str> {
    match key {
        Value::String(key) => Ok(key),
        other => Err(CacheError::InvalidArgument(format!(
            "cache key must be a string, got {}",
            kind(other)
        ))),
    }
}

fn key_list(keys: &Value) -> Result<Vec<&str>> {
    let items: Vec<&Value> = match keys {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        other => {
            return Err(CacheError::InvalidArgument(format!(
                "expected a collection of keys, got {}",
                kind(other)
            )))
        }
    };
    items.into_iter().map(key_str).collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::cluster::MemoryCluster;
    use crate::config::CacheConfig;

    fn adapter(same_slot: bool) -> (Arc<MemoryCluster>, JsonCacheAdapter<Arc<MemoryCluster>>) {
        let cluster = Arc::new(MemoryCluster::new(2));
        let config = CacheConfig {
            prefix: "host:".to_string(),
            same_slot_prefix: same_slot,
            ..CacheConfig::default()
        };
        let cache = ClusterCache::with_client(cluster.clone(), config);
        (cluster, JsonCacheAdapter::new(cache))
    }

    #[test]
    fn test_single_key_roundtrip() {
        let (_, adapter) = adapter(false);
        let key = json!("user");
        assert!(adapter.set(&key, &json!({"name": "ada", "tags": [1, 2]}), None).unwrap());
        assert_eq!(
            adapter.get(&key, Value::Null).unwrap(),
            json!({"name": "ada", "tags": [1, 2]})
        );
        assert!(adapter.has(&key).unwrap());
        assert!(adapter.delete(&key).unwrap());
        assert_eq!(adapter.get(&key, json!("d")).unwrap(), json!("d"));
    }

    #[test]
    fn test_counters_through_adapter() {
        let (_, adapter) = adapter(false);
        let key = json!("hits");
        adapter.set(&key, &json!(10), None).unwrap();
        assert_eq!(adapter.inc(&key, 5).unwrap(), 15);
        assert_eq!(adapter.dec(&key, 5).unwrap(), 10);
        assert_eq!(adapter.get(&key, Value::Null).unwrap(), json!(10));
    }

    #[test]
    fn test_batches_in_both_modes() {
        for same_slot in [false, true] {
            let (_, adapter) = adapter(same_slot);
            assert!(adapter.set_multiple(&json!({"a": 1, "b": 2}), None).unwrap());
            let values = adapter.get_multiple(&json!(["a", "b", "c"]), json!("d")).unwrap();
            assert_eq!(Value::Object(values), json!({"a": 1, "b": 2, "c": "d"}));

            assert!(adapter.delete_multiple(&json!({"x": "a", "y": "b"})).unwrap());
            assert!(!adapter.has(&json!("a")).unwrap());
        }
    }

    #[test]
    fn test_non_string_keys_rejected() {
        let (cluster, adapter) = adapter(false);
        for key in [json!(1), json!(null), json!(["a"]), json!({"k": 1})] {
            assert!(matches!(adapter.has(&key), Err(CacheError::InvalidArgument(_))));
            assert!(matches!(
                adapter.set(&key, &json!(1), None),
                Err(CacheError::InvalidArgument(_))
            ));
            assert!(matches!(adapter.inc(&key, 1), Err(CacheError::InvalidArgument(_))));
        }
        assert!(cluster.commands().is_empty());
    }

    #[test]
    fn test_non_collection_batches_rejected() {
        let (cluster, adapter) = adapter(true);
        for bad in [json!("a"), json!(3), json!(null), json!(true)] {
            assert!(matches!(
                adapter.get_multiple(&bad, Value::Null),
                Err(CacheError::InvalidArgument(_))
            ));
            assert!(matches!(
                adapter.set_multiple(&bad, None),
                Err(CacheError::InvalidArgument(_))
            ));
            assert!(matches!(
                adapter.delete_multiple(&bad),
                Err(CacheError::InvalidArgument(_))
            ));
        }
        // An array is a key list, not a key/value mapping
        assert!(matches!(
            adapter.set_multiple(&json!(["a", "b"]), None),
            Err(CacheError::InvalidArgument(_))
        ));
        // One bad element rejects the whole batch
        assert!(matches!(
            adapter.delete_multiple(&json!(["a", 2])),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(cluster.commands().is_empty());
        assert!(cluster.is_empty());
    }
}
