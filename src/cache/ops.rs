//! Single-key operations.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::ClusterCache;
use crate::cluster::ClusterClient;
use crate::codec;
use crate::error::Result;

impl<C: ClusterClient> ClusterCache<C> {
    // == Has ==
    pub fn has(&self, key: &str) -> Result<bool> {
        let wire_key = self.keys.wire_key(key)?;
        self.client.exists(&wire_key)
    }

    // == Get ==
    /// Reads and decodes a value. `Ok(None)` only when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let wire_key = self.keys.wire_key(key)?;
        match self.client.get(&wire_key)? {
            Some(bytes) => codec::deserialize(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Like `get`, substituting `default` for an absent key.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    // == Set ==
    /// Stores a value.
    ///
    /// A missing or zero `ttl` falls back to the configured `expire`; when
    /// that is also zero the entry never expires.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<u64>) -> Result<bool> {
        let wire_key = self.keys.wire_key(key)?;
        let bytes = codec::serialize(value)?;
        self.write_one(&wire_key, &bytes, self.resolve_ttl(ttl))
    }

    // == Increment / Decrement ==
    /// Adds `step` to a stored integer on the store side and returns the result.
    pub fn inc(&self, key: &str, step: i64) -> Result<i64> {
        let wire_key = self.keys.wire_key(key)?;
        self.client.incr_by(&wire_key, step)
    }

    pub fn dec(&self, key: &str, step: i64) -> Result<i64> {
        let wire_key = self.keys.wire_key(key)?;
        self.client.decr_by(&wire_key, step)
    }

    // == Delete ==
    /// True when the key existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let wire_key = self.keys.wire_key(key)?;
        Ok(self.client.del(std::slice::from_ref(&wire_key))? > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread::sleep;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use crate::cache::ClusterCache;
    use crate::cluster::{ClusterClient, MemoryCluster};
    use crate::config::CacheConfig;
    use crate::error::CacheError;

    fn cache(expire: u64) -> (Arc<MemoryCluster>, ClusterCache<Arc<MemoryCluster>>) {
        let cluster = Arc::new(MemoryCluster::new(3));
        let config = CacheConfig {
            prefix: "test:".to_string(),
            expire,
            ..CacheConfig::default()
        };
        (cluster.clone(), ClusterCache::with_client(cluster, config))
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    #[test]
    fn test_set_and_get() {
        let (cluster, cache) = cache(0);
        assert!(cache.set("key", "value", None).unwrap());
        assert_eq!(cache.get::<String>("key").unwrap(), Some("value".to_string()));
        assert_eq!(
            ClusterClient::get(&*cluster, "test:key").unwrap(),
            Some(b"\"value\"".to_vec())
        );
    }

    #[test]
    fn test_structured_value() {
        let (_, cache) = cache(0);
        let profile = Profile {
            name: "ada".to_string(),
            visits: 3,
        };
        cache.set("profile", &profile, None).unwrap();
        assert_eq!(cache.get::<Profile>("profile").unwrap(), Some(profile));
    }

    #[test]
    fn test_has() {
        let (_, cache) = cache(0);
        cache.set("key", "value", None).unwrap();
        assert!(cache.has("key").unwrap());
        assert!(!cache.has("nonexistent_key").unwrap());
    }

    #[test]
    fn test_get_or_default() {
        let (_, cache) = cache(0);
        assert_eq!(cache.get_or("missing", 7i64).unwrap(), 7);
        cache.set("present", &1i64, None).unwrap();
        assert_eq!(cache.get_or("present", 7i64).unwrap(), 1);
    }

    #[test]
    fn test_delete() {
        let (_, cache) = cache(0);
        cache.set("key", "value", None).unwrap();
        assert!(cache.delete("key").unwrap());
        assert!(!cache.has("key").unwrap());
        assert!(!cache.delete("key").unwrap());
    }

    #[test]
    fn test_increment_and_decrement() {
        let (_, cache) = cache(0);
        cache.set("counter", &1i64, None).unwrap();
        assert_eq!(cache.inc("counter", 1).unwrap(), 2);
        assert_eq!(cache.get::<i64>("counter").unwrap(), Some(2));
        assert_eq!(cache.dec("counter", 1).unwrap(), 1);
        assert_eq!(cache.get::<i64>("counter").unwrap(), Some(1));
        // Missing counters start at zero
        assert_eq!(cache.inc("fresh", 5).unwrap(), 5);
    }

    #[test]
    fn test_increment_non_integer_is_rejected() {
        let (_, cache) = cache(0);
        cache.set("name", "ada", None).unwrap();
        assert!(matches!(
            cache.inc("name", 1),
            Err(CacheError::CommandRejected(_))
        ));
    }

    #[test]
    fn test_invalid_key_touches_nothing() {
        let (cluster, cache) = cache(0);
        assert!(matches!(cache.set("", "v", None), Err(CacheError::InvalidKey(_))));
        assert!(matches!(cache.get::<String>("a\tb"), Err(CacheError::InvalidKey(_))));
        assert!(matches!(cache.inc("", 1), Err(CacheError::InvalidKey(_))));
        assert!(cluster.commands().is_empty());
    }

    #[test]
    fn test_ttl_paths() {
        let (cluster, cache) = cache(0);
        cache.set("forever", "v", None).unwrap();
        cache.set("zero", "v", Some(0)).unwrap();
        cache.set("short", "v", Some(60)).unwrap();
        assert_eq!(cluster.commands(), vec!["SET", "SET", "SETEX"]);
        assert!(cluster.ttl("test:forever").is_none());
        assert!(cluster.ttl("test:short").is_some());
    }

    #[test]
    fn test_default_expire_applies() {
        let (cluster, cache) = cache(30);
        cache.set("a", "v", None).unwrap();
        cache.set("b", "v", Some(0)).unwrap();
        assert!(cluster.ttl("test:a").unwrap() <= 30);
        assert!(cluster.ttl("test:b").is_some());
    }

    #[test]
    fn test_entry_expires() {
        let (_, cache) = cache(0);
        cache.set("short", "v", Some(1)).unwrap();
        assert!(cache.has("short").unwrap());

        sleep(Duration::from_millis(1100));

        assert!(!cache.has("short").unwrap());
        assert_eq!(cache.get_or("short", "gone".to_string()).unwrap(), "gone");
    }

    #[test]
    fn test_store_failure_is_not_masked() {
        let (cluster, cache) = cache(0);
        cluster.set_node_down(&cluster.node_of("test:key"), true);
        assert!(matches!(
            cache.get_or("key", "default".to_string()),
            Err(CacheError::StoreUnavailable(_))
        ));
    }
}
