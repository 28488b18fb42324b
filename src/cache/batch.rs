//! Batch operations.
//!
//! With a co-located namespace every key lives in one slot, so a batch becomes
//! one MGET / MSET / DEL. Otherwise keys may sit on different shards and each
//! key gets its own command. All keys are validated and all values encoded
//! before the first command is sent.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::ClusterCache;
use crate::cluster::ClusterClient;
use crate::codec;
use crate::error::{CacheError, Result};

impl<C: ClusterClient> ClusterCache<C> {
    // == Get Multiple ==
    /// Reads many keys; absent keys map to `default`.
    pub fn get_multiple<I, K, T>(&self, keys: I, default: T) -> Result<HashMap<String, T>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
        T: DeserializeOwned + Clone,
    {
        let (names, wire_keys) = self.wire_keys(keys)?;
        let mut results = HashMap::with_capacity(names.len());
        if names.is_empty() {
            return Ok(results);
        }

        let values = if self.keys.same_slot() {
            debug!("get_multiple: one MGET for {} keys", wire_keys.len());
            self.client.mget(&wire_keys)?
        } else {
            debug!("get_multiple: {} GETs", wire_keys.len());
            wire_keys
                .iter()
                .map(|wire_key| self.client.get(wire_key))
                .collect::<Result<Vec<_>>>()?
        };

        if values.len() != names.len() {
            return Err(CacheError::StoreUnavailable(format!(
                "MGET returned {} values for {} keys",
                values.len(),
                names.len()
            )));
        }

        for (name, value) in names.into_iter().zip(values) {
            let decoded = match value {
                Some(bytes) => codec::deserialize(&bytes)?,
                None => default.clone(),
            };
            results.insert(name, decoded);
        }
        Ok(results)
    }

    // == Set Multiple ==
    /// Writes many entries.
    ///
    /// MSET cannot carry a TTL, so a resolved TTL forces one SETEX per entry
    /// even when the namespace is co-located.
    pub fn set_multiple<I, K, V>(&self, values: I, ttl: Option<u64>) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let mut encoded = Vec::new();
        for (key, value) in values {
            let wire_key = self.keys.wire_key(key.as_ref())?;
            encoded.push((wire_key, codec::serialize(&value)?));
        }
        if encoded.is_empty() {
            return Ok(true);
        }

        let ttl = self.resolve_ttl(ttl);
        if self.keys.same_slot() && ttl == 0 {
            debug!("set_multiple: one MSET for {} entries", encoded.len());
            return self.client.mset(&encoded);
        }

        debug!("set_multiple: {} single writes (ttl={})", encoded.len(), ttl);
        self.each_key(encoded.iter(), |(wire_key, bytes)| {
            self.write_one(wire_key, bytes, ttl)
        })
    }

    // == Delete Multiple ==
    /// Deletes many keys.
    ///
    /// Co-located: true when the single DEL removed anything. Otherwise true
    /// only when every key existed.
    pub fn delete_multiple<I, K>(&self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let (_, wire_keys) = self.wire_keys(keys)?;
        if wire_keys.is_empty() {
            return Ok(true);
        }

        if self.keys.same_slot() {
            debug!("delete_multiple: one DEL for {} keys", wire_keys.len());
            return Ok(self.client.del(&wire_keys)? > 0);
        }

        debug!("delete_multiple: {} single DELs", wire_keys.len());
        self.each_key(wire_keys.iter(), |wire_key| {
            Ok(self.client.del(std::slice::from_ref(wire_key))? > 0)
        })
    }

    /// Validates every logical key up front.
    fn wire_keys<I, K>(&self, keys: I) -> Result<(Vec<String>, Vec<String>)>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut names = Vec::new();
        let mut wire_keys = Vec::new();
        for key in keys {
            let name = key.as_ref();
            wire_keys.push(self.keys.wire_key(name)?);
            names.push(name.to_string());
        }
        Ok((names, wire_keys))
    }

    /// Runs `op` for every item without stopping at failures.
    ///
    /// Returns the first error once all items were attempted, otherwise the
    /// AND of the individual results.
    pub(crate) fn each_key<T, F>(&self, items: impl Iterator<Item = T>, mut op: F) -> Result<bool>
    where
        F: FnMut(T) -> Result<bool>,
    {
        let mut all_ok = true;
        let mut first_err = None;
        for item in items {
            match op(item) {
                Ok(ok) => all_ok &= ok,
                Err(err) => {
                    warn!("per-key operation failed: {}", err);
                    all_ok = false;
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(all_ok),
        }
    }
}
