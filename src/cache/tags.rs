//! Tag index.
//!
//! Each tag owns a set whose members are wire keys of tagged entries. The
//! index is best effort: deleting an entry does not remove it from its tag
//! sets, so members may point at keys that no longer exist.

use serde::Serialize;
use tracing::debug;

use crate::cache::ClusterCache;
use crate::cluster::ClusterClient;
use crate::error::Result;
use crate::keys::validate_key;

impl<C: ClusterClient> ClusterCache<C> {
    /// Logical name of the index set for `tag`.
    pub fn tag_key(&self, tag: &str) -> String {
        self.keys.tag_key(tag)
    }

    /// Wire key of the index set for `tag`.
    fn tag_set_key(&self, tag: &str) -> Result<String> {
        validate_key(tag)?;
        Ok(self.keys.build_key(&self.keys.tag_key(tag)))
    }

    // == Append ==
    /// Adds `member` to the tag's set. Duplicates collapse.
    pub fn append(&self, tag: &str, member: &str) -> Result<()> {
        let set_key = self.tag_set_key(tag)?;
        validate_key(member)?;
        self.client.sadd(&set_key, member)?;
        Ok(())
    }

    // == Get Tag Items ==
    /// Raw members of the tag's set, sorted. May include stale keys.
    pub fn get_tag_items(&self, tag: &str) -> Result<Vec<String>> {
        let set_key = self.tag_set_key(tag)?;
        let mut members = self.client.smembers(&set_key)?;
        members.sort_unstable();
        Ok(members)
    }

    // == Clear Tag ==
    /// Deletes the entries behind `wire_keys`. The tag sets themselves are
    /// left in place.
    pub fn clear_tag<S: AsRef<str>>(&self, wire_keys: &[S]) -> Result<()> {
        let keys: Vec<String> = wire_keys.iter().map(|key| key.as_ref().to_string()).collect();
        self.delete_wire_keys(&keys)?;
        Ok(())
    }

    /// Stores a value and records its wire key in every listed tag.
    pub fn set_tagged<T: Serialize + ?Sized>(
        &self,
        tags: &[&str],
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<bool> {
        let wire_key = self.keys.wire_key(key)?;
        let set_keys = tags
            .iter()
            .map(|tag| self.tag_set_key(tag))
            .collect::<Result<Vec<_>>>()?;

        if !self.set(key, value, ttl)? {
            return Ok(false);
        }
        for set_key in &set_keys {
            self.client.sadd(set_key, &wire_key)?;
        }
        Ok(true)
    }

    /// Deletes every entry indexed under `tags`, then the tag sets.
    ///
    /// Returns how many entries were removed.
    pub fn invalidate_tags(&self, tags: &[&str]) -> Result<u64> {
        let set_keys = tags
            .iter()
            .map(|tag| self.tag_set_key(tag))
            .collect::<Result<Vec<_>>>()?;

        let mut members = Vec::new();
        for set_key in &set_keys {
            members.extend(self.client.smembers(set_key)?);
        }
        members.sort_unstable();
        members.dedup();

        let removed = self.delete_wire_keys(&members)?;
        self.delete_wire_keys(&set_keys)?;
        debug!("invalidated {} tags, {} entries removed", tags.len(), removed);
        Ok(removed)
    }

    /// One DEL when co-located, otherwise one per key. Returns keys removed.
    fn delete_wire_keys(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        if self.keys.same_slot() {
            return self.client.del(keys);
        }
        let mut removed = 0;
        self.each_key(keys.iter(), |key| {
            removed += self.client.del(std::slice::from_ref(key))?;
            Ok(true)
        })?;
        Ok(removed)
    }
}
