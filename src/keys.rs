//! Key Codec
//!
//! Turns logical cache names into wire keys. With co-location enabled the
//! namespace is wrapped in a `{hash tag}` so the cluster routes every key in the
//! namespace to one slot.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Key Codec ==
/// Builds wire keys from logical names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    /// Effective prefix, already wrapped when co-location is on
    prefix: String,
    tag_prefix: String,
    same_slot: bool,
}

impl KeyCodec {
    /// An empty prefix cannot be co-located: the cluster ignores an empty
    /// `{}` hash tag, so `same_slot` is dropped and keys spread normally.
    pub fn new(prefix: &str, same_slot: bool, tag_prefix: &str) -> Self {
        let same_slot = same_slot && !prefix.is_empty();
        let prefix = if same_slot {
            format!("{{{}}}", prefix)
        } else {
            prefix.to_string()
        };
        Self {
            prefix,
            tag_prefix: tag_prefix.to_string(),
            same_slot,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.prefix, config.same_slot_prefix, &config.tag_prefix)
    }

    /// True when every wire key shares one slot.
    pub fn same_slot(&self) -> bool {
        self.same_slot
    }

    /// Prepends the namespace. No validation.
    pub fn build_key(&self, name: &str) -> String {
        let mut key = String::with_capacity(self.prefix.len() + name.len());
        key.push_str(&self.prefix);
        key.push_str(name);
        key
    }

    /// Validates a logical key and returns its wire form.
    pub fn wire_key(&self, name: &str) -> Result<String> {
        validate_key(name)?;
        Ok(self.build_key(name))
    }

    /// SCAN pattern matching every key in the namespace.
    ///
    /// Glob metacharacters in the prefix are escaped so a prefix such as
    /// `cache[1]:` only matches itself.
    pub fn scan_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.prefix.len() + 1);
        for ch in self.prefix.chars() {
            if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(ch);
        }
        pattern.push('*');
        pattern
    }

    /// Logical name of the index set for `tag`: tag prefix + md5 hex of the tag.
    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}{:x}", self.tag_prefix, md5::compute(tag.as_bytes()))
    }
}

// == Validation ==
/// Rejects empty keys and keys carrying control characters.
pub fn validate_key(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(CacheError::InvalidKey(format!(
            "key contains control characters: {:?}",
            name
        )));
    }
    Ok(())
}
