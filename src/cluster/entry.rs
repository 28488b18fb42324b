//! Stored Entry Module
//!
//! One key on an in-process node: a string or a set, with optional expiry.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

/// Longest TTL honoured, about a century.
const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 3600;

// == Stored Value ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    Str(Vec<u8>),
    Set(BTreeSet<String>),
}

// == Stored Entry ==
/// A value plus its expiry deadline.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub value: StoredValue,
    /// Expiration deadline, None = no expiration
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    // == Constructor ==
    /// Creates an entry that expires `ttl_seconds` from now, or never.
    pub fn new(value: StoredValue, ttl_seconds: Option<u64>) -> Self {
        let now = Utc::now();
        let expires_at =
            ttl_seconds.map(|ttl| now + Duration::seconds(ttl.min(MAX_TTL_SECONDS) as i64));
        Self { value, expires_at }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches its deadline.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Remaining TTL in whole seconds, None if the entry never expires.
    pub fn ttl_remaining(&self) -> Option<u64> {
        self.expires_at.map(|expires| {
            let remaining = expires - Utc::now();
            remaining.num_seconds().max(0) as u64
        })
    }
}
