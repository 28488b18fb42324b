//! Configuration Module
//!
//! Options consumed once when a cache client is constructed. They can come from
//! a host-provided options map (serde), from environment variables, or from
//! `Default`.

use std::env;
use std::time::Duration;

use serde::Deserialize;

// == Read Type ==
/// Where read commands are routed when a slot has replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ReadType {
    /// Round-robin across the master and its replicas
    #[default]
    #[serde(rename = "distribute-across-replicas", alias = "random")]
    Distribute,
    /// Replicas only, the master when a slot has none
    #[serde(rename = "replica-preferred", alias = "slave")]
    ReplicaPreferred,
    /// Never read from a replica
    #[serde(rename = "master-only", alias = "master")]
    MasterOnly,
    /// Read from the master, retry on a replica when the master errors
    #[serde(rename = "error-on-replica-failure", alias = "failover")]
    Failover,
}

impl ReadType {
    /// Parses a policy name. Unknown names select `Distribute`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "slave" | "replica-preferred" => ReadType::ReplicaPreferred,
            "master" | "master-only" => ReadType::MasterOnly,
            "failover" | "error-on-replica-failure" => ReadType::Failover,
            _ => ReadType::Distribute,
        }
    }
}

// == Cache Config ==
/// Cache client configuration parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seed node addresses, e.g. "10.0.0.1:7000"
    pub servers: Vec<String>,
    /// Connect timeout in seconds (0 = blocking connect)
    pub timeout: f64,
    /// Read timeout in seconds (0 = no timeout)
    pub read_timeout: f64,
    /// Default TTL in seconds for writes without an explicit TTL (0 = no expiry)
    pub expire: u64,
    /// Namespace prepended to every logical key
    pub prefix: String,
    /// Wrap the prefix in `{}` so every key hashes to one slot
    pub same_slot_prefix: bool,
    /// AUTH credential, empty = no auth
    pub password: String,
    /// Read routing policy
    pub read_type: ReadType,
    /// Share idle connections with later client instances
    pub persistent: bool,
    /// Namespace for tag index keys
    pub tag_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            timeout: 1.5,
            read_timeout: 1.5,
            expire: 0,
            prefix: String::new(),
            same_slot_prefix: false,
            password: String::new(),
            read_type: ReadType::Distribute,
            persistent: false,
            tag_prefix: "tag:".to_string(),
        }
    }
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_SERVERS` - Comma separated seed nodes (default: none)
    /// - `CACHE_TIMEOUT` / `CACHE_READ_TIMEOUT` - Seconds (default: 1.5)
    /// - `CACHE_EXPIRE` - Default TTL in seconds (default: 0)
    /// - `CACHE_PREFIX` - Key namespace (default: "")
    /// - `CACHE_SAME_SLOT_PREFIX` - "true"/"1" to co-locate keys (default: false)
    /// - `CACHE_PASSWORD` - AUTH credential (default: "")
    /// - `CACHE_READ_TYPE` - random | slave | master | failover (default: random)
    /// - `CACHE_PERSISTENT` - "true"/"1" to share connections (default: false)
    /// - `CACHE_TAG_PREFIX` - Tag namespace (default: "tag:")
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            servers: env::var("CACHE_SERVERS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.servers),
            timeout: env_parse("CACHE_TIMEOUT").unwrap_or(defaults.timeout),
            read_timeout: env_parse("CACHE_READ_TIMEOUT").unwrap_or(defaults.read_timeout),
            expire: env_parse("CACHE_EXPIRE").unwrap_or(defaults.expire),
            prefix: env::var("CACHE_PREFIX").unwrap_or(defaults.prefix),
            same_slot_prefix: env_flag("CACHE_SAME_SLOT_PREFIX")
                .unwrap_or(defaults.same_slot_prefix),
            password: env::var("CACHE_PASSWORD").unwrap_or(defaults.password),
            read_type: env::var("CACHE_READ_TYPE")
                .map(|v| ReadType::parse(&v))
                .unwrap_or(defaults.read_type),
            persistent: env_flag("CACHE_PERSISTENT").unwrap_or(defaults.persistent),
            tag_prefix: env::var("CACHE_TAG_PREFIX").unwrap_or(defaults.tag_prefix),
        }
    }

    /// Connect timeout, `None` when unset or not a positive number.
    pub fn connect_timeout(&self) -> Option<Duration> {
        positive_secs(self.timeout)
    }

    /// Socket read timeout, `None` when unset or not a positive number.
    pub fn read_timeout(&self) -> Option<Duration> {
        positive_secs(self.read_timeout)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn positive_secs(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}
