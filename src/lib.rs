//! slotcache - a cache adapter over a sharded Redis Cluster
//!
//! Maps get/set/delete/counter/batch/tag operations onto cluster hash slots,
//! with an optional co-located namespace that lets batches use multi-key
//! commands and a namespace sweep that visits every master.

pub mod adapter;
pub mod cache;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod tasks;

pub use adapter::JsonCacheAdapter;
pub use cache::{ClusterCache, SimpleCache};
pub use cluster::{ClusterClient, MemoryCluster, NodeAddr, RespClusterClient};
pub use config::{CacheConfig, ReadType};
pub use error::{CacheError, Result};
pub use keys::KeyCodec;
pub use tasks::spawn_expiry_task;
