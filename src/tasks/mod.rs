//! Background Tasks Module
//!
//! # Tasks
//! - Expiry sweep: purges expired entries from a `MemoryCluster` at a fixed
//!   interval

mod expiry;

pub use expiry::spawn_expiry_task;
