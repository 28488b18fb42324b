//! Expiry Sweep Task
//!
//! Expired entries in the in-process cluster are hidden on access but stay
//! resident until something purges them. This task purges them periodically.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cluster::MemoryCluster;

/// Spawns a background task that purges expired entries every
/// `interval_secs` seconds.
///
/// Abort the returned handle to stop it.
pub fn spawn_expiry_task(cluster: Arc<MemoryCluster>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = cluster.purge_expired();
            if removed > 0 {
                info!("Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!("Expiry sweep: no expired entries found");
            }
        }
    })
}
