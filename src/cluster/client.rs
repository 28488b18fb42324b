//! Redis Cluster Client
//!
//! Blocking client for a Redis Cluster. Keys are routed by hash slot using a
//! routing table loaded with `CLUSTER SLOTS`; one `MOVED` or `ASK` redirect is
//! followed per command. Read commands honour the configured `ReadType`.
//! Idle connections are kept per node, and with `persistent` they outlive the
//! client in a process-wide registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::cluster::connection::{ConnectOptions, NodeConnection};
use crate::cluster::resp::RespValue;
use crate::cluster::slot::key_slot;
use crate::cluster::topology::SlotMap;
use crate::cluster::{ClusterClient, NodeAddr};
use crate::config::{CacheConfig, ReadType};
use crate::error::{CacheError, Result};

/// Idle connections kept per node.
const MAX_IDLE_PER_NODE: usize = 8;

/// Keys requested per SCAN page.
const SCAN_COUNT: &[u8] = b"100";

type Registry = Mutex<HashMap<String, Vec<NodeConnection>>>;

/// Connections handed over by dropped persistent clients.
fn shared_registry() -> &'static Registry {
    static SHARED: OnceLock<Registry> = OnceLock::new();
    SHARED.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// One node to try for a command, and whether it is a replica.
struct Candidate {
    node: NodeAddr,
    replica: bool,
}

// == Resp Cluster Client ==
pub struct RespClusterClient {
    options: ConnectOptions,
    seeds: Vec<NodeAddr>,
    read_type: ReadType,
    persistent: bool,
    slots: RwLock<SlotMap>,
    idle: Mutex<HashMap<NodeAddr, Vec<NodeConnection>>>,
    rotation: AtomicUsize,
}

impl RespClusterClient {
    /// Connects to the cluster and loads the routing table.
    ///
    /// Fails with `ConnectionFailed` when no seed answers `CLUSTER SLOTS`
    /// (unreachable, authentication rejected, cluster mode disabled).
    pub fn connect(config: &CacheConfig) -> Result<Self> {
        let seeds = config
            .servers
            .iter()
            .map(|server| server.parse::<NodeAddr>())
            .collect::<Result<Vec<_>>>()
            .map_err(|err| CacheError::ConnectionFailed(err.to_string()))?;
        if seeds.is_empty() {
            return Err(CacheError::ConnectionFailed(
                "no servers configured".to_string(),
            ));
        }

        let client = Self {
            options: ConnectOptions {
                connect_timeout: config.connect_timeout(),
                read_timeout: config.read_timeout(),
                password: config.password.clone(),
            },
            seeds,
            read_type: config.read_type,
            persistent: config.persistent,
            slots: RwLock::new(SlotMap::default()),
            idle: Mutex::new(HashMap::new()),
            rotation: AtomicUsize::new(0),
        };

        let map = client
            .refresh_slots()
            .map_err(|err| CacheError::ConnectionFailed(err.to_string()))?;
        info!(
            "connected to cluster with {} masters (read_type={:?}, persistent={})",
            map.masters().len(),
            client.read_type,
            client.persistent
        );
        Ok(client)
    }

    /// Reloads the routing table from the first node that answers.
    fn refresh_slots(&self) -> Result<SlotMap> {
        let mut candidates = self.current_slots().masters();
        for seed in &self.seeds {
            if !candidates.contains(seed) {
                candidates.push(seed.clone());
            }
        }

        let mut last_err = None;
        for node in candidates {
            let loaded = self
                .exec_on(&node, false, &[b"CLUSTER", b"SLOTS"])
                .and_then(|reply| SlotMap::from_cluster_slots(reply, &node));
            match loaded {
                Ok(map) => {
                    debug!("loaded slot map from {}", node);
                    *self.slots.write().unwrap_or_else(PoisonError::into_inner) = map.clone();
                    return Ok(map);
                }
                Err(err) => {
                    warn!("topology load from {} failed: {}", node, err);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CacheError::StoreUnavailable("no cluster node answered".to_string())
        }))
    }

    fn current_slots(&self) -> SlotMap {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // == Connections ==

    fn registry_key(&self, node: &NodeAddr) -> String {
        format!(
            "{}#{:x}",
            node,
            md5::compute(self.options.password.as_bytes())
        )
    }

    fn acquire(&self, node: &NodeAddr) -> Result<NodeConnection> {
        let local = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(node)
            .and_then(Vec::pop);
        if let Some(conn) = local {
            return Ok(conn);
        }

        if self.persistent {
            let shared = shared_registry()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_mut(&self.registry_key(node))
                .and_then(Vec::pop);
            if let Some(conn) = shared {
                debug!("reusing persistent connection to {}", node);
                return Ok(conn);
            }
        }

        NodeConnection::connect(node, &self.options)
    }

    fn release(&self, node: &NodeAddr, conn: NodeConnection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = idle.entry(node.clone()).or_default();
        if slot.len() < MAX_IDLE_PER_NODE {
            slot.push(conn);
        }
    }

    /// Runs one command on `node`. Failed connections are discarded.
    fn exec_on(&self, node: &NodeAddr, replica: bool, args: &[&[u8]]) -> Result<RespValue> {
        let mut conn = self.acquire(node)?;
        if replica {
            conn.ensure_readonly()?;
        }
        let reply = conn.exec(args)?;
        self.release(node, conn);
        Ok(reply)
    }

    /// Runs `ASKING` then the command on one connection.
    fn exec_asking(&self, node: &NodeAddr, args: &[&[u8]]) -> Result<RespValue> {
        let mut conn = self.acquire(node)?;
        if let RespValue::Error(message) = conn.exec(&[b"ASKING"])? {
            return Err(CacheError::CommandRejected(message));
        }
        let reply = conn.exec(args)?;
        self.release(node, conn);
        Ok(reply)
    }

    // == Routing ==

    /// Nodes to try, in order, for a command on `slot`.
    fn candidates(&self, slot: u16, access: Access) -> Result<Vec<Candidate>> {
        let mut map = self.current_slots();
        if map.range_for(slot).is_none() {
            map = self.refresh_slots()?;
        }
        let range = map.range_for(slot).ok_or_else(|| {
            CacheError::StoreUnavailable(format!("slot {} is not served by any node", slot))
        })?;

        let master = Candidate {
            node: range.master.clone(),
            replica: false,
        };
        if access == Access::Write || range.replicas.is_empty() {
            return Ok(vec![master]);
        }

        let turn = self.rotation.fetch_add(1, Ordering::Relaxed);
        let replicas = range.replicas.iter().map(|node| Candidate {
            node: node.clone(),
            replica: true,
        });
        Ok(match self.read_type {
            ReadType::MasterOnly => vec![master],
            ReadType::ReplicaPreferred => {
                let mut nodes: Vec<Candidate> = replicas.collect();
                let pick = turn % nodes.len();
                vec![nodes.swap_remove(pick)]
            }
            ReadType::Distribute => {
                let mut nodes = vec![master];
                nodes.extend(replicas);
                let pick = turn % nodes.len();
                vec![nodes.swap_remove(pick)]
            }
            ReadType::Failover => {
                let mut nodes = vec![master];
                nodes.extend(replicas);
                nodes
            }
        })
    }

    /// Routes a command by the slot of `key`.
    fn run(&self, key: &[u8], access: Access, args: &[&[u8]]) -> Result<RespValue> {
        let slot = key_slot(key);
        let mut last_err = None;
        for candidate in self.candidates(slot, access)? {
            match self.exec_on(&candidate.node, candidate.replica, args) {
                Ok(reply) => return self.follow_redirect(reply, args),
                Err(err @ CacheError::StoreUnavailable(_)) => {
                    warn!("node {} failed: {}", candidate.node, err);
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CacheError::StoreUnavailable(format!("no node available for slot {}", slot))
        }))
    }

    fn follow_redirect(&self, reply: RespValue, args: &[&[u8]]) -> Result<RespValue> {
        let message = match reply {
            RespValue::Error(message) => message,
            other => return Ok(other),
        };

        if let Some(target) = redirect_target(&message, "MOVED") {
            debug!("{}, refreshing slot map", message);
            if let Err(err) = self.refresh_slots() {
                warn!("slot map refresh after MOVED failed: {}", err);
            }
            return self.exec_on(&target, false, args);
        }
        if let Some(target) = redirect_target(&message, "ASK") {
            debug!("{}", message);
            return self.exec_asking(&target, args);
        }
        Ok(RespValue::Error(message))
    }
}

impl Drop for RespClusterClient {
    fn drop(&mut self) {
        if !self.persistent {
            return;
        }
        let idle = std::mem::take(self.idle.get_mut().unwrap_or_else(PoisonError::into_inner));
        let mut shared = shared_registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (node, conns) in idle {
            let pool = shared.entry(self.registry_key(&node)).or_default();
            for conn in conns {
                if pool.len() < MAX_IDLE_PER_NODE {
                    pool.push(conn);
                }
            }
        }
    }
}

impl ClusterClient for RespClusterClient {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.run(key.as_bytes(), Access::Read, &[b"GET", key.as_bytes()])? {
            RespValue::Bulk(data) => Ok(Some(data)),
            RespValue::Nil => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<bool> {
        match self.run(key.as_bytes(), Access::Write, &[b"SET", key.as_bytes(), value])? {
            RespValue::Simple(_) => Ok(true),
            RespValue::Nil => Ok(false),
            other => Err(unexpected(other)),
        }
    }

    fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<bool> {
        let ttl = ttl_secs.to_string();
        let args: [&[u8]; 4] = [b"SETEX", key.as_bytes(), ttl.as_bytes(), value];
        match self.run(key.as_bytes(), Access::Write, &args)? {
            RespValue::Simple(_) => Ok(true),
            other => Err(unexpected(other)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        match self.run(key.as_bytes(), Access::Read, &[b"EXISTS", key.as_bytes()])? {
            RespValue::Integer(count) => Ok(count > 0),
            other => Err(unexpected(other)),
        }
    }

    fn del(&self, keys: &[String]) -> Result<u64> {
        let first = match keys.first() {
            Some(first) => first,
            None => return Ok(0),
        };
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys.iter().map(|key| key.as_bytes()));
        match self.run(first.as_bytes(), Access::Write, &args)? {
            RespValue::Integer(count) => Ok(count.max(0) as u64),
            other => Err(unexpected(other)),
        }
    }

    fn incr_by(&self, key: &str, step: i64) -> Result<i64> {
        let step = step.to_string();
        let args: [&[u8]; 3] = [b"INCRBY", key.as_bytes(), step.as_bytes()];
        match self.run(key.as_bytes(), Access::Write, &args)? {
            RespValue::Integer(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn decr_by(&self, key: &str, step: i64) -> Result<i64> {
        let step = step.to_string();
        let args: [&[u8]; 3] = [b"DECRBY", key.as_bytes(), step.as_bytes()];
        match self.run(key.as_bytes(), Access::Write, &args)? {
            RespValue::Integer(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let first = match keys.first() {
            Some(first) => first,
            None => return Ok(Vec::new()),
        };
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"MGET");
        args.extend(keys.iter().map(|key| key.as_bytes()));
        match self.run(first.as_bytes(), Access::Read, &args)? {
            RespValue::Array(items) if items.len() == keys.len() => items
                .into_iter()
                .map(|item| match item {
                    RespValue::Bulk(data) => Ok(Some(data)),
                    RespValue::Nil => Ok(None),
                    other => Err(unexpected(other)),
                })
                .collect(),
            other => Err(unexpected(other)),
        }
    }

    fn mset(&self, entries: &[(String, Vec<u8>)]) -> Result<bool> {
        let first = match entries.first() {
            Some((first, _)) => first,
            None => return Ok(true),
        };
        let mut args: Vec<&[u8]> = Vec::with_capacity(entries.len() * 2 + 1);
        args.push(b"MSET");
        for (key, value) in entries {
            args.push(key.as_bytes());
            args.push(value);
        }
        match self.run(first.as_bytes(), Access::Write, &args)? {
            RespValue::Simple(_) => Ok(true),
            other => Err(unexpected(other)),
        }
    }

    fn masters(&self) -> Result<Vec<NodeAddr>> {
        Ok(self.refresh_slots()?.masters())
    }

    fn scan_node(
        &self,
        node: &NodeAddr,
        cursor: u64,
        pattern: &str,
    ) -> Result<(u64, Vec<String>)> {
        let cursor = cursor.to_string();
        let args: [&[u8]; 6] = [
            b"SCAN",
            cursor.as_bytes(),
            b"MATCH",
            pattern.as_bytes(),
            b"COUNT",
            SCAN_COUNT,
        ];
        let reply = self.exec_on(node, false, &args)?;
        let mut parts = match reply {
            RespValue::Array(parts) if parts.len() == 2 => parts,
            other => return Err(unexpected(other)),
        };
        let keys = match parts.pop() {
            Some(RespValue::Array(keys)) => keys
                .iter()
                .filter_map(RespValue::as_text)
                .collect::<Vec<_>>(),
            other => {
                return Err(CacheError::StoreUnavailable(format!(
                    "malformed SCAN keys: {:?}",
                    other
                )))
            }
        };
        let next = parts
            .pop()
            .as_ref()
            .and_then(RespValue::as_text)
            .and_then(|text| text.parse::<u64>().ok())
            .ok_or_else(|| CacheError::StoreUnavailable("malformed SCAN cursor".to_string()))?;
        Ok((next, keys))
    }

    fn sadd(&self, key: &str, member: &str) -> Result<u64> {
        let args: [&[u8]; 3] = [b"SADD", key.as_bytes(), member.as_bytes()];
        match self.run(key.as_bytes(), Access::Write, &args)? {
            RespValue::Integer(added) => Ok(added.max(0) as u64),
            other => Err(unexpected(other)),
        }
    }

    fn smembers(&self, key: &str) -> Result<Vec<String>> {
        match self.run(key.as_bytes(), Access::Read, &[b"SMEMBERS", key.as_bytes()])? {
            RespValue::Array(members) => Ok(members.iter().filter_map(RespValue::as_text).collect()),
            other => Err(unexpected(other)),
        }
    }
}

/// Target of a `MOVED <slot> <host:port>` or `ASK <slot> <host:port>` reply.
fn redirect_target(message: &str, kind: &str) -> Option<NodeAddr> {
    let mut parts = message.split_whitespace();
    if parts.next()? != kind {
        return None;
    }
    let _slot = parts.next()?;
    parts.next()?.parse().ok()
}

/// Error replies become `CommandRejected`, anything else is a protocol mismatch.
fn unexpected(reply: RespValue) -> CacheError {
    match reply {
        RespValue::Error(message) => CacheError::CommandRejected(message),
        other => CacheError::StoreUnavailable(format!("unexpected reply: {:?}", other)),
    }
}
