//! Shared helpers for integration tests.
//!
//! `FakeCluster` is a scripted Redis Cluster: each node is a TCP listener
//! speaking RESP2 and backed by a `MemoryCluster`. Nodes answer `CLUSTER SLOTS`
//! from a shared topology and reply `MOVED` for keys they do not own. A slot
//! marked as migrating answers `ASK` for keys its owner no longer holds.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use slotcache::cluster::{key_slot, read_value, RespValue, SLOT_COUNT};
use slotcache::{CacheError, ClusterClient, MemoryCluster};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// == Topology ==
#[derive(Debug, Clone)]
pub struct Range {
    pub start: u16,
    pub end: u16,
    pub master: usize,
    pub replicas: Vec<usize>,
}

/// Even slot split across `count` masters.
pub fn even_split(count: usize) -> Vec<Range> {
    (0..count)
        .map(|idx| Range {
            start: (idx * SLOT_COUNT as usize / count) as u16,
            end: ((idx + 1) * SLOT_COUNT as usize / count - 1) as u16,
            master: idx,
            replicas: Vec::new(),
        })
        .collect()
}

struct FakeNode {
    port: u16,
    store: Arc<MemoryCluster>,
    /// (connection id, command name)
    journal: Mutex<Vec<(usize, String)>>,
    accepted: AtomicUsize,
    down: AtomicBool,
}

struct Shared {
    nodes: Vec<FakeNode>,
    topology: Mutex<Vec<Range>>,
    /// slot -> importing node
    migrating: Mutex<HashMap<u16, usize>>,
    password: String,
}

#[derive(Default)]
struct ConnState {
    id: usize,
    authed: bool,
    readonly: bool,
    asking: bool,
}

// == Fake Cluster ==
pub struct FakeCluster {
    shared: Arc<Shared>,
}

impl FakeCluster {
    /// `count` masters with their own stores and an even slot split.
    pub fn masters(count: usize) -> Self {
        let stores = (0..count).map(|_| Arc::new(MemoryCluster::new(1))).collect();
        Self::start(stores, even_split(count), "")
    }

    /// Like `masters`, but every connection must AUTH first.
    pub fn with_password(count: usize, password: &str) -> Self {
        let stores = (0..count).map(|_| Arc::new(MemoryCluster::new(1))).collect();
        Self::start(stores, even_split(count), password)
    }

    /// Node 0 masters every slot, node 1 replicates it.
    pub fn with_replica() -> Self {
        let store = Arc::new(MemoryCluster::new(1));
        let topology = vec![Range {
            start: 0,
            end: SLOT_COUNT - 1,
            master: 0,
            replicas: vec![1],
        }];
        Self::start(vec![store.clone(), store], topology, "")
    }

    fn start(stores: Vec<Arc<MemoryCluster>>, topology: Vec<Range>, password: &str) -> Self {
        let mut listeners = Vec::new();
        let mut nodes = Vec::new();
        for store in stores {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake node");
            let port = listener.local_addr().expect("local addr").port();
            listeners.push(listener);
            nodes.push(FakeNode {
                port,
                store,
                journal: Mutex::new(Vec::new()),
                accepted: AtomicUsize::new(0),
                down: AtomicBool::new(false),
            });
        }

        let shared = Arc::new(Shared {
            nodes,
            topology: Mutex::new(topology),
            migrating: Mutex::new(HashMap::new()),
            password: password.to_string(),
        });
        for (idx, listener) in listeners.into_iter().enumerate() {
            let shared = shared.clone();
            thread::spawn(move || accept_loop(listener, idx, shared));
        }
        Self { shared }
    }

    /// Every node as `host:port`.
    pub fn servers(&self) -> Vec<String> {
        self.shared
            .nodes
            .iter()
            .map(|node| format!("127.0.0.1:{}", node.port))
            .collect()
    }

    /// Only the first node, for seed-discovery tests.
    pub fn seed(&self) -> Vec<String> {
        self.servers().into_iter().take(1).collect()
    }

    pub fn store(&self, idx: usize) -> Arc<MemoryCluster> {
        self.shared.nodes[idx].store.clone()
    }

    /// Commands node `idx` received, oldest first.
    pub fn commands(&self, idx: usize) -> Vec<String> {
        self.session_commands(idx)
            .into_iter()
            .map(|(_, name)| name)
            .collect()
    }

    /// Like `commands`, tagged with the id of the connection that sent each.
    pub fn session_commands(&self, idx: usize) -> Vec<(usize, String)> {
        self.shared.nodes[idx].journal.lock().unwrap().clone()
    }

    /// TCP connections node `idx` accepted.
    pub fn accepted(&self, idx: usize) -> usize {
        self.shared.nodes[idx].accepted.load(Ordering::SeqCst)
    }

    /// A down node drops new and existing connections without replying.
    pub fn set_down(&self, idx: usize, down: bool) {
        self.shared.nodes[idx].down.store(down, Ordering::SeqCst);
    }

    pub fn set_topology(&self, topology: Vec<Range>) {
        *self.shared.topology.lock().unwrap() = topology;
    }

    /// Starts moving `slot` to node `target` without touching the topology.
    pub fn set_migrating(&self, slot: u16, target: usize) {
        self.shared.migrating.lock().unwrap().insert(slot, target);
    }

    /// Index of the master owning `key`.
    pub fn owner_of(&self, key: &str) -> usize {
        let slot = key_slot(key.as_bytes());
        self.shared
            .topology
            .lock()
            .unwrap()
            .iter()
            .find(|range| range.start <= slot && slot <= range.end)
            .map(|range| range.master)
            .expect("slot is served")
    }
}

fn accept_loop(listener: TcpListener, idx: usize, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        let Ok(stream) = stream else { continue };
        if shared.nodes[idx].down.load(Ordering::SeqCst) {
            continue;
        }
        let id = shared.nodes[idx].accepted.fetch_add(1, Ordering::SeqCst);
        let shared = shared.clone();
        thread::spawn(move || serve(stream, idx, id, shared));
    }
}

fn serve(stream: TcpStream, idx: usize, id: usize, shared: Arc<Shared>) {
    let Ok(mut writer) = stream.try_clone() else { return };
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    let mut conn = ConnState {
        id,
        ..ConnState::default()
    };

    loop {
        let Ok(request) = read_value(&mut reader, &mut line) else { return };
        if shared.nodes[idx].down.load(Ordering::SeqCst) {
            return;
        }
        let args: Vec<Vec<u8>> = match request {
            RespValue::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    RespValue::Bulk(data) => Some(data),
                    _ => None,
                })
                .collect(),
            _ => return,
        };

        let reply = dispatch(&shared, idx, &args, &mut conn);
        let mut out = Vec::new();
        reply.encode(&mut out);
        if writer.write_all(&out).is_err() {
            return;
        }
    }
}

fn ok() -> RespValue {
    RespValue::Simple("OK".to_string())
}

fn error(message: &str) -> RespValue {
    RespValue::Error(message.to_string())
}

fn bulk_or_nil(value: Option<Vec<u8>>) -> RespValue {
    value.map_or(RespValue::Nil, RespValue::Bulk)
}

fn dispatch(shared: &Shared, idx: usize, args: &[Vec<u8>], conn: &mut ConnState) -> RespValue {
    let node = &shared.nodes[idx];
    let Some(name) = args.first() else {
        return error("ERR empty command");
    };
    let name = String::from_utf8_lossy(name).to_uppercase();
    node.journal.lock().unwrap().push((conn.id, name.clone()));

    let text = |i: usize| {
        args.get(i)
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .unwrap_or_default()
    };
    let texts = |from: usize| -> Vec<String> {
        args.iter()
            .skip(from)
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect()
    };

    if name == "AUTH" {
        if text(1) == shared.password {
            conn.authed = true;
            return ok();
        }
        return error("WRONGPASS invalid username-password pair or user is disabled.");
    }
    if !shared.password.is_empty() && !conn.authed {
        return error("NOAUTH Authentication required.");
    }

    match name.as_str() {
        "READONLY" => {
            conn.readonly = true;
            return ok();
        }
        "ASKING" => {
            conn.asking = true;
            return ok();
        }
        "CLUSTER" => return slots_reply(shared),
        "SCAN" => return scan(&node.store, &text(1), &text(3)),
        _ => {}
    }

    let key = text(1);
    let is_read = matches!(name.as_str(), "GET" | "EXISTS" | "MGET" | "SMEMBERS");
    // ASKING only covers the next command
    let asking = std::mem::take(&mut conn.asking);
    let slot = key_slot(key.as_bytes());
    let importing = shared.migrating.lock().unwrap().get(&slot).copied();
    if !(asking && importing == Some(idx)) {
        if let Some(redirect) = redirect(shared, idx, &key, is_read && conn.readonly) {
            return redirect;
        }
        if let Some(target) = importing {
            if target != idx && !node.store.exists(&key).unwrap_or(false) {
                return RespValue::Error(format!(
                    "ASK {} 127.0.0.1:{}",
                    slot, shared.nodes[target].port
                ));
            }
        }
    }

    let store = &node.store;
    let result = match name.as_str() {
        "GET" => store.get(&key).map(bulk_or_nil),
        "SET" => store.set(&key, &args[2]).map(|_| ok()),
        "SETEX" => store
            .set_ex(&key, &args[3], text(2).parse().unwrap_or(0))
            .map(|_| ok()),
        "EXISTS" => store.exists(&key).map(|found| RespValue::Integer(found as i64)),
        "DEL" => store.del(&texts(1)).map(|n| RespValue::Integer(n as i64)),
        "INCRBY" => store
            .incr_by(&key, text(2).parse().unwrap_or(0))
            .map(RespValue::Integer),
        "DECRBY" => store
            .decr_by(&key, text(2).parse().unwrap_or(0))
            .map(RespValue::Integer),
        "MGET" => store
            .mget(&texts(1))
            .map(|values| RespValue::Array(values.into_iter().map(bulk_or_nil).collect())),
        "MSET" => {
            let pairs: Vec<(String, Vec<u8>)> = args[1..]
                .chunks(2)
                .map(|pair| (String::from_utf8_lossy(&pair[0]).into_owned(), pair[1].clone()))
                .collect();
            store.mset(&pairs).map(|_| ok())
        }
        "SADD" => store
            .sadd(&key, &text(2))
            .map(|n| RespValue::Integer(n as i64)),
        "SMEMBERS" => store.smembers(&key).map(|members| {
            RespValue::Array(
                members
                    .into_iter()
                    .map(|member| RespValue::Bulk(member.into_bytes()))
                    .collect(),
            )
        }),
        _ => Ok(error(&format!("ERR unknown command '{}'", name))),
    };

    result.unwrap_or_else(|err| match err {
        CacheError::CommandRejected(message) => RespValue::Error(message),
        other => RespValue::Error(format!("ERR {}", other)),
    })
}

/// `MOVED` when this node may not serve `key`.
fn redirect(shared: &Shared, idx: usize, key: &str, replica_read: bool) -> Option<RespValue> {
    let slot = key_slot(key.as_bytes());
    let topology = shared.topology.lock().unwrap();
    let Some(range) = topology
        .iter()
        .find(|range| range.start <= slot && slot <= range.end)
    else {
        return Some(error("CLUSTERDOWN Hash slot not served"));
    };
    if range.master == idx || (replica_read && range.replicas.contains(&idx)) {
        return None;
    }
    Some(RespValue::Error(format!(
        "MOVED {} 127.0.0.1:{}",
        slot, shared.nodes[range.master].port
    )))
}

fn slots_reply(shared: &Shared) -> RespValue {
    let node_entry = |idx: usize| {
        RespValue::Array(vec![
            RespValue::Bulk(b"127.0.0.1".to_vec()),
            RespValue::Integer(i64::from(shared.nodes[idx].port)),
            RespValue::Bulk(format!("node{}", idx).into_bytes()),
        ])
    };
    let topology = shared.topology.lock().unwrap();
    RespValue::Array(
        topology
            .iter()
            .map(|range| {
                let mut entry = vec![
                    RespValue::Integer(i64::from(range.start)),
                    RespValue::Integer(i64::from(range.end)),
                    node_entry(range.master),
                ];
                entry.extend(range.replicas.iter().map(|&idx| node_entry(idx)));
                RespValue::Array(entry)
            })
            .collect(),
    )
}

fn scan(store: &MemoryCluster, cursor: &str, pattern: &str) -> RespValue {
    let result = store.masters().and_then(|masters| {
        store.scan_node(&masters[0], cursor.parse().unwrap_or(0), pattern)
    });
    match result {
        Ok((next, keys)) => RespValue::Array(vec![
            RespValue::Bulk(next.to_string().into_bytes()),
            RespValue::Array(
                keys.into_iter()
                    .map(|key| RespValue::Bulk(key.into_bytes()))
                    .collect(),
            ),
        ]),
        Err(err) => RespValue::Error(format!("ERR {}", err)),
    }
}
