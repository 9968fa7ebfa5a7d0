/*
 * Created on Sat Feb 10 2024
 *
 * This file is a part of Cinnabar
 * Cinnabar is a Redis-compatible in-memory key/value store that speaks
 * the Redis serialization protocol over TCP, persists point-in-time
 * snapshots in the RDB format and replicates to read replicas.
 *
 * Copyright (c) 2024, the Cinnabar developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! # The core database engine
//!
//! One logical store per process: the typed keyspace with its
//! expiration table, the stream namespace, the replica writer set and
//! the persistence counters, all behind a cheaply clonable handle.
//! Locks guard short critical sections only and are never held across
//! an `.await`, so commands never observe each other mid-mutation.

pub mod sortedset;
pub mod streamstore;

use crate::config::{ConfigTable, ServerConfig};
use crate::diskstore::rdb::Snapshot;
use crate::protocol::encode_command;
use crate::replication::{ReplicaHandle, ReplicaSet};
use crate::util::unix_now;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use sortedset::SortedSet;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use streamstore::StreamStore;
use tokio::sync::Notify;

/// One of the five keyspace value kinds. Streams are deliberately not
/// here: they live in their own namespace (see [`StreamStore`])
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    Zset(SortedSet),
}

impl Value {
    /// The name `TYPE` reports for this kind
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::Zset(_) => "zset",
        }
    }
}

/// The sentinel returned when a key holds a different kind than the
/// command expects. The typed accessors below are the only way
/// commands reach values, which makes this the choke point for the
/// WRONGTYPE guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongType;

type Typed<T> = Result<T, WrongType>;

/// The keyspace: `key → value` plus `key → absolute expiry` (unix
/// seconds, fractional). Every accessor runs the lazy-expiry check
/// first, so an expired key behaves exactly like an absent one and is
/// reaped on first touch
#[derive(Debug, Default)]
pub struct Keyspace {
    map: HashMap<String, Value>,
    expiry: HashMap<String, f64>,
}

impl Keyspace {
    fn remove_if_expired(&mut self, key: &str) {
        if let Some(&at) = self.expiry.get(key) {
            if unix_now() >= at {
                self.map.remove(key);
                self.expiry.remove(key);
            }
        }
    }
    pub fn lookup(&mut self, key: &str) -> Option<&Value> {
        self.remove_if_expired(key);
        self.map.get(key)
    }
    pub fn contains(&mut self, key: &str) -> bool {
        self.lookup(key).is_some()
    }
    /// `SET` semantics: replace whatever was there, of any kind
    pub fn set_string(&mut self, key: &str, value: String) {
        self.map.insert(key.to_owned(), Value::Str(value));
    }
    pub fn string(&mut self, key: &str) -> Typed<Option<&String>> {
        self.remove_if_expired(key);
        match self.map.get(key) {
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(_) => Err(WrongType),
            None => Ok(None),
        }
    }
    pub fn list(&mut self, key: &str) -> Typed<Option<&Vec<String>>> {
        self.remove_if_expired(key);
        match self.map.get(key) {
            Some(Value::List(l)) => Ok(Some(l)),
            Some(_) => Err(WrongType),
            None => Ok(None),
        }
    }
    pub fn list_mut(&mut self, key: &str) -> Typed<Option<&mut Vec<String>>> {
        self.remove_if_expired(key);
        match self.map.get_mut(key) {
            Some(Value::List(l)) => Ok(Some(l)),
            Some(_) => Err(WrongType),
            None => Ok(None),
        }
    }
    pub fn list_or_default(&mut self, key: &str) -> Typed<&mut Vec<String>> {
        self.remove_if_expired(key);
        let value = match self.map.entry(key.to_owned()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(Value::List(Vec::new())),
        };
        match value {
            Value::List(l) => Ok(l),
            _ => Err(WrongType),
        }
    }
    pub fn hash(&mut self, key: &str) -> Typed<Option<&HashMap<String, String>>> {
        self.remove_if_expired(key);
        match self.map.get(key) {
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(WrongType),
            None => Ok(None),
        }
    }
    pub fn hash_or_default(&mut self, key: &str) -> Typed<&mut HashMap<String, String>> {
        self.remove_if_expired(key);
        let value = match self.map.entry(key.to_owned()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(Value::Hash(HashMap::new())),
        };
        match value {
            Value::Hash(h) => Ok(h),
            _ => Err(WrongType),
        }
    }
    pub fn set_value(&mut self, key: &str) -> Typed<Option<&HashSet<String>>> {
        self.remove_if_expired(key);
        match self.map.get(key) {
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(WrongType),
            None => Ok(None),
        }
    }
    pub fn set_mut(&mut self, key: &str) -> Typed<Option<&mut HashSet<String>>> {
        self.remove_if_expired(key);
        match self.map.get_mut(key) {
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(WrongType),
            None => Ok(None),
        }
    }
    pub fn set_or_default(&mut self, key: &str) -> Typed<&mut HashSet<String>> {
        self.remove_if_expired(key);
        let value = match self.map.entry(key.to_owned()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(Value::Set(HashSet::new())),
        };
        match value {
            Value::Set(s) => Ok(s),
            _ => Err(WrongType),
        }
    }
    pub fn zset_mut(&mut self, key: &str) -> Typed<Option<&mut SortedSet>> {
        self.remove_if_expired(key);
        match self.map.get_mut(key) {
            Some(Value::Zset(z)) => Ok(Some(z)),
            Some(_) => Err(WrongType),
            None => Ok(None),
        }
    }
    pub fn zset(&mut self, key: &str) -> Typed<Option<&SortedSet>> {
        self.remove_if_expired(key);
        match self.map.get(key) {
            Some(Value::Zset(z)) => Ok(Some(z)),
            Some(_) => Err(WrongType),
            None => Ok(None),
        }
    }
    pub fn zset_or_default(&mut self, key: &str) -> Typed<&mut SortedSet> {
        self.remove_if_expired(key);
        let value = match self.map.entry(key.to_owned()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(Value::Zset(SortedSet::new())),
        };
        match value {
            Value::Zset(z) => Ok(z),
            _ => Err(WrongType),
        }
    }
    /// Remove a key and its expiration (invariant: an expiry entry
    /// only exists while its key does)
    pub fn remove(&mut self, key: &str) -> bool {
        self.expiry.remove(key);
        self.map.remove(key).is_some()
    }
    pub fn set_expiry(&mut self, key: &str, at: f64) {
        self.expiry.insert(key.to_owned(), at);
    }
    pub fn clear_expiry(&mut self, key: &str) {
        self.expiry.remove(key);
    }
    pub fn keys(&mut self) -> Vec<String> {
        let keys: Vec<String> = self.map.keys().cloned().collect();
        keys.into_iter()
            .filter(|k| {
                self.remove_if_expired(k);
                self.map.contains_key(k)
            })
            .collect()
    }
    pub fn expiring_len(&self) -> usize {
        self.expiry.len()
    }
    pub fn clear(&mut self) {
        self.map.clear();
        self.expiry.clear();
    }
    /// Deep copies of the two tables, for snapshot isolation
    pub fn export(&self) -> (HashMap<String, Value>, HashMap<String, f64>) {
        (self.map.clone(), self.expiry.clone())
    }
    pub fn install(&mut self, map: HashMap<String, Value>, expiry: HashMap<String, f64>) {
        self.map = map;
        self.expiry = expiry;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica { host: String, port: u16 },
}

/// The shared state behind every [`CoreDB`] handle
#[derive(Debug)]
pub struct Shared {
    /// the keyspace, behind a R/W lock
    pub table: RwLock<Keyspace>,
    /// the stream namespace
    pub streams: RwLock<StreamStore>,
    /// registered replica writers
    pub replicas: RwLock<ReplicaSet>,
    /// the runtime configuration table (CONFIG GET/SET)
    pub config: RwLock<ConfigTable>,
    /// replica acknowledgements observed since the last propagated write
    numacks: AtomicUsize,
    /// mutations since the last successful save
    dirty: AtomicU64,
    /// unix timestamp of the last successful save; 0 = never
    last_save: AtomicU64,
    /// whether a background save is currently running
    bgsave_running: AtomicBool,
    role: Role,
}

/// This is a thread-safe database handle, which on cloning simply
/// gives another atomic reference to the shared state
#[derive(Debug, Clone)]
pub struct CoreDB {
    shared: Arc<Shared>,
}

impl CoreDB {
    pub fn new(cfg: &ServerConfig) -> Self {
        let role = match &cfg.master {
            Some((host, port)) => Role::Replica {
                host: host.clone(),
                port: *port,
            },
            None => Role::Master,
        };
        CoreDB {
            shared: Arc::new(Shared {
                table: RwLock::new(Keyspace::default()),
                streams: RwLock::new(StreamStore::new()),
                replicas: RwLock::new(ReplicaSet::new()),
                config: RwLock::new(ConfigTable::new(cfg.dir.clone(), cfg.dbfilename.clone())),
                numacks: AtomicUsize::new(0),
                dirty: AtomicU64::new(0),
                last_save: AtomicU64::new(0),
                bgsave_running: AtomicBool::new(false),
                role,
            }),
        }
    }

    pub fn acquire_table(&self) -> RwLockWriteGuard<'_, Keyspace> {
        self.shared.table.write()
    }
    pub fn acquire_streams(&self) -> RwLockWriteGuard<'_, StreamStore> {
        self.shared.streams.write()
    }
    pub fn read_streams(&self) -> RwLockReadGuard<'_, StreamStore> {
        self.shared.streams.read()
    }
    pub fn acquire_config(&self) -> RwLockWriteGuard<'_, ConfigTable> {
        self.shared.config.write()
    }
    pub fn read_config(&self) -> RwLockReadGuard<'_, ConfigTable> {
        self.shared.config.read()
    }
    /// The wakeup handle used by blocked stream readers
    pub fn stream_notify(&self) -> Arc<Notify> {
        self.shared.streams.read().notify_handle()
    }

    pub fn role(&self) -> &Role {
        &self.shared.role
    }
    pub fn is_replica(&self) -> bool {
        matches!(self.shared.role, Role::Replica { .. })
    }
    /// The configured master port, used to classify inbound
    /// connections on a replica
    pub fn master_port(&self) -> Option<u16> {
        match &self.shared.role {
            Role::Replica { port, .. } => Some(*port),
            Role::Master => None,
        }
    }

    // persistence bookkeeping

    pub fn register_change(&self) {
        self.shared.dirty.fetch_add(1, Ordering::Relaxed);
    }
    pub fn dirty_count(&self) -> u64 {
        self.shared.dirty.load(Ordering::Relaxed)
    }
    /// Called after a successful save: stamps the save time and resets
    /// the dirty counter
    pub fn save_completed(&self) {
        self.shared
            .last_save
            .store(unix_now() as u64, Ordering::Relaxed);
        self.shared.dirty.store(0, Ordering::Relaxed);
    }
    pub fn last_save(&self) -> u64 {
        self.shared.last_save.load(Ordering::Relaxed)
    }
    /// Try to claim the background-save slot; false if one is running
    pub fn bgsave_begin(&self) -> bool {
        !self.shared.bgsave_running.swap(true, Ordering::AcqRel)
    }
    pub fn bgsave_end(&self) {
        self.shared.bgsave_running.store(false, Ordering::Release);
    }

    // replication bookkeeping

    pub fn numacks(&self) -> usize {
        self.shared.numacks.load(Ordering::Relaxed)
    }
    pub fn incr_numacks(&self) {
        self.shared.numacks.fetch_add(1, Ordering::Relaxed);
    }
    pub fn register_replica(&self, handle: ReplicaHandle) {
        self.shared.replicas.write().register(handle);
    }

    /// Send a pre-framed message to every registered replica. Writers
    /// that refuse the frame within the send budget are dropped from
    /// the set so one stuck replica cannot wedge the rest
    pub async fn broadcast_to_replicas(&self, frame: &[u8]) {
        let handles = self.shared.replicas.read().handles();
        let mut dead = Vec::new();
        for handle in handles {
            if !handle.send(frame.to_vec()).await {
                log::warn!("Dropping unresponsive replica {}", handle.addr());
                dead.push(handle.addr());
            }
        }
        if !dead.is_empty() {
            let mut replicas = self.shared.replicas.write();
            for addr in dead {
                replicas.unregister(addr);
            }
        }
    }

    /// Propagate a mutating command to every replica, in execution
    /// order. Resets the ack counter: acks observed afterwards belong
    /// to this (or a later) write
    pub async fn propagate(&self, args: &[String]) {
        self.shared.numacks.store(0, Ordering::Relaxed);
        self.broadcast_to_replicas(&encode_command(args)).await;
    }

    // snapshot plumbing

    /// A point-in-time deep copy of the keyspace, expirations and
    /// streams. Taken on the command path; the background writer only
    /// ever sees this owned copy, never the live store
    pub fn snapshot(&self) -> Snapshot {
        let (map, expiry) = self.shared.table.read().export();
        let streams = self.shared.streams.read().export();
        Snapshot {
            map,
            expiry,
            streams,
        }
    }
    /// Replace the live state with a loaded snapshot (startup restore
    /// and replica bootstrap)
    pub fn install(&self, snapshot: Snapshot) {
        self.shared
            .table
            .write()
            .install(snapshot.map, snapshot.expiry);
        self.shared.streams.write().install(snapshot.streams);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::unix_now;

    fn keyspace() -> Keyspace {
        Keyspace::default()
    }

    #[test]
    fn test_wrongtype_guard() {
        let mut ks = keyspace();
        ks.set_string("k", "v".to_owned());
        assert_eq!(ks.list("k"), Err(WrongType));
        assert_eq!(ks.hash("k"), Err(WrongType));
        assert_eq!(ks.zset_or_default("k"), Err(WrongType));
        // the guard must not have clobbered the value
        assert_eq!(ks.string("k").unwrap().unwrap(), "v");
    }

    #[test]
    fn test_set_overwrites_any_kind() {
        let mut ks = keyspace();
        ks.list_or_default("k").unwrap().push("a".to_owned());
        ks.set_string("k", "v".to_owned());
        assert_eq!(ks.string("k").unwrap().unwrap(), "v");
    }

    #[test]
    fn test_lazy_expiry() {
        let mut ks = keyspace();
        ks.set_string("gone", "x".to_owned());
        ks.set_expiry("gone", unix_now() - 1.0);
        ks.set_string("kept", "y".to_owned());
        ks.set_expiry("kept", unix_now() + 100.0);
        assert_eq!(ks.string("gone").unwrap(), None);
        // reaped on access, expiry included
        assert_eq!(ks.expiring_len(), 1);
        assert_eq!(ks.string("kept").unwrap().unwrap(), "y");
        assert_eq!(ks.keys(), vec!["kept".to_owned()]);
    }

    #[test]
    fn test_remove_clears_expiry() {
        let mut ks = keyspace();
        ks.set_string("k", "v".to_owned());
        ks.set_expiry("k", unix_now() + 100.0);
        assert!(ks.remove("k"));
        assert_eq!(ks.expiring_len(), 0);
        assert!(!ks.remove("k"));
    }
}
