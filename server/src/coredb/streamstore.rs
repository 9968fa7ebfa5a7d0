/*
 * Created on Wed Feb 14 2024
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

//! # The stream index
//!
//! Streams live in their own namespace, separate from the general
//! keyspace: a key may exist in both at once, and commands only look
//! at the namespace matching their type. Each stream is an ordered
//! index from `(ms, seq)` entry ids to the entry's field/value pairs.
//! Ids strictly increase; `0-0` is never a valid id.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::Notify;

/// A stream entry id. Ordering is lexicographic on `(ms, seq)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
    pub const MAX: StreamId = StreamId {
        ms: u64::MAX,
        seq: u64::MAX,
    };
    /// Parse a literal `ms-seq` id
    pub fn parse(text: &str) -> Option<StreamId> {
        let (ms, seq) = text.split_once('-')?;
        Some(StreamId {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// An id argument to `XADD`: a literal, `ms-*`, or `*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    Exact(StreamId),
    MsWildcard(u64),
    Wildcard,
}

impl IdSpec {
    pub fn parse(text: &str) -> Option<IdSpec> {
        if text == "*" || text == "*-*" {
            return Some(IdSpec::Wildcard);
        }
        if let Some((ms, seq)) = text.split_once('-') {
            let ms = ms.parse().ok()?;
            return if seq == "*" {
                Some(IdSpec::MsWildcard(ms))
            } else {
                Some(IdSpec::Exact(StreamId {
                    ms,
                    seq: seq.parse().ok()?,
                }))
            };
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaddError {
    /// the id was `0-0`
    IdZero,
    /// the id was not strictly greater than the stream's top id
    IdTooSmall,
}

/// Pick the sequence part for a wildcard id at time part `ms`: one past
/// the tail when the tail shares the same `ms`, else 0 (1 when `ms` is
/// 0, since `0-0` is invalid)
fn next_seq(ms: u64, last: Option<StreamId>) -> u64 {
    match last {
        Some(last) if last.ms >= ms => last.seq + 1,
        Some(_) => 0,
        None if ms == 0 => 1,
        None => 0,
    }
}

/// Resolve an [`IdSpec`] against the stream's current tail
pub fn generate_id(spec: IdSpec, last: Option<StreamId>, now_ms: u64) -> StreamId {
    match spec {
        IdSpec::Exact(id) => id,
        IdSpec::MsWildcard(ms) => StreamId {
            ms,
            seq: next_seq(ms, last),
        },
        IdSpec::Wildcard => StreamId {
            ms: now_ms,
            seq: next_seq(now_ms, last),
        },
    }
}

/// Enforce the id invariants: never `0-0`, always strictly greater
/// than the current tail
pub fn validate_id(id: StreamId, last: Option<StreamId>) -> Result<(), XaddError> {
    if id == StreamId::ZERO {
        return Err(XaddError::IdZero);
    }
    match last {
        Some(last) if id <= last => Err(XaddError::IdTooSmall),
        _ => Ok(()),
    }
}

/// The field/value pairs of one entry, in insertion order
pub type EntryFields = Vec<(String, String)>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stream {
    entries: BTreeMap<StreamId, EntryFields>,
}

impl Stream {
    pub fn last_id(&self) -> Option<StreamId> {
        self.entries.keys().next_back().copied()
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    /// Used by `XADD` (after validation) and the snapshot loader
    pub fn insert(&mut self, id: StreamId, fields: EntryFields) {
        self.entries.insert(id, fields);
    }
    /// Inclusive range over `[start, end]`; crossed bounds are empty
    pub fn range(
        &self,
        start: StreamId,
        end: StreamId,
    ) -> impl Iterator<Item = (StreamId, &EntryFields)> {
        let inner = if start <= end {
            Some(self.entries.range(start..=end))
        } else {
            None
        };
        inner
            .into_iter()
            .flatten()
            .map(|(id, fields)| (*id, fields))
    }
    /// Entries strictly after `id` (the `XREAD` contract)
    pub fn after(&self, id: StreamId) -> impl Iterator<Item = (StreamId, &EntryFields)> {
        self.entries
            .range((Bound::Excluded(id), Bound::Unbounded))
            .map(|(id, fields)| (*id, fields))
    }
    pub fn iter(&self) -> impl Iterator<Item = (StreamId, &EntryFields)> {
        self.entries.iter().map(|(id, fields)| (*id, fields))
    }
}

/// All streams, plus the notifier that wakes blocked `XREAD`s whenever
/// any stream grows. Waiters re-check the streams they care about on
/// wakeup
#[derive(Debug)]
pub struct StreamStore {
    streams: HashMap<String, Stream>,
    added: Arc<Notify>,
}

impl StreamStore {
    pub fn new() -> Self {
        StreamStore {
            streams: HashMap::new(),
            added: Arc::new(Notify::new()),
        }
    }
    pub fn get(&self, key: &str) -> Option<&Stream> {
        self.streams.get(key)
    }
    pub fn contains(&self, key: &str) -> bool {
        self.streams.contains_key(key)
    }
    pub fn remove(&mut self, key: &str) -> bool {
        self.streams.remove(key).is_some()
    }
    pub fn clear(&mut self) {
        self.streams.clear();
    }
    /// The wakeup handle for blocked readers
    pub fn notify_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.added)
    }
    /// Append an entry. The stream itself is only created once the id
    /// has passed validation, so a rejected `XADD` never leaves an
    /// empty stream behind
    pub fn xadd(
        &mut self,
        key: &str,
        spec: IdSpec,
        fields: EntryFields,
        now_ms: u64,
    ) -> Result<StreamId, XaddError> {
        let last = self.streams.get(key).and_then(Stream::last_id);
        let id = generate_id(spec, last, now_ms);
        validate_id(id, last)?;
        self.streams.entry(key.to_owned()).or_default().insert(id, fields);
        self.added.notify_waiters();
        Ok(id)
    }
    /// A deep copy of every stream (snapshot isolation for BGSAVE)
    pub fn export(&self) -> HashMap<String, Stream> {
        self.streams.clone()
    }
    /// Replace the contents wholesale (snapshot restore)
    pub fn install(&mut self, streams: HashMap<String, Stream>) {
        self.streams = streams;
    }
}

impl Default for StreamStore {
    fn default() -> Self {
        Self::new()
    }
}
