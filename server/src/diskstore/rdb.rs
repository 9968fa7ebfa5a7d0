/*
 * Created on Sun Feb 18 2024
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

//! # The RDB snapshot codec
//!
//! The on-disk image of the keyspace. The layout is the RDB subset the
//! server round-trips:
//!
//! ```text
//! "REDIS" "0011"
//! 0xFE <db>  [0xFB <keycount> <expirecount>]
//! [0xFD <u32-le seconds> | 0xFC <u64-le millis>] <type> <key> <payload>
//! ...
//! 0xFF
//! ```
//!
//! Lengths use the three-form RDB length encoding; strings are
//! length-prefixed raw bytes; zset scores are little-endian IEEE-754
//! doubles; stream entries carry their `(ms, seq)` id as two
//! little-endian u64s. Everything here works on in-memory buffers;
//! the file plumbing lives in the parent module.

use crate::coredb::streamstore::{Stream, StreamId};
use crate::coredb::sortedset::SortedSet;
use crate::coredb::Value;
use std::collections::HashMap;
use std::fmt;

pub const MAGIC: &[u8] = b"REDIS";
pub const VERSION: &[u8] = b"0011";

const OP_EOF: u8 = 0xFF;
const OP_SELECTDB: u8 = 0xFE;
/// expires-at in seconds, 4-byte little-endian
const OP_EXPIRY_SEC: u8 = 0xFD;
/// expires-at in milliseconds, 8-byte little-endian
const OP_EXPIRY_MS: u8 = 0xFC;
const OP_RESIZEDB: u8 = 0xFB;

const TYPE_STRING: u8 = 0x00;
const TYPE_LIST: u8 = 0x01;
const TYPE_SET: u8 = 0x02;
const TYPE_HASH: u8 = 0x03;
const TYPE_ZSET: u8 = 0x04;
const TYPE_STREAM: u8 = 0x06;

/// A decoded (or to-be-encoded) point-in-time image of the store
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Snapshot {
    pub map: HashMap<String, Value>,
    pub expiry: HashMap<String, f64>,
    pub streams: HashMap<String, Stream>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RdbError {
    /// the file ended in the middle of a record
    UnexpectedEof,
    /// the magic string was not `REDIS`
    BadMagic,
    /// an invalid first byte in a length encoding
    BadLength(u8),
    /// a type byte this codec doesn't know
    UnknownType(u8),
}

impl fmt::Display for RdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of snapshot file"),
            Self::BadMagic => write!(f, "not a snapshot file (bad magic)"),
            Self::BadLength(b) => write!(f, "invalid length encoding byte 0x{:02x}", b),
            Self::UnknownType(b) => write!(f, "unknown value type 0x{:02x}", b),
        }
    }
}

type RdbResult<T> = Result<T, RdbError>;

// ---- encoding ----

/// RDB length encoding: 6-bit, 14-bit big-endian-ish split, or a
/// 0x80 marker followed by a little-endian u32
pub fn encode_length(buf: &mut Vec<u8>, len: u32) {
    if len <= 63 {
        buf.push(len as u8);
    } else if len <= 16383 {
        buf.push(0x40 | (len >> 8) as u8);
        buf.push((len & 0xFF) as u8);
    } else {
        buf.push(0x80);
        buf.extend_from_slice(&len.to_le_bytes());
    }
}

fn encode_string(buf: &mut Vec<u8>, s: &str) {
    encode_length(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Str(s) => encode_string(buf, s),
        Value::List(items) => {
            encode_length(buf, items.len() as u32);
            for item in items {
                encode_string(buf, item);
            }
        }
        Value::Set(items) => {
            encode_length(buf, items.len() as u32);
            for item in items {
                encode_string(buf, item);
            }
        }
        Value::Hash(fields) => {
            encode_length(buf, fields.len() as u32);
            for (field, val) in fields {
                encode_string(buf, field);
                encode_string(buf, val);
            }
        }
        Value::Zset(zset) => {
            encode_length(buf, zset.len() as u32);
            for (member, score) in zset.iter() {
                encode_string(buf, member);
                buf.extend_from_slice(&score.to_le_bytes());
            }
        }
    }
}

fn type_byte(value: &Value) -> u8 {
    match value {
        Value::Str(_) => TYPE_STRING,
        Value::List(_) => TYPE_LIST,
        Value::Set(_) => TYPE_SET,
        Value::Hash(_) => TYPE_HASH,
        Value::Zset(_) => TYPE_ZSET,
    }
}

fn encode_expiry(buf: &mut Vec<u8>, at: f64) {
    // whole seconds that fit 32 bits go out in the compact form; the
    // millisecond form covers fractional expirations and far futures
    if at >= 0.0 && at.fract() == 0.0 && at <= u32::MAX as f64 {
        buf.push(OP_EXPIRY_SEC);
        buf.extend_from_slice(&(at as u32).to_le_bytes());
    } else {
        buf.push(OP_EXPIRY_MS);
        buf.extend_from_slice(&((at * 1000.0) as u64).to_le_bytes());
    }
}

fn encode_stream(buf: &mut Vec<u8>, key: &str, stream: &Stream) {
    buf.push(TYPE_STREAM);
    encode_string(buf, key);
    encode_length(buf, stream.len() as u32);
    for (id, fields) in stream.iter() {
        buf.extend_from_slice(&id.ms.to_le_bytes());
        buf.extend_from_slice(&id.seq.to_le_bytes());
        encode_length(buf, fields.len() as u32);
        for (field, value) in fields {
            encode_string(buf, field);
            encode_string(buf, value);
        }
    }
}

/// Serialize a snapshot into the on-disk byte image
pub fn serialize(snapshot: &Snapshot) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(VERSION);
    // single database selector with the resize hint
    buf.push(OP_SELECTDB);
    buf.push(0);
    buf.push(OP_RESIZEDB);
    encode_length(
        &mut buf,
        (snapshot.map.len() + snapshot.streams.len()) as u32,
    );
    encode_length(&mut buf, snapshot.expiry.len() as u32);
    for (key, value) in &snapshot.map {
        if let Some(&at) = snapshot.expiry.get(key) {
            encode_expiry(&mut buf, at);
        }
        buf.push(type_byte(value));
        encode_string(&mut buf, key);
        encode_value(&mut buf, value);
    }
    for (key, stream) in &snapshot.streams {
        encode_stream(&mut buf, key, stream);
    }
    buf.push(OP_EOF);
    buf
}

// ---- decoding ----

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }
    fn read_u8(&mut self) -> RdbResult<u8> {
        let byte = *self.buf.get(self.pos).ok_or(RdbError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }
    fn read_exact(&mut self, n: usize) -> RdbResult<&'a [u8]> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + n)
            .ok_or(RdbError::UnexpectedEof)?;
        self.pos += n;
        Ok(bytes)
    }
    fn read_u32_le(&mut self) -> RdbResult<u32> {
        let bytes = self.read_exact(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }
    fn read_u64_le(&mut self) -> RdbResult<u64> {
        let bytes = self.read_exact(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }
    fn read_f64_le(&mut self) -> RdbResult<f64> {
        let bytes = self.read_exact(8)?;
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }
    /// Decode a length-encoded integer
    pub fn read_length(&mut self) -> RdbResult<u32> {
        let first = self.read_u8()?;
        match first & 0xC0 {
            0x00 => Ok((first & 0x3F) as u32),
            0x40 => {
                let second = self.read_u8()?;
                Ok((((first & 0x3F) as u32) << 8) | second as u32)
            }
            _ if first == 0x80 => self.read_u32_le(),
            _ => Err(RdbError::BadLength(first)),
        }
    }
    /// Byte strings are decoded as UTF-8 where possible and lossily
    /// otherwise
    fn read_string(&mut self) -> RdbResult<String> {
        let len = self.read_length()? as usize;
        let bytes = self.read_exact(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
    fn read_value(&mut self, value_type: u8) -> RdbResult<Value> {
        match value_type {
            TYPE_STRING => Ok(Value::Str(self.read_string()?)),
            TYPE_LIST => {
                let len = self.read_length()?;
                let mut items = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    items.push(self.read_string()?);
                }
                Ok(Value::List(items))
            }
            TYPE_SET => {
                let len = self.read_length()?;
                let mut items = std::collections::HashSet::with_capacity(len as usize);
                for _ in 0..len {
                    items.insert(self.read_string()?);
                }
                Ok(Value::Set(items))
            }
            TYPE_HASH => {
                let len = self.read_length()?;
                let mut fields = HashMap::with_capacity(len as usize);
                for _ in 0..len {
                    let field = self.read_string()?;
                    let value = self.read_string()?;
                    fields.insert(field, value);
                }
                Ok(Value::Hash(fields))
            }
            TYPE_ZSET => {
                let len = self.read_length()?;
                let mut pairs = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    let member = self.read_string()?;
                    let score = self.read_f64_le()?;
                    pairs.push((member, score));
                }
                Ok(Value::Zset(pairs.into_iter().collect::<SortedSet>()))
            }
            other => Err(RdbError::UnknownType(other)),
        }
    }
    fn read_stream(&mut self) -> RdbResult<Stream> {
        let entry_count = self.read_length()?;
        let mut stream = Stream::default();
        for _ in 0..entry_count {
            let ms = self.read_u64_le()?;
            let seq = self.read_u64_le()?;
            let field_count = self.read_length()?;
            let mut fields = Vec::with_capacity(field_count as usize);
            for _ in 0..field_count {
                let field = self.read_string()?;
                let value = self.read_string()?;
                fields.push((field, value));
            }
            stream.insert(StreamId { ms, seq }, fields);
        }
        Ok(stream)
    }
}

/// Parse a snapshot image. Entries whose expiry is strictly in the
/// past (relative to `now`, unix seconds) are dropped during the load
pub fn deserialize(buf: &[u8], now: f64) -> RdbResult<Snapshot> {
    let mut reader = Reader::new(buf);
    if reader.read_exact(MAGIC.len())? != MAGIC {
        return Err(RdbError::BadMagic);
    }
    let version = reader.read_exact(VERSION.len())?;
    if version != VERSION {
        log::warn!(
            "Snapshot version is '{}', expected '{}'; reading anyway",
            String::from_utf8_lossy(version),
            String::from_utf8_lossy(VERSION)
        );
    }
    let mut snapshot = Snapshot::default();
    loop {
        let opcode = match reader.read_u8() {
            Ok(op) => op,
            // a missing EOF marker still yields everything read so far
            Err(RdbError::UnexpectedEof) => break,
            Err(e) => return Err(e),
        };
        match opcode {
            OP_EOF => break,
            OP_SELECTDB => {
                let _db_number = reader.read_u8()?;
            }
            OP_RESIZEDB => {
                let _key_count = reader.read_length()?;
                let _expire_count = reader.read_length()?;
            }
            OP_EXPIRY_SEC => {
                let at = reader.read_u32_le()? as f64;
                read_record(&mut reader, &mut snapshot, Some(at), now)?;
            }
            OP_EXPIRY_MS => {
                let at = reader.read_u64_le()? as f64 / 1000.0;
                read_record(&mut reader, &mut snapshot, Some(at), now)?;
            }
            value_type => {
                let key = reader.read_string()?;
                insert_record(&mut reader, &mut snapshot, value_type, key, None, now)?;
            }
        }
    }
    Ok(snapshot)
}

fn read_record(
    reader: &mut Reader<'_>,
    snapshot: &mut Snapshot,
    expiry: Option<f64>,
    now: f64,
) -> RdbResult<()> {
    let value_type = reader.read_u8()?;
    let key = reader.read_string()?;
    insert_record(reader, snapshot, value_type, key, expiry, now)
}

fn insert_record(
    reader: &mut Reader<'_>,
    snapshot: &mut Snapshot,
    value_type: u8,
    key: String,
    expiry: Option<f64>,
    now: f64,
) -> RdbResult<()> {
    if value_type == TYPE_STREAM {
        let stream = reader.read_stream()?;
        snapshot.streams.insert(key, stream);
        return Ok(());
    }
    let value = reader.read_value(value_type)?;
    match expiry {
        Some(at) if at < now => {
            // already dead; decoded to keep the cursor aligned, but
            // never surfaced
        }
        Some(at) => {
            snapshot.expiry.insert(key.clone(), at);
            snapshot.map.insert(key, value);
        }
        None => {
            snapshot.map.insert(key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coredb::sortedset::SortedSet;
    use std::collections::HashSet;

    fn decode_length(bytes: &[u8]) -> u32 {
        Reader::new(bytes).read_length().unwrap()
    }

    #[test]
    fn test_length_encoding_layouts() {
        let mut buf = Vec::new();
        encode_length(&mut buf, 63);
        assert_eq!(buf, [63]);
        buf.clear();
        encode_length(&mut buf, 64);
        assert_eq!(buf, [0x40, 64]);
        buf.clear();
        encode_length(&mut buf, 16383);
        assert_eq!(buf, [0x7F, 0xFF]);
        buf.clear();
        encode_length(&mut buf, 16384);
        assert_eq!(buf, [0x80, 0x00, 0x40, 0x00, 0x00]);
    }

    #[test]
    fn test_length_encoding_roundtrip() {
        for n in [
            0u32,
            1,
            63,
            64,
            100,
            16383,
            16384,
            1_000_000,
            u32::MAX - 1,
            u32::MAX,
        ] {
            let mut buf = Vec::new();
            encode_length(&mut buf, n);
            assert_eq!(decode_length(&buf), n, "roundtrip failed for {}", n);
        }
    }

    #[test]
    fn test_invalid_length_byte() {
        assert_eq!(
            Reader::new(&[0xC5]).read_length(),
            Err(RdbError::BadLength(0xC5))
        );
    }

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot
            .map
            .insert("s".to_owned(), Value::Str("hello".to_owned()));
        snapshot.map.insert(
            "l".to_owned(),
            Value::List(vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]),
        );
        snapshot.map.insert(
            "set".to_owned(),
            Value::Set(HashSet::from(["x".to_owned(), "y".to_owned()])),
        );
        snapshot.map.insert(
            "h".to_owned(),
            Value::Hash(HashMap::from([
                ("f1".to_owned(), "v1".to_owned()),
                ("f2".to_owned(), "v2".to_owned()),
            ])),
        );
        snapshot.map.insert(
            "z".to_owned(),
            Value::Zset(
                vec![("a".to_owned(), 1.5), ("b".to_owned(), -2.25)]
                    .into_iter()
                    .collect::<SortedSet>(),
            ),
        );
        let mut stream = Stream::default();
        stream.insert(
            StreamId { ms: 1, seq: 1 },
            vec![("f".to_owned(), "v".to_owned())],
        );
        stream.insert(
            StreamId { ms: 2, seq: 0 },
            vec![
                ("f".to_owned(), "v2".to_owned()),
                ("g".to_owned(), "w".to_owned()),
            ],
        );
        snapshot.streams.insert("st".to_owned(), stream);
        snapshot.expiry.insert("s".to_owned(), 4_000_000_000.0);
        snapshot
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let snapshot = sample_snapshot();
        let bytes = serialize(&snapshot);
        assert!(bytes.starts_with(b"REDIS0011"));
        assert_eq!(*bytes.last().unwrap(), 0xFF);
        let parsed = deserialize(&bytes, 0.0).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_expiry_opcode_selection() {
        let mut snapshot = Snapshot::default();
        snapshot
            .map
            .insert("k".to_owned(), Value::Str("v".to_owned()));
        snapshot.expiry.insert("k".to_owned(), 4_000_000_000.0);
        // whole seconds within u32 range take the 4-byte form
        assert!(serialize(&snapshot).contains(&0xFDu8));
        // fractional expirations need millisecond precision
        snapshot.expiry.insert("k".to_owned(), 4_000_000_000.5);
        let bytes = serialize(&snapshot);
        assert!(bytes.windows(9).any(|w| {
            w[0] == 0xFC && u64::from_le_bytes(w[1..9].try_into().unwrap()) == 4_000_000_000_500
        }));
        let parsed = deserialize(&bytes, 0.0).unwrap();
        assert_eq!(parsed.expiry["k"], 4_000_000_000.5);
    }

    #[test]
    fn test_expired_entries_dropped_on_load() {
        let mut snapshot = Snapshot::default();
        snapshot
            .map
            .insert("dead".to_owned(), Value::Str("x".to_owned()));
        snapshot.expiry.insert("dead".to_owned(), 100.0);
        snapshot
            .map
            .insert("alive".to_owned(), Value::Str("y".to_owned()));
        let parsed = deserialize(&serialize(&snapshot), 200.0).unwrap();
        assert!(!parsed.map.contains_key("dead"));
        assert!(parsed.expiry.is_empty());
        assert_eq!(parsed.map["alive"], Value::Str("y".to_owned()));
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(
            deserialize(b"RUBIS0011\xff", 0.0),
            Err(RdbError::BadMagic)
        );
    }

    #[test]
    fn test_unknown_version_still_reads() {
        let mut bytes = serialize(&sample_snapshot());
        bytes[5..9].copy_from_slice(b"0099");
        assert!(deserialize(&bytes, 0.0).is_ok());
    }
}
