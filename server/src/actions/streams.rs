/*
 * Created on Fri Mar 01 2024
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

//! Stream commands: `XADD`, `XRANGE` and (optionally blocking) `XREAD`
//!
//! A blocked `XREAD` parks on the stream store's notifier and
//! re-checks its streams on every wakeup. The connection is watched
//! for EOF throughout, so a client that hangs up mid-block tears the
//! wait down at once without touching any state.

use super::{ensure_arity, ensure_min_arity};
use crate::coredb::streamstore::{EntryFields, IdSpec, StreamId, XaddError};
use crate::coredb::CoreDB;
use crate::dbnet::connection::Connection;
use crate::protocol::responses;
use crate::resp;
use crate::util::unix_now_millis;
use std::time::Duration;
use tokio::time::{self, Instant};

/// `XADD key id field value [field value]…`
pub fn xadd(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 5);
    if (args.len() - 3) % 2 != 0 {
        return super::wrong_arity(&args[0]);
    }
    let spec = match IdSpec::parse(&args[2]) {
        Some(spec) => spec,
        None => return responses::ERR_XADD_ID_ZERO.to_vec(),
    };
    let fields: EntryFields = args[3..]
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let mut streams = db.acquire_streams();
    match streams.xadd(&args[1], spec, fields, unix_now_millis()) {
        Ok(id) => resp::bulk(&id.to_string()),
        Err(XaddError::IdZero) => responses::ERR_XADD_ID_ZERO.to_vec(),
        Err(XaddError::IdTooSmall) => responses::ERR_XADD_ID_SMALL.to_vec(),
    }
}

/// One `*2 [id, flattened fields]` element of a range reply
fn entry_frame(id: StreamId, fields: &EntryFields) -> Vec<u8> {
    let mut flat = Vec::with_capacity(fields.len() * 2);
    for (field, value) in fields {
        flat.push(field.clone());
        flat.push(value.clone());
    }
    resp::nested_array(&[resp::bulk(&id.to_string()), resp::string_array(flat)])
}

/// Parse an `XRANGE` bound. `-`/`+` are the open ends; a bare number
/// covers the whole `ms`; `ms-seq` is exact
fn parse_bound(token: &str, is_start: bool) -> Option<StreamId> {
    match token {
        "-" => return Some(StreamId::ZERO),
        "+" => return Some(StreamId::MAX),
        _ => {}
    }
    if let Some(id) = StreamId::parse(token) {
        return Some(id);
    }
    let ms = token.parse::<u64>().ok()?;
    Some(if is_start {
        StreamId { ms, seq: 0 }
    } else {
        StreamId { ms, seq: u64::MAX }
    })
}

/// `XRANGE key start end`: inclusive bounds
pub fn xrange(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 4);
    let (start, end) = match (
        parse_bound(&args[2], true),
        parse_bound(&args[3], false),
    ) {
        (Some(start), Some(end)) => (start, end),
        _ => return responses::ERR_SYNTAX.to_vec(),
    };
    let streams = db.read_streams();
    let stream = match streams.get(&args[1]) {
        Some(stream) => stream,
        None => return responses::NONE.to_vec(),
    };
    let entries: Vec<Vec<u8>> = stream
        .range(start, end)
        .map(|(id, fields)| entry_frame(id, fields))
        .collect();
    if entries.is_empty() {
        return responses::NONE.to_vec();
    }
    resp::nested_array(&entries)
}

/// The per-key element of an `XREAD` reply: `*2 [key, entries]`, or a
/// null bulk when the stream has nothing after the start id
fn xread_key_frame(db: &CoreDB, key: &str, after: StreamId) -> Option<Vec<u8>> {
    let streams = db.read_streams();
    let entries: Vec<Vec<u8>> = streams
        .get(key)?
        .after(after)
        .map(|(id, fields)| entry_frame(id, fields))
        .collect();
    if entries.is_empty() {
        return None;
    }
    Some(resp::nested_array(&[
        resp::bulk(key),
        resp::nested_array(&entries),
    ]))
}

fn xread_reply(db: &CoreDB, pairs: &[(String, StreamId)]) -> (Vec<u8>, bool) {
    let mut found = false;
    let frames: Vec<Vec<u8>> = pairs
        .iter()
        .map(|(key, after)| match xread_key_frame(db, key, *after) {
            Some(frame) => {
                found = true;
                frame
            }
            None => responses::NULL_BULK.to_vec(),
        })
        .collect();
    (resp::nested_array(&frames), found)
}

/// `XREAD [BLOCK ms] STREAMS key [key]… id [id]…`
///
/// Start ids are exclusive; `$` resolves to the stream's tail at call
/// time. `BLOCK 0` waits until any requested stream produces a
/// matching entry; a positive `BLOCK` waits at most that long
pub async fn xread(db: &CoreDB, con: &mut Connection, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 4);
    let mut at = 1;
    let mut block: Option<u64> = None;
    if args[at].eq_ignore_ascii_case("block") {
        if args.len() < 6 {
            return super::wrong_arity(&args[0]);
        }
        block = match args[at + 1].parse::<u64>() {
            Ok(ms) => Some(ms),
            Err(_) => return responses::ERR_NOT_INT.to_vec(),
        };
        at += 2;
    }
    if !args[at].eq_ignore_ascii_case("streams") {
        return responses::ERR_SYNTAX.to_vec();
    }
    let rest = &args[at + 1..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return responses::ERR_SYNTAX.to_vec();
    }
    let (keys, ids) = rest.split_at(rest.len() / 2);
    // `$` snapshots the tail before any blocking starts
    let mut pairs = Vec::with_capacity(keys.len());
    for (key, id) in keys.iter().zip(ids) {
        let after = if id == "$" {
            db.read_streams()
                .get(key)
                .and_then(|s| s.last_id())
                .unwrap_or(StreamId::ZERO)
        } else {
            match StreamId::parse(id) {
                Some(id) => id,
                None => return responses::ERR_SYNTAX.to_vec(),
            }
        };
        pairs.push((key.clone(), after));
    }

    let (reply, found) = xread_reply(db, &pairs);
    let block = match block {
        None => return reply,
        Some(_) if found => return reply,
        Some(ms) => ms,
    };

    let deadline = if block > 0 {
        Some(Instant::now() + Duration::from_millis(block))
    } else {
        None
    };
    let notify = db.stream_notify();
    loop {
        // arm the wakeup before re-checking, or a concurrent XADD
        // could slip between the check and the wait
        let notified = notify.notified();
        let (reply, found) = xread_reply(db, &pairs);
        if found {
            return reply;
        }
        match deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return reply;
                }
                tokio::select! {
                    _ = notified => {}
                    _ = time::sleep_until(deadline) => {}
                    _ = con.wait_eof() => return Vec::new(),
                }
            }
            None => {
                tokio::select! {
                    _ = notified => {}
                    _ = con.wait_eof() => return Vec::new(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testutil::{argv, testdb};

    #[test]
    fn test_xadd_ids() {
        let db = testdb();
        assert_eq!(
            xadd(&db, &argv(&["XADD", "s", "1-1", "f", "v"])),
            b"$3\r\n1-1\r\n"
        );
        assert_eq!(
            xadd(&db, &argv(&["XADD", "s", "1-1", "f", "v2"])),
            responses::ERR_XADD_ID_SMALL
        );
        assert_eq!(
            xadd(&db, &argv(&["XADD", "s", "1-2", "f", "v2"])),
            b"$3\r\n1-2\r\n"
        );
        assert_eq!(
            xadd(&db, &argv(&["XADD", "s", "0-0", "f", "v"])),
            responses::ERR_XADD_ID_ZERO
        );
        assert_eq!(
            xadd(&db, &argv(&["XADD", "s", "1-*", "f", "v"])),
            b"$3\r\n1-3\r\n"
        );
    }

    #[test]
    fn test_xrange() {
        let db = testdb();
        xadd(&db, &argv(&["XADD", "s", "1-1", "f", "v"]));
        xadd(&db, &argv(&["XADD", "s", "1-2", "f", "v2"]));
        let expected: &[u8] = b"*2\r\n\
            *2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nf\r\n$1\r\nv\r\n\
            *2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nf\r\n$2\r\nv2\r\n";
        assert_eq!(xrange(&db, &argv(&["XRANGE", "s", "-", "+"])), expected);
        assert_eq!(
            xrange(&db, &argv(&["XRANGE", "s", "1-2", "+"])),
            b"*1\r\n*2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nf\r\n$2\r\nv2\r\n".to_vec()
        );
        assert_eq!(
            xrange(&db, &argv(&["XRANGE", "ghost", "-", "+"])),
            responses::NONE
        );
        assert_eq!(
            xrange(&db, &argv(&["XRANGE", "s", "5-0", "+"])),
            responses::NONE
        );
    }

    #[test]
    fn test_xread_reply_shape() {
        let db = testdb();
        xadd(&db, &argv(&["XADD", "s", "1-1", "f", "v"]));
        let (reply, found) = xread_reply(
            &db,
            &[
                ("s".to_owned(), StreamId::ZERO),
                ("ghost".to_owned(), StreamId::ZERO),
            ],
        );
        assert!(found);
        assert_eq!(
            reply,
            b"*2\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nf\r\n$1\r\nv\r\n$-1\r\n"
                .to_vec()
        );
        // exclusive start: nothing after the tail
        let (_, found) = xread_reply(&db, &[("s".to_owned(), StreamId { ms: 1, seq: 1 })]);
        assert!(!found);
    }
}
