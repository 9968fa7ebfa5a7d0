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

//! Key-level commands that work across both namespaces

use super::{ensure_arity, ensure_min_arity};
use crate::coredb::CoreDB;
use crate::protocol::responses;
use crate::resp;

/// `TYPE key`: the value kind, `stream` for stream keys, `none`
/// otherwise. The keyspace is consulted first, mirroring how the two
/// namespaces are kept apart
pub fn type_cmd(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    if let Some(value) = db.acquire_table().lookup(&args[1]) {
        return resp::simple(value.type_name());
    }
    if db.read_streams().contains(&args[1]) {
        return resp::simple("stream");
    }
    resp::simple("none")
}

/// `KEYS`: every live key in the keyspace
pub fn keys(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 1);
    resp::string_array(db.acquire_table().keys())
}

/// `DEL key [key]…`: removes keys from whichever namespace holds them
pub fn del(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 2);
    let mut removed = 0;
    let mut table = db.acquire_table();
    let mut streams = db.acquire_streams();
    for key in &args[1..] {
        let in_table = table.remove(key);
        let in_streams = streams.remove(key);
        if in_table || in_streams {
            removed += 1;
        }
    }
    resp::integer(removed)
}

/// `EXISTS key [key]…`
pub fn exists(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 2);
    let mut table = db.acquire_table();
    let streams = db.read_streams();
    let count = args[1..]
        .iter()
        .filter(|key| table.contains(key) || streams.contains(key))
        .count();
    resp::integer(count as i64)
}

/// `FLUSHALL`: drop everything in both namespaces
pub fn flushall(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 1);
    db.acquire_table().clear();
    db.acquire_streams().clear();
    responses::OK.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testutil::{argv, testdb};
    use crate::actions::{lists, streams, strings};

    #[test]
    fn test_type_reports_all_kinds() {
        let db = testdb();
        strings::set(&db, &argv(&["SET", "s", "v"]));
        lists::rpush(&db, &argv(&["RPUSH", "l", "v"]));
        streams::xadd(&db, &argv(&["XADD", "st", "1-1", "f", "v"]));
        assert_eq!(type_cmd(&db, &argv(&["TYPE", "s"])), b"+string\r\n");
        assert_eq!(type_cmd(&db, &argv(&["TYPE", "l"])), b"+list\r\n");
        assert_eq!(type_cmd(&db, &argv(&["TYPE", "st"])), b"+stream\r\n");
        assert_eq!(type_cmd(&db, &argv(&["TYPE", "nope"])), b"+none\r\n");
    }

    #[test]
    fn test_del_spans_namespaces() {
        let db = testdb();
        strings::set(&db, &argv(&["SET", "k", "v"]));
        streams::xadd(&db, &argv(&["XADD", "st", "1-1", "f", "v"]));
        assert_eq!(del(&db, &argv(&["DEL", "k", "st", "ghost"])), b":2\r\n");
        assert_eq!(exists(&db, &argv(&["EXISTS", "k", "st"])), b":0\r\n");
    }

    #[test]
    fn test_flushall() {
        let db = testdb();
        strings::set(&db, &argv(&["SET", "k", "v"]));
        streams::xadd(&db, &argv(&["XADD", "st", "1-1", "f", "v"]));
        assert_eq!(flushall(&db, &argv(&["FLUSHALL"])), b"+OK\r\n");
        assert_eq!(keys(&db, &argv(&["KEYS"])), responses::EMPTY_ARRAY);
        assert_eq!(type_cmd(&db, &argv(&["TYPE", "st"])), b"+none\r\n");
    }
}
