/*
 * Created on Wed Feb 28 2024
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

//! Set commands. Member order in replies is whatever the hash set
//! yields; nothing observable is promised about it

use super::{ensure_arity, ensure_min_arity};
use crate::coredb::CoreDB;
use crate::protocol::responses;
use crate::resp;
use std::collections::HashSet;

pub fn sadd(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    let mut table = db.acquire_table();
    let set = match table.set_or_default(&args[1]) {
        Ok(set) => set,
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let mut added = 0;
    for value in &args[2..] {
        if set.insert(value.clone()) {
            added += 1;
        }
    }
    resp::integer(added)
}

pub fn smembers(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    match db.acquire_table().set_value(&args[1]) {
        Ok(Some(set)) => resp::string_array(set),
        Ok(None) => responses::EMPTY_ARRAY.to_vec(),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

pub fn srem(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    let mut table = db.acquire_table();
    let set = match table.set_mut(&args[1]) {
        Ok(Some(set)) => set,
        Ok(None) => return resp::integer(0),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let mut removed = 0;
    for value in &args[2..] {
        if set.remove(value) {
            removed += 1;
        }
    }
    resp::integer(removed)
}

pub fn sismember(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    match db.acquire_table().set_value(&args[1]) {
        Ok(Some(set)) => resp::integer(set.contains(&args[2]) as i64),
        Ok(None) => resp::integer(0),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

pub fn scard(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    match db.acquire_table().set_value(&args[1]) {
        Ok(Some(set)) => resp::integer(set.len() as i64),
        Ok(None) => resp::integer(0),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

/// `SPOP key`: removes and returns one arbitrary element
pub fn spop(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    let mut table = db.acquire_table();
    let set = match table.set_mut(&args[1]) {
        Ok(Some(set)) => set,
        Ok(None) => return responses::NULL_BULK.to_vec(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    match set.iter().next().cloned() {
        Some(value) => {
            set.remove(&value);
            resp::bulk(&value)
        }
        None => responses::NULL_BULK.to_vec(),
    }
}

enum SetOp {
    Union,
    Inter,
}

/// `SUNION`/`SINTER` across N sets; missing keys behave as empty sets
fn combine(db: &CoreDB, args: &[String], op: SetOp) -> Vec<u8> {
    let mut table = db.acquire_table();
    let mut acc: Option<HashSet<String>> = None;
    for key in &args[1..] {
        let set = match table.set_value(key) {
            Ok(Some(set)) => set.clone(),
            Ok(None) => HashSet::new(),
            Err(_) => return responses::WRONGTYPE.to_vec(),
        };
        acc = Some(match acc {
            None => set,
            Some(acc) => match op {
                SetOp::Union => acc.union(&set).cloned().collect(),
                SetOp::Inter => acc.intersection(&set).cloned().collect(),
            },
        });
    }
    resp::string_array(acc.unwrap_or_default())
}

pub fn sunion(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 2);
    combine(db, args, SetOp::Union)
}

pub fn sinter(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 2);
    combine(db, args, SetOp::Inter)
}

/// `SDIFF first second`: members of the first set absent from the second
pub fn sdiff(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    let mut table = db.acquire_table();
    let first = match table.set_value(&args[1]) {
        Ok(Some(set)) => set.clone(),
        Ok(None) => HashSet::new(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let second = match table.set_value(&args[2]) {
        Ok(Some(set)) => set.clone(),
        Ok(None) => HashSet::new(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    resp::string_array(first.difference(&second))
}

/// `SMOVE source destination member`
pub fn smove(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 4);
    let mut table = db.acquire_table();
    match table.set_value(&args[1]) {
        Ok(Some(set)) if set.contains(&args[3]) => {}
        Ok(_) => return resp::integer(0),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    }
    // the destination's kind is checked before the member moves, so a
    // WRONGTYPE here leaves the source untouched
    if table.set_value(&args[2]).is_err() {
        return responses::WRONGTYPE.to_vec();
    }
    if let Ok(Some(source)) = table.set_mut(&args[1]) {
        source.remove(&args[3]);
    }
    match table.set_or_default(&args[2]) {
        Ok(dest) => {
            dest.insert(args[3].clone());
            resp::integer(1)
        }
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::strings;
    use crate::actions::testutil::{argv, testdb};

    #[test]
    fn test_sadd_counts_new_members() {
        let db = testdb();
        assert_eq!(sadd(&db, &argv(&["SADD", "s", "a", "b"])), b":2\r\n");
        assert_eq!(sadd(&db, &argv(&["SADD", "s", "b", "c"])), b":1\r\n");
        assert_eq!(scard(&db, &argv(&["SCARD", "s"])), b":3\r\n");
    }

    #[test]
    fn test_membership() {
        let db = testdb();
        sadd(&db, &argv(&["SADD", "s", "a"]));
        assert_eq!(sismember(&db, &argv(&["SISMEMBER", "s", "a"])), b":1\r\n");
        assert_eq!(sismember(&db, &argv(&["SISMEMBER", "s", "z"])), b":0\r\n");
        assert_eq!(
            sismember(&db, &argv(&["SISMEMBER", "none", "a"])),
            b":0\r\n"
        );
    }

    #[test]
    fn test_srem_spop() {
        let db = testdb();
        sadd(&db, &argv(&["SADD", "s", "a", "b"]));
        assert_eq!(srem(&db, &argv(&["SREM", "s", "a", "zz"])), b":1\r\n");
        let popped = spop(&db, &argv(&["SPOP", "s"]));
        assert_eq!(popped, b"$1\r\nb\r\n");
        assert_eq!(spop(&db, &argv(&["SPOP", "s"])), responses::NULL_BULK);
        assert_eq!(srem(&db, &argv(&["SREM", "ghost", "x"])), b":0\r\n");
    }

    #[test]
    fn test_union_inter_diff() {
        let db = testdb();
        sadd(&db, &argv(&["SADD", "s1", "a", "b", "c"]));
        sadd(&db, &argv(&["SADD", "s2", "b", "c", "d"]));
        let mut union = String::from_utf8(sunion(&db, &argv(&["SUNION", "s1", "s2"]))).unwrap();
        for member in ["a", "b", "c", "d"] {
            assert!(union.contains(&format!("$1\r\n{}\r\n", member)));
        }
        union.truncate(2);
        assert_eq!(union, "*4");
        let inter = String::from_utf8(sinter(&db, &argv(&["SINTER", "s1", "s2"]))).unwrap();
        assert!(inter.starts_with("*2"));
        let diff = sdiff(&db, &argv(&["SDIFF", "s1", "s2"]));
        assert_eq!(diff, b"*1\r\n$1\r\na\r\n");
    }

    #[test]
    fn test_smove() {
        let db = testdb();
        sadd(&db, &argv(&["SADD", "src", "x"]));
        assert_eq!(
            smove(&db, &argv(&["SMOVE", "src", "dst", "x"])),
            b":1\r\n"
        );
        assert_eq!(sismember(&db, &argv(&["SISMEMBER", "src", "x"])), b":0\r\n");
        assert_eq!(sismember(&db, &argv(&["SISMEMBER", "dst", "x"])), b":1\r\n");
        assert_eq!(
            smove(&db, &argv(&["SMOVE", "src", "dst", "x"])),
            b":0\r\n"
        );
        // a wrong-kind destination must not eat the member
        strings::set(&db, &argv(&["SET", "str", "v"]));
        assert_eq!(
            smove(&db, &argv(&["SMOVE", "dst", "str", "x"])),
            responses::WRONGTYPE
        );
        assert_eq!(sismember(&db, &argv(&["SISMEMBER", "dst", "x"])), b":1\r\n");
    }
}
