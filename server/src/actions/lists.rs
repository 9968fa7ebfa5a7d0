/*
 * Created on Tue Feb 27 2024
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

//! List commands. A popped-empty list deletes its key; the `…X` push
//! variants refuse missing (and empty) keys with the WRONGTYPE token,
//! matching the upstream wire behavior this server is compatible with

use super::{ensure_arity, ensure_min_arity};
use crate::coredb::CoreDB;
use crate::protocol::responses;
use crate::resp;

enum End {
    Left,
    Right,
}

fn push(db: &CoreDB, args: &[String], end: End, require_existing: bool) -> Vec<u8> {
    let mut table = db.acquire_table();
    if require_existing {
        match table.list(&args[1]) {
            Ok(Some(list)) if !list.is_empty() => {}
            // missing or empty: refuse without touching the key
            _ => return responses::WRONGTYPE.to_vec(),
        }
    }
    let list = match table.list_or_default(&args[1]) {
        Ok(list) => list,
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    match end {
        End::Left => {
            for value in &args[2..] {
                list.insert(0, value.clone());
            }
        }
        End::Right => list.extend(args[2..].iter().cloned()),
    }
    resp::integer(list.len() as i64)
}

pub fn lpush(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    push(db, args, End::Left, false)
}

pub fn rpush(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    push(db, args, End::Right, false)
}

pub fn lpushx(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    push(db, args, End::Left, true)
}

pub fn rpushx(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    push(db, args, End::Right, true)
}

fn pop(db: &CoreDB, args: &[String], end: End) -> Vec<u8> {
    let mut table = db.acquire_table();
    let list = match table.list_mut(&args[1]) {
        Ok(Some(list)) => list,
        Ok(None) => return responses::NIL.to_vec(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    if list.is_empty() {
        return responses::NIL.to_vec();
    }
    let value = match end {
        End::Left => list.remove(0),
        End::Right => list.pop().unwrap(),
    };
    if list.is_empty() {
        table.remove(&args[1]);
    }
    resp::bulk(&value)
}

pub fn lpop(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    pop(db, args, End::Left)
}

pub fn rpop(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    pop(db, args, End::Right)
}

pub fn llen(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    match db.acquire_table().list(&args[1]) {
        Ok(Some(list)) => resp::integer(list.len() as i64),
        Ok(None) => resp::integer(0),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

/// `LRANGE key start stop`: two-sided inclusive, negative indices
/// count from the tail, bounds are clamped, crossed bounds are empty
pub fn lrange(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 4);
    let (start, stop) = match (args[2].parse::<i64>(), args[3].parse::<i64>()) {
        (Ok(start), Ok(stop)) => (start, stop),
        _ => return responses::ERR_NOT_INT.to_vec(),
    };
    let mut table = db.acquire_table();
    let list = match table.list(&args[1]) {
        Ok(Some(list)) => list,
        Ok(None) => return responses::EMPTY_ARRAY.to_vec(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let len = list.len() as i64;
    let start = if start < 0 { len + start } else { start }.max(0);
    let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);
    if start > stop || len == 0 {
        return responses::EMPTY_ARRAY.to_vec();
    }
    resp::string_array(&list[start as usize..=stop as usize])
}

pub fn lindex(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    let index = match args[2].parse::<i64>() {
        Ok(i) => i,
        Err(_) => return responses::ERR_NOT_INT.to_vec(),
    };
    let mut table = db.acquire_table();
    let list = match table.list(&args[1]) {
        Ok(Some(list)) => list,
        Ok(None) => return responses::NIL.to_vec(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let index = if index < 0 {
        list.len() as i64 + index
    } else {
        index
    };
    if index < 0 || index >= list.len() as i64 {
        return responses::NIL.to_vec();
    }
    resp::bulk(&list[index as usize])
}

pub fn lset(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 4);
    let index = match args[2].parse::<i64>() {
        Ok(i) => i,
        Err(_) => return responses::ERR_NOT_INT.to_vec(),
    };
    let mut table = db.acquire_table();
    let list = match table.list_mut(&args[1]) {
        Ok(Some(list)) => list,
        Ok(None) => return responses::ERR_NOT_INT.to_vec(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let index = if index < 0 {
        list.len() as i64 + index
    } else {
        index
    };
    if index < 0 || index >= list.len() as i64 {
        return responses::ERR_NOT_INT.to_vec();
    }
    list[index as usize] = args[3].clone();
    responses::OK.to_vec()
}

/// `LINSERT key BEFORE|AFTER pivot value`: new length, `+nil` when
/// the pivot is absent
pub fn linsert(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 5);
    let mut table = db.acquire_table();
    let list = match table.list_mut(&args[1]) {
        Ok(Some(list)) => list,
        Ok(None) => return responses::NIL.to_vec(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let at = match list.iter().position(|item| *item == args[3]) {
        Some(at) => at,
        None => return responses::NIL.to_vec(),
    };
    if args[2].eq_ignore_ascii_case("before") {
        list.insert(at, args[4].clone());
    } else if args[2].eq_ignore_ascii_case("after") {
        list.insert(at + 1, args[4].clone());
    } else {
        return responses::ERR_SYNTAX.to_vec();
    }
    resp::integer(list.len() as i64)
}
