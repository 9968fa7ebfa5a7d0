/*
 * Created on Mon Feb 26 2024
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

//! String commands: `SET`, `GET`, `MSET`, `MGET`, `APPEND` and the
//! integer arithmetic family

use super::{ensure_arity, ensure_min_arity};
use crate::coredb::CoreDB;
use crate::protocol::responses;
use crate::resp;
use crate::util::unix_now;

/// `SET key value [PX milliseconds]`
///
/// Overwrites a value of any kind. Without `PX` any previous
/// expiration on the key is cleared
pub fn set(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    let mut expiry_ms: Option<u64> = None;
    let mut i = 3;
    while i < args.len() {
        if args[i].eq_ignore_ascii_case("px") && i + 1 < args.len() {
            match args[i + 1].parse::<u64>() {
                Ok(ms) => expiry_ms = Some(ms),
                Err(_) => return responses::ERR_NOT_INT.to_vec(),
            }
            i += 2;
        } else {
            return responses::ERR_SYNTAX.to_vec();
        }
    }
    let mut table = db.acquire_table();
    table.set_string(&args[1], args[2].clone());
    match expiry_ms {
        Some(ms) => table.set_expiry(&args[1], unix_now() + ms as f64 / 1000.0),
        None => table.clear_expiry(&args[1]),
    }
    responses::OK.to_vec()
}

/// `GET key`
pub fn get(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    match db.acquire_table().string(&args[1]) {
        Ok(Some(value)) => resp::bulk(value),
        Ok(None) => responses::NULL_BULK.to_vec(),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

/// `MSET key value [key value]…`
pub fn mset(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    if (args.len() - 1) % 2 != 0 {
        return super::wrong_arity(&args[0]);
    }
    let mut table = db.acquire_table();
    for pair in args[1..].chunks(2) {
        table.set_string(&pair[0], pair[1].clone());
        table.clear_expiry(&pair[0]);
    }
    responses::OK.to_vec()
}

/// `MGET key [key]…`: missing and wrong-kind keys yield null elements
pub fn mget(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 2);
    let mut table = db.acquire_table();
    let values: Vec<Option<String>> = args[1..]
        .iter()
        .map(|key| match table.string(key) {
            Ok(Some(value)) => Some(value.clone()),
            _ => None,
        })
        .collect();
    resp::array(values)
}

/// `APPEND key value`: creates the key when missing, returns the new
/// length. The expiration, if any, is left alone
pub fn append(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    let mut table = db.acquire_table();
    let appended = match table.string(&args[1]) {
        Err(_) => return responses::WRONGTYPE.to_vec(),
        Ok(Some(existing)) => {
            let mut value = existing.clone();
            value.push_str(&args[2]);
            value
        }
        Ok(None) => args[2].clone(),
    };
    let len = appended.len();
    table.set_string(&args[1], appended);
    resp::integer(len as i64)
}

/// The shared engine behind `INCR`/`DECR`/`INCRBY`/`DECRBY`: integer
/// arithmetic on the string-decoded value, counting from 0 for a
/// missing key
fn incr_by(db: &CoreDB, key: &str, delta: i64) -> Vec<u8> {
    let mut table = db.acquire_table();
    let current = match table.string(key) {
        Err(_) => return responses::WRONGTYPE.to_vec(),
        Ok(Some(value)) => match value.parse::<i64>() {
            Ok(n) => n,
            Err(_) => return responses::ERR_NOT_INT.to_vec(),
        },
        Ok(None) => 0,
    };
    let next = match current.checked_add(delta) {
        Some(n) => n,
        None => return responses::ERR_NOT_INT.to_vec(),
    };
    table.set_string(key, next.to_string());
    resp::integer(next)
}

pub fn incr(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    incr_by(db, &args[1], 1)
}

pub fn decr(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    incr_by(db, &args[1], -1)
}

pub fn incrby(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    match args[2].parse::<i64>() {
        Ok(delta) => incr_by(db, &args[1], delta),
        Err(_) => responses::ERR_NOT_INT.to_vec(),
    }
}

pub fn decrby(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    match args[2].parse::<i64>().map(i64::checked_neg) {
        Ok(Some(delta)) => incr_by(db, &args[1], delta),
        _ => responses::ERR_NOT_INT.to_vec(),
    }
}
