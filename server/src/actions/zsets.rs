/*
 * Created on Thu Feb 29 2024
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

//! Sorted-set commands

use super::{ensure_arity, ensure_min_arity};
use crate::coredb::sortedset::ZaddFlags;
use crate::coredb::CoreDB;
use crate::protocol::responses;
use crate::resp;

/// Scores print as their shortest decimal form: integral scores lose
/// the fractional part (`2`, not `2.0`)
fn format_score(score: f64) -> String {
    format!("{}", score)
}

/// Scan the `ZADD` option bag. Returns the flags and the index of the
/// first score token, or `None` when an unknown token precedes the
/// scores or a conflicting pair is present
fn parse_zadd_options(args: &[String]) -> Option<(ZaddFlags, usize)> {
    let mut flags = ZaddFlags::default();
    let mut first_score = None;
    for (i, token) in args.iter().enumerate().skip(2) {
        match token.to_uppercase().as_str() {
            "NX" => flags.nx = true,
            "XX" => flags.xx = true,
            "GT" => flags.gt = true,
            "LT" => flags.lt = true,
            "CH" => flags.ch = true,
            "INCR" => flags.incr = true,
            _ => {
                if token.parse::<f64>().is_ok() {
                    first_score = Some(i);
                    break;
                }
                return None;
            }
        }
    }
    if (flags.nx && flags.xx)
        || (flags.gt && flags.lt)
        || (flags.gt && flags.nx)
        || (flags.lt && flags.nx)
    {
        return None;
    }
    first_score.map(|i| (flags, i))
}

/// `ZADD key [NX|XX] [GT|LT] [CH] [INCR] score member [score member]…`
pub fn zadd(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 4);
    let (flags, first_score) = match parse_zadd_options(args) {
        Some(parsed) => parsed,
        None => return responses::ERR_SYNTAX.to_vec(),
    };
    let pairs = &args[first_score..];
    if pairs.len() % 2 != 0 || (flags.incr && pairs.len() != 2) {
        return responses::ERR_SYNTAX.to_vec();
    }
    // validate every score before touching the set, so a bad trailing
    // pair can't leave a half-applied ZADD behind
    let mut scored = Vec::with_capacity(pairs.len() / 2);
    for pair in pairs.chunks(2) {
        match pair[0].parse::<f64>() {
            Ok(score) => scored.push((score, &pair[1])),
            Err(_) => return responses::ERR_NOT_FLOAT.to_vec(),
        }
    }
    let mut table = db.acquire_table();
    let zset = match table.zset_or_default(&args[1]) {
        Ok(zset) => zset,
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let mut counted = 0;
    for (score, member) in scored {
        if zset.zadd(score, member, flags) {
            counted += 1;
        }
    }
    resp::integer(counted)
}

pub fn zrem(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    let mut table = db.acquire_table();
    let zset = match table.zset_mut(&args[1]) {
        Ok(Some(zset)) => zset,
        Ok(None) => return resp::integer(0),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let removed = args[2..].iter().filter(|m| zset.zrem(m)).count();
    resp::integer(removed as i64)
}

pub fn zrange(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 4);
    let (start, stop) = match (args[2].parse::<i64>(), args[3].parse::<i64>()) {
        (Ok(start), Ok(stop)) => (start, stop),
        _ => return responses::ERR_NOT_INT.to_vec(),
    };
    match db.acquire_table().zset(&args[1]) {
        Ok(Some(zset)) => resp::string_array(zset.zrange(start, stop)),
        Ok(None) => responses::EMPTY_ARRAY.to_vec(),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

pub fn zrangebyscore(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 4);
    let (min, max) = match (args[2].parse::<f64>(), args[3].parse::<f64>()) {
        (Ok(min), Ok(max)) => (min, max),
        _ => return responses::ERR_NOT_FLOAT.to_vec(),
    };
    match db.acquire_table().zset(&args[1]) {
        Ok(Some(zset)) => resp::string_array(zset.zrangebyscore(min, max)),
        Ok(None) => responses::EMPTY_ARRAY.to_vec(),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

fn rank(db: &CoreDB, args: &[String], reverse: bool) -> Vec<u8> {
    let mut table = db.acquire_table();
    let zset = match table.zset(&args[1]) {
        Ok(Some(zset)) => zset,
        Ok(None) => return responses::NULL_BULK.to_vec(),
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    let rank = if reverse {
        zset.zrevrank(&args[2])
    } else {
        zset.zrank(&args[2])
    };
    match rank {
        Some(rank) => resp::integer(rank as i64),
        None => responses::NULL_BULK.to_vec(),
    }
}

pub fn zrank(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    rank(db, args, false)
}

pub fn zrevrank(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    rank(db, args, true)
}

/// `ZSCORE key member`: the score as a bulk string of its decimal
/// representation
pub fn zscore(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    match db.acquire_table().zset(&args[1]) {
        Ok(Some(zset)) => match zset.zscore(&args[2]) {
            Some(score) => resp::bulk(&format_score(score)),
            None => responses::NULL_BULK.to_vec(),
        },
        Ok(None) => responses::NULL_BULK.to_vec(),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

pub fn zcard(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    match db.acquire_table().zset(&args[1]) {
        Ok(Some(zset)) => resp::integer(zset.len() as i64),
        Ok(None) => resp::integer(0),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

pub fn zcount(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 4);
    let (min, max) = match (args[2].parse::<f64>(), args[3].parse::<f64>()) {
        (Ok(min), Ok(max)) => (min, max),
        _ => return responses::ERR_NOT_FLOAT.to_vec(),
    };
    match db.acquire_table().zset(&args[1]) {
        Ok(Some(zset)) => resp::integer(zset.zcount(min, max) as i64),
        Ok(None) => resp::integer(0),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}
