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

//! Hash commands

use super::{ensure_arity, ensure_min_arity};
use crate::coredb::CoreDB;
use crate::protocol::responses;
use crate::resp;

/// `HSET key field value [field value]…`
pub fn hset(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 4);
    if (args.len() - 2) % 2 != 0 {
        return super::wrong_arity(&args[0]);
    }
    let mut table = db.acquire_table();
    let hash = match table.hash_or_default(&args[1]) {
        Ok(hash) => hash,
        Err(_) => return responses::WRONGTYPE.to_vec(),
    };
    for pair in args[2..].chunks(2) {
        hash.insert(pair[0].clone(), pair[1].clone());
    }
    responses::OK.to_vec()
}

/// `HGET key field`: `+nil` for a missing field
pub fn hget(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    match db.acquire_table().hash(&args[1]) {
        Ok(Some(hash)) => match hash.get(&args[2]) {
            Some(value) => resp::bulk(value),
            None => responses::NIL.to_vec(),
        },
        Ok(None) => responses::NIL.to_vec(),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}

/// `HGETALL key`: fields and values flattened into one alternation
pub fn hgetall(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    match db.acquire_table().hash(&args[1]) {
        Ok(Some(hash)) => {
            let mut flat = Vec::with_capacity(hash.len() * 2);
            for (field, value) in hash {
                flat.push(field.clone());
                flat.push(value.clone());
            }
            resp::string_array(flat)
        }
        Ok(None) => responses::EMPTY_ARRAY.to_vec(),
        Err(_) => responses::WRONGTYPE.to_vec(),
    }
}
