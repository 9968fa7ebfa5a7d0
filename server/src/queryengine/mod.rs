/*
 * Created on Mon Mar 04 2024
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

//! # The query engine
//!
//! Case-insensitive dispatch from command name to handler. After a
//! mutating command succeeds, the original frame is propagated to
//! every registered replica (in execution order) and the dirty counter
//! advances; errored commands propagate nothing.

use crate::actions::{
    hashes, keyspace, lists, persistence, replication, server, sets, streams, strings, zsets,
};
use crate::coredb::CoreDB;
use crate::dbnet::connection::Connection;
use crate::protocol::responses;

/// Commands that mutate the store and therefore replicate and dirty
/// the keyspace
const WRITE_COMMANDS: &[&str] = &[
    "SET", "MSET", "APPEND", "INCR", "DECR", "INCRBY", "DECRBY", "DEL", "FLUSHALL", "LPUSH",
    "RPUSH", "LPUSHX", "RPUSHX", "LPOP", "RPOP", "LSET", "LINSERT", "HSET", "SADD", "SREM",
    "SPOP", "SMOVE", "ZADD", "ZREM", "XADD",
];

fn is_write(name: &str) -> bool {
    WRITE_COMMANDS.contains(&name)
}

/// Execute one already-parsed command and return its response frame.
/// An empty frame means "nothing to send" (some replication
/// bookkeeping commands answer silently)
pub async fn execute(db: &CoreDB, con: &mut Connection, args: &[String]) -> Vec<u8> {
    if args.is_empty() {
        return responses::ERR_UNKNOWN_COMMAND.to_vec();
    }
    let name = args[0].to_uppercase();
    let response = match name.as_str() {
        // server
        "PING" => server::ping(db, args),
        "ECHO" => server::echo(db, args),
        "INFO" => server::info(db, args),
        "CONFIG" => server::config(db, args),
        // keyspace
        "TYPE" => keyspace::type_cmd(db, args),
        "KEYS" => keyspace::keys(db, args),
        "DEL" => keyspace::del(db, args),
        "EXISTS" => keyspace::exists(db, args),
        "FLUSHALL" => keyspace::flushall(db, args),
        // strings
        "SET" => strings::set(db, args),
        "GET" => strings::get(db, args),
        "MSET" => strings::mset(db, args),
        "MGET" => strings::mget(db, args),
        "APPEND" => strings::append(db, args),
        "INCR" => strings::incr(db, args),
        "DECR" => strings::decr(db, args),
        "INCRBY" => strings::incrby(db, args),
        "DECRBY" => strings::decrby(db, args),
        // lists
        "LPUSH" => lists::lpush(db, args),
        "RPUSH" => lists::rpush(db, args),
        "LPUSHX" => lists::lpushx(db, args),
        "RPUSHX" => lists::rpushx(db, args),
        "LPOP" => lists::lpop(db, args),
        "RPOP" => lists::rpop(db, args),
        "LLEN" => lists::llen(db, args),
        "LRANGE" => lists::lrange(db, args),
        "LINDEX" => lists::lindex(db, args),
        "LSET" => lists::lset(db, args),
        "LINSERT" => lists::linsert(db, args),
        // hashes
        "HSET" => hashes::hset(db, args),
        "HGET" => hashes::hget(db, args),
        "HGETALL" => hashes::hgetall(db, args),
        // sets
        "SADD" => sets::sadd(db, args),
        "SMEMBERS" => sets::smembers(db, args),
        "SREM" => sets::srem(db, args),
        "SISMEMBER" => sets::sismember(db, args),
        "SCARD" => sets::scard(db, args),
        "SPOP" => sets::spop(db, args),
        "SUNION" => sets::sunion(db, args),
        "SINTER" => sets::sinter(db, args),
        "SDIFF" => sets::sdiff(db, args),
        "SMOVE" => sets::smove(db, args),
        // sorted sets
        "ZADD" => zsets::zadd(db, args),
        "ZREM" => zsets::zrem(db, args),
        "ZRANGE" => zsets::zrange(db, args),
        "ZRANGEBYSCORE" => zsets::zrangebyscore(db, args),
        "ZRANK" => zsets::zrank(db, args),
        "ZREVRANK" => zsets::zrevrank(db, args),
        "ZSCORE" => zsets::zscore(db, args),
        "ZCARD" => zsets::zcard(db, args),
        "ZCOUNT" => zsets::zcount(db, args),
        // streams
        "XADD" => streams::xadd(db, args),
        "XRANGE" => streams::xrange(db, args),
        "XREAD" => streams::xread(db, con, args).await,
        // replication
        "REPLCONF" => replication::replconf(db, con, args),
        "PSYNC" => replication::psync(db, args),
        "WAIT" => replication::wait(db, args).await,
        // persistence
        "SAVE" => persistence::save(db, args),
        "BGSAVE" => persistence::bgsave(db, args),
        "LASTSAVE" => persistence::lastsave(db, args),
        _ => responses::ERR_UNKNOWN_COMMAND.to_vec(),
    };
    if is_write(&name) && !response.starts_with(b"-") {
        db.propagate(args).await;
        db.register_change();
    }
    response
}
