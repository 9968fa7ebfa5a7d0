/*
 * Created on Thu Feb 08 2024
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

//! # Pre-compiled responses
//!
//! The byte-exact response tokens of the protocol. Clients (and the
//! conformance suites that bang on them) compare these literally, so
//! they are kept in one place and written off to streams verbatim.

pub const OK: &[u8] = b"+OK\r\n";
pub const PONG: &[u8] = b"+PONG\r\n";
/// The null bulk string
pub const NULL_BULK: &[u8] = b"$-1\r\n";
/// The `nil` simple string used by the list and hash lookups
pub const NIL: &[u8] = b"+nil\r\n";
pub const EMPTY_ARRAY: &[u8] = b"*0\r\n";
pub const NONE: &[u8] = b"+none\r\n";
pub const WRONGTYPE: &[u8] =
    b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n";
pub const ERR_NOT_INT: &[u8] = b"-ERR value is not an integer or out of range\r\n";
pub const ERR_NOT_FLOAT: &[u8] = b"-ERR value is not a valid float\r\n";
pub const ERR_SYNTAX: &[u8] = b"-ERR syntax error\r\n";
pub const ERR_UNKNOWN_COMMAND: &[u8] = b"-ERR unknown command\r\n";
pub const ERR_UNKNOWN_INFO_SECTION: &[u8] = b"-ERR unknown INFO section\r\n";
pub const ERR_XADD_ID_ZERO: &[u8] =
    b"-ERR The ID specified in XADD must be greater than 0-0\r\n";
pub const ERR_XADD_ID_SMALL: &[u8] =
    b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n";
pub const BACKGROUND_SAVING_STARTED: &[u8] = b"+Background saving started\r\n";
/// The frame prefix of a `REPLCONF ACK` reply; on a master link only
/// responses with this prefix are transmitted
pub const REPLCONF_ACK_PREFIX: &[u8] = b"*3\r\n$8\r\nREPLCONF\r\n$3\r\nACK";
