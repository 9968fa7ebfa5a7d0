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

//! # Command handlers
//!
//! One module per command family. Every handler takes the database
//! handle and the parsed argument vector (name included) and returns a
//! complete response frame; the few that can suspend (blocking reads,
//! `WAIT`) additionally take the connection. Handlers validate before
//! they mutate: an error response always means the store is untouched.

pub mod hashes;
pub mod keyspace;
pub mod lists;
pub mod persistence;
pub mod replication;
pub mod server;
pub mod sets;
pub mod strings;
pub mod streams;
pub mod zsets;

use crate::resp;

/// The standard wrong-arity error for `cmd`
pub fn wrong_arity(cmd: &str) -> Vec<u8> {
    resp::error(&format!(
        "ERR wrong number of arguments for '{}' command",
        cmd.to_lowercase()
    ))
}

/// Arity guard: at least `min` arguments (name included)
macro_rules! ensure_min_arity {
    ($args:expr, $min:expr) => {
        if $args.len() < $min {
            return $crate::actions::wrong_arity(&$args[0]);
        }
    };
}

/// Arity guard: exactly `n` arguments (name included)
macro_rules! ensure_arity {
    ($args:expr, $n:expr) => {
        if $args.len() != $n {
            return $crate::actions::wrong_arity(&$args[0]);
        }
    };
}

pub(crate) use ensure_arity;
pub(crate) use ensure_min_arity;
