/*
 * Created on Mon Feb 05 2024
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

//! # Cinnabar
//!
//! The `cinnabard` crate is the Cinnabar database server: a
//! Redis-compatible in-memory key/value store speaking RESP over TCP,
//! with six value kinds, TTL-based expiry, snapshot persistence and
//! primary/replica replication. See the individual modules for their
//! respective documentation.

mod actions;
mod config;
mod coredb;
mod dbnet;
mod diskstore;
mod protocol;
mod queryengine;
mod replication;
mod resp;
mod services;
#[cfg(test)]
mod tests;
mod util;

use env_logger::Builder;
use std::env;
use std::process;
use std::thread;
use std::time;
use tokio::signal;

fn main() {
    Builder::new()
        .parse_filters(&env::var("CINNABAR_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();
    let cfg = match config::parse_cli() {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("Startup failure: {}", e);
            process::exit(0x100);
        }
    };
    // A single-threaded cooperative runtime: handlers only ever
    // interleave at await points, and the blocking pool still covers
    // the snapshot writers
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let db = match runtime.block_on(dbnet::run(cfg, signal::ctrl_c())) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Startup failure: {}", e);
            process::exit(0x100);
        }
    };
    // Make sure all workers terminate before the final flush
    drop(runtime);
    log::info!("Stopped accepting incoming connections");
    loop {
        // Keep looping until we successfully write the in-memory state
        // to disk
        match diskstore::flush_db(&db) {
            Ok(()) => {
                log::info!("Successfully saved data to disk");
                break;
            }
            Err(e) => {
                log::error!(
                    "Failed to write data with error '{}'. Attempting to retry in 10s",
                    e
                );
            }
        }
        thread::sleep(time::Duration::from_secs(10));
    }
    log::info!("Goodbye :)");
}
