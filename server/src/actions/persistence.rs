/*
 * Created on Sun Mar 03 2024
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

//! `SAVE`, `BGSAVE` and `LASTSAVE`

use super::ensure_arity;
use crate::coredb::CoreDB;
use crate::diskstore;
use crate::protocol::responses;
use crate::resp;

/// `SAVE`: synchronous snapshot to the configured location
pub fn save(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 1);
    match diskstore::flush_db(db) {
        Ok(()) => {
            db.save_completed();
            responses::OK.to_vec()
        }
        Err(e) => resp::error(&format!("ERR Failed to save RDB file: {}", e)),
    }
}

/// `BGSAVE`: the command path takes the point-in-time copy, a
/// blocking worker does the file I/O, and the client is answered
/// immediately. Failures are logged, not reported back
pub fn bgsave(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 1);
    spawn_background_save(db);
    responses::BACKGROUND_SAVING_STARTED.to_vec()
}

/// Shared by `BGSAVE` and the auto-save scheduler. A second request
/// while one is in flight is a no-op
pub fn spawn_background_save(db: &CoreDB) {
    if !db.bgsave_begin() {
        log::info!("A background save is already in progress; skipping");
        return;
    }
    let snapshot = db.snapshot();
    let path = db.read_config().snapshot_path();
    let db = db.clone();
    tokio::spawn(async move {
        let outcome =
            tokio::task::spawn_blocking(move || diskstore::write_snapshot(&path, &snapshot)).await;
        match outcome {
            Ok(Ok(())) => {
                db.save_completed();
                log::info!("Background save completed successfully");
            }
            Ok(Err(e)) => log::error!("Background save failed: {}", e),
            Err(e) => log::error!("Background save worker panicked: {}", e),
        }
        db.bgsave_end();
    });
}

/// `LASTSAVE`: unix timestamp of the last successful save, 0 before
/// any save or load
pub fn lastsave(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 1);
    resp::integer(db.last_save() as i64)
}
