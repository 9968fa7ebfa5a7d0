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

//! Background services

use crate::actions::persistence;
use crate::coredb::CoreDB;
use crate::dbnet::Terminator;
use crate::util::unix_now;
use std::time::Duration;
use tokio::time;

/// How often the auto-save rules are evaluated
const AUTOSAVE_POLL: Duration = Duration::from_secs(1);

/// The auto-save scheduler: once a second, check every `(seconds,
/// changes)` rule from the `save` configuration and kick off a
/// background save when one is satisfied. The elapsed-time baseline is
/// the last successful save, or process start before the first one
pub async fn autosave_scheduler(db: CoreDB, mut terminator: Terminator) {
    let started = unix_now();
    loop {
        tokio::select! {
            _ = time::sleep(AUTOSAVE_POLL) => {
                let rules = db.read_config().save_rules.clone();
                if rules.is_empty() {
                    continue;
                }
                let dirty = db.dirty_count();
                if dirty == 0 {
                    continue;
                }
                let baseline = match db.last_save() {
                    0 => started,
                    at => at as f64,
                };
                let elapsed = unix_now() - baseline;
                if rules
                    .iter()
                    .any(|rule| elapsed >= rule.seconds as f64 && dirty >= rule.changes)
                {
                    log::info!(
                        "Auto-save: {} changes in {:.0}s, starting background save",
                        dirty,
                        elapsed
                    );
                    persistence::spawn_background_save(&db);
                }
            }
            _ = terminator.receive_signal() => {
                // we got a notification to quit; so break out
                break;
            }
        }
    }
    log::info!("Auto-save service has exited");
}
