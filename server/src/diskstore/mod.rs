/*
 * Created on Sun Feb 18 2024
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

//! This module provides tools for handling persistently stored data

pub mod rdb;

use crate::coredb::CoreDB;
use crate::util::error::{Error, SrvResult};
use crate::util::unix_now;
use rdb::Snapshot;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Try to read a snapshot from `path`. Returns `None` if there's no
/// file there yet; a present-but-unreadable file is an error
pub fn try_load(path: &Path) -> SrvResult<Option<Snapshot>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::ioerror_extra(e, format!("reading {}", path.display()))),
    };
    let snapshot = rdb::deserialize(&bytes, unix_now())?;
    Ok(Some(snapshot))
}

/// Serialize `snapshot` and move it into place. The write goes to a
/// temporary file next to the target which is then renamed over it, so
/// a crash mid-write leaves the previous snapshot intact
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> SrvResult<()> {
    let bytes = rdb::serialize(snapshot);
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dump.rdb".to_owned());
    tmp.set_file_name(format!("__cinnabar_{}.tmp", file_name));
    fs::write(&tmp, &bytes)
        .map_err(|e| Error::ioerror_extra(e, format!("writing {}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| Error::ioerror_extra(e, format!("renaming into {}", path.display())))?;
    Ok(())
}

/// Take a point-in-time copy of the live store and flush it to the
/// configured snapshot location. Used by `SAVE`, the background save
/// paths and the shutdown flush
pub fn flush_db(db: &CoreDB) -> SrvResult<()> {
    let path = db.read_config().snapshot_path();
    let snapshot = db.snapshot();
    write_snapshot(&path, &snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coredb::Value;
    use rand::Rng;
    use std::env;

    fn scratch_dir() -> std::path::PathBuf {
        let mut dir = env::temp_dir();
        let tag: u32 = rand::thread_rng().gen();
        dir.push(format!("cinnabar-diskstore-test-{:08x}", tag));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = scratch_dir();
        assert!(try_load(&dir.join("nothing.rdb")).unwrap().is_none());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_then_load() {
        let dir = scratch_dir();
        let path = dir.join("data.rdb");
        let mut snapshot = Snapshot::default();
        snapshot
            .map
            .insert("k".to_owned(), Value::Str("v".to_owned()));
        write_snapshot(&path, &snapshot).unwrap();
        // the temp file must not linger
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
        let loaded = try_load(&path).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        fs::remove_dir_all(&dir).unwrap();
    }
}
