/*
 * Created on Sat Mar 02 2024
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

//! The replication-facing commands: `REPLCONF`, `PSYNC` and `WAIT`

use super::ensure_arity;
use crate::coredb::CoreDB;
use crate::dbnet::connection::Connection;
use crate::protocol::{encode_command, responses};
use crate::replication::{full_resync_frame, ReplicaHandle, GETACK_FRAME};
use crate::resp;
use std::time::Duration;
use tokio::time::{self, Instant};

/// How often `WAIT` re-reads the ack counter
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// `REPLCONF` in its three roles:
///
/// - `listening-port <port>`: the peer is a replica; its writer joins
///   the replica set
/// - `GETACK *` (from the master): answered with `REPLCONF ACK
///   <offset>`, the only response a master link ever gets back
/// - `ACK <offset>` (from a replica): bumps the ack counter, no reply
///
/// Anything else (`capa …` included) is acknowledged with `+OK`
pub fn replconf(db: &CoreDB, con: &mut Connection, args: &[String]) -> Vec<u8> {
    if args.len() > 2 {
        if args[1].eq_ignore_ascii_case("listening-port") {
            db.register_replica(ReplicaHandle::new(con.peer_addr(), con.outbox_handle()));
            log::info!("Registered replica writer for {}", con.peer_addr());
        } else if args[1].eq_ignore_ascii_case("getack") {
            let offset = con.offset.to_string();
            return encode_command(&[
                "REPLCONF".to_owned(),
                "ACK".to_owned(),
                offset,
            ]);
        } else if args[1].eq_ignore_ascii_case("ack") {
            db.incr_numacks();
            return Vec::new();
        }
    }
    responses::OK.to_vec()
}

/// `PSYNC ? -1`: full resynchronisation: the FULLRESYNC banner plus a
/// bulk snapshot of the live keyspace. The fresh replica also counts
/// as an initial ack
pub fn psync(db: &CoreDB, _args: &[String]) -> Vec<u8> {
    db.incr_numacks();
    full_resync_frame(db)
}

/// `WAIT numreplicas timeout-ms`: ask every replica to acknowledge,
/// then poll the ack counter until enough arrive or the budget runs
/// out. Whatever count is visible at wake time is the answer
pub async fn wait(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 3);
    let (numreplicas, timeout_ms) = match (args[1].parse::<usize>(), args[2].parse::<u64>()) {
        (Ok(n), Ok(ms)) => (n, ms),
        _ => return responses::ERR_NOT_INT.to_vec(),
    };
    db.broadcast_to_replicas(GETACK_FRAME).await;
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while db.numacks() < numreplicas && Instant::now() < deadline {
        let left = deadline.saturating_duration_since(Instant::now());
        time::sleep(WAIT_POLL_INTERVAL.min(left)).await;
    }
    resp::integer(db.numacks() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testutil::{argv, testdb};
    use crate::replication::REPLICATION_ID;

    #[tokio::test]
    async fn test_wait_without_replicas() {
        let db = testdb();
        let started = Instant::now();
        assert_eq!(wait(&db, &argv(&["WAIT", "1", "100"])).await, b":0\r\n");
        assert!(started.elapsed() >= Duration::from_millis(100));
        // already-satisfied counts return without sleeping the budget
        db.incr_numacks();
        let started = Instant::now();
        assert_eq!(wait(&db, &argv(&["WAIT", "1", "5000"])).await, b":1\r\n");
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_psync_frames_a_snapshot() {
        let db = testdb();
        let frame = psync(&db, &argv(&["PSYNC", "?", "-1"]));
        let banner = format!("+FULLRESYNC {} 0\r\n", REPLICATION_ID);
        assert!(frame.starts_with(banner.as_bytes()));
        let rest = &frame[banner.len()..];
        assert!(rest.starts_with(b"$"));
        assert_eq!(db.numacks(), 1);
        // the payload is a parseable snapshot image
        let at = rest.windows(2).position(|w| w == b"\r\n").unwrap();
        let len: usize = std::str::from_utf8(&rest[1..at]).unwrap().parse().unwrap();
        let image = &rest[at + 2..];
        assert_eq!(image.len(), len);
        assert!(crate::diskstore::rdb::deserialize(image, 0.0).is_ok());
    }
}
