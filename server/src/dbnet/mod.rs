/*
 * Created on Sat Feb 24 2024
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

//! # Database networking
//!
//! The listener, the per-connection handler loop and the server
//! orchestration. One spawned task per connection; the number of live
//! connections is bounded by a semaphore. Shutdown is a broadcast:
//! every handler and background service holds a receiver, and the
//! listener refuses to finish until the last of them has dropped its
//! end of the termination channel.

pub mod connection;
mod listener;

use crate::config::ServerConfig;
use crate::coredb::CoreDB;
use crate::diskstore;
use crate::protocol::responses;
use crate::queryengine;
use crate::replication;
use crate::util::error::SrvResult;
use crate::util::IoResult;
use connection::{Connection, QueryResult};
pub use listener::Listener;
use core::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};

pub const MAXIMUM_CONNECTION_LIMIT: usize = 50000;

/// A wrapper around the shutdown broadcast receiver that latches once
/// a signal has been observed
pub struct Terminator {
    terminate: bool,
    signal: broadcast::Receiver<()>,
}

impl Terminator {
    pub const fn new(signal: broadcast::Receiver<()>) -> Self {
        Terminator {
            terminate: false,
            signal,
        }
    }
    /// Resolves when the termination signal fires (or has fired)
    pub async fn receive_signal(&mut self) {
        if !self.terminate {
            let _ = self.signal.recv().await;
            self.terminate = true;
        }
    }
}

/// A per-connection handler: reads frames, runs them through the query
/// engine, writes responses per the connection's classification, and
/// keeps the replication offset current
pub struct ConnectionHandler {
    db: CoreDB,
    con: Connection,
    /// the semaphore used to impose limits on the number of connections
    climit: Arc<Semaphore>,
    /// check for termination signals
    termination_signal: broadcast::Receiver<()>,
    /// the sender we drop when we're done with this connection (used
    /// for graceful exit)
    _term_sig_tx: mpsc::Sender<()>,
}

impl ConnectionHandler {
    pub fn new(
        db: CoreDB,
        con: Connection,
        climit: Arc<Semaphore>,
        termination_signal: broadcast::Receiver<()>,
        _term_sig_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            db,
            con,
            climit,
            termination_signal,
            _term_sig_tx,
        }
    }

    pub async fn run(&mut self) -> IoResult<()> {
        loop {
            let packet = tokio::select! {
                pkt = self.con.read_query() => pkt,
                _ = self.termination_signal.recv() => {
                    return Ok(());
                }
            };
            match packet? {
                QueryResult::Q((query, advance)) => {
                    let response = queryengine::execute(&self.db, &mut self.con, &query).await;
                    if self.con.is_master_link() {
                        // on the upstream-master link only REPLCONF ACK
                        // replies go back; everything else is applied
                        // silently
                        if response.starts_with(responses::REPLCONF_ACK_PREFIX) {
                            self.con.write_response(response).await;
                        }
                    } else if !response.is_empty() && !self.con.write_response(response).await {
                        return Ok(());
                    }
                    self.con.offset += advance as u64;
                }
                QueryResult::Disconnected => return Ok(()),
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        // Make sure that the permit is returned to the semaphore
        // in the case that there is a panic inside
        self.climit.add_permits(1);
    }
}

/// Bring the server up and run it until `termsig` resolves (or the
/// listener dies). Returns the database handle so the caller can do
/// the final flush
pub async fn run(cfg: ServerConfig, termsig: impl Future) -> SrvResult<CoreDB> {
    let db = CoreDB::new(&cfg);

    // restore a snapshot when one was configured
    if db.read_config().has_explicit_snapshot() {
        let path = db.read_config().snapshot_path();
        match diskstore::try_load(&path)? {
            Some(snapshot) => {
                log::info!(
                    "Restored snapshot from {}: {} keys, {} streams",
                    path.display(),
                    snapshot.map.len(),
                    snapshot.streams.len()
                );
                db.install(snapshot);
                // a load counts as a save for the scheduler's baseline
                db.save_completed();
            }
            None => log::info!("No snapshot at {}; starting empty", path.display()),
        }
    }

    // Initialize the broadcast channel used to signal shutdown
    let (signal, _) = broadcast::channel(1);

    let autosave_handle = tokio::spawn(crate::services::autosave_scheduler(
        db.clone(),
        Terminator::new(signal.subscribe()),
    ));

    let mut server = Listener::init(
        &db,
        cfg.host,
        cfg.port,
        MAXIMUM_CONNECTION_LIMIT,
        signal.clone(),
    )
    .await?;

    // a replica performs its handshake before serving anything;
    // failure here is fatal
    if let Some((master_host, master_port)) = &cfg.master {
        let (stream, leftover) = replication::bootstrap(&db, master_host, *master_port, cfg.port).await?;
        let con = Connection::new(stream, leftover, true);
        server.attach(con);
        log::info!("Replicating from {}:{}", master_host, master_port);
    }

    tokio::select! {
        _ = server.run() => {}
        _ = termsig => {}
    }

    log::info!("Signalling all workers to shut down");
    // drop the signal and let others exit
    drop(signal);
    server.finish_with_termsig().await;
    let _ = autosave_handle.await;
    Ok(db)
}
