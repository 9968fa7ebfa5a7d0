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

use super::connection::Connection;
use super::ConnectionHandler;
use crate::coredb::CoreDB;
use crate::util::error::{Error, SrvResult};
use crate::util::IoResult;
use bytes::BytesMut;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time;

/// A backoff implementation that is meant to be used in the accept loop
struct NetBackoff {
    c: AtomicU8,
}

impl NetBackoff {
    /// The maximum backoff duration
    const MAX_BACKOFF: u8 = 64;
    const fn new() -> Self {
        Self { c: AtomicU8::new(1) }
    }
    /// Wait for the current backoff duration
    async fn spin(&self) {
        let c = self.c.load(Ordering::Relaxed);
        time::sleep(Duration::from_secs(c as _)).await;
        self.c.store(c << 1, Ordering::Relaxed);
    }
    /// Should we give up on the socket?
    fn should_disconnect(&self) -> bool {
        self.c.load(Ordering::Relaxed) > Self::MAX_BACKOFF
    }
}

/// The TCP listener: accepts connections, classifies them and hands
/// them to spawned [`ConnectionHandler`]s
pub struct Listener {
    /// An atomic reference to the store
    db: CoreDB,
    /// The incoming connection listener (binding)
    listener: TcpListener,
    /// The maximum number of connections
    climit: Arc<Semaphore>,
    /// The shutdown broadcaster
    signal: broadcast::Sender<()>,
    // When all `Sender`s are dropped - the `Receiver` gets a `None`
    // value; we send a clone of `terminate_tx` to each handler
    terminate_tx: mpsc::Sender<()>,
    terminate_rx: mpsc::Receiver<()>,
}

impl Listener {
    pub async fn init(
        db: &CoreDB,
        host: IpAddr,
        port: u16,
        maxcon: usize,
        signal: broadcast::Sender<()>,
    ) -> SrvResult<Self> {
        let (terminate_tx, terminate_rx) = mpsc::channel(1);
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::ioerror_extra(e, format!("binding to port {port}")))?;
        log::info!("Server started on {host}:{port}");
        Ok(Self {
            db: db.clone(),
            listener,
            climit: Arc::new(Semaphore::new(maxcon)),
            signal,
            terminate_tx,
            terminate_rx,
        })
    }

    /// The address the listener actually bound (port 0 resolves here)
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Hand a ready-made connection (the upstream-master link) to its
    /// own handler task
    pub fn attach(&self, con: Connection) {
        if let Ok(permit) = self.climit.clone().try_acquire_owned() {
            permit.forget();
        }
        self.spawn_handler(con);
    }

    fn spawn_handler(&self, con: Connection) {
        let mut chandle = ConnectionHandler::new(
            self.db.clone(),
            con,
            self.climit.clone(),
            self.signal.subscribe(),
            self.terminate_tx.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = chandle.run().await {
                log::error!("Connection error: {}", e);
            }
        });
    }

    /// Accept an incoming connection, retrying with backoff on
    /// transient failures
    async fn accept(&mut self) -> IoResult<TcpStream> {
        let backoff = NetBackoff::new();
        loop {
            match self.listener.accept().await {
                // We don't need the bindaddr
                Ok((stream, _)) => return Ok(stream),
                Err(e) => {
                    if backoff.should_disconnect() {
                        // Too many retries, goodbye socket
                        return Err(e);
                    }
                }
            }
            // spin to wait for the backoff duration
            backoff.spin().await;
        }
    }

    /// Run the accept loop. Errors inside it are swallowed on purpose:
    /// an unlucky accept must not bring the whole server down
    pub async fn run(&mut self) -> IoResult<()> {
        let master_port = self.db.master_port();
        loop {
            // Take the permit first, but we won't use it right now,
            // that's why we will forget it
            if let Ok(permit) = self.climit.acquire().await {
                permit.forget();
            }
            let stream = match self.accept().await {
                Ok(stream) => stream,
                Err(e) => return Err(e),
            };
            let peer = stream.peer_addr();
            // on a replica, a connection from the master's port is the
            // upstream link: responses on it are suppressed except acks
            let is_master_link = match (&peer, master_port) {
                (Ok(addr), Some(port)) => addr.port() == port,
                _ => false,
            };
            log::info!(
                "Connected to {}",
                peer.map(|p| p.to_string()).unwrap_or_else(|_| "<unknown>".to_owned())
            );
            self.spawn_handler(Connection::new(stream, BytesMut::new(), is_master_link));
        }
    }

    /// Wait until every handler has dropped its terminate sender
    pub async fn finish_with_termsig(self) {
        let Self {
            mut terminate_rx,
            terminate_tx,
            signal,
            ..
        } = self;
        drop(signal);
        drop(terminate_tx);
        let _ = terminate_rx.recv().await;
    }
}
