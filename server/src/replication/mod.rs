/*
 * Created on Thu Feb 22 2024
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

//! # Replication
//!
//! The primary side keeps a dynamic set of replica writers; every
//! mutating command is fanned out to them in execution order, and
//! durability is conveyed separately through `REPLCONF ACK`s. The
//! replica side performs the startup handshake against its master,
//! loads the bulk snapshot the master sends, and then treats the
//! master link as just another connection whose commands it applies.

use crate::coredb::CoreDB;
use crate::diskstore::rdb;
use crate::util::error::{Error, SrvResult};
use crate::util::unix_now;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// The replication id this primary hands out in `FULLRESYNC`
pub const REPLICATION_ID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";
/// The `REPLCONF GETACK *` frame broadcast by `WAIT`
pub const GETACK_FRAME: &[u8] = b"*3\r\n$8\r\nREPLCONF\r\n$6\r\nGETACK\r\n$1\r\n*\r\n";
/// How long a replica writer may refuse a frame before being dropped
const REPLICA_SEND_BUDGET: Duration = Duration::from_millis(100);

/// A write handle onto one replica connection. Frames go through the
/// connection's outbound queue, so propagation never blocks on the
/// replica's socket
#[derive(Debug, Clone)]
pub struct ReplicaHandle {
    addr: SocketAddr,
    sender: mpsc::Sender<Vec<u8>>,
}

impl ReplicaHandle {
    pub fn new(addr: SocketAddr, sender: mpsc::Sender<Vec<u8>>) -> Self {
        ReplicaHandle { addr, sender }
    }
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
    /// Queue a frame for this replica. Returns false if the replica
    /// did not accept it within the send budget (caller drops it)
    pub async fn send(&self, frame: Vec<u8>) -> bool {
        self.sender
            .send_timeout(frame, REPLICA_SEND_BUDGET)
            .await
            .is_ok()
    }
}

/// The set of registered replica writers
#[derive(Debug, Default)]
pub struct ReplicaSet {
    writers: Vec<ReplicaHandle>,
}

impl ReplicaSet {
    pub fn new() -> Self {
        Self::default()
    }
    /// Register a writer; re-registration from the same peer replaces
    /// the stale handle
    pub fn register(&mut self, handle: ReplicaHandle) {
        self.writers.retain(|w| w.addr != handle.addr);
        self.writers.push(handle);
    }
    pub fn unregister(&mut self, addr: SocketAddr) {
        self.writers.retain(|w| w.addr != addr);
    }
    pub fn len(&self) -> usize {
        self.writers.len()
    }
    pub fn handles(&self) -> Vec<ReplicaHandle> {
        self.writers.clone()
    }
}

/// The replica side of the link during the handshake: a plain stream
/// plus a buffer, since the master's response boundaries don't line up
/// with reads
struct MasterLink {
    stream: TcpStream,
    buf: BytesMut,
}

impl MasterLink {
    async fn send(&mut self, frame: &[u8]) -> SrvResult<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
    /// Read one CRLF-terminated line, consuming it from the buffer
    async fn read_line(&mut self) -> SrvResult<String> {
        loop {
            if let Some(at) = self.buf.windows(2).position(|w| w == b"\r\n") {
                let line = String::from_utf8_lossy(&self.buf[..at]).into_owned();
                self.buf.advance(at + 2);
                return Ok(line);
            }
            if 0 == self.stream.read_buf(&mut self.buf).await? {
                return Err(Error::HandshakeError(
                    "master closed the connection".to_owned(),
                ));
            }
        }
    }
    async fn read_exact_bytes(&mut self, n: usize) -> SrvResult<Vec<u8>> {
        while self.buf.len() < n {
            if 0 == self.stream.read_buf(&mut self.buf).await? {
                return Err(Error::HandshakeError(
                    "master closed the connection mid-snapshot".to_owned(),
                ));
            }
        }
        let bytes = self.buf[..n].to_vec();
        self.buf.advance(n);
        Ok(bytes)
    }
    async fn expect(&mut self, wanted: &str, stage: &str) -> SrvResult<()> {
        let line = self.read_line().await?;
        if line == wanted {
            Ok(())
        } else {
            Err(Error::HandshakeError(format!(
                "{stage}: expected '{wanted}', got '{line}'"
            )))
        }
    }
}

/// Run the replica-side handshake and bulk load:
///
/// 1. `PING` → `+PONG`
/// 2. `REPLCONF listening-port <port>` → `+OK`
/// 3. `REPLCONF capa psync2` → `+OK`
/// 4. `PSYNC ? -1` → `+FULLRESYNC <replid> <offset>` followed by a
///    `$<len>`-framed snapshot (no trailing CRLF), which is installed
///    into the keyspace
///
/// On success the stream (plus any bytes the master already pipelined
/// behind the snapshot) is returned; the caller turns it into the
/// upstream-master connection and enters the normal command loop
pub async fn bootstrap(
    db: &CoreDB,
    host: &str,
    port: u16,
    listening_port: u16,
) -> SrvResult<(TcpStream, BytesMut)> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::ioerror_extra(e, format!("connecting to master {host}:{port}")))?;
    let mut link = MasterLink {
        stream,
        buf: BytesMut::with_capacity(8 * 1024),
    };
    link.send(b"*1\r\n$4\r\nPING\r\n").await?;
    link.expect("+PONG", "PING").await?;

    let port_arg = listening_port.to_string();
    link.send(
        format!(
            "*3\r\n$8\r\nREPLCONF\r\n$14\r\nlistening-port\r\n${}\r\n{}\r\n",
            port_arg.len(),
            port_arg
        )
        .as_bytes(),
    )
    .await?;
    link.expect("+OK", "REPLCONF listening-port").await?;

    link.send(b"*3\r\n$8\r\nREPLCONF\r\n$4\r\ncapa\r\n$6\r\npsync2\r\n")
        .await?;
    link.expect("+OK", "REPLCONF capa").await?;

    link.send(b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n")
        .await?;
    let resync = link.read_line().await?;
    if !resync.starts_with("+FULLRESYNC") {
        return Err(Error::HandshakeError(format!(
            "PSYNC: expected '+FULLRESYNC …', got '{resync}'"
        )));
    }

    let header = link.read_line().await?;
    let len = header
        .strip_prefix('$')
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| {
            Error::HandshakeError(format!("bad snapshot header '{header}' from master"))
        })?;
    let payload = link.read_exact_bytes(len).await?;
    let snapshot = rdb::deserialize(&payload, unix_now())?;
    log::info!(
        "Loaded master snapshot: {} keys, {} streams",
        snapshot.map.len(),
        snapshot.streams.len()
    );
    db.install(snapshot);
    Ok((link.stream, link.buf))
}

/// The primary's reply to `PSYNC ? -1`: the FULLRESYNC banner followed
/// by a bulk-string framed snapshot of the live keyspace
pub fn full_resync_frame(db: &CoreDB) -> Vec<u8> {
    let image = rdb::serialize(&db.snapshot());
    let mut frame = format!("+FULLRESYNC {} 0\r\n", REPLICATION_ID).into_bytes();
    frame.extend_from_slice(format!("${}\r\n", image.len()).as_bytes());
    frame.extend_from_slice(&image);
    frame
}
