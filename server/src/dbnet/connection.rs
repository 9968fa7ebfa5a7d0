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

//! The per-connection state: a buffered read half, an outbound queue
//! drained by a dedicated writer task, the replication offset, and the
//! replica-vs-client classification.
//!
//! The split write half matters: a registered replica receives
//! propagated commands from *other* connections' handlers, so writes
//! must go through a shareable queue rather than the handler's own
//! borrow of the socket. The queue is bounded, and propagation drops
//! replicas that keep it full, so a stuck replica can't wedge anyone
//! else.

use crate::protocol::{self, ParseResult, Query};
use crate::util::IoResult;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// The size of the read buffer in bytes
const BUF_CAP: usize = 8 * 1024;
/// Depth of the outbound frame queue
const OUTBOX_DEPTH: usize = 1024;

/// Result of [`Connection::read_query`]
#[derive(Debug)]
pub enum QueryResult {
    /// A decoded command and the exact byte length of its frame
    Q((Query, usize)),
    /// The client disconnected
    Disconnected,
}

pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    outbox: mpsc::Sender<Vec<u8>>,
    peer: SocketAddr,
    /// running byte count of commands consumed on this connection
    pub offset: u64,
    /// whether this is the upstream-master link on a replica
    master_link: bool,
    closed: bool,
}

impl Connection {
    /// Wrap an accepted (or dialled) stream. `initial` carries bytes
    /// that arrived before the connection entered the command loop
    /// (the replica handshake can over-read), and `master_link` marks
    /// the upstream-master connection on a replica
    pub fn new(stream: TcpStream, initial: BytesMut, master_link: bool) -> Self {
        let peer = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let (read_half, write_half) = stream.into_split();
        let (outbox, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOX_DEPTH);
        tokio::spawn(async move {
            let mut stream = BufWriter::new(write_half);
            while let Some(frame) = rx.recv().await {
                if stream.write_all(&frame).await.is_err() {
                    break;
                }
                if stream.flush().await.is_err() {
                    break;
                }
            }
        });
        let mut buffer = BytesMut::with_capacity(BUF_CAP);
        if !initial.is_empty() {
            buffer.extend_from_slice(&initial);
        }
        Connection {
            reader: read_half,
            buffer,
            outbox,
            peer,
            offset: 0,
            master_link,
            closed: false,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
    pub const fn is_master_link(&self) -> bool {
        self.master_link
    }
    /// A clonable handle onto this connection's outbound queue, used
    /// to register it as a replica writer
    pub fn outbox_handle(&self) -> mpsc::Sender<Vec<u8>> {
        self.outbox.clone()
    }

    /// Read until a full frame is available. Malformed bytes are
    /// dropped and reading continues; a clean close (or one observed
    /// earlier by [`Connection::wait_eof`]) yields `Disconnected`
    pub async fn read_query(&mut self) -> IoResult<QueryResult> {
        loop {
            if self.closed {
                return Ok(QueryResult::Disconnected);
            }
            if !self.buffer.is_empty() {
                match protocol::parse(&self.buffer) {
                    ParseResult::Query(query, advance) => {
                        self.buffer.advance(advance);
                        return Ok(QueryResult::Q((query, advance)));
                    }
                    ParseResult::BadPacket => {
                        self.buffer.clear();
                    }
                    ParseResult::Incomplete => {}
                }
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return Ok(QueryResult::Disconnected);
            }
        }
    }

    /// Queue a response for transmission. Returns false when the peer
    /// is gone (writer task ended)
    pub async fn write_response(&mut self, response: Vec<u8>) -> bool {
        if self.outbox.send(response).await.is_err() {
            self.closed = true;
            return false;
        }
        true
    }

    /// Wait for the peer to hang up. Used by blocking commands so a
    /// disconnect aborts the wait immediately; bytes that arrive in
    /// the meantime (pipelined commands) are kept in the read buffer
    /// for the normal loop to pick up afterwards
    pub async fn wait_eof(&mut self) {
        loop {
            match self.reader.read_buf(&mut self.buffer).await {
                Ok(0) | Err(_) => {
                    self.closed = true;
                    return;
                }
                Ok(_) => {}
            }
        }
    }
}
