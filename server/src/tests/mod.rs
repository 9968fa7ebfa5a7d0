/*
 * Created on Tue Mar 05 2024
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

//! End-to-end scenarios over real sockets: a server on an ephemeral
//! port, raw TCP clients, byte-exact response assertions.

use crate::config::ServerConfig;
use crate::coredb::CoreDB;
use crate::dbnet::{self, Listener};
use crate::protocol::encode_command;
use crate::replication::ReplicaHandle;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn server_config(port: u16, master: Option<(String, u16)>, dir: &str, dbfilename: &str) -> ServerConfig {
    ServerConfig {
        host: LOCALHOST,
        port,
        master,
        dir: dir.to_owned(),
        dbfilename: dbfilename.to_owned(),
    }
}

/// A store plus a listener on an ephemeral port; the accept loop runs
/// in its own task until the test runtime tears it down
async fn spawn_store() -> (CoreDB, SocketAddr) {
    let cfg = server_config(0, None, "", "");
    let db = CoreDB::new(&cfg);
    let (signal, _) = broadcast::channel(1);
    let mut server = Listener::init(&db, LOCALHOST, 0, 64, signal.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (db, addr)
}

/// Grab a port the OS considers free right now
async fn free_port() -> u16 {
    TcpListener::bind((LOCALHOST, 0))
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Run the whole server (snapshot restore, replica bootstrap and all)
/// until the returned sender fires
async fn spawn_full_server(cfg: ServerConfig) -> (SocketAddr, oneshot::Sender<()>) {
    let addr = SocketAddr::new(cfg.host, cfg.port);
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        if let Err(e) = dbnet::run(cfg, rx).await {
            panic!("server failed to start: {}", e);
        }
    });
    // wait for the port to accept
    for _ in 0..200 {
        if TcpStream::connect(addr).await.is_ok() {
            return (addr, tx);
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server at {} never came up", addr);
}

struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        TestClient {
            stream: TcpStream::connect(addr).await.unwrap(),
        }
    }
    async fn send(&mut self, args: &[&str]) {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.stream.write_all(&encode_command(&args)).await.unwrap();
        self.stream.flush().await.unwrap();
    }
    async fn read_exactly(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        time::timeout(Duration::from_secs(3), self.stream.read_exact(&mut buf))
            .await
            .expect("timed out waiting for response")
            .unwrap();
        buf
    }
    /// Send a command and assert the byte-exact response
    async fn assert_cmd(&mut self, args: &[&str], expected: &[u8]) {
        self.send(args).await;
        let got = self.read_exactly(expected.len()).await;
        assert_eq!(
            got,
            expected,
            "for {:?}: got {:?}, wanted {:?}",
            args,
            String::from_utf8_lossy(&got),
            String::from_utf8_lossy(expected)
        );
    }
}

fn scratch_dir() -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    let tag: u32 = rand::thread_rng().gen();
    dir.push(format!("cinnabar-e2e-{:08x}", tag));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn test_set_get_with_ttl() {
    let (_db, addr) = spawn_store().await;
    let mut con = TestClient::connect(addr).await;
    con.assert_cmd(&["SET", "foo", "bar", "PX", "100"], b"+OK\r\n")
        .await;
    con.assert_cmd(&["GET", "foo"], b"$3\r\nbar\r\n").await;
    time::sleep(Duration::from_millis(150)).await;
    con.assert_cmd(&["GET", "foo"], b"$-1\r\n").await;
}

#[tokio::test]
async fn test_list_semantics() {
    let (_db, addr) = spawn_store().await;
    let mut con = TestClient::connect(addr).await;
    con.assert_cmd(&["RPUSH", "L", "a", "b", "c"], b":3\r\n").await;
    con.assert_cmd(
        &["LRANGE", "L", "0", "-1"],
        b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
    )
    .await;
    con.assert_cmd(&["LPOP", "L"], b"$1\r\na\r\n").await;
    con.assert_cmd(&["LRANGE", "L", "0", "-1"], b"*2\r\n$1\r\nb\r\n$1\r\nc\r\n")
        .await;
}

#[tokio::test]
async fn test_zadd_option_bag() {
    let (_db, addr) = spawn_store().await;
    let mut con = TestClient::connect(addr).await;
    con.assert_cmd(&["ZADD", "z", "1", "a", "2", "b", "3", "c"], b":3\r\n")
        .await;
    con.assert_cmd(&["ZADD", "z", "XX", "10", "d"], b":0\r\n").await;
    con.assert_cmd(&["ZADD", "z", "GT", "0", "a"], b":0\r\n").await;
    con.assert_cmd(
        &["ZRANGE", "z", "0", "-1"],
        b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_stream_ids_and_ranges() {
    let (_db, addr) = spawn_store().await;
    let mut con = TestClient::connect(addr).await;
    con.assert_cmd(&["XADD", "s", "1-1", "f", "v"], b"$3\r\n1-1\r\n")
        .await;
    con.assert_cmd(
        &["XADD", "s", "1-1", "f", "v2"],
        b"-ERR The ID specified in XADD is equal or smaller than the target stream top item\r\n",
    )
    .await;
    con.assert_cmd(&["XADD", "s", "1-2", "f", "v2"], b"$3\r\n1-2\r\n")
        .await;
    con.assert_cmd(
        &["XRANGE", "s", "-", "+"],
        b"*2\r\n\
          *2\r\n$3\r\n1-1\r\n*2\r\n$1\r\nf\r\n$1\r\nv\r\n\
          *2\r\n$3\r\n1-2\r\n*2\r\n$1\r\nf\r\n$2\r\nv2\r\n",
    )
    .await;
}

#[tokio::test]
async fn test_blocking_xread_wakes_on_xadd() {
    let (_db, addr) = spawn_store().await;
    let mut reader = TestClient::connect(addr).await;
    let mut writer = TestClient::connect(addr).await;
    reader
        .send(&["XREAD", "BLOCK", "0", "STREAMS", "s", "$"])
        .await;
    // give the reader a moment to park
    time::sleep(Duration::from_millis(100)).await;
    writer
        .assert_cmd(&["XADD", "s", "7-1", "f", "v"], b"$3\r\n7-1\r\n")
        .await;
    let expected: &[u8] =
        b"*1\r\n*2\r\n$1\r\ns\r\n*1\r\n*2\r\n$3\r\n7-1\r\n*2\r\n$1\r\nf\r\n$1\r\nv\r\n";
    let got = reader.read_exactly(expected.len()).await;
    assert_eq!(got, expected);
}

#[tokio::test]
async fn test_wait_with_no_replicas() {
    let (_db, addr) = spawn_store().await;
    let mut con = TestClient::connect(addr).await;
    con.assert_cmd(&["SET", "x", "1"], b"+OK\r\n").await;
    con.assert_cmd(&["WAIT", "1", "100"], b":0\r\n").await;
}

#[tokio::test]
async fn test_wrongtype_guard() {
    let (_db, addr) = spawn_store().await;
    let mut con = TestClient::connect(addr).await;
    con.assert_cmd(&["SET", "k", "s"], b"+OK\r\n").await;
    con.assert_cmd(
        &["LPUSH", "k", "v"],
        b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n",
    )
    .await;
    con.assert_cmd(&["GET", "k"], b"$1\r\ns\r\n").await;
}

#[tokio::test]
async fn test_pipelined_batch_equals_sequential() {
    let (_db, addr) = spawn_store().await;
    let mut con = TestClient::connect(addr).await;
    // one write carrying three frames
    let mut batch = Vec::new();
    for args in [
        vec!["SET", "a", "1"],
        vec!["INCR", "a"],
        vec!["APPEND", "b", "xy"],
    ] {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        batch.extend_from_slice(&encode_command(&args));
    }
    con.stream.write_all(&batch).await.unwrap();
    con.stream.flush().await.unwrap();
    let expected = b"+OK\r\n:2\r\n:2\r\n";
    let got = con.read_exactly(expected.len()).await;
    assert_eq!(got, expected.to_vec());
    con.assert_cmd(&["GET", "a"], b"$1\r\n2\r\n").await;
    con.assert_cmd(&["GET", "b"], b"$2\r\nxy\r\n").await;
}

#[tokio::test]
async fn test_propagation_is_byte_identical() {
    let (db, addr) = spawn_store().await;
    let (tx, mut rx) = mpsc::channel(16);
    db.register_replica(ReplicaHandle::new("127.0.0.1:9999".parse().unwrap(), tx));
    let mut con = TestClient::connect(addr).await;
    con.assert_cmd(&["SET", "k", "v"], b"+OK\r\n").await;
    con.assert_cmd(&["LPUSH", "L", "a"], b":1\r\n").await;
    // reads must not propagate
    con.assert_cmd(&["GET", "k"], b"$1\r\nv\r\n").await;
    // errored writes must not propagate either
    con.assert_cmd(
        &["INCR", "k"],
        b"-ERR value is not an integer or out of range\r\n",
    )
    .await;
    let argv = |parts: &[&str]| -> Vec<String> { parts.iter().map(|s| s.to_string()).collect() };
    let first = time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, encode_command(&argv(&["SET", "k", "v"])));
    let second = time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, encode_command(&argv(&["LPUSH", "L", "a"])));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let dir = scratch_dir();
    let dirstr = dir.to_str().unwrap().to_owned();
    let port = free_port().await;
    let (addr, shutdown) =
        spawn_full_server(server_config(port, None, &dirstr, "dump.rdb")).await;
    {
        let mut con = TestClient::connect(addr).await;
        con.assert_cmd(&["SET", "s", "hello"], b"+OK\r\n").await;
        con.assert_cmd(&["RPUSH", "l", "a", "b"], b":2\r\n").await;
        con.assert_cmd(&["SADD", "st", "m"], b":1\r\n").await;
        con.assert_cmd(&["HSET", "h", "f", "v"], b"+OK\r\n").await;
        con.assert_cmd(&["ZADD", "z", "1.5", "m"], b":1\r\n").await;
        con.assert_cmd(&["SAVE"], b"+OK\r\n").await;
    }
    let _ = shutdown.send(());
    time::sleep(Duration::from_millis(100)).await;

    let port = free_port().await;
    let (addr, _shutdown) =
        spawn_full_server(server_config(port, None, &dirstr, "dump.rdb")).await;
    let mut con = TestClient::connect(addr).await;
    con.assert_cmd(&["GET", "s"], b"$5\r\nhello\r\n").await;
    con.assert_cmd(&["LRANGE", "l", "0", "-1"], b"*2\r\n$1\r\na\r\n$1\r\nb\r\n")
        .await;
    con.assert_cmd(&["SISMEMBER", "st", "m"], b":1\r\n").await;
    con.assert_cmd(&["HGET", "h", "f"], b"$1\r\nv\r\n").await;
    con.assert_cmd(&["ZSCORE", "z", "m"], b"$3\r\n1.5\r\n").await;
    // a load stamps the last-save time
    con.send(&["LASTSAVE"]).await;
    let got = con.read_exactly(1).await;
    assert_eq!(got, b":");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_full_replication_loop() {
    let master_port = free_port().await;
    let (master_addr, _m_shutdown) =
        spawn_full_server(server_config(master_port, None, "", "")).await;
    {
        // seed the master so the bulk snapshot carries data
        let mut con = TestClient::connect(master_addr).await;
        con.assert_cmd(&["SET", "seeded", "yes"], b"+OK\r\n").await;
    }
    let replica_port = free_port().await;
    let (replica_addr, _r_shutdown) = spawn_full_server(server_config(
        replica_port,
        Some(("127.0.0.1".to_owned(), master_port)),
        "",
        "",
    ))
    .await;

    // the bootstrap snapshot made it over
    let mut rcon = TestClient::connect(replica_addr).await;
    rcon.assert_cmd(&["GET", "seeded"], b"$3\r\nyes\r\n").await;
    rcon.assert_cmd(&["INFO", "replication"], b"+role:slave\r\n")
        .await;

    // live propagation: a write on the master shows up on the replica
    let mut mcon = TestClient::connect(master_addr).await;
    mcon.assert_cmd(&["SET", "x", "42"], b"+OK\r\n").await;
    let mut seen = false;
    for _ in 0..100 {
        rcon.send(&["GET", "x"]).await;
        let got = rcon.read_exactly(4).await;
        if got == b"$2\r\n" {
            assert_eq!(rcon.read_exactly(4).await, b"42\r\n");
            seen = true;
            break;
        }
        assert_eq!(got, b"$-1\r\n"[..4].to_vec());
        // drain the final byte of the null bulk
        rcon.read_exactly(1).await;
        time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen, "write never reached the replica");

    // WAIT sees the replica's acknowledgement
    mcon.send(&["WAIT", "1", "2000"]).await;
    let got = mcon.read_exactly(4).await;
    assert_eq!(got, b":1\r\n");
}
