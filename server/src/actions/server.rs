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

//! Server-level commands: `PING`, `ECHO`, `INFO`, `CONFIG`

use super::{ensure_arity, ensure_min_arity};
use crate::coredb::{CoreDB, Role};
use crate::protocol::responses;
use crate::resp;
use rand::distributions::Alphanumeric;
use rand::Rng;

pub fn ping(_db: &CoreDB, _args: &[String]) -> Vec<u8> {
    responses::PONG.to_vec()
}

pub fn echo(_db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_arity!(args, 2);
    resp::simple(&args[1])
}

/// `INFO replication`: the role banner. Masters report a replication
/// id and offset; other sections aren't served
pub fn info(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 2);
    if !args[1].eq_ignore_ascii_case("replication") {
        return responses::ERR_UNKNOWN_INFO_SECTION.to_vec();
    }
    match db.role() {
        Role::Master => {
            let replid: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(40)
                .map(char::from)
                .collect();
            resp::bulk(&format!(
                "role:master\nmaster_replid:{}\nmaster_repl_offset:0",
                replid
            ))
        }
        Role::Replica { .. } => resp::simple("role:slave"),
    }
}

/// `CONFIG GET param [param]…` / `CONFIG SET param value`
pub fn config(db: &CoreDB, args: &[String]) -> Vec<u8> {
    ensure_min_arity!(args, 3);
    if args[1].eq_ignore_ascii_case("get") {
        let table = db.read_config();
        let mut reply = Vec::with_capacity((args.len() - 2) * 2);
        for param in &args[2..] {
            reply.push(param.clone());
            reply.push(table.get(param).unwrap_or_else(|| "(nil)".to_owned()));
        }
        return resp::string_array(reply);
    }
    if args[1].eq_ignore_ascii_case("set") {
        ensure_arity!(args, 4);
        if db.acquire_config().set(&args[2], &args[3]) {
            return responses::OK.to_vec();
        }
        return resp::error(&format!("ERR Unsupported CONFIG parameter: {}", args[2]));
    }
    responses::ERR_SYNTAX.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testutil::{argv, testdb};
    use crate::config::ServerConfig;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_ping_echo() {
        let db = testdb();
        assert_eq!(ping(&db, &argv(&["PING"])), b"+PONG\r\n");
        assert_eq!(echo(&db, &argv(&["ECHO", "hey"])), b"+hey\r\n");
    }

    #[test]
    fn test_info_roles() {
        let db = testdb();
        let reply = String::from_utf8(info(&db, &argv(&["INFO", "replication"]))).unwrap();
        assert!(reply.contains("role:master"));
        assert!(reply.contains("master_replid:"));
        assert!(reply.contains("master_repl_offset:0"));
        assert_eq!(
            info(&db, &argv(&["INFO", "keyspace"])),
            responses::ERR_UNKNOWN_INFO_SECTION
        );
        let replica = CoreDB::new(&ServerConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 6380,
            master: Some(("localhost".to_owned(), 6379)),
            dir: String::new(),
            dbfilename: String::new(),
        });
        assert_eq!(
            info(&replica, &argv(&["INFO", "replication"])),
            b"+role:slave\r\n"
        );
    }

    #[test]
    fn test_config_get_set() {
        let db = testdb();
        db.acquire_config().set("dir", "/tmp");
        assert_eq!(
            config(&db, &argv(&["CONFIG", "GET", "dir", "nope"])),
            b"*4\r\n$3\r\ndir\r\n$4\r\n/tmp\r\n$4\r\nnope\r\n$5\r\n(nil)\r\n"
        );
        assert_eq!(
            config(&db, &argv(&["CONFIG", "SET", "dbfilename", "x.rdb"])),
            b"+OK\r\n"
        );
        assert_eq!(db.read_config().dbfilename, "x.rdb");
        let reply = config(&db, &argv(&["CONFIG", "SET", "maxmemory", "1"]));
        assert!(reply.starts_with(b"-ERR Unsupported CONFIG parameter"));
    }
}
