/*
 * Created on Wed Feb 07 2024
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

//! # Server configuration
//!
//! This module owns everything that the server can be told at startup
//! (the command line) and everything that can be read or changed at
//! runtime through `CONFIG GET`/`CONFIG SET`: the snapshot directory,
//! the snapshot filename and the auto-save schedule.

use crate::util::error::{Error, SrvResult};
// external imports
use clap::{Arg, ArgAction, Command};
// std imports
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

// server defaults
const DEFAULT_IPV4: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
const DEFAULT_PORT: u16 = 6379;
// persistence defaults
const DEFAULT_DBFILENAME: &str = "dump.rdb";
/// The default auto-save schedule: the stock Redis `(seconds, changes)` triple
pub const DEFAULT_SAVE_SCHEDULE: &str = "900 1 300 10 60 10000";

/// Everything the process was told on its command line
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// the address to bind to
    pub host: IpAddr,
    /// the port to listen on
    pub port: u16,
    /// the master to replicate from, if this node is a replica
    pub master: Option<(String, u16)>,
    /// the snapshot directory (empty = current directory)
    pub dir: String,
    /// the snapshot filename (empty = the default)
    pub dbfilename: String,
}

impl ServerConfig {
    pub const fn is_replica(&self) -> bool {
        self.master.is_some()
    }
}

/// A single `(seconds, changes)` auto-save rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRule {
    pub seconds: u64,
    pub changes: u64,
}

/// The runtime-settable configuration table, surfaced through
/// `CONFIG GET`/`CONFIG SET`
#[derive(Debug, Clone)]
pub struct ConfigTable {
    pub dir: String,
    pub dbfilename: String,
    /// the raw `save` string, kept verbatim so `CONFIG GET save`
    /// returns what was set
    pub save: String,
    /// the parsed form of `save`
    pub save_rules: Vec<SaveRule>,
}

impl ConfigTable {
    pub fn new(dir: String, dbfilename: String) -> Self {
        ConfigTable {
            dir,
            dbfilename,
            save: DEFAULT_SAVE_SCHEDULE.to_owned(),
            save_rules: parse_save_rules(DEFAULT_SAVE_SCHEDULE),
        }
    }
    /// Look up a parameter by name, returning its current value
    pub fn get(&self, param: &str) -> Option<String> {
        match param {
            "dir" => Some(self.dir.clone()),
            "dbfilename" => Some(self.dbfilename.clone()),
            "save" => Some(self.save.clone()),
            _ => None,
        }
    }
    /// Update a parameter. Returns false for parameters that don't exist
    pub fn set(&mut self, param: &str, value: &str) -> bool {
        match param {
            "dir" => self.dir = value.to_owned(),
            "dbfilename" => self.dbfilename = value.to_owned(),
            "save" => {
                self.save = value.to_owned();
                self.save_rules = parse_save_rules(value);
            }
            _ => return false,
        }
        true
    }
    /// The resolved snapshot path. An unset directory means the current
    /// directory and an unset filename means `dump.rdb`
    pub fn snapshot_path(&self) -> PathBuf {
        let dir = if self.dir.is_empty() { "." } else { &self.dir };
        let file = if self.dbfilename.is_empty() {
            DEFAULT_DBFILENAME
        } else {
            &self.dbfilename
        };
        PathBuf::from(dir).join(file)
    }
    /// Whether a snapshot location was configured explicitly (used to
    /// decide whether to restore a snapshot at startup)
    pub fn has_explicit_snapshot(&self) -> bool {
        !self.dir.is_empty() && !self.dbfilename.is_empty()
    }
}

/// Parse a space-separated `seconds changes [seconds changes]…` string.
/// An odd number of tokens or an unparseable token disables auto-save
/// with a warning, exactly like a bad `save` directive would
pub fn parse_save_rules(save: &str) -> Vec<SaveRule> {
    let tokens: Vec<&str> = save.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    if tokens.len() % 2 != 0 {
        log::warn!("Invalid save configuration: '{}'", save);
        return Vec::new();
    }
    let mut rules = Vec::with_capacity(tokens.len() / 2);
    for pair in tokens.chunks(2) {
        match (pair[0].parse::<u64>(), pair[1].parse::<u64>()) {
            (Ok(seconds), Ok(changes)) => rules.push(SaveRule { seconds, changes }),
            _ => {
                log::warn!("Invalid save configuration: '{}'", save);
                return Vec::new();
            }
        }
    }
    rules
}

/// Parse a `"<host> <port>"` replicaof argument
fn parse_replicaof(arg: &str) -> SrvResult<(String, u16)> {
    let parts: Vec<&str> = arg.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(Error::ConfigError(format!(
            "invalid --replicaof argument '{}': expected \"<host> <port>\"",
            arg
        )));
    }
    let port = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::ConfigError(format!("invalid master port '{}'", parts[1])))?;
    Ok((parts[0].to_owned(), port))
}

fn cli() -> Command {
    Command::new("cinnabard")
        .about("The Cinnabar database server")
        .disable_version_flag(true)
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .help("The port to listen on")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("replicaof")
                .long("replicaof")
                .value_name("HOST PORT")
                .help("Run as a replica of the given master")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("dir")
                .long("dir")
                .value_name("PATH")
                .help("The directory the snapshot file lives in")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("dbfilename")
                .long("dbfilename")
                .value_name("NAME")
                .help("The snapshot filename")
                .action(ArgAction::Set),
        )
}

/// Parse the process command line into a [`ServerConfig`]
pub fn parse_cli() -> SrvResult<ServerConfig> {
    let matches = cli().get_matches();
    from_matches(&matches)
}

fn from_matches(matches: &clap::ArgMatches) -> SrvResult<ServerConfig> {
    let port = match matches.get_one::<String>("port") {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| Error::ConfigError(format!("invalid port '{}'", p)))?,
        None => DEFAULT_PORT,
    };
    let master = match matches.get_one::<String>("replicaof") {
        Some(arg) => Some(parse_replicaof(arg)?),
        None => None,
    };
    Ok(ServerConfig {
        host: DEFAULT_IPV4,
        port,
        master,
        dir: matches
            .get_one::<String>("dir")
            .cloned()
            .unwrap_or_default(),
        dbfilename: matches
            .get_one::<String>("dbfilename")
            .cloned()
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_rule_parsing() {
        assert_eq!(
            parse_save_rules("900 1 300 10 60 10000"),
            vec![
                SaveRule {
                    seconds: 900,
                    changes: 1
                },
                SaveRule {
                    seconds: 300,
                    changes: 10
                },
                SaveRule {
                    seconds: 60,
                    changes: 10000
                },
            ]
        );
        assert_eq!(parse_save_rules(""), Vec::new());
        // odd token counts disable the schedule
        assert_eq!(parse_save_rules("900 1 300"), Vec::new());
        // as do unparseable tokens
        assert_eq!(parse_save_rules("900 one"), Vec::new());
    }

    #[test]
    fn test_replicaof_parsing() {
        assert_eq!(
            parse_replicaof("localhost 6379").unwrap(),
            ("localhost".to_owned(), 6379)
        );
        assert!(parse_replicaof("localhost").is_err());
        assert!(parse_replicaof("localhost sixthousand").is_err());
    }

    #[test]
    fn test_config_table() {
        let mut table = ConfigTable::new(String::new(), String::new());
        assert_eq!(table.get("save").unwrap(), DEFAULT_SAVE_SCHEDULE);
        assert_eq!(table.get("maxmemory"), None);
        assert!(table.set("dir", "/tmp/data"));
        assert!(table.set("dbfilename", "db.rdb"));
        assert!(!table.set("appendonly", "yes"));
        assert_eq!(table.snapshot_path(), PathBuf::from("/tmp/data/db.rdb"));
        assert!(table.has_explicit_snapshot());
        assert!(table.set("save", "60 5"));
        assert_eq!(
            table.save_rules,
            vec![SaveRule {
                seconds: 60,
                changes: 5
            }]
        );
    }

    #[test]
    fn test_cli_args() {
        let matches = cli().get_matches_from(vec![
            "cinnabard",
            "--port",
            "7000",
            "--replicaof",
            "127.0.0.1 6379",
            "--dir",
            "/tmp",
            "--dbfilename",
            "x.rdb",
        ]);
        let cfg = from_matches(&matches).unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.master, Some(("127.0.0.1".to_owned(), 6379)));
        assert_eq!(cfg.dir, "/tmp");
        assert_eq!(cfg.dbfilename, "x.rdb");
        assert!(cfg.is_replica());
    }
}
