/*
 * Created on Thu Feb 08 2024
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

//! This module provides deserialization primitives for RESP request frames
//!
//! A request is an array of bulk strings:
//! ```text
//! *<no_of_elements>\r\n
//! $<size_of_element>\r\n
//! element[0]\r\n
//! $<size_of_element>\r\n
//! element[1]\r\n
//! ...
//! ```
//!
//! The parser reports the exact number of bytes each decoded frame
//! consumed; replicas advance their replication offset by that count,
//! so the accounting here has to be byte-accurate.

pub mod responses;

/// A fully decoded command: the argument vector, name first
pub type Query = Vec<String>;

#[derive(Debug, PartialEq)]
/// Outcome of parsing a request frame
pub enum ParseResult {
    /// The frame is incomplete, i.e more data needs to be read
    Incomplete,
    /// The frame is corrupted, in the sense that it contains invalid data
    BadPacket,
    /// A successfully parsed query
    ///
    /// The second field is the number of bytes that should be discarded from
    /// the buffer as they have already been read
    Query(Query, usize),
}

/// Parse a single frame from the front of `buf`. Pipelined input is
/// handled by the caller invoking this again after advancing the buffer
pub fn parse(buf: &[u8]) -> ParseResult {
    let mut pos = 0usize;
    match buf.first() {
        Some(&b'*') => pos += 1,
        Some(_) => return ParseResult::BadPacket,
        None => return ParseResult::Incomplete,
    }
    let nargs = match read_decimal_line(buf, &mut pos) {
        LineResult::Num(n) => n,
        LineResult::Incomplete => return ParseResult::Incomplete,
        LineResult::Bad => return ParseResult::BadPacket,
    };
    // don't trust the declared count for the allocation; the bytes
    // have to actually show up before the vector grows
    let mut args = Vec::with_capacity(nargs.min(64));
    while args.len() < nargs {
        match buf.get(pos) {
            Some(&b'$') => pos += 1,
            Some(_) => return ParseResult::BadPacket,
            None => return ParseResult::Incomplete,
        }
        let len = match read_decimal_line(buf, &mut pos) {
            LineResult::Num(n) => n,
            LineResult::Incomplete => return ParseResult::Incomplete,
            LineResult::Bad => return ParseResult::BadPacket,
        };
        let end = match pos.checked_add(len) {
            Some(end) => end,
            None => return ParseResult::BadPacket,
        };
        let payload = match buf.get(pos..end) {
            Some(p) => p,
            None => return ParseResult::Incomplete,
        };
        pos = end;
        match buf.get(pos..pos + 2) {
            Some(b"\r\n") => pos += 2,
            Some(_) => return ParseResult::BadPacket,
            None => return ParseResult::Incomplete,
        }
        args.push(String::from_utf8_lossy(payload).into_owned());
    }
    ParseResult::Query(args, pos)
}

enum LineResult {
    Num(usize),
    Incomplete,
    Bad,
}

/// Read a decimal integer terminated by CRLF, advancing `pos` past the
/// terminator. Rejects empty numbers, non-digits (so negative counts
/// are bad packets here) and bare-LF terminators
fn read_decimal_line(buf: &[u8], pos: &mut usize) -> LineResult {
    let mut num = 0usize;
    let start = *pos;
    while let Some(&byte) = buf.get(*pos) {
        match byte {
            b'0'..=b'9' => {
                num = match num
                    .checked_mul(10)
                    .and_then(|n| n.checked_add((byte - b'0') as usize))
                {
                    Some(n) => n,
                    None => return LineResult::Bad,
                };
                *pos += 1;
            }
            b'\r' => {
                if *pos == start {
                    return LineResult::Bad;
                }
                return match buf.get(*pos + 1) {
                    Some(&b'\n') => {
                        *pos += 2;
                        LineResult::Num(num)
                    }
                    Some(_) => LineResult::Bad,
                    None => LineResult::Incomplete,
                };
            }
            _ => return LineResult::Bad,
        }
    }
    LineResult::Incomplete
}

/// Re-encode an argument vector into the array-of-bulk-strings form.
/// This is the canonical encoding used when propagating a command to
/// replicas, so it must be byte-identical to what a client would send
pub fn encode_command(args: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 * args.len());
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf
}
