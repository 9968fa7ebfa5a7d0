/*
 * Created on Fri Feb 09 2024
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

//! Utilities for generating responses, which are only used by the `server`
//!
//! Five shapes: simple strings, errors, integers, bulk strings and
//! arrays. Handlers build complete responses as owned byte vectors;
//! the connection's writer task flushes them to the stream.

use crate::protocol::responses;

/// `+<text>\r\n`
pub fn simple(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 3);
    buf.push(b'+');
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// `-<text>\r\n`
pub fn error(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 3);
    buf.push(b'-');
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// `:<decimal>\r\n`
pub fn integer(num: i64) -> Vec<u8> {
    format!(":{}\r\n", num).into_bytes()
}

/// `$<len>\r\n<bytes>\r\n`
pub fn bulk(payload: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 16);
    buf.extend_from_slice(format!("${}\r\n", payload.len()).as_bytes());
    buf.extend_from_slice(payload.as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf
}

/// An array of bulk strings; `None` elements become null bulks. The
/// empty array is `*0\r\n`
pub fn array<I, S>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let items: Vec<Option<S>> = items.into_iter().collect();
    if items.is_empty() {
        return responses::EMPTY_ARRAY.to_vec();
    }
    let mut buf = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        match item {
            Some(payload) => buf.extend_from_slice(&bulk(payload.as_ref())),
            None => buf.extend_from_slice(responses::NULL_BULK),
        }
    }
    buf
}

/// An array of non-null bulk strings
pub fn string_array<I, S>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    array(items.into_iter().map(Some))
}

/// An array whose elements are already framed values. Used for the
/// nested stream replies
pub fn nested_array(parts: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        buf.extend_from_slice(part);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shapes() {
        assert_eq!(simple("OK"), b"+OK\r\n");
        assert_eq!(error("ERR oops"), b"-ERR oops\r\n");
        assert_eq!(integer(42), b":42\r\n");
        assert_eq!(integer(-1), b":-1\r\n");
        assert_eq!(bulk("bar"), b"$3\r\nbar\r\n");
        assert_eq!(bulk(""), b"$0\r\n\r\n");
    }

    #[test]
    fn test_arrays() {
        assert_eq!(string_array(Vec::<String>::new()), b"*0\r\n");
        assert_eq!(
            string_array(["a", "b", "c"]),
            b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
        );
        assert_eq!(
            array([Some("a"), None]),
            b"*2\r\n$1\r\na\r\n$-1\r\n"
        );
        assert_eq!(
            nested_array(&[bulk("x"), integer(1)]),
            b"*2\r\n$1\r\nx\r\n:1\r\n"
        );
    }
}
