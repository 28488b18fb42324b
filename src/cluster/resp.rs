//! RESP2 Encoding and Parsing
//!
//! Commands go out as arrays of bulk strings; replies are parsed top-down from
//! a buffered reader. Bulk payloads are raw bytes.

use std::io::BufRead;

use crate::error::{CacheError, Result};

/// Largest bulk payload accepted, matching the server's `proto-max-bulk-len`.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound on array slots reserved before the elements arrive.
const MAX_PREALLOC: usize = 1024;

/// One RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK`
    Simple(String),
    /// `-ERR ...`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$5\r\nhello`
    Bulk(Vec<u8>),
    /// `*N` followed by N replies
    Array(Vec<RespValue>),
    /// `$-1` or `*-1`
    Nil,
}

impl RespValue {
    /// Text of a bulk or simple string reply.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RespValue::Simple(text) => Some(text.clone()),
            RespValue::Bulk(data) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }

    /// Appends the wire form of this value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::Simple(text) => push_line(out, b'+', text.as_bytes()),
            RespValue::Error(text) => push_line(out, b'-', text.as_bytes()),
            RespValue::Integer(value) => push_line(out, b':', value.to_string().as_bytes()),
            RespValue::Bulk(data) => {
                push_line(out, b'$', data.len().to_string().as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(items) => {
                push_line(out, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
            RespValue::Nil => out.extend_from_slice(b"$-1\r\n"),
        }
    }
}

fn push_line(out: &mut Vec<u8>, kind: u8, body: &[u8]) {
    out.push(kind);
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n");
}

/// Appends one command, encoded as a RESP2 array, to `out`.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        out.extend_from_slice(arg.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one reply. `line_buf` is scratch space reused across calls.
pub fn read_value<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> Result<RespValue> {
    read_line(reader, line_buf)?;
    let (kind, rest) = match line_buf.split_first() {
        Some((kind, rest)) => (*kind, rest),
        None => return Err(protocol("empty reply line")),
    };

    match kind {
        b'+' => Ok(RespValue::Simple(String::from_utf8_lossy(rest).into_owned())),
        b'-' => Ok(RespValue::Error(String::from_utf8_lossy(rest).into_owned())),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            if len < 0 {
                return Ok(RespValue::Nil);
            }
            if len > MAX_BULK_LEN {
                return Err(protocol(&format!("bulk length {} exceeds limit", len)));
            }
            let mut data = vec![0u8; len as usize];
            reader.read_exact(&mut data)?;
            let mut crlf = [0u8; 2];
            reader.read_exact(&mut crlf)?;
            if crlf != *b"\r\n" {
                return Err(protocol("bulk string missing CRLF"));
            }
            Ok(RespValue::Bulk(data))
        }
        b'*' => {
            let len = parse_i64(rest)?;
            if len < 0 {
                return Ok(RespValue::Nil);
            }
            let mut items = Vec::with_capacity((len as usize).min(MAX_PREALLOC));
            for _ in 0..len {
                items.push(read_value(reader, line_buf)?);
            }
            Ok(RespValue::Array(items))
        }
        other => Err(protocol(&format!("unknown reply type byte {:#04x}", other))),
    }
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(CacheError::StoreUnavailable(
            "connection closed by peer".to_string(),
        ));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(protocol("reply line not CRLF terminated"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| protocol("invalid integer"))
}

fn protocol(msg: &str) -> CacheError {
    CacheError::StoreUnavailable(format!("protocol error: {}", msg))
}
