//! Node Connection
//!
//! One TCP connection to one cluster node, with its own read/write buffers.

use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::cluster::resp::{encode_command, read_value, RespValue};
use crate::cluster::NodeAddr;
use crate::error::{CacheError, Result};

/// Socket settings applied to every node connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    /// Sent with AUTH right after connecting when non-empty
    pub password: String,
}

pub struct NodeConnection {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    /// READONLY has been sent, replica reads are allowed
    readonly: bool,
}

impl NodeConnection {
    /// Opens a connection and authenticates when a password is configured.
    pub fn connect(addr: &NodeAddr, options: &ConnectOptions) -> Result<Self> {
        let stream = open_stream(addr, options.connect_timeout)?;
        stream.set_read_timeout(options.read_timeout)?;
        stream.set_write_timeout(options.read_timeout)?;
        stream.set_nodelay(true)?;

        let mut conn = NodeConnection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            readonly: false,
        };

        if !options.password.is_empty() {
            match conn.exec(&[b"AUTH", options.password.as_bytes()])? {
                RespValue::Simple(_) => {}
                RespValue::Error(message) => return Err(CacheError::CommandRejected(message)),
                other => {
                    return Err(CacheError::StoreUnavailable(format!(
                        "unexpected AUTH reply: {:?}",
                        other
                    )))
                }
            }
        }

        debug!("connected to node {}", addr);
        Ok(conn)
    }

    /// Sends one command and reads its reply.
    pub fn exec(&mut self, args: &[&[u8]]) -> Result<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_value(&mut self.reader, &mut self.line_buf)
    }

    /// Enables reads on a replica. No-op once sent.
    pub fn ensure_readonly(&mut self) -> Result<()> {
        if self.readonly {
            return Ok(());
        }
        match self.exec(&[b"READONLY"])? {
            RespValue::Error(message) => Err(CacheError::CommandRejected(message)),
            _ => {
                self.readonly = true;
                Ok(())
            }
        }
    }
}

fn open_stream(addr: &NodeAddr, timeout: Option<Duration>) -> Result<TcpStream> {
    let mut last_err = None;
    for socket_addr in (addr.host.as_str(), addr.port).to_socket_addrs()? {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&socket_addr, timeout),
            None => TcpStream::connect(socket_addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(match last_err {
        Some(err) => CacheError::StoreUnavailable(format!("{}: {}", addr, err)),
        None => CacheError::StoreUnavailable(format!("{}: address did not resolve", addr)),
    })
}
