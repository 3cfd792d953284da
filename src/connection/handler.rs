//! Connection Handler Module
//!
//! One handler per connected client, running as its own task on the
//! single-threaded runtime.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP or Unix socket)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────────┐
//!    │           Main Loop              │
//!    │                                  │
//!    │  read u32 size word (idle timer) │
//!    │            │                     │
//!    │  validate, read counted payload  │
//!    │            │                     │
//!    │  decode opcode + arguments       │
//!    │            │                     │
//!    │  execute exactly one command     │
//!    │            │                     │
//!    │  write exactly one reply frame   │
//!    │            │                     │
//!    │        [loop back]               │
//!    └──────────────────────────────────┘
//!        │
//!        ▼
//! 4. EOF / violation / idle timeout
//! ```
//!
//! A request is read in full, executed, and its reply fully written before
//! the next size word is touched, so replies leave in request order.
//!
//! Protocol violations — a size word under 2 bytes or over
//! `max_request_size`, an unknown opcode, a malformed argument list — are
//! logged at WARN with a hex dump of the frame's first bytes, and the
//! client is dropped without a reply. A silent client is dropped when the
//! idle timeout runs out waiting for its next frame.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::protocol::{decode_command, FrameLimits, ProtocolError, Reply};
use crate::unix_time_ms;

/// How many bytes of a malformed frame the hex dump shows.
const DUMP_BYTES: usize = 64;

/// Connection-layer counters. Single-threaded, so plain `Cell`s suffice.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: Cell<u64>,
    /// Currently active connections
    pub active_connections: Cell<u64>,
    /// Total commands processed
    pub commands_processed: Cell<u64>,
    /// Total bytes read
    pub bytes_read: Cell<u64>,
    /// Total bytes written
    pub bytes_written: Cell<u64>,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted
            .set(self.connections_accepted.get() + 1);
        self.active_connections
            .set(self.active_connections.get() + 1);
    }

    pub fn connection_closed(&self) {
        self.active_connections
            .set(self.active_connections.get() - 1);
    }

    pub fn command_processed(&self) {
        self.commands_processed
            .set(self.commands_processed.get() + 1);
    }

    pub fn add_bytes_read(&self, count: usize) {
        self.bytes_read.set(self.bytes_read.get() + count as u64);
    }

    pub fn add_bytes_written(&self, count: usize) {
        self.bytes_written
            .set(self.bytes_written.get() + count as u64);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent a malformed request
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The size word is below the 2-byte opcode or above the limit
    #[error("invalid request size {0}")]
    BadFrameSize(usize),

    /// Nothing arrived within the idle window
    #[error("idle timeout")]
    IdleTimeout,
}

/// Handles a single client connection.
pub struct ConnectionHandler<S> {
    /// The client's stream (TCP or Unix)
    stream: S,

    /// Connection id, for logging (Unix sockets have no peer address)
    id: u64,

    /// Peer description, for logging
    peer: String,

    /// The command handler (shared store behind it)
    command_handler: CommandHandler,

    /// Field limits for the decoder
    limits: FrameLimits,

    /// Frame size caps
    max_request_size: usize,
    max_response_size: usize,

    /// Silence window before the client is reaped
    idle_timeout: Duration,

    /// Connection statistics (shared)
    stats: Rc<ConnectionStats>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ConnectionHandler<S> {
    /// Creates a new connection handler.
    pub fn new(
        stream: S,
        id: u64,
        peer: String,
        command_handler: CommandHandler,
        config: &Config,
        stats: Rc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream,
            id,
            peer,
            command_handler,
            limits: FrameLimits::from(config),
            max_request_size: config.max_request_size,
            max_response_size: config.max_response_size,
            idle_timeout: Duration::from_secs(config.max_idletime.max(1)),
            stats,
        }
    }

    /// Runs the connection to completion: reads requests, executes them,
    /// writes replies, until the client leaves or misbehaves.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = self.id, peer = %self.peer, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = self.id, "Client disconnected"),
            Err(ConnectionError::IdleTimeout) => {
                info!(client = self.id, "Dropping idle client")
            }
            Err(ConnectionError::Io(e)) => {
                debug!(client = self.id, error = %e, "Connection I/O error")
            }
            // protocol violations were already logged with their hex dump
            Err(_) => {}
        }

        self.stats.connection_closed();
        result
    }

    /// The read-execute-reply loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let Some(frame) = self.read_frame().await? else {
                return Ok(()); // clean close between frames
            };

            let command = match decode_command(frame.clone(), self.limits) {
                Ok(command) => command,
                Err(e) => {
                    warn!(
                        client = self.id,
                        error = %e,
                        size = frame.len(),
                        "Malformed query, dropping client"
                    );
                    warn!(client = self.id, "  First bytes: {}", hex_dump(&frame));
                    return Err(e.into());
                }
            };

            let reply = self.command_handler.execute(command, unix_time_ms());
            self.stats.command_processed();

            self.write_reply(&reply).await?;
        }
    }

    /// Reads one complete frame: the size word (the idle timer runs while
    /// waiting for it), then the counted payload. `None` means the client
    /// closed the connection.
    async fn read_frame(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        let mut size_buf = [0u8; 4];
        match timeout(self.idle_timeout, self.stream.read_exact(&mut size_buf)).await {
            Err(_) => return Err(ConnectionError::IdleTimeout),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(_)) => {}
        }

        let size = u32::from_le_bytes(size_buf) as usize;
        // at least the opcode must fit
        if size < 2 || size > self.max_request_size {
            warn!(client = self.id, size = size, "Client request size invalid");
            return Err(ConnectionError::BadFrameSize(size));
        }

        let mut payload = vec![0u8; size];
        self.stream.read_exact(&mut payload).await?;
        self.stats.add_bytes_read(4 + size);

        Ok(Some(Bytes::from(payload)))
    }

    /// Writes one reply frame. An oversized reply is replaced by an ERR so
    /// the cap never silently truncates a frame mid-stream.
    async fn write_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let mut frame = reply.serialize();
        if frame.len() > self.max_response_size {
            warn!(
                client = self.id,
                size = frame.len(),
                max = self.max_response_size,
                "Reply exceeds max_response_size"
            );
            frame = Reply::error("response too large").serialize();
        }

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.stats.add_bytes_written(frame.len());
        Ok(())
    }
}

/// Renders the first bytes of a buffer as hex pairs for the violation log.
fn hex_dump(data: &[u8]) -> String {
    let shown = &data[..data.len().min(DUMP_BYTES)];
    let mut out = String::with_capacity(shown.len() * 3 + 4);
    for byte in shown {
        out.push_str(&format!("{:02x} ", byte));
    }
    if data.len() > DUMP_BYTES {
        out.push('…');
    }
    out
}

/// Runs a client connection to completion, swallowing the expected ways a
/// connection ends. Convenience wrapper for the accept loop.
pub async fn handle_connection<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    id: u64,
    peer: String,
    command_handler: CommandHandler,
    config: &Config,
    stats: Rc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, id, peer, command_handler, config, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = id, error = %e, "Connection ended with error");
            }
        }
    }
}
