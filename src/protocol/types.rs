//! Wire Protocol Types
//!
//! Gibson speaks a length-prefixed binary protocol. Every frame starts with
//! a little-endian `u32` counting the bytes that follow it.
//!
//! ## Request Frame
//!
//! ```text
//! ┌────────────┬──────────────┬──────────────────────────────┐
//! │ size (u32) │ opcode (u16) │ arguments                    │
//! └────────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! Arguments are length-prefixed fields (`u32 len` + bytes) and fixed-width
//! integers, in the exact shape each opcode demands. Anything else — an
//! unknown opcode, missing or trailing bytes, an over-limit key or value —
//! drops the client.
//!
//! ## Reply Frame
//!
//! ```text
//! ┌────────────┬────────────┬────────────────────────────────┐
//! │ size (u32) │ code (u16) │ payload                        │
//! └────────────┴────────────┴────────────────────────────────┘
//! ```
//!
//! VAL payloads carry `u8 encoding, u32 len, bytes`; KVAL payloads carry a
//! `u32` count of `key, encoding, value` entries. A COMPRESSED encoding tag
//! is diagnostic only — the bytes on the wire are always the decompressed
//! form.

use bytes::{BufMut, Bytes, BytesMut};

use crate::storage::Encoding;

/// Request opcodes.
pub mod opcode {
    pub const SET: u16 = 0x01;
    pub const TTL: u16 = 0x02;
    pub const GET: u16 = 0x03;
    pub const DEL: u16 = 0x04;
    pub const INC: u16 = 0x05;
    pub const DEC: u16 = 0x06;
    pub const LOCK: u16 = 0x07;
    pub const UNLOCK: u16 = 0x08;
    pub const COUNT: u16 = 0x09;
    pub const META: u16 = 0x0a;
    pub const KEYS: u16 = 0x0b;

    pub const MSET: u16 = 0x15;
    pub const MTTL: u16 = 0x16;
    pub const MGET: u16 = 0x17;
    pub const MDEL: u16 = 0x18;
    pub const MINC: u16 = 0x19;
    pub const MDEC: u16 = 0x1a;
    pub const MLOCK: u16 = 0x1b;
    pub const MUNLOCK: u16 = 0x1c;
    pub const MCOUNT: u16 = 0x1d;

    pub const STATS: u16 = 0x28;
    pub const PING: u16 = 0x29;
}

/// Reply codes.
pub mod reply_code {
    pub const ERR: u16 = 0x00;
    pub const NOT_FOUND: u16 = 0x01;
    pub const NAN: u16 = 0x02;
    pub const LOCKED: u16 = 0x03;
    pub const OK: u16 = 0x04;
    pub const VAL: u16 = 0x05;
    pub const KVAL: u16 = 0x06;
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    // single-key operations
    Set { ttl: u64, key: Bytes, value: Bytes },
    Ttl { key: Bytes, ttl: u64 },
    Get { key: Bytes },
    Del { key: Bytes },
    Inc { key: Bytes },
    Dec { key: Bytes },
    Lock { key: Bytes, seconds: u64 },
    Unlock { key: Bytes },
    Count { key: Bytes },
    Meta { key: Bytes, field: Bytes },
    Keys { prefix: Bytes },

    // multi (prefix-wide) operations
    MSet { prefix: Bytes, value: Bytes },
    MTtl { prefix: Bytes, ttl: u64 },
    MGet { prefix: Bytes },
    MDel { prefix: Bytes },
    MInc { prefix: Bytes },
    MDec { prefix: Bytes },
    MLock { prefix: Bytes, seconds: u64 },
    MUnlock { prefix: Bytes },
    MCount { prefix: Bytes },

    // server operations
    Stats,
    Ping,
}

impl Command {
    /// The operation's name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set { .. } => "SET",
            Command::Ttl { .. } => "TTL",
            Command::Get { .. } => "GET",
            Command::Del { .. } => "DEL",
            Command::Inc { .. } => "INC",
            Command::Dec { .. } => "DEC",
            Command::Lock { .. } => "LOCK",
            Command::Unlock { .. } => "UNLOCK",
            Command::Count { .. } => "COUNT",
            Command::Meta { .. } => "META",
            Command::Keys { .. } => "KEYS",
            Command::MSet { .. } => "MSET",
            Command::MTtl { .. } => "MTTL",
            Command::MGet { .. } => "MGET",
            Command::MDel { .. } => "MDEL",
            Command::MInc { .. } => "MINC",
            Command::MDec { .. } => "MDEC",
            Command::MLock { .. } => "MLOCK",
            Command::MUnlock { .. } => "MUNLOCK",
            Command::MCount { .. } => "MCOUNT",
            Command::Stats => "STATS",
            Command::Ping => "PING",
        }
    }
}

/// A reply to be framed and written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Val {
        encoding: Encoding,
        data: Bytes,
    },
    Kval {
        entries: Vec<(Bytes, Encoding, Bytes)>,
    },
    NotFound,
    Locked,
    Nan,
    Err {
        message: Option<String>,
    },
}

impl Reply {
    /// A VAL reply carrying a NUMBER-encoded integer.
    pub fn number(n: i64) -> Self {
        Reply::Val {
            encoding: Encoding::Number,
            data: Bytes::from(n.to_string()),
        }
    }

    /// An ERR reply with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Err {
            message: Some(message.into()),
        }
    }

    /// The wire code for this reply.
    pub fn code(&self) -> u16 {
        match self {
            Reply::Ok => reply_code::OK,
            Reply::Val { .. } => reply_code::VAL,
            Reply::Kval { .. } => reply_code::KVAL,
            Reply::NotFound => reply_code::NOT_FOUND,
            Reply::Locked => reply_code::LOCKED,
            Reply::Nan => reply_code::NAN,
            Reply::Err { .. } => reply_code::ERR,
        }
    }

    /// Serializes the complete reply frame, size prefix included.
    pub fn serialize(&self) -> Bytes {
        let payload = self.payload();
        let mut frame = BytesMut::with_capacity(4 + 2 + payload.len());
        frame.put_u32_le((2 + payload.len()) as u32);
        frame.put_u16_le(self.code());
        frame.put_slice(&payload);
        frame.freeze()
    }

    fn payload(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            Reply::Ok | Reply::NotFound | Reply::Locked | Reply::Nan => {}
            Reply::Val { encoding, data } => {
                buf.put_u8(*encoding as u8);
                buf.put_u32_le(data.len() as u32);
                buf.put_slice(data);
            }
            Reply::Kval { entries } => {
                buf.put_u32_le(entries.len() as u32);
                for (key, encoding, value) in entries {
                    buf.put_u32_le(key.len() as u32);
                    buf.put_slice(key);
                    buf.put_u8(*encoding as u8);
                    buf.put_u32_le(value.len() as u32);
                    buf.put_slice(value);
                }
            }
            Reply::Err { message } => {
                if let Some(message) = message {
                    buf.put_u32_le(message.len() as u32);
                    buf.put_slice(message.as_bytes());
                }
            }
        }
        buf
    }
}
