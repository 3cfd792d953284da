//! Protocol Codec
//!
//! Decoding of request payloads into [`Command`] values and encoding of
//! commands back into frames (the client side of the wire, used by the
//! tests and by client tooling).
//!
//! The connection layer strips the leading `u32` size word and hands the
//! counted bytes here, so a decode sees `opcode + arguments` exactly. Every
//! opcode has one fixed argument shape; a frame that underflows an
//! argument, carries trailing bytes, names an unknown opcode, or breaks a
//! field limit is a protocol violation and the caller drops the client.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::config::Config;

use super::types::{opcode, Command};

/// Errors that make a request frame undecodable. All of them cost the
/// client its connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The opcode is not one we know
    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    /// An argument ran past the end of the frame
    #[error("argument underflow, {missing} bytes missing")]
    Underflow { missing: usize },

    /// Bytes were left over after the opcode's last argument
    #[error("{0} trailing bytes after the last argument")]
    TrailingBytes(usize),

    /// Keys must be non-empty
    #[error("zero-length key")]
    EmptyKey,

    /// Key longer than `max_key_size`
    #[error("key of {size} bytes exceeds the {max} byte limit")]
    KeyTooLarge { size: usize, max: usize },

    /// Value longer than `max_value_size`
    #[error("value of {size} bytes exceeds the {max} byte limit")]
    ValueTooLarge { size: usize, max: usize },

    /// TTL and lock durations must be non-negative
    #[error("negative time argument {0}")]
    NegativeTime(i32),
}

/// The field limits the decoder enforces.
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub max_key_size: usize,
    pub max_value_size: usize,
}

impl From<&Config> for FrameLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_key_size: config.max_key_size,
            max_value_size: config.max_value_size,
        }
    }
}

/// Decodes a request payload (opcode + arguments, the bytes counted by the
/// frame's size word).
pub fn decode_command(frame: Bytes, limits: FrameLimits) -> Result<Command, ProtocolError> {
    let mut buf = frame;
    let op = read_u16(&mut buf)?;

    let command = match op {
        opcode::SET => Command::Set {
            ttl: read_time(&mut buf)?,
            key: read_key(&mut buf, &limits)?,
            value: read_value(&mut buf, &limits)?,
        },
        opcode::TTL => Command::Ttl {
            key: read_key(&mut buf, &limits)?,
            ttl: read_time(&mut buf)?,
        },
        opcode::GET => Command::Get {
            key: read_key(&mut buf, &limits)?,
        },
        opcode::DEL => Command::Del {
            key: read_key(&mut buf, &limits)?,
        },
        opcode::INC => Command::Inc {
            key: read_key(&mut buf, &limits)?,
        },
        opcode::DEC => Command::Dec {
            key: read_key(&mut buf, &limits)?,
        },
        opcode::LOCK => Command::Lock {
            key: read_key(&mut buf, &limits)?,
            seconds: read_time(&mut buf)?,
        },
        opcode::UNLOCK => Command::Unlock {
            key: read_key(&mut buf, &limits)?,
        },
        opcode::COUNT => Command::Count {
            key: read_key(&mut buf, &limits)?,
        },
        opcode::META => Command::Meta {
            key: read_key(&mut buf, &limits)?,
            field: read_key(&mut buf, &limits)?,
        },
        opcode::KEYS => Command::Keys {
            prefix: read_key(&mut buf, &limits)?,
        },

        opcode::MSET => Command::MSet {
            prefix: read_key(&mut buf, &limits)?,
            value: read_value(&mut buf, &limits)?,
        },
        opcode::MTTL => Command::MTtl {
            prefix: read_key(&mut buf, &limits)?,
            ttl: read_time(&mut buf)?,
        },
        opcode::MGET => Command::MGet {
            prefix: read_key(&mut buf, &limits)?,
        },
        opcode::MDEL => Command::MDel {
            prefix: read_key(&mut buf, &limits)?,
        },
        opcode::MINC => Command::MInc {
            prefix: read_key(&mut buf, &limits)?,
        },
        opcode::MDEC => Command::MDec {
            prefix: read_key(&mut buf, &limits)?,
        },
        opcode::MLOCK => Command::MLock {
            prefix: read_key(&mut buf, &limits)?,
            seconds: read_time(&mut buf)?,
        },
        opcode::MUNLOCK => Command::MUnlock {
            prefix: read_key(&mut buf, &limits)?,
        },
        opcode::MCOUNT => Command::MCount {
            prefix: read_key(&mut buf, &limits)?,
        },

        opcode::STATS => Command::Stats,
        opcode::PING => Command::Ping,

        op => return Err(ProtocolError::UnknownOpcode(op)),
    };

    if buf.has_remaining() {
        return Err(ProtocolError::TrailingBytes(buf.remaining()));
    }

    Ok(command)
}

/// Encodes a complete request frame, size prefix included.
pub fn encode_command(command: &Command) -> Bytes {
    let mut payload = BytesMut::new();

    match command {
        Command::Set { ttl, key, value } => {
            payload.put_u16_le(opcode::SET);
            payload.put_i32_le(*ttl as i32);
            put_blob(&mut payload, key);
            put_blob(&mut payload, value);
        }
        Command::Ttl { key, ttl } => {
            payload.put_u16_le(opcode::TTL);
            put_blob(&mut payload, key);
            payload.put_i32_le(*ttl as i32);
        }
        Command::Get { key } => {
            payload.put_u16_le(opcode::GET);
            put_blob(&mut payload, key);
        }
        Command::Del { key } => {
            payload.put_u16_le(opcode::DEL);
            put_blob(&mut payload, key);
        }
        Command::Inc { key } => {
            payload.put_u16_le(opcode::INC);
            put_blob(&mut payload, key);
        }
        Command::Dec { key } => {
            payload.put_u16_le(opcode::DEC);
            put_blob(&mut payload, key);
        }
        Command::Lock { key, seconds } => {
            payload.put_u16_le(opcode::LOCK);
            put_blob(&mut payload, key);
            payload.put_i32_le(*seconds as i32);
        }
        Command::Unlock { key } => {
            payload.put_u16_le(opcode::UNLOCK);
            put_blob(&mut payload, key);
        }
        Command::Count { key } => {
            payload.put_u16_le(opcode::COUNT);
            put_blob(&mut payload, key);
        }
        Command::Meta { key, field } => {
            payload.put_u16_le(opcode::META);
            put_blob(&mut payload, key);
            put_blob(&mut payload, field);
        }
        Command::Keys { prefix } => {
            payload.put_u16_le(opcode::KEYS);
            put_blob(&mut payload, prefix);
        }
        Command::MSet { prefix, value } => {
            payload.put_u16_le(opcode::MSET);
            put_blob(&mut payload, prefix);
            put_blob(&mut payload, value);
        }
        Command::MTtl { prefix, ttl } => {
            payload.put_u16_le(opcode::MTTL);
            put_blob(&mut payload, prefix);
            payload.put_i32_le(*ttl as i32);
        }
        Command::MGet { prefix } => {
            payload.put_u16_le(opcode::MGET);
            put_blob(&mut payload, prefix);
        }
        Command::MDel { prefix } => {
            payload.put_u16_le(opcode::MDEL);
            put_blob(&mut payload, prefix);
        }
        Command::MInc { prefix } => {
            payload.put_u16_le(opcode::MINC);
            put_blob(&mut payload, prefix);
        }
        Command::MDec { prefix } => {
            payload.put_u16_le(opcode::MDEC);
            put_blob(&mut payload, prefix);
        }
        Command::MLock { prefix, seconds } => {
            payload.put_u16_le(opcode::MLOCK);
            put_blob(&mut payload, prefix);
            payload.put_i32_le(*seconds as i32);
        }
        Command::MUnlock { prefix } => {
            payload.put_u16_le(opcode::MUNLOCK);
            put_blob(&mut payload, prefix);
        }
        Command::MCount { prefix } => {
            payload.put_u16_le(opcode::MCOUNT);
            put_blob(&mut payload, prefix);
        }
        Command::Stats => payload.put_u16_le(opcode::STATS),
        Command::Ping => payload.put_u16_le(opcode::PING),
    }

    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(&payload);
    frame.freeze()
}

fn put_blob(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

fn read_u16(buf: &mut Bytes) -> Result<u16, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Underflow {
            missing: 2 - buf.remaining(),
        });
    }
    Ok(buf.get_u16_le())
}

fn read_time(buf: &mut Bytes) -> Result<u64, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Underflow {
            missing: 4 - buf.remaining(),
        });
    }
    let t = buf.get_i32_le();
    if t < 0 {
        return Err(ProtocolError::NegativeTime(t));
    }
    Ok(t as u64)
}

/// Reads a length-prefixed field without copying (the result shares the
/// frame's buffer).
fn read_blob(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Underflow {
            missing: 4 - buf.remaining(),
        });
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Underflow {
            missing: len - buf.remaining(),
        });
    }
    Ok(buf.split_to(len))
}

fn read_key(buf: &mut Bytes, limits: &FrameLimits) -> Result<Bytes, ProtocolError> {
    let key = read_blob(buf)?;
    if key.is_empty() {
        return Err(ProtocolError::EmptyKey);
    }
    if key.len() > limits.max_key_size {
        return Err(ProtocolError::KeyTooLarge {
            size: key.len(),
            max: limits.max_key_size,
        });
    }
    Ok(key)
}

fn read_value(buf: &mut Bytes, limits: &FrameLimits) -> Result<Bytes, ProtocolError> {
    let value = read_blob(buf)?;
    if value.len() > limits.max_value_size {
        return Err(ProtocolError::ValueTooLarge {
            size: value.len(),
            max: limits.max_value_size,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> FrameLimits {
        FrameLimits {
            max_key_size: 64,
            max_value_size: 1024,
        }
    }

    /// Strips the size prefix the way the connection layer does.
    fn payload_of(frame: Bytes) -> Bytes {
        let mut buf = frame;
        let size = buf.get_u32_le() as usize;
        assert_eq!(size, buf.remaining());
        buf
    }

    fn roundtrip(command: Command) {
        let frame = encode_command(&command);
        let decoded = decode_command(payload_of(frame), limits()).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn test_roundtrip_single_key_ops() {
        let key = Bytes::from("user:1");
        roundtrip(Command::Set {
            ttl: 0,
            key: key.clone(),
            value: Bytes::from("hello"),
        });
        roundtrip(Command::Set {
            ttl: 60,
            key: key.clone(),
            value: Bytes::new(),
        });
        roundtrip(Command::Ttl {
            key: key.clone(),
            ttl: 30,
        });
        roundtrip(Command::Get { key: key.clone() });
        roundtrip(Command::Del { key: key.clone() });
        roundtrip(Command::Inc { key: key.clone() });
        roundtrip(Command::Dec { key: key.clone() });
        roundtrip(Command::Lock {
            key: key.clone(),
            seconds: 60,
        });
        roundtrip(Command::Unlock { key: key.clone() });
        roundtrip(Command::Count { key: key.clone() });
        roundtrip(Command::Meta {
            key: key.clone(),
            field: Bytes::from("encoding"),
        });
        roundtrip(Command::Keys {
            prefix: Bytes::from("user:"),
        });
    }

    #[test]
    fn test_roundtrip_multi_ops() {
        let prefix = Bytes::from("/u/");
        roundtrip(Command::MSet {
            prefix: prefix.clone(),
            value: Bytes::from("v"),
        });
        roundtrip(Command::MTtl {
            prefix: prefix.clone(),
            ttl: 5,
        });
        roundtrip(Command::MGet {
            prefix: prefix.clone(),
        });
        roundtrip(Command::MDel {
            prefix: prefix.clone(),
        });
        roundtrip(Command::MInc {
            prefix: prefix.clone(),
        });
        roundtrip(Command::MDec {
            prefix: prefix.clone(),
        });
        roundtrip(Command::MLock {
            prefix: prefix.clone(),
            seconds: 60,
        });
        roundtrip(Command::MUnlock {
            prefix: prefix.clone(),
        });
        roundtrip(Command::MCount { prefix });
    }

    #[test]
    fn test_roundtrip_server_ops() {
        roundtrip(Command::Stats);
        roundtrip(Command::Ping);
    }

    #[test]
    fn test_binary_safe_fields() {
        roundtrip(Command::Set {
            ttl: 0,
            key: Bytes::from(vec![0x00, 0xff, 0x01]),
            value: Bytes::from(vec![0u8; 512]),
        });
    }

    #[test]
    fn test_unknown_opcode() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0x7777);
        assert_eq!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::UnknownOpcode(0x7777))
        );
    }

    #[test]
    fn test_empty_payload_underflows() {
        assert_eq!(
            decode_command(Bytes::new(), limits()),
            Err(ProtocolError::Underflow { missing: 2 })
        );
    }

    #[test]
    fn test_missing_argument() {
        // GET with no key field at all
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::GET);
        assert!(matches!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::Underflow { .. })
        ));
    }

    #[test]
    fn test_truncated_key() {
        // key_len says 10, only 3 bytes follow
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::GET);
        buf.put_u32_le(10);
        buf.put_slice(b"abc");
        assert_eq!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::Underflow { missing: 7 })
        );
    }

    #[test]
    fn test_trailing_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::GET);
        buf.put_u32_le(3);
        buf.put_slice(b"foo");
        buf.put_slice(b"junk");
        assert_eq!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::TrailingBytes(4))
        );
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::GET);
        buf.put_u32_le(0);
        assert_eq!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::EmptyKey)
        );
    }

    #[test]
    fn test_key_over_limit() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::GET);
        buf.put_u32_le(65);
        buf.put_slice(&[b'k'; 65]);
        assert_eq!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::KeyTooLarge { size: 65, max: 64 })
        );
    }

    #[test]
    fn test_value_over_limit() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::SET);
        buf.put_i32_le(0);
        buf.put_u32_le(1);
        buf.put_u8(b'k');
        buf.put_u32_le(1025);
        buf.put_slice(&[0u8; 1025]);
        assert_eq!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::ValueTooLarge {
                size: 1025,
                max: 1024
            })
        );
    }

    #[test]
    fn test_negative_ttl_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::SET);
        buf.put_i32_le(-5);
        buf.put_u32_le(1);
        buf.put_u8(b'k');
        buf.put_u32_le(1);
        buf.put_u8(b'v');
        assert_eq!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::NegativeTime(-5))
        );
    }

    #[test]
    fn test_empty_value_is_fine() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::SET);
        buf.put_i32_le(0);
        buf.put_u32_le(1);
        buf.put_u8(b'k');
        buf.put_u32_le(0);
        let command = decode_command(buf.freeze(), limits()).unwrap();
        assert_eq!(
            command,
            Command::Set {
                ttl: 0,
                key: Bytes::from("k"),
                value: Bytes::new(),
            }
        );
    }

    #[test]
    fn test_ping_with_junk_dropped() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(opcode::PING);
        buf.put_u8(0);
        assert_eq!(
            decode_command(buf.freeze(), limits()),
            Err(ProtocolError::TrailingBytes(1))
        );
    }
}
