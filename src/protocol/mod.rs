//! Binary Protocol Implementation
//!
//! Gibson's wire protocol: length-prefixed binary frames over TCP or a Unix
//! domain socket. A request is a `u32` size word, a `u16` opcode and the
//! opcode's fixed argument shape; a reply is a size word, a `u16` reply
//! code and a code-specific payload.
//!
//! ## Modules
//!
//! - `types`: opcodes, reply codes, the [`Command`] and [`Reply`] enums
//! - `codec`: request decoding and request/reply frame encoding
//!
//! The protocol is strict on purpose: a malformed frame (unknown opcode,
//! wrong argument shape, over-limit key or value) is not answered with an
//! error reply — the connection layer logs it and drops the client.
//! Semantic conditions (missing key, locked item, non-numeric INC target)
//! travel back as ordinary replies instead.

pub mod codec;
pub mod types;

// Re-export commonly used types for convenience
pub use codec::{decode_command, encode_command, FrameLimits, ProtocolError};
pub use types::{opcode, reply_code, Command, Reply};
