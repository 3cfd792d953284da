//! Command Handler Module
//!
//! The query processing layer: decoded commands come in, exactly one reply
//! per command goes out.
//!
//! ## Operations
//!
//! ### Single-key
//! - `SET`, `GET`, `DEL`, `COUNT`
//! - `INC`, `DEC` (64-bit, wrapping)
//! - `TTL`, `LOCK`, `UNLOCK`
//! - `META` (size / encoding / ttl / lock / access), `KEYS`
//!
//! ### Multi (prefix-wide)
//! - `MSET`, `MGET`, `MDEL`, `MCOUNT`
//! - `MINC`, `MDEC`
//! - `MTTL`, `MLOCK`, `MUNLOCK`
//!
//! Multi operations resolve their prefix once, then apply the single-key
//! body to every item that existed under it at dispatch. They are
//! best-effort: a locked or non-numeric item is skipped and the reply's
//! count reflects only the items actually touched.
//!
//! ### Server
//! - `STATS` (counters as a KVAL), `PING`

pub mod handler;

// Re-export the main command handler
pub use handler::CommandHandler;
