//! # Gibson - An In-Memory Key/Value Cache Server with Prefix Operations
//!
//! Gibson is a single-process, in-memory key/value cache server. Clients
//! speak a length-prefixed binary protocol over TCP or a Unix domain socket
//! and issue per-key or per-prefix operations: set, get, delete, increment,
//! lock, expire, scan and statistics.
//!
//! What sets it apart from a hash-map wrapper is the index: keys live in a
//! compacted prefix trie, so every operation has a "multi" form that
//! applies to *every key sharing a prefix* in one request.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   current-thread runtime (LocalSet)                 │
//! │                                                                     │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────┐             │
//! │  │  Listener   │───>│  Connection  │───>│   Command   │             │
//! │  │ (TCP/Unix)  │    │   Handler    │    │   Handler   │             │
//! │  └─────────────┘    └──────────────┘    └──────┬──────┘             │
//! │                                                │                    │
//! │                                                ▼                    │
//! │  ┌─────────────┐    ┌─────────────────────────────────────────────┐ │
//! │  │   Binary    │    │              Rc<RefCell<Store>>             │ │
//! │  │   Codec     │    │  ┌─────────────┐  ┌───────┐  ┌───────────┐  │ │
//! │  │             │    │  │ prefix trie │  │ items │  │ mem ledger│  │ │
//! │  └─────────────┘    │  └─────────────┘  └───────┘  └───────────┘  │ │
//! │                     └─────────────────────────────────────────────┘ │
//! │                                                ▲                    │
//! │                                   ┌────────────┴────────────┐       │
//! │                                   │     Maintenance Cron    │       │
//! │                                   │ TTL sweep / eviction /  │       │
//! │                                   │     status summary      │       │
//! │                                   └─────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Highlights
//!
//! ### Single-Threaded Cooperative Scheduling
//!
//! All state is touched from one thread. Connection tasks and the cron
//! share the store through `Rc<RefCell<..>>`, borrowing only between
//! `.await` points: a request is processed to completion atomically, with
//! no locks anywhere.
//!
//! ### Value Encodings
//!
//! A stored value is kept as an inline 64-bit integer when it is exactly a
//! canonical decimal (NUMBER), LZF-compressed when it is large and
//! compressible (COMPRESSED), and verbatim otherwise (PLAIN). Replies
//! always carry the bytes the client stored; the encoding tag is
//! diagnostic.
//!
//! ### Lazy + Active Expiry, Pressure Eviction
//!
//! Items with a TTL expire on first access, a periodic sweep reaps the
//! rest, and when the memory budget is exceeded the cron evicts items that
//! have not been touched for a configurable idle age.
//!
//! ## Module Overview
//!
//! - [`protocol`]: binary frame codec, opcodes, replies
//! - [`storage`]: prefix trie, items, LZF, memory ledger, the store
//! - [`commands`]: opcode dispatch for single- and multi-key operations
//! - [`connection`]: per-client frame loop and idle handling
//! - [`server`]: listener, accept loop, cron, shutdown
//! - [`config`]: configuration keys, defaults and file parser
//! - [`error`]: the crate-wide error type

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
pub use error::{GibsonError, Result};
pub use protocol::{Command, Reply};
pub use server::Server;
pub use storage::Store;

/// The default TCP port Gibson listens on
pub const DEFAULT_PORT: u16 = 10128;

/// The default host Gibson binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of Gibson
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wall time in milliseconds since the Unix epoch. Read once per request
/// (and per cron tick) and threaded through the store calls.
pub fn unix_time_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
