//! Storage Module
//!
//! The in-memory side of the cache: the prefix trie index, the item model
//! with its three encodings, the LZF codec that backs the COMPRESSED
//! encoding, the memory ledger feeding the eviction trigger, and the
//! [`Store`] engine that ties them together.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │                                                             │
//! │  ┌───────────────┐   ┌──────────────┐   ┌───────────────┐   │
//! │  │  Prefix Trie  │   │    Items     │   │ MemoryTracker │   │
//! │  │  (the index)  │──>│ PLAIN/NUMBER │──>│  used / peak  │   │
//! │  │               │   │ /COMPRESSED  │   │  vs. budget   │   │
//! │  └───────────────┘   └──────┬───────┘   └───────────────┘   │
//! │                             │                               │
//! │                       ┌─────▼─────┐                         │
//! │                       │ LZF codec │                         │
//! │                       └───────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single trie node per live key carries the item; keys sharing a prefix
//! share a path, which is what the prefix-wide ("multi") operations walk.
//! Expired items disappear on first access; the cron's sweeps catch the
//! rest and reclaim idle items when the memory budget is exceeded.

pub mod item;
pub mod lzf;
pub mod memory;
pub mod store;
pub mod trie;

// Re-export commonly used types
pub use item::{Encoding, Item, Value};
pub use lzf::LzfError;
pub use memory::{available_memory, MemoryTracker, ITEM_OVERHEAD};
pub use store::{MetaField, OpError, Store, StoreStats};
pub use trie::{Subtree, Trie};
