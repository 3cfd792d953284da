//! Store
//!
//! The cache engine: the prefix trie, the items in it, the memory ledger and
//! the server-wide counters. Every operation the query processor dispatches
//! lands here, in its single-key or prefix-wide form.
//!
//! All methods take the current wall time in milliseconds. The caller reads
//! the clock once per request (and once per cron tick) and threads it
//! through, which keeps a request internally consistent and makes the
//! TTL/lock/eviction logic deterministic under test.
//!
//! ## Expiry on access
//!
//! An expired item is removed by the first operation that touches its key,
//! and the operation proceeds as if the key were absent. Prefix walks do the
//! same: expired descendants are purged before the walk's result is
//! produced. Anything the sweeps miss is therefore still invisible.
//!
//! ## Multi-operation traversal
//!
//! Prefix-wide mutations resolve the prefix once, collect the target keys
//! into a scratch list, and then run the single-key body per key. Editing
//! the trie while walking it would invalidate the traversal, so the two
//! phases never interleave.

use bytes::Bytes;
use tracing::{debug, error};

use crate::config::Config;

use super::item::{Encoding, Item};
use super::memory::MemoryTracker;

use super::trie::Trie;

/// Why a semantic operation did not apply. Each variant maps to a reply
/// code; protocol-level failures (which drop the client) never reach here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpError {
    /// The key is absent (or just expired)
    NotFound,
    /// The item holds a write lock
    Locked,
    /// INC/DEC on a payload that is not an integer
    Nan,
}

/// Per-item introspection fields for META.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaField {
    /// Stored byte count
    Size,
    /// Encoding tag (0 plain, 1 compressed, 2 number)
    Encoding,
    /// Configured TTL in seconds
    Ttl,
    /// Remaining lock time in seconds
    Lock,
    /// Seconds since the last access
    Access,
}

impl MetaField {
    /// Parses the wire name of a META field.
    pub fn parse(name: &[u8]) -> Option<Self> {
        match name {
            b"size" => Some(MetaField::Size),
            b"encoding" => Some(MetaField::Encoding),
            b"ttl" => Some(MetaField::Ttl),
            b"lock" => Some(MetaField::Lock),
            b"access" => Some(MetaField::Access),
            _ => None,
        }
    }
}

/// Server-wide counters, exposed by STATS and the cron's summary line.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// When the store was created (ms since epoch)
    pub started: u64,
    /// Physical memory available at startup, when the probe answered
    pub memavail: usize,
    /// Items currently stored compressed
    pub ncompressed: usize,
    /// Connected clients (maintained by the connection layer)
    pub nclients: usize,
    /// Completed cron ticks
    pub crondone: u64,
    /// Commands processed
    pub requests: u64,
    /// Items removed because their TTL elapsed
    pub expired: u64,
    /// Items removed by pressure eviction
    pub evicted: u64,
}

/// The in-memory cache engine.
pub struct Store {
    tree: Trie,
    memory: MemoryTracker,
    /// Minimum payload size before LZF is attempted
    compression: usize,
    /// Upper bound for any TTL, in seconds
    max_item_ttl: u64,
    /// Idle age in seconds making an item evictable under memory pressure
    gc_ratio: u64,
    stats: StoreStats,
}

impl Store {
    /// Creates a store from the server configuration.
    pub fn new(config: &Config, now: u64) -> Self {
        Self {
            tree: Trie::new(),
            memory: MemoryTracker::new(config.max_memory),
            compression: config.compression,
            max_item_ttl: config.max_item_ttl,
            gc_ratio: config.gc_ratio,
            stats: StoreStats {
                started: now,
                memavail: super::memory::available_memory().unwrap_or(0),
                ..StoreStats::default()
            },
        }
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// The memory ledger.
    pub fn memory(&self) -> &MemoryTracker {
        &self.memory
    }

    /// Server-wide counters.
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Mutable access to the counters, for the connection and cron layers.
    pub fn stats_mut(&mut self) -> &mut StoreStats {
        &mut self.stats
    }

    /// Live arena nodes in the trie (diagnostic).
    pub fn node_count(&self) -> usize {
        self.tree.node_count()
    }

    fn clamp_ttl(&self, ttl: u64) -> u64 {
        if self.max_item_ttl > 0 {
            ttl.min(self.max_item_ttl)
        } else {
            ttl
        }
    }

    // -------------------------------------------------------------------------
    // Accounting
    // -------------------------------------------------------------------------

    fn charge(&mut self, item: &Item) {
        self.memory.charge(item.size);
        if item.encoding() == Encoding::Compressed {
            self.stats.ncompressed += 1;
        }
    }

    fn release(&mut self, item: &Item) {
        self.memory.release(item.size);
        if item.encoding() == Encoding::Compressed {
            self.stats.ncompressed -= 1;
        }
    }

    /// Removes `key` if its item has expired. Returns true when it did.
    fn purge_if_expired(&mut self, key: &[u8], now: u64) -> bool {
        if self
            .tree
            .get(key)
            .is_some_and(|item| item.is_expired(now))
        {
            let item = self.tree.remove(key).expect("expired item is live in the trie");
            self.release(&item);
            self.stats.expired += 1;
            debug!(key = %String::from_utf8_lossy(key), "Expired item removed on access");
            true
        } else {
            false
        }
    }

    // -------------------------------------------------------------------------
    // Single-key operations
    // -------------------------------------------------------------------------

    /// Stores `value` under `key` with an optional TTL (0 = never expires),
    /// applying the encoding policy. Fails LOCKED while the existing item
    /// holds a write lock. Returns the encoding chosen for the new item.
    pub fn set(&mut self, key: &[u8], value: Bytes, ttl: u64, now: u64) -> Result<Encoding, OpError> {
        self.purge_if_expired(key, now);

        if self.tree.get(key).is_some_and(|item| item.is_locked(now)) {
            return Err(OpError::Locked);
        }

        let item = Item::new(value, self.compression, self.clamp_ttl(ttl), now);
        let encoding = item.encoding();
        self.charge(&item);
        if let Some(old) = self.tree.insert(key, item) {
            self.release(&old);
        }
        Ok(encoding)
    }

    /// Reads the value under `key`, decompressing or rendering as needed.
    /// Counts as an access.
    pub fn get(&mut self, key: &[u8], now: u64) -> Option<(Encoding, Bytes)> {
        self.purge_if_expired(key, now);

        let item = self.tree.get_mut(key)?;
        item.touch(now);
        let encoding = item.encoding();
        match item.plain_bytes() {
            Ok(bytes) => Some((encoding, bytes)),
            Err(e) => {
                // a stored buffer failing to decompress means lost data;
                // surface it as absence rather than a broken reply
                error!(error = %e, "Stored item failed to decompress");
                None
            }
        }
    }

    /// Deletes `key`. Fails LOCKED while the item holds a write lock.
    pub fn delete(&mut self, key: &[u8], now: u64) -> Result<(), OpError> {
        self.purge_if_expired(key, now);

        let item = self.tree.get(key).ok_or(OpError::NotFound)?;
        if item.is_locked(now) {
            return Err(OpError::Locked);
        }
        let item = self.tree.remove(key).expect("checked item is live");
        self.release(&item);
        Ok(())
    }

    /// Adjusts an integer item by `delta`, re-encoding a parseable PLAIN
    /// payload as NUMBER first. Overflow wraps (two's complement). Returns
    /// the new value.
    pub fn incr(&mut self, key: &[u8], delta: i64, now: u64) -> Result<i64, OpError> {
        self.purge_if_expired(key, now);

        let item = self.tree.get(key).ok_or(OpError::NotFound)?;
        if item.is_locked(now) {
            return Err(OpError::Locked);
        }
        let n = item.as_integer().ok_or(OpError::Nan)?;
        let new = n.wrapping_add(delta);

        let old_size = item.size;
        self.memory.release(old_size);
        let item = self.tree.get_mut(key).expect("checked item is live");
        item.set_number(new, now);
        let new_size = item.size;
        self.memory.charge(new_size);

        Ok(new)
    }

    /// Sets the TTL of an existing item. The expiry countdown restarts now.
    pub fn set_ttl(&mut self, key: &[u8], ttl: u64, now: u64) -> Result<(), OpError> {
        self.purge_if_expired(key, now);

        let max = self.clamp_ttl(ttl);
        let item = self.tree.get_mut(key).ok_or(OpError::NotFound)?;
        if item.is_locked(now) {
            return Err(OpError::Locked);
        }
        item.ttl = max;
        item.created_at = now;
        item.last_access = now;
        Ok(())
    }

    /// Acquires a write lock for `seconds`. Fails LOCKED while an earlier
    /// lock is still held.
    pub fn lock(&mut self, key: &[u8], seconds: u64, now: u64) -> Result<(), OpError> {
        self.purge_if_expired(key, now);

        let item = self.tree.get_mut(key).ok_or(OpError::NotFound)?;
        if item.is_locked(now) {
            return Err(OpError::Locked);
        }
        item.lock(seconds, now);
        Ok(())
    }

    /// Releases any write lock. Always permitted.
    pub fn unlock(&mut self, key: &[u8], now: u64) -> Result<(), OpError> {
        self.purge_if_expired(key, now);

        let item = self.tree.get_mut(key).ok_or(OpError::NotFound)?;
        item.unlock();
        Ok(())
    }

    /// 1 when the key is live, 0 otherwise.
    pub fn count(&mut self, key: &[u8], now: u64) -> u64 {
        self.purge_if_expired(key, now);
        u64::from(self.tree.get(key).is_some())
    }

    /// Reads one introspection field of an item. Counts as a read, not a
    /// write, so it never fails LOCKED.
    pub fn meta(&mut self, key: &[u8], field: MetaField, now: u64) -> Result<i64, OpError> {
        self.purge_if_expired(key, now);

        let item = self.tree.get(key).ok_or(OpError::NotFound)?;
        Ok(match field {
            MetaField::Size => item.size as i64,
            MetaField::Encoding => item.encoding() as u8 as i64,
            MetaField::Ttl => item.ttl as i64,
            MetaField::Lock => item.lock_remaining(now) as i64,
            MetaField::Access => (now.saturating_sub(item.last_access) / 1000) as i64,
        })
    }

    /// The live keys under `prefix`, in lexicographic order. `None` when
    /// the prefix is not a walkable path.
    pub fn keys(&mut self, prefix: &[u8], now: u64) -> Option<Vec<Bytes>> {
        self.collect_live_keys(prefix, now)
            .map(|keys| keys.into_iter().map(Bytes::from).collect())
    }

    // -------------------------------------------------------------------------
    // Multi-key operations
    // -------------------------------------------------------------------------

    /// Resolves `prefix` and collects the live keys beneath it, purging any
    /// expired descendants found on the way. `None` when the prefix is not
    /// a walkable path.
    fn collect_live_keys(&mut self, prefix: &[u8], now: u64) -> Option<Vec<Vec<u8>>> {
        let subtree = self.tree.find_prefix(prefix)?;

        let mut live = Vec::new();
        let mut dead = Vec::new();
        self.tree.walk(subtree, &mut |key, item| {
            if item.is_expired(now) {
                dead.push(key.to_vec());
            } else {
                live.push(key.to_vec());
            }
        });

        for key in dead {
            self.purge_if_expired(&key, now);
        }

        Some(live)
    }

    /// SET on every live key under `prefix`. Locked items are skipped.
    /// Returns the number of items updated.
    pub fn mset(&mut self, prefix: &[u8], value: Bytes, now: u64) -> Option<usize> {
        let keys = self.collect_live_keys(prefix, now)?;
        let mut updated = 0;
        for key in keys {
            if self.set(&key, value.clone(), 0, now).is_ok() {
                updated += 1;
            }
        }
        Some(updated)
    }

    /// TTL on every live key under `prefix`. Locked items are skipped.
    pub fn mttl(&mut self, prefix: &[u8], ttl: u64, now: u64) -> Option<usize> {
        let keys = self.collect_live_keys(prefix, now)?;
        let mut updated = 0;
        for key in keys {
            if self.set_ttl(&key, ttl, now).is_ok() {
                updated += 1;
            }
        }
        Some(updated)
    }

    /// GET on every live key under `prefix`, in lexicographic order.
    pub fn mget(&mut self, prefix: &[u8], now: u64) -> Option<Vec<(Bytes, Encoding, Bytes)>> {
        let keys = self.collect_live_keys(prefix, now)?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((encoding, value)) = self.get(&key, now) {
                entries.push((Bytes::from(key), encoding, value));
            }
        }
        Some(entries)
    }

    /// DEL on every live key under `prefix`. Locked items survive.
    pub fn mdel(&mut self, prefix: &[u8], now: u64) -> Option<usize> {
        let keys = self.collect_live_keys(prefix, now)?;
        let mut deleted = 0;
        for key in keys {
            if self.delete(&key, now).is_ok() {
                deleted += 1;
            }
        }
        Some(deleted)
    }

    /// INC/DEC on every live key under `prefix`. Locked and non-numeric
    /// items are skipped.
    pub fn mincr(&mut self, prefix: &[u8], delta: i64, now: u64) -> Option<usize> {
        let keys = self.collect_live_keys(prefix, now)?;
        let mut updated = 0;
        for key in keys {
            if self.incr(&key, delta, now).is_ok() {
                updated += 1;
            }
        }
        Some(updated)
    }

    /// LOCK on every live key under `prefix`. Already-locked items are
    /// skipped.
    pub fn mlock(&mut self, prefix: &[u8], seconds: u64, now: u64) -> Option<usize> {
        let keys = self.collect_live_keys(prefix, now)?;
        let mut locked = 0;
        for key in keys {
            if self.lock(&key, seconds, now).is_ok() {
                locked += 1;
            }
        }
        Some(locked)
    }

    /// UNLOCK on every live key under `prefix`.
    pub fn munlock(&mut self, prefix: &[u8], now: u64) -> Option<usize> {
        let keys = self.collect_live_keys(prefix, now)?;
        let mut unlocked = 0;
        for key in keys {
            if self.unlock(&key, now).is_ok() {
                unlocked += 1;
            }
        }
        Some(unlocked)
    }

    /// Number of live items under `prefix`.
    pub fn mcount(&mut self, prefix: &[u8], now: u64) -> Option<usize> {
        self.collect_live_keys(prefix, now).map(|keys| keys.len())
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Removes every item whose TTL has elapsed. Returns the item count and
    /// the bytes released.
    pub fn expire_sweep(&mut self, now: u64) -> (usize, usize) {
        let before = self.memory.used();

        let mut dead = Vec::new();
        self.tree.walk_all(&mut |key, item| {
            if item.is_expired(now) {
                dead.push(key.to_vec());
            }
        });

        let count = dead.len();
        for key in dead {
            self.purge_if_expired(&key, now);
        }

        (count, before - self.memory.used())
    }

    /// When over budget, removes every item untouched for at least
    /// `gc_ratio` seconds — an approximate LRU that trades precision for a
    /// plain trie walk. Returns the item count and the bytes released.
    pub fn evict_idle(&mut self, now: u64) -> (usize, usize) {
        if !self.memory.over_budget() {
            return (0, 0);
        }

        let before = self.memory.used();
        let idle_floor = self.gc_ratio * 1000;

        let mut idle = Vec::new();
        self.tree.walk_all(&mut |key, item| {
            if now.saturating_sub(item.last_access) >= idle_floor {
                idle.push(key.to_vec());
            }
        });

        let mut evicted = 0;
        for key in idle {
            if let Some(item) = self.tree.remove(&key) {
                self.release(&item);
                evicted += 1;
            }
        }
        self.stats.evicted += evicted as u64;

        (evicted, before - self.memory.used())
    }

    /// Average stored item size in bytes (0 when empty).
    pub fn avg_item_size(&self) -> usize {
        if self.tree.is_empty() {
            0
        } else {
            self.memory.used() / self.tree.len()
        }
    }
}
