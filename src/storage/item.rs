//! Item Model
//!
//! A stored value plus its metadata. At write time the value is examined
//! once to pick its encoding:
//!
//! 1. Bytes that are exactly the canonical decimal form of a signed 64-bit
//!    integer become [`Value::Number`] — the integer lives inline and GET
//!    renders it back to the identical decimal ASCII.
//! 2. A buffer at least as large as the compression threshold is run
//!    through LZF; when that strictly shrinks it, [`Value::Compressed`]
//!    keeps the compressed bytes and remembers the original length.
//! 3. Everything else is stored verbatim as [`Value::Plain`].
//!
//! All timestamps are milliseconds since the Unix epoch, passed in by the
//! caller so the predicates stay deterministic under test. TTLs and lock
//! durations are whole seconds, as on the wire.

use bytes::Bytes;

use super::lzf::{self, LzfError};

/// How an item's payload is stored. The discriminant is the wire byte used
/// in VAL/KVAL replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    /// Raw bytes, stored as-is
    Plain = 0x00,
    /// LZF-compressed bytes; replies carry the decompressed form
    Compressed = 0x01,
    /// An inline signed 64-bit integer, rendered as decimal ASCII on reads
    Number = 0x02,
}

impl Encoding {
    /// Decodes a wire byte.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Encoding::Plain),
            0x01 => Some(Encoding::Compressed),
            0x02 => Some(Encoding::Number),
            _ => None,
        }
    }
}

/// An item's payload in its stored form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Plain(Bytes),
    Number(i64),
    Compressed { data: Bytes, original_len: usize },
}

/// A stored value plus its metadata.
#[derive(Debug, Clone)]
pub struct Item {
    /// The payload in its stored form
    pub value: Value,

    /// Stored byte count: buffer length for PLAIN, compressed length for
    /// COMPRESSED, decimal width for NUMBER. This is what the memory
    /// tracker charges.
    pub size: usize,

    /// When the item was last written (ms since epoch)
    pub created_at: u64,

    /// When the item was last read or written (ms since epoch)
    pub last_access: u64,

    /// Seconds until expiry, counted from `created_at`; 0 means never
    pub ttl: u64,

    /// Wall time (ms) at which the write lock expires; 0 means unlocked
    pub locked_until: u64,
}

impl Item {
    /// Creates an item from raw value bytes, applying the encoding policy.
    pub fn new(raw: Bytes, compression_threshold: usize, ttl: u64, now: u64) -> Self {
        let (value, size) = encode(raw, compression_threshold);
        Self {
            value,
            size,
            created_at: now,
            last_access: now,
            ttl,
            locked_until: 0,
        }
    }

    /// Creates a NUMBER item directly.
    pub fn from_number(n: i64, ttl: u64, now: u64) -> Self {
        Self {
            value: Value::Number(n),
            size: decimal_width(n),
            created_at: now,
            last_access: now,
            ttl,
            locked_until: 0,
        }
    }

    /// The wire encoding tag for this item.
    pub fn encoding(&self) -> Encoding {
        match self.value {
            Value::Plain(_) => Encoding::Plain,
            Value::Number(_) => Encoding::Number,
            Value::Compressed { .. } => Encoding::Compressed,
        }
    }

    /// True when a TTL is set and has elapsed.
    pub fn is_expired(&self, now: u64) -> bool {
        self.ttl > 0 && now.saturating_sub(self.created_at) >= self.ttl * 1000
    }

    /// True while a write lock is held.
    pub fn is_locked(&self, now: u64) -> bool {
        self.locked_until > now
    }

    /// Acquires a write lock for `seconds`.
    pub fn lock(&mut self, seconds: u64, now: u64) {
        self.locked_until = now + seconds * 1000;
    }

    /// Releases any write lock.
    pub fn unlock(&mut self) {
        self.locked_until = 0;
    }

    /// Remaining lock time in whole seconds (0 when unlocked).
    pub fn lock_remaining(&self, now: u64) -> u64 {
        self.locked_until.saturating_sub(now) / 1000
    }

    /// Marks a read access.
    pub fn touch(&mut self, now: u64) {
        self.last_access = now;
    }

    /// The payload as the client should see it: decompressed for
    /// COMPRESSED, decimal ASCII for NUMBER, verbatim for PLAIN.
    pub fn plain_bytes(&self) -> Result<Bytes, LzfError> {
        match &self.value {
            Value::Plain(data) => Ok(data.clone()),
            Value::Number(n) => Ok(Bytes::from(n.to_string())),
            Value::Compressed { data, original_len } => {
                Ok(Bytes::from(lzf::decompress_to_vec(data, *original_len)?))
            }
        }
    }

    /// The item as an integer, for INC/DEC: the inline value for NUMBER,
    /// a parse of the payload for PLAIN, nothing otherwise.
    pub fn as_integer(&self) -> Option<i64> {
        match &self.value {
            Value::Number(n) => Some(*n),
            Value::Plain(data) => std::str::from_utf8(data).ok()?.parse().ok(),
            Value::Compressed { .. } => None,
        }
    }

    /// Replaces the payload with an inline integer, re-encoding the item as
    /// NUMBER. Counts as a write.
    pub fn set_number(&mut self, n: i64, now: u64) {
        self.value = Value::Number(n);
        self.size = decimal_width(n);
        self.created_at = now;
        self.last_access = now;
    }
}

/// Width in bytes of an integer's decimal ASCII form.
fn decimal_width(n: i64) -> usize {
    n.to_string().len()
}

/// Applies the encoding policy to raw value bytes.
fn encode(raw: Bytes, compression_threshold: usize) -> (Value, usize) {
    if let Some(n) = parse_canonical_number(&raw) {
        return (Value::Number(n), raw.len());
    }

    if compression_threshold > 0 && raw.len() >= compression_threshold {
        if let Some(compressed) = lzf::compress_to_vec(&raw) {
            let size = compressed.len();
            return (
                Value::Compressed {
                    data: Bytes::from(compressed),
                    original_len: raw.len(),
                },
                size,
            );
        }
    }

    let size = raw.len();
    (Value::Plain(raw), size)
}

/// Parses `raw` as an i64 only when the canonical decimal rendering equals
/// the input byte-for-byte, so NUMBER items round-trip exactly on GET.
fn parse_canonical_number(raw: &[u8]) -> Option<i64> {
    // i64::MIN spells 20 bytes; anything longer cannot be canonical
    if raw.is_empty() || raw.len() > 20 {
        return None;
    }
    let s = std::str::from_utf8(raw).ok()?;
    let n: i64 = s.parse().ok()?;
    (n.to_string().as_bytes() == raw).then_some(n)
}
