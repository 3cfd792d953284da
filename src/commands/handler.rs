//! Command Handler Module
//!
//! The query processor: takes a decoded [`Command`], runs it against the
//! store, and produces exactly one [`Reply`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Protocol Codec  │  (protocol module)
//! └────────┬────────┘
//!          │ Command
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Execute      │
//! │  - Frame reply  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │      Store      │  (storage module)
//! └─────────────────┘
//! ```
//!
//! The store lives in an `Rc<RefCell<..>>` shared by every connection task
//! on the single-threaded runtime. `execute` takes the one borrow a request
//! needs and releases it before the reply is written, so a request is
//! atomic with respect to every other handler and to the cron.
//!
//! Semantic failures (missing key, locked item, non-numeric INC target)
//! become NOT_FOUND / LOCKED / NAN replies here. Protocol failures never
//! reach this layer — the connection drops those clients outright.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::protocol::{Command, Reply};
use crate::storage::{Encoding, MetaField, OpError, Store};

/// Executes commands against the shared store.
#[derive(Clone)]
pub struct CommandHandler {
    store: Rc<RefCell<Store>>,
}

impl CommandHandler {
    /// Creates a handler over the shared store.
    pub fn new(store: Rc<RefCell<Store>>) -> Self {
        Self { store }
    }

    /// Runs one command to completion and returns its reply. `now` is the
    /// wall time in milliseconds, read once by the caller so the whole
    /// request sees a single instant.
    pub fn execute(&self, command: Command, now: u64) -> Reply {
        let mut store = self.store.borrow_mut();
        store.stats_mut().requests += 1;

        match command {
            Command::Set { ttl, key, value } => self.set(&mut store, &key, value, ttl, now),
            Command::Ttl { key, ttl } => {
                reply_unit(store.set_ttl(&key, ttl, now))
            }
            Command::Get { key } => match store.get(&key, now) {
                Some((encoding, data)) => Reply::Val { encoding, data },
                None => Reply::NotFound,
            },
            Command::Del { key } => reply_unit(store.delete(&key, now)),
            Command::Inc { key } => reply_counter(store.incr(&key, 1, now)),
            Command::Dec { key } => reply_counter(store.incr(&key, -1, now)),
            Command::Lock { key, seconds } => reply_unit(store.lock(&key, seconds, now)),
            Command::Unlock { key } => reply_unit(store.unlock(&key, now)),
            Command::Count { key } => Reply::number(store.count(&key, now) as i64),
            Command::Meta { key, field } => self.meta(&mut store, &key, &field, now),
            Command::Keys { prefix } => self.keys(&mut store, &prefix, now),

            Command::MSet { prefix, value } => {
                reply_affected(store.mset(&prefix, value, now))
            }
            Command::MTtl { prefix, ttl } => reply_affected(store.mttl(&prefix, ttl, now)),
            Command::MGet { prefix } => match store.mget(&prefix, now) {
                Some(entries) => Reply::Kval { entries },
                None => Reply::NotFound,
            },
            Command::MDel { prefix } => reply_affected(store.mdel(&prefix, now)),
            Command::MInc { prefix } => reply_affected(store.mincr(&prefix, 1, now)),
            Command::MDec { prefix } => reply_affected(store.mincr(&prefix, -1, now)),
            Command::MLock { prefix, seconds } => {
                reply_affected(store.mlock(&prefix, seconds, now))
            }
            Command::MUnlock { prefix } => reply_affected(store.munlock(&prefix, now)),
            Command::MCount { prefix } => reply_affected(store.mcount(&prefix, now)),

            Command::Stats => self.stats(&store, now),
            Command::Ping => Reply::Ok,
        }
    }

    /// SET echoes the stored value back, tagged with the encoding the
    /// policy picked.
    fn set(&self, store: &mut Store, key: &[u8], value: Bytes, ttl: u64, now: u64) -> Reply {
        match store.set(key, value.clone(), ttl, now) {
            Ok(encoding) => Reply::Val {
                encoding,
                data: value,
            },
            Err(e) => reply_op_error(e),
        }
    }

    fn meta(&self, store: &mut Store, key: &[u8], field: &[u8], now: u64) -> Reply {
        let Some(field) = MetaField::parse(field) else {
            return Reply::error(format!(
                "unknown meta field '{}'",
                String::from_utf8_lossy(field)
            ));
        };
        match store.meta(key, field, now) {
            Ok(n) => Reply::number(n),
            Err(e) => reply_op_error(e),
        }
    }

    /// KEYS lists the matching keys as a KVAL of index → key name, in
    /// lexicographic order.
    fn keys(&self, store: &mut Store, prefix: &[u8], now: u64) -> Reply {
        match store.keys(prefix, now) {
            Some(keys) => Reply::Kval {
                entries: keys
                    .into_iter()
                    .enumerate()
                    .map(|(i, key)| {
                        (Bytes::from(i.to_string()), Encoding::Plain, key)
                    })
                    .collect(),
            },
            None => Reply::NotFound,
        }
    }

    /// STATS reports the server counters as a KVAL of NUMBER-rendered
    /// values.
    fn stats(&self, store: &Store, now: u64) -> Reply {
        let stats = store.stats();
        let memory = store.memory();
        let uptime = now.saturating_sub(stats.started) / 1000;

        let entries: Vec<(&'static str, i64)> = vec![
            ("mem_used", memory.used() as i64),
            ("mem_peak", memory.peak() as i64),
            ("mem_limit", memory.limit() as i64),
            ("mem_available", stats.memavail as i64),
            ("item_count", store.len() as i64),
            ("compressed_count", stats.ncompressed as i64),
            ("item_size_avg", store.avg_item_size() as i64),
            ("client_count", stats.nclients as i64),
            ("requests", stats.requests as i64),
            ("expired_count", stats.expired as i64),
            ("evicted_count", stats.evicted as i64),
            ("cron_done", stats.crondone as i64),
            ("uptime", uptime as i64),
        ];

        Reply::Kval {
            entries: entries
                .into_iter()
                .map(|(name, value)| {
                    (
                        Bytes::from_static(name.as_bytes()),
                        Encoding::Number,
                        Bytes::from(value.to_string()),
                    )
                })
                .collect(),
        }
    }
}

fn reply_op_error(e: OpError) -> Reply {
    match e {
        OpError::NotFound => Reply::NotFound,
        OpError::Locked => Reply::Locked,
        OpError::Nan => Reply::Nan,
    }
}

fn reply_unit(result: Result<(), OpError>) -> Reply {
    match result {
        Ok(()) => Reply::Ok,
        Err(e) => reply_op_error(e),
    }
}

fn reply_counter(result: Result<i64, OpError>) -> Reply {
    match result {
        Ok(n) => Reply::number(n),
        Err(e) => reply_op_error(e),
    }
}

/// Multi ops answer with the number of items they touched; an unresolvable
/// prefix is NOT_FOUND.
fn reply_affected(result: Option<usize>) -> Reply {
    match result {
        Some(n) => Reply::number(n as i64),
        None => Reply::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::ITEM_OVERHEAD;

    fn handler() -> CommandHandler {
        let config = Config {
            compression: 4096,
            ..Config::default()
        };
        CommandHandler::new(Rc::new(RefCell::new(Store::new(&config, 1_000))))
    }

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn set(h: &CommandHandler, key: &str, value: &str, now: u64) -> Reply {
        h.execute(
            Command::Set {
                ttl: 0,
                key: b(key),
                value: b(value),
            },
            now,
        )
    }

    fn get(h: &CommandHandler, key: &str, now: u64) -> Reply {
        h.execute(Command::Get { key: b(key) }, now)
    }

    #[test]
    fn test_set_then_get() {
        let h = handler();
        assert_eq!(
            set(&h, "foo", "bar", 1_000),
            Reply::Val {
                encoding: Encoding::Plain,
                data: b("bar")
            }
        );
        assert_eq!(
            get(&h, "foo", 1_000),
            Reply::Val {
                encoding: Encoding::Plain,
                data: b("bar")
            }
        );
        assert_eq!(get(&h, "nope", 1_000), Reply::NotFound);
    }

    #[test]
    fn test_lock_scenario() {
        // SET foo bar; MLOCK f 60; SET foo new -> LOCKED;
        // MUNLOCK f; SET foo new -> ok
        let h = handler();
        set(&h, "foo", "bar", 1_000);

        assert_eq!(
            h.execute(
                Command::MLock {
                    prefix: b("f"),
                    seconds: 60
                },
                1_000
            ),
            Reply::number(1)
        );
        assert_eq!(set(&h, "foo", "new", 2_000), Reply::Locked);
        assert_eq!(
            get(&h, "foo", 2_000),
            Reply::Val {
                encoding: Encoding::Plain,
                data: b("bar")
            }
        );

        assert_eq!(
            h.execute(Command::MUnlock { prefix: b("f") }, 3_000),
            Reply::number(1)
        );
        assert_eq!(
            set(&h, "foo", "new", 3_000),
            Reply::Val {
                encoding: Encoding::Plain,
                data: b("new")
            }
        );
    }

    #[test]
    fn test_inc_scenario() {
        // SET n 41; INC n -> VAL NUMBER 42; GET n -> VAL NUMBER 42
        let h = handler();
        assert_eq!(
            set(&h, "n", "41", 1_000),
            Reply::Val {
                encoding: Encoding::Number,
                data: b("41")
            }
        );
        assert_eq!(
            h.execute(Command::Inc { key: b("n") }, 1_000),
            Reply::number(42)
        );
        assert_eq!(
            get(&h, "n", 1_000),
            Reply::Val {
                encoding: Encoding::Number,
                data: b("42")
            }
        );
    }

    #[test]
    fn test_dec_and_nan() {
        let h = handler();
        set(&h, "n", "10", 1_000);
        assert_eq!(
            h.execute(Command::Dec { key: b("n") }, 1_000),
            Reply::number(9)
        );

        set(&h, "text", "hello", 1_000);
        assert_eq!(h.execute(Command::Inc { key: b("text") }, 1_000), Reply::Nan);
        assert_eq!(
            h.execute(Command::Inc { key: b("gone") }, 1_000),
            Reply::NotFound
        );
    }

    #[test]
    fn test_compression_scenario() {
        // SET k <5000 zero bytes>: GET returns the bytes, META encoding is
        // COMPRESSED, and the memory delta stays well under 5000
        let h = handler();
        let value = Bytes::from(vec![0u8; 5000]);

        h.execute(
            Command::Set {
                ttl: 0,
                key: b("k"),
                value: value.clone(),
            },
            1_000,
        );

        assert_eq!(
            get(&h, "k", 1_000),
            Reply::Val {
                encoding: Encoding::Compressed,
                data: value
            }
        );
        assert_eq!(
            h.execute(
                Command::Meta {
                    key: b("k"),
                    field: b("encoding")
                },
                1_000
            ),
            Reply::number(Encoding::Compressed as u8 as i64)
        );
        assert!(h.store.borrow().memory().used() < 5000);
    }

    #[test]
    fn test_ttl_scenario() {
        // SET a x; TTL a 1; 1.5s later GET a -> NOT_FOUND
        let h = handler();
        set(&h, "a", "x", 1_000);
        assert_eq!(
            h.execute(Command::Ttl { key: b("a"), ttl: 1 }, 1_000),
            Reply::Ok
        );
        assert_eq!(get(&h, "a", 2_500), Reply::NotFound);
        assert_eq!(h.store.borrow().len(), 0);
    }

    #[test]
    fn test_keys_and_mdel_scenario() {
        // SET /u/1 a; SET /u/2 b; SET /v/1 c;
        // KEYS /u/ -> [/u/1, /u/2]; MDEL /u/; COUNT /u/1 -> 0
        let h = handler();
        set(&h, "/u/1", "a", 1_000);
        set(&h, "/u/2", "b", 1_000);
        set(&h, "/v/1", "c", 1_000);

        assert_eq!(
            h.execute(Command::Keys { prefix: b("/u/") }, 1_000),
            Reply::Kval {
                entries: vec![
                    (b("0"), Encoding::Plain, b("/u/1")),
                    (b("1"), Encoding::Plain, b("/u/2")),
                ]
            }
        );

        assert_eq!(
            h.execute(Command::MDel { prefix: b("/u/") }, 1_000),
            Reply::number(2)
        );
        assert_eq!(
            h.execute(Command::Count { key: b("/u/1") }, 1_000),
            Reply::number(0)
        );
        assert_eq!(
            h.execute(Command::Count { key: b("/v/1") }, 1_000),
            Reply::number(1)
        );
    }

    #[test]
    fn test_mset_equivalence() {
        // MSET P v matches SET on every key under P that existed at
        // dispatch, and nothing else
        let h = handler();
        set(&h, "/u/1", "a", 1_000);
        set(&h, "/u/2", "b", 1_000);
        set(&h, "/v/1", "c", 1_000);

        assert_eq!(
            h.execute(
                Command::MSet {
                    prefix: b("/u/"),
                    value: b("z")
                },
                1_000
            ),
            Reply::number(2)
        );

        for key in ["/u/1", "/u/2"] {
            assert_eq!(
                get(&h, key, 1_000),
                Reply::Val {
                    encoding: Encoding::Plain,
                    data: b("z")
                }
            );
        }
        assert_eq!(
            get(&h, "/v/1", 1_000),
            Reply::Val {
                encoding: Encoding::Plain,
                data: b("c")
            }
        );
        assert_eq!(h.store.borrow().len(), 3);
    }

    #[test]
    fn test_mget() {
        let h = handler();
        set(&h, "/u/1", "a", 1_000);
        set(&h, "/u/2", "17", 1_000);

        assert_eq!(
            h.execute(Command::MGet { prefix: b("/u/") }, 1_000),
            Reply::Kval {
                entries: vec![
                    (b("/u/1"), Encoding::Plain, b("a")),
                    (b("/u/2"), Encoding::Number, b("17")),
                ]
            }
        );
    }

    #[test]
    fn test_minc_mdec() {
        let h = handler();
        set(&h, "c/1", "1", 1_000);
        set(&h, "c/2", "2", 1_000);

        assert_eq!(
            h.execute(Command::MInc { prefix: b("c/") }, 1_000),
            Reply::number(2)
        );
        assert_eq!(get(&h, "c/1", 1_000), Reply::Val { encoding: Encoding::Number, data: b("2") });

        assert_eq!(
            h.execute(Command::MDec { prefix: b("c/") }, 1_000),
            Reply::number(2)
        );
        assert_eq!(get(&h, "c/1", 1_000), Reply::Val { encoding: Encoding::Number, data: b("1") });
    }

    #[test]
    fn test_mttl() {
        let h = handler();
        set(&h, "/u/1", "a", 1_000);
        set(&h, "/u/2", "b", 1_000);

        assert_eq!(
            h.execute(
                Command::MTtl {
                    prefix: b("/u/"),
                    ttl: 1
                },
                1_000
            ),
            Reply::number(2)
        );
        assert_eq!(get(&h, "/u/1", 2_500), Reply::NotFound);
        assert_eq!(get(&h, "/u/2", 2_500), Reply::NotFound);
    }

    #[test]
    fn test_mcount_and_missing_prefix() {
        let h = handler();
        set(&h, "/u/1", "a", 1_000);

        assert_eq!(
            h.execute(Command::MCount { prefix: b("/u/") }, 1_000),
            Reply::number(1)
        );
        assert_eq!(
            h.execute(Command::MCount { prefix: b("/w/") }, 1_000),
            Reply::NotFound
        );
        assert_eq!(
            h.execute(Command::MGet { prefix: b("/w/") }, 1_000),
            Reply::NotFound
        );
    }

    #[test]
    fn test_meta_fields() {
        let h = handler();
        set(&h, "foo", "bar", 1_000);

        assert_eq!(
            h.execute(
                Command::Meta {
                    key: b("foo"),
                    field: b("size")
                },
                1_000
            ),
            Reply::number(3)
        );
        assert_eq!(
            h.execute(
                Command::Meta {
                    key: b("foo"),
                    field: b("ttl")
                },
                1_000
            ),
            Reply::number(0)
        );

        // unknown field is a semantic error, not a dropped client
        let reply = h.execute(
            Command::Meta {
                key: b("foo"),
                field: b("color")
            },
            1_000,
        );
        assert!(matches!(reply, Reply::Err { message: Some(_) }));
    }

    #[test]
    fn test_stats_and_ping() {
        let h = handler();
        set(&h, "foo", "bar", 1_000);

        assert_eq!(h.execute(Command::Ping, 1_000), Reply::Ok);

        let Reply::Kval { entries } = h.execute(Command::Stats, 61_000) else {
            panic!("STATS must reply KVAL");
        };
        let find = |name: &str| -> i64 {
            let (_, _, value) = entries
                .iter()
                .find(|(key, _, _)| key == name.as_bytes())
                .unwrap_or_else(|| panic!("missing stat {}", name));
            std::str::from_utf8(value).unwrap().parse().unwrap()
        };

        assert_eq!(find("item_count"), 1);
        assert_eq!(find("uptime"), 60);
        assert_eq!(find("mem_used"), (3 + ITEM_OVERHEAD) as i64);
        // SET + PING + this STATS
        assert_eq!(find("requests"), 3);
    }

    #[test]
    fn test_numeric_wrap() {
        let h = handler();
        set(&h, "n", &i64::MAX.to_string(), 1_000);
        assert_eq!(
            h.execute(Command::Inc { key: b("n") }, 1_000),
            Reply::number(i64::MIN)
        );
    }

    #[test]
    fn test_empty_value_roundtrip() {
        let h = handler();
        h.execute(
            Command::Set {
                ttl: 0,
                key: b("empty"),
                value: Bytes::new(),
            },
            1_000,
        );
        assert_eq!(
            get(&h, "empty", 1_000),
            Reply::Val {
                encoding: Encoding::Plain,
                data: Bytes::new()
            }
        );
    }
}
