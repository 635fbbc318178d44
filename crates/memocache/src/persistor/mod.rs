//! The storage abstraction the cache reads and writes through.
//!
//! [`Persistor`] is a key-value/store contract modeled on Redis command
//! semantics: strings with expiration flavors, counters, hashes, lists, sets,
//! sorted sets, and an atomic multi-command batch. Any backing store that
//! implements it identically keeps the cache's behavior backend-agnostic;
//! [`MemoryPersistor`] is the in-process reference implementation, and
//! [`connection`] wraps a real remote client behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::expiry::SetOptions;

pub mod connection;
mod memory;

pub use memory::MemoryPersistor;

/// A member of a sorted set: unique by `value` within the set, ordered by
/// `score`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub value: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(value: impl Into<String>, score: f64) -> Self {
        Self {
            value: value.into(),
            score,
        }
    }
}

/// A single store command, as queued by [`Multi`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String, options: SetOptions },
    Del { keys: Vec<String> },
    Expire { key: String, secs: u64 },
    Ttl { key: String },
    Exists { keys: Vec<String> },
    IncrBy { key: String, delta: i64 },
    FlushAll,
    HSet { key: String, fields: Vec<(String, String)> },
    HGet { key: String, field: String },
    HGetAll { key: String },
    LPush { key: String, values: Vec<String> },
    RPush { key: String, values: Vec<String> },
    LPop { key: String },
    RPop { key: String },
    LRange { key: String, start: i64, stop: i64 },
    SAdd { key: String, members: Vec<String> },
    SRem { key: String, members: Vec<String> },
    SMembers { key: String },
    ZAdd { key: String, members: Vec<ScoredMember> },
    ZRem { key: String, members: Vec<String> },
    ZRange { key: String, start: i64, stop: i64 },
    ZRangeWithScores { key: String, start: i64, stop: i64, rev: bool },
    ZScore { key: String, member: String },
    ZRank { key: String, member: String },
    ZCount { key: String, min: f64, max: f64 },
    ZRangeByScore { key: String, min: f64, max: f64 },
    ZRangeByScoreWithScores { key: String, min: f64, max: f64 },
    ZIncrBy { key: String, delta: f64, member: String },
}

/// The result of a single command inside an executed batch.
///
/// Each variant matches the return shape of the corresponding single-call
/// trait method.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A successful write acknowledgment (`OK`).
    Ok,
    /// A missing value, or a skipped conditional write.
    Nil,
    Str(String),
    Int(i64),
    Float(f64),
    Array(Vec<String>),
    Scored(Vec<ScoredMember>),
    Map(HashMap<String, String>),
}

/// The capability set any backing store must implement.
///
/// Missing keys behave per type: `get` returns `None`, `incr_by` initializes
/// to the increment, `lpop` returns `None`. No operation fails on "key not
/// found"; errors are reserved for malformed arguments and transport
/// failures. Using one key with two different value types is undefined
/// behavior, mirroring the wire protocol's looseness.
#[async_trait]
pub trait Persistor: Send + Sync {
    // String ops.

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Writes `value` under `key`. Returns `false` when an `only_if_absent`
    /// write was skipped because a live value already exists.
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> CacheResult<bool>;

    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> CacheResult<u64>;

    /// Sets a relative expiration on an existing key. Returns `false` when
    /// the key does not exist.
    async fn expire(&self, key: &str, secs: u64) -> CacheResult<bool>;

    /// Remaining time-to-live in seconds: `-1` when the key has no expiry,
    /// `-2` when the key does not exist.
    async fn ttl(&self, key: &str) -> CacheResult<i64>;

    /// Counts how many of the given keys exist.
    async fn exists(&self, keys: &[String]) -> CacheResult<u64>;

    /// Adds `delta` to the integer at `key`, initializing a missing key to
    /// `delta`. Fails when the existing value is not an integer.
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64>;

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.incr_by(key, 1).await
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.incr_by(key, -1).await
    }

    async fn decr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.incr_by(key, -delta).await
    }

    /// Removes every key in the store.
    async fn flush_all(&self) -> CacheResult<()>;

    // Hash ops.

    /// Sets hash fields, returning how many were newly created.
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> CacheResult<u64>;

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    // List ops.

    /// Prepends values, one at a time, returning the new list length.
    async fn lpush(&self, key: &str, values: &[String]) -> CacheResult<u64>;

    /// Appends values, returning the new list length.
    async fn rpush(&self, key: &str, values: &[String]) -> CacheResult<u64>;

    async fn lpop(&self, key: &str) -> CacheResult<Option<String>>;

    async fn rpop(&self, key: &str) -> CacheResult<Option<String>>;

    /// Elements from `start` through `stop` inclusive. Negative indices count
    /// from the end, `-1` being the last element.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>>;

    // Set ops.

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;

    // Sorted-set ops.

    /// Adds members, updating the score in place for values that already
    /// exist. Returns how many members were newly added.
    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> CacheResult<u64>;

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64>;

    /// Member values from `start` through `stop` inclusive, in ascending
    /// score order.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>>;

    /// Like [`zrange`](Self::zrange) but paired with scores; `rev` iterates
    /// in descending score order.
    async fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> CacheResult<Vec<ScoredMember>>;

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>>;

    /// The member's 0-based position in ascending score order, or `None`
    /// when absent.
    async fn zrank(&self, key: &str, member: &str) -> CacheResult<Option<u64>>;

    /// Counts members with `min <= score <= max`.
    async fn zcount(&self, key: &str, min: f64, max: f64) -> CacheResult<u64>;

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>>;

    async fn zrange_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> CacheResult<Vec<ScoredMember>>;

    /// Adds `delta` to the member's score, inserting it at `delta` when
    /// absent. Returns the new score.
    async fn zincr_by(&self, key: &str, delta: f64, member: &str) -> CacheResult<f64>;

    // Batch.

    /// Applies `commands` atomically, with no other writer interleaved, and
    /// returns each command's result in queue order.
    async fn exec(&self, commands: Vec<Command>) -> CacheResult<Vec<Reply>>;
}

impl dyn Persistor + '_ {
    /// Starts an atomic command batch against this store.
    pub fn multi(&self) -> Multi<'_> {
        Multi::new(self)
    }
}

/// A queue of commands executed atomically by [`Multi::exec`].
///
/// Mirrors the [`Persistor`] method surface (minus `multi` itself); nothing
/// touches the store until `exec` is called.
#[must_use = "queued commands do nothing until exec() is called"]
pub struct Multi<'a> {
    persistor: &'a dyn Persistor,
    queue: Vec<Command>,
}

impl<'a> Multi<'a> {
    pub fn new(persistor: &'a dyn Persistor) -> Self {
        Self {
            persistor,
            queue: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn push(mut self, command: Command) -> Self {
        self.queue.push(command);
        self
    }

    pub fn get(self, key: impl Into<String>) -> Self {
        self.push(Command::Get { key: key.into() })
    }

    pub fn set(self, key: impl Into<String>, value: impl Into<String>, options: SetOptions) -> Self {
        self.push(Command::Set {
            key: key.into(),
            value: value.into(),
            options,
        })
    }

    pub fn del(self, keys: Vec<String>) -> Self {
        self.push(Command::Del { keys })
    }

    pub fn expire(self, key: impl Into<String>, secs: u64) -> Self {
        self.push(Command::Expire {
            key: key.into(),
            secs,
        })
    }

    pub fn ttl(self, key: impl Into<String>) -> Self {
        self.push(Command::Ttl { key: key.into() })
    }

    pub fn exists(self, keys: Vec<String>) -> Self {
        self.push(Command::Exists { keys })
    }

    pub fn incr(self, key: impl Into<String>) -> Self {
        self.incr_by(key, 1)
    }

    pub fn decr(self, key: impl Into<String>) -> Self {
        self.incr_by(key, -1)
    }

    pub fn incr_by(self, key: impl Into<String>, delta: i64) -> Self {
        self.push(Command::IncrBy {
            key: key.into(),
            delta,
        })
    }

    pub fn decr_by(self, key: impl Into<String>, delta: i64) -> Self {
        self.incr_by(key, -delta)
    }

    pub fn flush_all(self) -> Self {
        self.push(Command::FlushAll)
    }

    pub fn hset(self, key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        self.push(Command::HSet {
            key: key.into(),
            fields,
        })
    }

    pub fn hget(self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.push(Command::HGet {
            key: key.into(),
            field: field.into(),
        })
    }

    pub fn hgetall(self, key: impl Into<String>) -> Self {
        self.push(Command::HGetAll { key: key.into() })
    }

    pub fn lpush(self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.push(Command::LPush {
            key: key.into(),
            values,
        })
    }

    pub fn rpush(self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.push(Command::RPush {
            key: key.into(),
            values,
        })
    }

    pub fn lpop(self, key: impl Into<String>) -> Self {
        self.push(Command::LPop { key: key.into() })
    }

    pub fn rpop(self, key: impl Into<String>) -> Self {
        self.push(Command::RPop { key: key.into() })
    }

    pub fn lrange(self, key: impl Into<String>, start: i64, stop: i64) -> Self {
        self.push(Command::LRange {
            key: key.into(),
            start,
            stop,
        })
    }

    pub fn sadd(self, key: impl Into<String>, members: Vec<String>) -> Self {
        self.push(Command::SAdd {
            key: key.into(),
            members,
        })
    }

    pub fn srem(self, key: impl Into<String>, members: Vec<String>) -> Self {
        self.push(Command::SRem {
            key: key.into(),
            members,
        })
    }

    pub fn smembers(self, key: impl Into<String>) -> Self {
        self.push(Command::SMembers { key: key.into() })
    }

    pub fn zadd(self, key: impl Into<String>, members: Vec<ScoredMember>) -> Self {
        self.push(Command::ZAdd {
            key: key.into(),
            members,
        })
    }

    pub fn zrem(self, key: impl Into<String>, members: Vec<String>) -> Self {
        self.push(Command::ZRem {
            key: key.into(),
            members,
        })
    }

    pub fn zrange(self, key: impl Into<String>, start: i64, stop: i64) -> Self {
        self.push(Command::ZRange {
            key: key.into(),
            start,
            stop,
        })
    }

    pub fn zrange_with_scores(
        self,
        key: impl Into<String>,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Self {
        self.push(Command::ZRangeWithScores {
            key: key.into(),
            start,
            stop,
            rev,
        })
    }

    pub fn zscore(self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.push(Command::ZScore {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn zrank(self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.push(Command::ZRank {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn zcount(self, key: impl Into<String>, min: f64, max: f64) -> Self {
        self.push(Command::ZCount {
            key: key.into(),
            min,
            max,
        })
    }

    pub fn zrange_by_score(self, key: impl Into<String>, min: f64, max: f64) -> Self {
        self.push(Command::ZRangeByScore {
            key: key.into(),
            min,
            max,
        })
    }

    pub fn zrange_by_score_with_scores(self, key: impl Into<String>, min: f64, max: f64) -> Self {
        self.push(Command::ZRangeByScoreWithScores {
            key: key.into(),
            min,
            max,
        })
    }

    pub fn zincr_by(self, key: impl Into<String>, delta: f64, member: impl Into<String>) -> Self {
        self.push(Command::ZIncrBy {
            key: key.into(),
            delta,
            member: member.into(),
        })
    }

    /// Executes the queued commands atomically and returns their results in
    /// queue order.
    pub async fn exec(self) -> CacheResult<Vec<Reply>> {
        self.persistor.exec(self.queue).await
    }
}
