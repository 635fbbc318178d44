//! The in-process reference implementation of [`Persistor`].
//!
//! Everything lives in one mutex-guarded map. Expiration is lazy: the
//! absolute deadline is stored next to the value and checked on every access,
//! so `get` and `ttl` can never observe a logically expired entry as present,
//! independent of any background sweeping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{CacheError, CacheResult};
use crate::expiry::SetOptions;

use super::{Command, Persistor, Reply, ScoredMember};

/// An in-memory store emulating the wire protocol's semantics for strings,
/// hashes, lists, sets and sorted sets, including expiration and atomic
/// batch execution.
///
/// Cloning is cheap and clones share the same underlying store.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistor {
    store: Arc<Mutex<Store>>,
}

impl MemoryPersistor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Eagerly removes every expired entry, returning how many were dropped.
    ///
    /// Purely housekeeping: reads already treat expired entries as absent.
    pub fn purge_expired(&self) -> usize {
        let mut store = self.store.lock();
        let now = SystemTime::now();
        let before = store.entries.len();
        store.entries.retain(|_, entry| !entry.is_expired(now));
        before - store.entries.len()
    }
}

/// One typed value per key; mixing types on the same key is not guarded
/// against, mirroring the wire protocol.
#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Set(HashSet<String>),
    // Insertion order is preserved; queries stable-sort by score, so score
    // ties break by insertion order, deterministically.
    SortedSet(Vec<ScoredMember>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<SystemTime>,
}

impl Entry {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
}

impl Store {
    /// Drops the entry for `key` if its deadline has passed.
    fn purge_key(&mut self, key: &str) {
        if let Some(entry) = self.entries.get(key)
            && entry.is_expired(SystemTime::now())
        {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&Entry> {
        self.purge_key(key);
        self.entries.get(key)
    }

    // String ops.

    fn get(&mut self, key: &str) -> Option<String> {
        match self.live(key) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: String, options: SetOptions) -> bool {
        let now = SystemTime::now();
        if options.only_if_absent && self.live(key).is_some() {
            return false;
        }
        let expires_at = options.expiry.map(|expiry| expiry.deadline(now));
        self.entries
            .insert(key.to_owned(), Entry { value: Value::Str(value), expires_at });
        true
    }

    fn del(&mut self, keys: &[String]) -> u64 {
        keys.iter()
            .filter(|key| {
                self.purge_key(key);
                self.entries.remove(key.as_str()).is_some()
            })
            .count() as u64
    }

    fn expire(&mut self, key: &str, secs: u64) -> bool {
        self.purge_key(key);
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at =
                    Some(SystemTime::now() + std::time::Duration::from_secs(secs));
                true
            }
            None => false,
        }
    }

    fn ttl(&mut self, key: &str) -> i64 {
        match self.live(key) {
            None => -2,
            Some(entry) => match entry.expires_at {
                None => -1,
                Some(at) => {
                    let remaining_ms = at
                        .duration_since(SystemTime::now())
                        .unwrap_or_default()
                        .as_millis();
                    remaining_ms.div_ceil(1000) as i64
                }
            },
        }
    }

    fn exists(&mut self, keys: &[String]) -> u64 {
        keys.iter().filter(|key| self.live(key).is_some()).count() as u64
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> CacheResult<i64> {
        self.purge_key(key);
        match self.entries.get_mut(key) {
            None => {
                self.entries.insert(
                    key.to_owned(),
                    Entry::persistent(Value::Str(delta.to_string())),
                );
                Ok(delta)
            }
            Some(entry) => {
                let current = match &entry.value {
                    Value::Str(s) => s.parse::<i64>().map_err(|_| {
                        CacheError::store("incr", key, "value is not an integer")
                    })?,
                    _ => return Err(CacheError::store("incr", key, "value is not an integer")),
                };
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| CacheError::store("incr", key, "increment would overflow"))?;
                entry.value = Value::Str(next.to_string());
                Ok(next)
            }
        }
    }

    fn flush_all(&mut self) {
        self.entries.clear();
    }

    // Hash ops.

    fn hash_mut(&mut self, key: &str) -> &mut HashMap<String, String> {
        self.purge_key(key);
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::persistent(Value::Hash(HashMap::new())));
        if !matches!(entry.value, Value::Hash(_)) {
            entry.value = Value::Hash(HashMap::new());
        }
        match &mut entry.value {
            Value::Hash(map) => map,
            _ => unreachable!(),
        }
    }

    fn hset(&mut self, key: &str, fields: &[(String, String)]) -> u64 {
        let map = self.hash_mut(key);
        fields
            .iter()
            .filter(|(field, value)| map.insert(field.clone(), value.clone()).is_none())
            .count() as u64
    }

    fn hget(&mut self, key: &str, field: &str) -> Option<String> {
        match self.live(key) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => map.get(field).cloned(),
            _ => None,
        }
    }

    fn hgetall(&mut self, key: &str) -> HashMap<String, String> {
        match self.live(key) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => map.clone(),
            _ => HashMap::new(),
        }
    }

    // List ops.

    fn list_mut(&mut self, key: &str) -> &mut VecDeque<String> {
        self.purge_key(key);
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::persistent(Value::List(VecDeque::new())));
        if !matches!(entry.value, Value::List(_)) {
            entry.value = Value::List(VecDeque::new());
        }
        match &mut entry.value {
            Value::List(list) => list,
            _ => unreachable!(),
        }
    }

    fn lpush(&mut self, key: &str, values: &[String]) -> u64 {
        let list = self.list_mut(key);
        for value in values {
            list.push_front(value.clone());
        }
        list.len() as u64
    }

    fn rpush(&mut self, key: &str, values: &[String]) -> u64 {
        let list = self.list_mut(key);
        for value in values {
            list.push_back(value.clone());
        }
        list.len() as u64
    }

    fn lpop(&mut self, key: &str) -> Option<String> {
        self.purge_key(key);
        match self.entries.get_mut(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.pop_front(),
            _ => None,
        }
    }

    fn rpop(&mut self, key: &str) -> Option<String> {
        self.purge_key(key);
        match self.entries.get_mut(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.pop_back(),
            _ => None,
        }
    }

    fn lrange(&mut self, key: &str, start: i64, stop: i64) -> Vec<String> {
        match self.live(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => match normalize_range(list.len(), start, stop) {
                Some((start, stop)) => list
                    .iter()
                    .skip(start)
                    .take(stop - start + 1)
                    .cloned()
                    .collect(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    // Set ops.

    fn set_mut(&mut self, key: &str) -> &mut HashSet<String> {
        self.purge_key(key);
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::persistent(Value::Set(HashSet::new())));
        if !matches!(entry.value, Value::Set(_)) {
            entry.value = Value::Set(HashSet::new());
        }
        match &mut entry.value {
            Value::Set(set) => set,
            _ => unreachable!(),
        }
    }

    fn sadd(&mut self, key: &str, members: &[String]) -> u64 {
        let set = self.set_mut(key);
        members.iter().filter(|m| set.insert((*m).clone())).count() as u64
    }

    fn srem(&mut self, key: &str, members: &[String]) -> u64 {
        self.purge_key(key);
        match self.entries.get_mut(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => members.iter().filter(|m| set.remove(m.as_str())).count() as u64,
            _ => 0,
        }
    }

    fn smembers(&mut self, key: &str) -> Vec<String> {
        match self.live(key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                let mut members: Vec<_> = set.iter().cloned().collect();
                members.sort();
                members
            }
            _ => Vec::new(),
        }
    }

    // Sorted-set ops.

    fn zset_mut(&mut self, key: &str) -> &mut Vec<ScoredMember> {
        self.purge_key(key);
        let entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::persistent(Value::SortedSet(Vec::new())));
        if !matches!(entry.value, Value::SortedSet(_)) {
            entry.value = Value::SortedSet(Vec::new());
        }
        match &mut entry.value {
            Value::SortedSet(set) => set,
            _ => unreachable!(),
        }
    }

    /// A copy of the sorted set in canonical (ascending score) order.
    fn zsorted(&mut self, key: &str) -> Vec<ScoredMember> {
        match self.live(key) {
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => {
                let mut sorted = set.clone();
                sorted.sort_by(|a, b| a.score.total_cmp(&b.score));
                sorted
            }
            _ => Vec::new(),
        }
    }

    fn zadd(&mut self, key: &str, members: &[ScoredMember]) -> u64 {
        let set = self.zset_mut(key);
        let mut added = 0;
        for member in members {
            match set.iter_mut().find(|m| m.value == member.value) {
                Some(existing) => existing.score = member.score,
                None => {
                    set.push(member.clone());
                    added += 1;
                }
            }
        }
        added
    }

    fn zrem(&mut self, key: &str, members: &[String]) -> u64 {
        self.purge_key(key);
        match self.entries.get_mut(key) {
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => {
                let before = set.len();
                set.retain(|m| !members.contains(&m.value));
                (before - set.len()) as u64
            }
            _ => 0,
        }
    }

    fn zrange_with_scores(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Vec<ScoredMember> {
        let mut sorted = self.zsorted(key);
        if rev {
            sorted.reverse();
        }
        match normalize_range(sorted.len(), start, stop) {
            Some((start, stop)) => sorted[start..=stop].to_vec(),
            None => Vec::new(),
        }
    }

    fn zscore(&mut self, key: &str, member: &str) -> Option<f64> {
        match self.live(key) {
            Some(Entry {
                value: Value::SortedSet(set),
                ..
            }) => set.iter().find(|m| m.value == member).map(|m| m.score),
            _ => None,
        }
    }

    fn zrank(&mut self, key: &str, member: &str) -> Option<u64> {
        self.zsorted(key)
            .iter()
            .position(|m| m.value == member)
            .map(|rank| rank as u64)
    }

    fn zrange_by_score_with_scores(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Vec<ScoredMember> {
        self.zsorted(key)
            .into_iter()
            .filter(|m| m.score >= min && m.score <= max)
            .collect()
    }

    fn zincr_by(&mut self, key: &str, delta: f64, member: &str) -> f64 {
        let set = self.zset_mut(key);
        match set.iter_mut().find(|m| m.value == member) {
            Some(existing) => {
                existing.score += delta;
                existing.score
            }
            None => {
                set.push(ScoredMember::new(member, delta));
                delta
            }
        }
    }

    /// Applies one batched command, matching the single-call semantics.
    fn apply(&mut self, command: Command) -> CacheResult<Reply> {
        let reply = match command {
            Command::Get { key } => match self.get(&key) {
                Some(value) => Reply::Str(value),
                None => Reply::Nil,
            },
            Command::Set { key, value, options } => {
                if self.set(&key, value, options) {
                    Reply::Ok
                } else {
                    Reply::Nil
                }
            }
            Command::Del { keys } => Reply::Int(self.del(&keys) as i64),
            Command::Expire { key, secs } => Reply::Int(self.expire(&key, secs) as i64),
            Command::Ttl { key } => Reply::Int(self.ttl(&key)),
            Command::Exists { keys } => Reply::Int(self.exists(&keys) as i64),
            Command::IncrBy { key, delta } => Reply::Int(self.incr_by(&key, delta)?),
            Command::FlushAll => {
                self.flush_all();
                Reply::Ok
            }
            Command::HSet { key, fields } => Reply::Int(self.hset(&key, &fields) as i64),
            Command::HGet { key, field } => match self.hget(&key, &field) {
                Some(value) => Reply::Str(value),
                None => Reply::Nil,
            },
            Command::HGetAll { key } => Reply::Map(self.hgetall(&key)),
            Command::LPush { key, values } => Reply::Int(self.lpush(&key, &values) as i64),
            Command::RPush { key, values } => Reply::Int(self.rpush(&key, &values) as i64),
            Command::LPop { key } => match self.lpop(&key) {
                Some(value) => Reply::Str(value),
                None => Reply::Nil,
            },
            Command::RPop { key } => match self.rpop(&key) {
                Some(value) => Reply::Str(value),
                None => Reply::Nil,
            },
            Command::LRange { key, start, stop } => Reply::Array(self.lrange(&key, start, stop)),
            Command::SAdd { key, members } => Reply::Int(self.sadd(&key, &members) as i64),
            Command::SRem { key, members } => Reply::Int(self.srem(&key, &members) as i64),
            Command::SMembers { key } => Reply::Array(self.smembers(&key)),
            Command::ZAdd { key, members } => Reply::Int(self.zadd(&key, &members) as i64),
            Command::ZRem { key, members } => Reply::Int(self.zrem(&key, &members) as i64),
            Command::ZRange { key, start, stop } => Reply::Array(
                self.zrange_with_scores(&key, start, stop, false)
                    .into_iter()
                    .map(|m| m.value)
                    .collect(),
            ),
            Command::ZRangeWithScores { key, start, stop, rev } => {
                Reply::Scored(self.zrange_with_scores(&key, start, stop, rev))
            }
            Command::ZScore { key, member } => match self.zscore(&key, &member) {
                Some(score) => Reply::Float(score),
                None => Reply::Nil,
            },
            Command::ZRank { key, member } => match self.zrank(&key, &member) {
                Some(rank) => Reply::Int(rank as i64),
                None => Reply::Nil,
            },
            Command::ZCount { key, min, max } => {
                Reply::Int(self.zrange_by_score_with_scores(&key, min, max).len() as i64)
            }
            Command::ZRangeByScore { key, min, max } => Reply::Array(
                self.zrange_by_score_with_scores(&key, min, max)
                    .into_iter()
                    .map(|m| m.value)
                    .collect(),
            ),
            Command::ZRangeByScoreWithScores { key, min, max } => {
                Reply::Scored(self.zrange_by_score_with_scores(&key, min, max))
            }
            Command::ZIncrBy { key, delta, member } => {
                Reply::Float(self.zincr_by(&key, delta, &member))
            }
        };
        Ok(reply)
    }
}

/// Normalizes an inclusive `start..=stop` range with negative-from-the-end
/// indices against a collection of `len` elements.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    if len == 0 {
        return None;
    }
    let start = if start < 0 { len + start } else { start }.max(0);
    let stop = if stop < 0 { len + stop } else { stop }.min(len - 1);
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl Persistor for MemoryPersistor {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.store.lock().get(key))
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> CacheResult<bool> {
        Ok(self.store.lock().set(key, value.to_owned(), options))
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        Ok(self.store.lock().del(keys))
    }

    async fn expire(&self, key: &str, secs: u64) -> CacheResult<bool> {
        Ok(self.store.lock().expire(key, secs))
    }

    async fn ttl(&self, key: &str) -> CacheResult<i64> {
        Ok(self.store.lock().ttl(key))
    }

    async fn exists(&self, keys: &[String]) -> CacheResult<u64> {
        Ok(self.store.lock().exists(keys))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.store.lock().incr_by(key, delta)
    }

    async fn flush_all(&self) -> CacheResult<()> {
        self.store.lock().flush_all();
        Ok(())
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> CacheResult<u64> {
        Ok(self.store.lock().hset(key, fields))
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        Ok(self.store.lock().hget(key, field))
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        Ok(self.store.lock().hgetall(key))
    }

    async fn lpush(&self, key: &str, values: &[String]) -> CacheResult<u64> {
        Ok(self.store.lock().lpush(key, values))
    }

    async fn rpush(&self, key: &str, values: &[String]) -> CacheResult<u64> {
        Ok(self.store.lock().rpush(key, values))
    }

    async fn lpop(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.store.lock().lpop(key))
    }

    async fn rpop(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.store.lock().rpop(key))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        Ok(self.store.lock().lrange(key, start, stop))
    }

    async fn sadd(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.store.lock().sadd(key, members))
    }

    async fn srem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.store.lock().srem(key, members))
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        Ok(self.store.lock().smembers(key))
    }

    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> CacheResult<u64> {
        Ok(self.store.lock().zadd(key, members))
    }

    async fn zrem(&self, key: &str, members: &[String]) -> CacheResult<u64> {
        Ok(self.store.lock().zrem(key, members))
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        Ok(self
            .store
            .lock()
            .zrange_with_scores(key, start, stop, false)
            .into_iter()
            .map(|m| m.value)
            .collect())
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> CacheResult<Vec<ScoredMember>> {
        Ok(self.store.lock().zrange_with_scores(key, start, stop, rev))
    }

    async fn zscore(&self, key: &str, member: &str) -> CacheResult<Option<f64>> {
        Ok(self.store.lock().zscore(key, member))
    }

    async fn zrank(&self, key: &str, member: &str) -> CacheResult<Option<u64>> {
        Ok(self.store.lock().zrank(key, member))
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        Ok(self.store.lock().zrange_by_score_with_scores(key, min, max).len() as u64)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<String>> {
        Ok(self
            .store
            .lock()
            .zrange_by_score_with_scores(key, min, max)
            .into_iter()
            .map(|m| m.value)
            .collect())
    }

    async fn zrange_by_score_with_scores(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> CacheResult<Vec<ScoredMember>> {
        Ok(self.store.lock().zrange_by_score_with_scores(key, min, max))
    }

    async fn zincr_by(&self, key: &str, delta: f64, member: &str) -> CacheResult<f64> {
        Ok(self.store.lock().zincr_by(key, delta, member))
    }

    async fn exec(&self, commands: Vec<Command>) -> CacheResult<Vec<Reply>> {
        // One lock acquisition for the whole batch: no other caller can
        // observe a partially applied sequence.
        let mut store = self.store.lock();
        commands.into_iter().map(|cmd| store.apply(cmd)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::expiry::SetExpiry;

    use super::*;

    fn persistor() -> MemoryPersistor {
        MemoryPersistor::new()
    }

    #[tokio::test]
    async fn test_get_set_round_trip() {
        let store = persistor();
        assert_eq!(store.get("k").await.unwrap(), None);

        assert!(store.set("k", "v", SetOptions::default()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_owned()));

        assert_eq!(store.del(&["k".to_owned()]).await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_only_if_absent() {
        let store = persistor();
        assert!(store.set("k", "first", SetOptions::if_absent()).await.unwrap());
        assert!(!store.set("k", "second", SetOptions::if_absent()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("first".to_owned()));
    }

    #[tokio::test]
    async fn test_expired_value_is_absent() {
        let store = persistor();
        let options = SetOptions::with_expiry(SetExpiry::Px(20));
        store.set("k", "v", options).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_owned()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn test_overwrite_clears_expiry() {
        let store = persistor();
        store
            .set("k", "v", SetOptions::with_expiry(SetExpiry::Px(20)))
            .await
            .unwrap();
        store.set("k", "v2", SetOptions::default()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), Some("v2".to_owned()));
        assert_eq!(store.ttl("k").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_ttl_codes() {
        let store = persistor();
        assert_eq!(store.ttl("missing").await.unwrap(), -2);

        store.set("forever", "v", SetOptions::default()).await.unwrap();
        assert_eq!(store.ttl("forever").await.unwrap(), -1);

        store
            .set("bounded", "v", SetOptions::with_expiry(SetExpiry::Ex(30)))
            .await
            .unwrap();
        let remaining = store.ttl("bounded").await.unwrap();
        assert!((29..=30).contains(&remaining), "ttl was {remaining}");
    }

    #[tokio::test]
    async fn test_expire_and_exists() {
        let store = persistor();
        assert!(!store.expire("missing", 10).await.unwrap());

        store.set("k", "v", SetOptions::default()).await.unwrap();
        assert!(store.expire("k", 10).await.unwrap());
        assert!(store.ttl("k").await.unwrap() > 0);

        let keys = vec!["k".to_owned(), "missing".to_owned(), "k".to_owned()];
        assert_eq!(store.exists(&keys).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_incr_initializes_missing_key() {
        let store = persistor();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr_by("counter", 4).await.unwrap(), 5);
        assert_eq!(store.decr("counter").await.unwrap(), 4);
        assert_eq!(store.decr_by("counter", 2).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = persistor();
        store.set("k", "not a number", SetOptions::default()).await.unwrap();
        let err = store.incr("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Store { op: "incr", .. }));
    }

    #[tokio::test]
    async fn test_incr_rejects_overflow() {
        let store = persistor();
        store
            .set("k", &i64::MAX.to_string(), SetOptions::default())
            .await
            .unwrap();
        let err = store.incr("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Store { op: "incr", .. }));
        // The stored value is untouched.
        assert_eq!(store.get("k").await.unwrap(), Some(i64::MAX.to_string()));

        store.set("k", &i64::MIN.to_string(), SetOptions::default()).await.unwrap();
        assert!(store.decr("k").await.is_err());
    }

    #[tokio::test]
    async fn test_hash_ops() {
        let store = persistor();
        let fields = vec![
            ("a".to_owned(), "1".to_owned()),
            ("b".to_owned(), "2".to_owned()),
        ];
        assert_eq!(store.hset("h", &fields).await.unwrap(), 2);
        // Overwriting an existing field creates nothing new.
        assert_eq!(
            store
                .hset("h", &[("a".to_owned(), "9".to_owned())])
                .await
                .unwrap(),
            0
        );

        assert_eq!(store.hget("h", "a").await.unwrap(), Some("9".to_owned()));
        assert_eq!(store.hget("h", "zzz").await.unwrap(), None);

        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"], "2");
    }

    #[tokio::test]
    async fn test_list_push_pop_order() {
        let store = persistor();
        store
            .rpush("l", &["a".to_owned(), "b".to_owned()])
            .await
            .unwrap();
        store
            .lpush("l", &["x".to_owned(), "y".to_owned()])
            .await
            .unwrap();
        // lpush pushes one at a time: y ends up first.
        assert_eq!(
            store.lrange("l", 0, -1).await.unwrap(),
            vec!["y", "x", "a", "b"]
        );

        assert_eq!(store.lpop("l").await.unwrap(), Some("y".to_owned()));
        assert_eq!(store.rpop("l").await.unwrap(), Some("b".to_owned()));
        assert_eq!(store.lpop("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lrange_negative_indices() {
        let store = persistor();
        let values: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        store.rpush("l", &values).await.unwrap();

        assert_eq!(store.lrange("l", -2, -1).await.unwrap(), vec!["c", "d"]);
        assert_eq!(store.lrange("l", 1, 2).await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.lrange("l", 0, 100).await.unwrap(), values);
        assert!(store.lrange("l", 3, 1).await.unwrap().is_empty());
        assert!(store.lrange("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_ops() {
        let store = persistor();
        let members: Vec<String> = ["b", "a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(store.sadd("s", &members).await.unwrap(), 2);
        assert_eq!(store.smembers("s").await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.srem("s", &["a".to_owned()]).await.unwrap(), 1);
        assert_eq!(store.srem("s", &["zzz".to_owned()]).await.unwrap(), 0);
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_zrank_orders_by_score() {
        let store = persistor();
        let members = vec![
            ScoredMember::new("MSFT", 3000.0),
            ScoredMember::new("AAPL", 1000.0),
            ScoredMember::new("GOOG", 2000.0),
        ];
        store.zadd("tickers", &members).await.unwrap();

        assert_eq!(store.zrank("tickers", "AAPL").await.unwrap(), Some(0));
        assert_eq!(store.zrank("tickers", "GOOG").await.unwrap(), Some(1));
        assert_eq!(store.zrank("tickers", "MSFT").await.unwrap(), Some(2));
        assert_eq!(store.zrank("tickers", "TSLA").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zadd_updates_score_in_place() {
        let store = persistor();
        store
            .zadd("z", &[ScoredMember::new("a", 1.0), ScoredMember::new("b", 2.0)])
            .await
            .unwrap();
        assert_eq!(store.zadd("z", &[ScoredMember::new("a", 5.0)]).await.unwrap(), 0);

        let entries = store.zrange_with_scores("z", 0, -1, false).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ScoredMember::new("b", 2.0));
        assert_eq!(entries[1], ScoredMember::new("a", 5.0));
    }

    #[tokio::test]
    async fn test_zrange_with_scores_ascending_and_rev() {
        let store = persistor();
        store
            .zadd(
                "z",
                &[
                    ScoredMember::new("c", 3.0),
                    ScoredMember::new("a", 1.0),
                    ScoredMember::new("b", 2.0),
                ],
            )
            .await
            .unwrap();

        let ascending = store.zrange_with_scores("z", 0, -1, false).await.unwrap();
        let scores: Vec<f64> = ascending.iter().map(|m| m.score).collect();
        assert_eq!(scores, vec![1.0, 2.0, 3.0]);

        let descending = store.zrange_with_scores("z", 0, 1, true).await.unwrap();
        let values: Vec<&str> = descending.iter().map(|m| m.value.as_str()).collect();
        assert_eq!(values, vec!["c", "b"]);

        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_zrange_score_ties_keep_insertion_order() {
        let store = persistor();
        store
            .zadd(
                "z",
                &[
                    ScoredMember::new("first", 1.0),
                    ScoredMember::new("second", 1.0),
                    ScoredMember::new("third", 1.0),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            store.zrange("z", 0, -1).await.unwrap(),
            vec!["first", "second", "third"]
        );
    }

    #[tokio::test]
    async fn test_zcount_and_score_ranges() {
        let store = persistor();
        store
            .zadd(
                "z",
                &[
                    ScoredMember::new("a", 10.0),
                    ScoredMember::new("b", 20.0),
                    ScoredMember::new("c", 30.0),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.zcount("z", 10.0, 20.0).await.unwrap(), 2);
        assert_eq!(store.zrange_by_score("z", 15.0, 35.0).await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.zscore("z", "b").await.unwrap(), Some(20.0));
        assert_eq!(store.zincr_by("z", 5.0, "b").await.unwrap(), 25.0);
        assert_eq!(store.zincr_by("z", 7.0, "new").await.unwrap(), 7.0);
        assert_eq!(store.zrem("z", &["a".to_owned()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exec_returns_results_in_queue_order() {
        let store = persistor();
        let persistor: &dyn Persistor = &store;
        let replies = persistor
            .multi()
            .set("k", "v", SetOptions::default())
            .incr("c")
            .get("k")
            .exec()
            .await
            .unwrap();

        assert_eq!(
            replies,
            vec![Reply::Ok, Reply::Int(1), Reply::Str("v".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_exec_matches_single_call_semantics() {
        let store = persistor();
        let persistor: &dyn Persistor = &store;
        let replies = persistor
            .multi()
            .zadd("z", vec![ScoredMember::new("a", 2.0), ScoredMember::new("b", 1.0)])
            .zrange_with_scores("z", 0, -1, false)
            .get("missing")
            .exec()
            .await
            .unwrap();

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], Reply::Int(2));
        assert_eq!(
            replies[1],
            Reply::Scored(vec![ScoredMember::new("b", 1.0), ScoredMember::new("a", 2.0)])
        );
        assert_eq!(replies[2], Reply::Nil);
    }

    #[tokio::test]
    async fn test_flush_all_clears_everything() {
        let store = persistor();
        store.set("k", "v", SetOptions::default()).await.unwrap();
        store.sadd("s", &["m".to_owned()]).await.unwrap();
        store.flush_all().await.unwrap();
        assert_eq!(store.exists(&["k".to_owned(), "s".to_owned()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_expired_sweep() {
        let store = persistor();
        store
            .set("gone", "v", SetOptions::with_expiry(SetExpiry::Px(10)))
            .await
            .unwrap();
        store.set("kept", "v", SetOptions::default()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.get("kept").await.unwrap(), Some("v".to_owned()));
    }
}
