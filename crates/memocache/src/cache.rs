use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{Config, StorageMode};
use crate::error::{CacheError, CacheResult};
use crate::expiry::{SetExpiry, SetOptions};
use crate::options::CachingOptions;
use crate::persistor::connection::{Connect, ConnectionHooks, ConnectionManager, DEFAULT_NAME};
use crate::persistor::MemoryPersistor;
use crate::serializer::{EnvelopeCodec, Serializer};
use crate::utils::CallOnDrop;

/// The broadcast end of an in-flight computation.
///
/// Everyone requesting the same key while the computation runs awaits a clone
/// of this and receives the same result.
type ComputationChannel<R> = Shared<oneshot::Receiver<CacheResult<R>>>;

type ComputationMap<R> = Arc<Mutex<HashMap<String, ComputationChannel<R>>>>;

/// The caching layer around a [`Persistor`].
///
/// A `Cache` holds a connection and the cross-cutting settings (key prefix,
/// codec, fallback TTL); [`wrap`](Self::wrap) turns an async function into a
/// [`CachedFn`] that consults the store before running it.
///
/// Cloning is cheap and clones share the underlying connection.
#[derive(Clone)]
pub struct Cache {
    connection: Arc<ConnectionManager>,
    prefix: Option<String>,
    codec: EnvelopeCodec,
    default_ttl: Duration,
}

impl Cache {
    /// A cache over an existing connection, with default settings.
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            prefix: None,
            codec: EnvelopeCodec,
            default_ttl: crate::expiry::DEFAULT_TTL,
        }
    }

    /// A self-contained cache over a fresh in-process store.
    pub fn in_memory() -> Self {
        Self::new(ConnectionManager::ready_now(
            DEFAULT_NAME,
            Arc::new(MemoryPersistor::new()),
        ))
    }

    /// Builds a cache from a [`Config`]. In remote mode `connector` is used
    /// to establish the named connection in the background; in in-memory mode
    /// it is ignored.
    pub fn from_config(config: &Config, connector: Arc<dyn Connect>) -> Self {
        let connection = match config.mode {
            StorageMode::InMemory => ConnectionManager::ready_now(
                config.connection_name.as_deref().unwrap_or(DEFAULT_NAME),
                Arc::new(MemoryPersistor::new()),
            ),
            StorageMode::Remote => ConnectionManager::connect(
                config.connection_name.as_deref().unwrap_or(DEFAULT_NAME),
                connector,
                config.connection,
                ConnectionHooks::default(),
            ),
        };
        Self {
            connection,
            prefix: config.prefix.clone(),
            codec: EnvelopeCodec,
            default_ttl: config.default_ttl,
        }
    }

    /// Prepends `prefix:` to every key this cache touches.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Overrides the TTL used when a call site's expiry hook cannot produce
    /// one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_owned(),
        }
    }

    /// Wraps `delegate` so each call first consults the store.
    ///
    /// The returned [`CachedFn`] deduplicates concurrent calls per key: while
    /// a computation for a key is in flight, further calls for that key await
    /// its result instead of running the delegate again.
    ///
    /// Deduplication is scoped to the returned wrapper (and its clones), not
    /// to the process: two independent `wrap` calls resolving the same key
    /// can each run their own computation. Callers that need one computation
    /// per key must share the wrapper, typically by cloning it.
    pub fn wrap<A, R, F, Fut>(&self, delegate: F, options: CachingOptions<A, R>) -> CachedFn<A, R, F>
    where
        A: Clone + Send + Sync + 'static,
        R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        CachedFn {
            cache: self.clone(),
            delegate,
            options: Arc::new(options),
            pending: Arc::new(Mutex::new(HashMap::new())),
            last_ttl: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// An async function with a cache in front of it.
///
/// Created by [`Cache::wrap`]. Cloning shares the in-flight computation map,
/// so clones deduplicate against each other; separately wrapped functions do
/// not, even when their keys collide.
pub struct CachedFn<A, R, F> {
    cache: Cache,
    delegate: F,
    options: Arc<CachingOptions<A, R>>,
    pending: ComputationMap<R>,
    // Last expiration written per key, used to flag call sites that disagree
    // about a key's TTL.
    last_ttl: Arc<Mutex<HashMap<String, SetExpiry>>>,
}

impl<A, R, F> Clone for CachedFn<A, R, F>
where
    F: Clone,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            delegate: self.delegate.clone(),
            options: self.options.clone(),
            pending: self.pending.clone(),
            last_ttl: self.last_ttl.clone(),
        }
    }
}

impl<A, R, F, Fut> CachedFn<A, R, F>
where
    A: Clone + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    /// Returns the cached value for the call's key, computing and storing it
    /// on a miss.
    ///
    /// A failing delegate is never cached; the error is broadcast to every
    /// caller that joined the in-flight computation, and the next call runs
    /// the delegate again.
    pub async fn call(&self, args: A) -> CacheResult<R> {
        let key = self.cache.full_key(&self.options.resolve_key(&args));

        let channel = {
            // No await between the lookup and the insert, so two callers can
            // never race a second computation for the same key.
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(channel) => channel.clone(),
                None => {
                    let channel = self.spawn_computation(key.clone(), args);
                    pending.insert(key, channel.clone());
                    channel
                }
            }
        };

        match channel.await {
            Ok(result) => result,
            Err(_canceled) => Err(CacheError::Interrupted),
        }
    }

    /// Spawns the lookup/compute task for `key` and returns the channel its
    /// result will be broadcast on.
    fn spawn_computation(&self, key: String, args: A) -> ComputationChannel<R> {
        let (sender, receiver) = oneshot::channel();

        let pending = self.pending.clone();
        let evict_key = key.clone();
        let evict_token = CallOnDrop::new(move || {
            pending.lock().remove(&evict_key);
        });

        let cache = self.cache.clone();
        let delegate = self.delegate.clone();
        let options = self.options.clone();
        let last_ttl = self.last_ttl.clone();

        tokio::spawn(async move {
            let result = lookup_or_compute(cache, delegate, options, last_ttl, &key, args).await;
            // Evict before publishing, so a caller arriving right after the
            // broadcast reads the freshly stored value instead of joining a
            // finished channel.
            evict_token.call();
            sender.send(result).ok();
        });

        receiver.shared()
    }
}

async fn lookup_or_compute<A, R, F, Fut>(
    cache: Cache,
    delegate: F,
    options: Arc<CachingOptions<A, R>>,
    last_ttl: Arc<Mutex<HashMap<String, SetExpiry>>>,
    key: &str,
    args: A,
) -> CacheResult<R>
where
    R: Serialize + DeserializeOwned + Clone,
    F: Fn(A) -> Fut,
    Fut: Future<Output = anyhow::Result<R>>,
    A: Clone,
{
    let persistor = cache.connection.ready().await?;

    if let Some(envelope) = persistor.get(key).await? {
        match cache.codec.deserialize(&envelope) {
            Ok(value) => {
                tracing::trace!(key, "cache hit");
                return Ok(value);
            }
            Err(err) => {
                // Recompute rather than fail; the fresh write repairs the
                // entry.
                tracing::warn!(key, error = %err, "discarding undecodable cache entry");
            }
        }
    }

    tracing::trace!(key, "cache miss, running delegate");
    let result = delegate(args.clone())
        .await
        .map_err(|err| CacheError::Computation(format!("{err:#}")))?;

    let expiry = options
        .expiry
        .resolve(&args, &result, cache.default_ttl)
        .map(|expiry| expiry.to_set_expiry(Utc::now()));
    note_ttl(&last_ttl, key, expiry);

    // Storing is best effort: the computed value is returned to callers even
    // when the write fails.
    match cache.codec.serialize(&result) {
        Ok(envelope) => {
            let set = SetOptions {
                expiry,
                only_if_absent: false,
            };
            if let Err(err) = persistor.set(key, &envelope, set).await {
                tracing::warn!(key, error = %err, "failed to store computed value");
            }
        }
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to encode computed value");
        }
    }

    Ok(result)
}

/// Records the expiration written for `key` and warns when call sites
/// disagree on a relative TTL. Absolute deadlines legitimately differ between
/// calls and are not compared. The latest value always wins.
fn note_ttl(last_ttl: &Mutex<HashMap<String, SetExpiry>>, key: &str, expiry: Option<SetExpiry>) {
    let Some(expiry) = expiry else { return };
    let mut last_ttl = last_ttl.lock();
    if let Some(previous) = last_ttl.insert(key.to_owned(), expiry)
        && let (Some(previous_ms), Some(new_ms)) = (previous.relative_ms(), expiry.relative_ms())
        && previous_ms != new_ms
    {
        tracing::warn!(
            key,
            previous_ms,
            new_ms,
            "ttl differs from the previous write for this key, honoring the latest"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_key_applies_prefix() {
        let cache = Cache::in_memory();
        assert_eq!(cache.full_key("quote-5"), "quote-5");

        let cache = cache.with_prefix("user");
        assert_eq!(cache.full_key("quote-5"), "user:quote-5");
    }

    #[test]
    fn test_note_ttl_honors_latest() {
        let ttls = Mutex::new(HashMap::new());
        note_ttl(&ttls, "k", Some(SetExpiry::Px(300)));
        note_ttl(&ttls, "k", Some(SetExpiry::Px(600)));
        assert_eq!(ttls.lock().get("k"), Some(&SetExpiry::Px(600)));

        // Absolute deadlines are recorded but not compared.
        note_ttl(&ttls, "k", Some(SetExpiry::PxAt(1_700_000_000_000)));
        assert_eq!(ttls.lock().get("k"), Some(&SetExpiry::PxAt(1_700_000_000_000)));

        note_ttl(&ttls, "k", None);
        assert_eq!(ttls.lock().get("k"), Some(&SetExpiry::PxAt(1_700_000_000_000)));
    }
}
