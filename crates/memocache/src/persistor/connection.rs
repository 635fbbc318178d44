//! Connection lifecycle for remote stores.
//!
//! Establishing a connection is asynchronous and may be retried; callers never
//! see a half-connected store. [`ConnectionManager`] runs the connect loop on
//! a background task and publishes its state through a watch channel, so any
//! number of cache calls can await readiness concurrently. Connections are
//! named and deduplicated per [`PersistorRegistry`], which is an explicit
//! object owned by the embedding application rather than process-global
//! state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::ConnectionConfig;
use crate::error::{CacheError, CacheResult};

use super::{MemoryPersistor, Persistor};

/// The name used when a caller does not ask for a specific connection.
pub const DEFAULT_NAME: &str = "local";

/// Produces a connected [`Persistor`].
///
/// Implementations wrap whatever client library reaches the actual store; the
/// manager only cares that `connect` eventually yields a usable handle or an
/// error worth retrying.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    async fn connect(&self) -> anyhow::Result<Arc<dyn Persistor>>;
}

/// Observation hooks into the connect loop.
///
/// All hooks are optional. They exist for the embedding application's
/// bookkeeping (health gauges, circuit breakers) and cannot change what the
/// manager reports, with one exception: `before_retry` returning `false`
/// abandons the remaining attempts.
#[derive(Default)]
pub struct ConnectionHooks {
    /// Runs after each failed attempt, with the error's message.
    pub on_error: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Runs once when a connection is established.
    pub on_success: Option<Box<dyn Fn(&str) + Send + Sync>>,
    /// Runs before each attempt with the 1-based attempt number. Returning
    /// `false` stops the loop and fails the connection immediately.
    pub before_retry: Option<Box<dyn Fn(u32) -> bool + Send + Sync>>,
}

enum ConnectionState {
    /// The connect loop is still running.
    Connecting,
    /// The store is reachable through the contained handle.
    Ready(Arc<dyn Persistor>),
    /// The retry budget is exhausted. Terminal.
    Failed(CacheError),
}

/// A single named connection, from first attempt to terminal state.
///
/// The manager is cheap to share and clone-free: callers hold it in an `Arc`
/// and await [`ready`](Self::ready), which resolves once the background
/// connect loop lands in a terminal state. Operations are never attempted
/// against a store that has not reported ready.
pub struct ConnectionManager {
    name: String,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Starts connecting in the background and returns immediately.
    pub fn connect(
        name: impl Into<String>,
        connector: Arc<dyn Connect>,
        config: ConnectionConfig,
        hooks: ConnectionHooks,
    ) -> Arc<Self> {
        let name = name.into();
        let (tx, rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(connect_loop(name.clone(), connector, config, hooks, tx));

        Arc::new(Self { name, state: rx })
    }

    /// Wraps an already-usable store, skipping the connect loop. Used for the
    /// in-memory mode, where there is nothing to establish.
    pub fn ready_now(name: impl Into<String>, persistor: Arc<dyn Persistor>) -> Arc<Self> {
        let (_tx, rx) = watch::channel(ConnectionState::Ready(persistor));
        Arc::new(Self {
            name: name.into(),
            state: rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until the connection reaches a terminal state and returns the
    /// store handle, or the connection error if it failed.
    pub async fn ready(&self) -> CacheResult<Arc<dyn Persistor>> {
        let mut rx = self.state.clone();
        loop {
            // Scoped so the watch borrow is released before awaiting.
            let resolved = match &*rx.borrow_and_update() {
                ConnectionState::Connecting => None,
                ConnectionState::Ready(persistor) => Some(Ok(persistor.clone())),
                ConnectionState::Failed(err) => Some(Err(err.clone())),
            };
            if let Some(resolved) = resolved {
                return resolved;
            }
            rx.changed().await.map_err(|_| CacheError::Interrupted)?;
        }
    }
}

async fn connect_loop(
    name: String,
    connector: Arc<dyn Connect>,
    config: ConnectionConfig,
    hooks: ConnectionHooks,
    tx: watch::Sender<ConnectionState>,
) {
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if let Some(before_retry) = &hooks.before_retry
            && !before_retry(attempt)
        {
            last_error = "abandoned by retry hook".to_owned();
            tracing::warn!(name = %name, attempt, "connect loop abandoned by retry hook");
            break;
        }

        match connector.connect().await {
            Ok(persistor) => {
                tracing::debug!(name = %name, attempt, "store connection established");
                if let Some(on_success) = &hooks.on_success {
                    on_success(&name);
                }
                tx.send_replace(ConnectionState::Ready(persistor));
                return;
            }
            Err(err) => {
                last_error = format!("{err:#}");
                tracing::warn!(name = %name, attempt, error = %last_error, "connect attempt failed");
                if let Some(on_error) = &hooks.on_error {
                    on_error(&last_error);
                }
                if attempt < max_attempts {
                    tokio::time::sleep(config.backoff * attempt).await;
                }
            }
        }
    }

    tx.send_replace(ConnectionState::Failed(CacheError::ConnectionFailed {
        name,
        attempts: max_attempts,
        message: last_error,
    }));
}

/// A registry of named connections, one [`ConnectionManager`] per name.
///
/// The first request for a name starts its connect loop; later requests for
/// the same name share the existing manager regardless of its state. Failed
/// connections stay failed, callers that need a fresh attempt use a new name
/// or a new registry.
pub struct PersistorRegistry {
    config: ConnectionConfig,
    connections: Mutex<HashMap<String, Arc<ConnectionManager>>>,
}

impl PersistorRegistry {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the connection registered under `name`, starting it if this is
    /// the first request. `None` selects [`DEFAULT_NAME`].
    pub fn get_or_connect(
        &self,
        name: Option<&str>,
        connector: Arc<dyn Connect>,
        hooks: ConnectionHooks,
    ) -> Arc<ConnectionManager> {
        let name = name.unwrap_or(DEFAULT_NAME);
        let mut connections = self.connections.lock();
        if let Some(existing) = connections.get(name) {
            return existing.clone();
        }
        let manager = ConnectionManager::connect(name, connector, self.config, hooks);
        connections.insert(name.to_owned(), manager.clone());
        manager
    }

    /// The connection registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<ConnectionManager>> {
        self.connections.lock().get(name).cloned()
    }
}

/// A [`Connect`] implementation backed by a [`MemoryPersistor`].
///
/// Connecting never fails; it hands out the same shared store every time, so
/// tests and the in-memory mode can pre-populate or inspect it.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnect {
    persistor: Arc<MemoryPersistor>,
}

impl MemoryConnect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persistor(persistor: Arc<MemoryPersistor>) -> Self {
        Self { persistor }
    }

    pub fn persistor(&self) -> Arc<MemoryPersistor> {
        self.persistor.clone()
    }
}

#[async_trait]
impl Connect for MemoryConnect {
    async fn connect(&self) -> anyhow::Result<Arc<dyn Persistor>> {
        Ok(self.persistor.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::expiry::SetOptions;

    use super::*;

    /// Fails the first `failures` connect attempts, then succeeds.
    struct FlakyConnect {
        failures: u32,
        attempts: AtomicU32,
    }

    impl FlakyConnect {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Connect for FlakyConnect {
        async fn connect(&self) -> anyhow::Result<Arc<dyn Persistor>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                anyhow::bail!("store unreachable (attempt {attempt})");
            }
            Ok(Arc::new(MemoryPersistor::new()))
        }
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_connects_first_try() {
        let manager = ConnectionManager::connect(
            "main",
            Arc::new(FlakyConnect::new(0)),
            test_config(),
            ConnectionHooks::default(),
        );
        let persistor = manager.ready().await.unwrap();
        assert!(persistor.set("k", "v", SetOptions::default()).await.unwrap());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let connector = Arc::new(FlakyConnect::new(2));
        let manager = ConnectionManager::connect(
            "main",
            connector.clone(),
            test_config(),
            ConnectionHooks::default(),
        );
        manager.ready().await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fails_after_exhausting_attempts() {
        let manager = ConnectionManager::connect(
            "main",
            Arc::new(FlakyConnect::new(u32::MAX)),
            test_config(),
            ConnectionHooks::default(),
        );
        let err = manager.ready().await.err().unwrap();
        match err {
            CacheError::ConnectionFailed { name, attempts, .. } => {
                assert_eq!(name, "main");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Terminal: asking again reports the same failure.
        assert!(manager.ready().await.is_err());
    }

    #[tokio::test]
    async fn test_hooks_observe_the_loop() {
        let errors = Arc::new(AtomicU32::new(0));
        let successes = Arc::new(AtomicU32::new(0));
        let hooks = ConnectionHooks {
            on_error: Some(Box::new({
                let errors = errors.clone();
                move |_| {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
            })),
            on_success: Some(Box::new({
                let successes = successes.clone();
                move |_| {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            })),
            before_retry: None,
        };

        let manager = ConnectionManager::connect(
            "main",
            Arc::new(FlakyConnect::new(2)),
            test_config(),
            hooks,
        );
        manager.ready().await.unwrap();

        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_hook_can_abandon() {
        let hooks = ConnectionHooks {
            before_retry: Some(Box::new(|attempt| attempt < 2)),
            ..Default::default()
        };
        let connector = Arc::new(FlakyConnect::new(u32::MAX));
        let manager =
            ConnectionManager::connect("main", connector.clone(), test_config(), hooks);

        let err = manager.ready().await.err().unwrap();
        assert!(matches!(err, CacheError::ConnectionFailed { .. }));
        // Attempt 2 was vetoed, only the first ran.
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_shares_connections_by_name() {
        let registry = PersistorRegistry::new(test_config());
        let connector = Arc::new(FlakyConnect::new(0));

        let a = registry.get_or_connect(Some("quotes"), connector.clone(), Default::default());
        let b = registry.get_or_connect(Some("quotes"), connector.clone(), Default::default());
        let other = registry.get_or_connect(None, connector.clone(), Default::default());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(other.name(), DEFAULT_NAME);

        a.ready().await.unwrap();
        other.ready().await.unwrap();
        // One connect per distinct name.
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        assert!(registry.get("quotes").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_memory_connect_shares_one_store() {
        let connect = MemoryConnect::new();
        let a = connect.connect().await.unwrap();
        let b = connect.connect().await.unwrap();

        a.set("k", "v", SetOptions::default()).await.unwrap();
        assert_eq!(b.get("k").await.unwrap(), Some("v".to_owned()));
    }
}
