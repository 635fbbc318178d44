//! A caching layer for expensive async computations.
//!
//! The crate wraps an async function so that each call first consults a
//! backing store and only runs the function on a miss. Three properties hold
//! regardless of the backing store:
//!
//! - **Deduplication**: concurrent calls for the same key share one in-flight
//!   computation and all receive its result, successes and failures alike.
//! - **Round-trip fidelity**: values come back structurally identical to what
//!   was computed, including optional fields and timestamps, via a versioned
//!   envelope codec.
//! - **Failure isolation**: a failing computation is never cached, and a
//!   store that cannot be reached or written degrades to computing without
//!   caching rather than failing the call.
//!
//! # Layers
//!
//! [`Cache`] is the entry point: it owns a connection, a key prefix and the
//! fallback TTL, and [`Cache::wrap`] produces the [`CachedFn`] callers
//! invoke. Underneath, [`persistor::Persistor`] is the store contract,
//! modeled on Redis command semantics; [`persistor::MemoryPersistor`]
//! implements it in process, and [`persistor::connection`] manages the
//! lifecycle of remote implementations with retries and readiness gating.
//!
//! # Example
//!
//! ```
//! use memocache::{Cache, CachingOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> memocache::CacheResult<()> {
//! let cache = Cache::in_memory();
//! let quote = cache.wrap(
//!     |symbol: String| async move { anyhow::Ok(format!("{symbol}: 100")) },
//!     CachingOptions::key_fn(|symbol: &String| format!("quote-{symbol}"))
//!         .expire_in(Duration::from_secs(30)),
//! );
//!
//! let first = quote.call("AAPL".to_owned()).await?;
//! let second = quote.call("AAPL".to_owned()).await?;
//! assert_eq!(first, second);
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Every fallible operation returns [`CacheResult`], whose error type
//! [`CacheError`] is `Clone` so results can be broadcast to every caller of a
//! deduplicated computation.

mod cache;
mod error;
mod expiry;
mod options;
mod serializer;
mod utils;

pub mod config;
pub mod logging;
pub mod persistor;

pub use cache::{Cache, CachedFn};
pub use error::{CacheError, CacheResult};
pub use expiry::{DEFAULT_TTL, Expiry, SetExpiry, SetOptions};
pub use options::{CachingOptions, ExpirySpec, KeySpec};
pub use serializer::{EnvelopeCodec, Serializer};
