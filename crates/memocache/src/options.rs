use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::expiry::Expiry;

/// How the cache key is obtained for a call.
///
/// Represented as a tagged variant rather than runtime type inspection; the
/// key is resolved into a concrete string once per call, before any store
/// interaction.
pub enum KeySpec<A> {
    /// A fixed key: every call shares one cache bucket.
    Static(String),
    /// A key computed from the call's arguments: one bucket per argument set.
    ///
    /// The function must be pure: identical arguments must yield identical
    /// keys.
    Computed(Box<dyn Fn(&A) -> String + Send + Sync>),
}

/// How the expiration is obtained for a freshly computed value.
pub enum ExpirySpec<A, R> {
    /// No expiration: the value stays until overwritten.
    None,
    /// A fixed expiry for every call.
    Fixed(Expiry),
    /// An expiry computed from the call's arguments and the delegate's
    /// result. Returning `None` means "unresolvable" and falls back to
    /// [`DEFAULT_TTL`](crate::expiry::DEFAULT_TTL).
    Computed(Box<dyn Fn(&A, &R) -> Option<Expiry> + Send + Sync>),
}

impl<A, R> ExpirySpec<A, R> {
    /// Resolves the expiry against a finished call, with `fallback` covering
    /// the unresolvable case.
    pub(crate) fn resolve(&self, args: &A, result: &R, fallback: Duration) -> Option<Expiry> {
        match self {
            ExpirySpec::None => None,
            ExpirySpec::Fixed(expiry) => Some(*expiry),
            ExpirySpec::Computed(f) => Some(f(args, result).unwrap_or(Expiry::In(fallback))),
        }
    }
}

/// Per call-site caching configuration: how to derive the key, and how long
/// the computed value stays valid. Constructed once per
/// [`Cache::wrap`](crate::Cache::wrap) call and immutable thereafter.
pub struct CachingOptions<A, R> {
    pub(crate) key: KeySpec<A>,
    pub(crate) expiry: ExpirySpec<A, R>,
}

impl<A, R> CachingOptions<A, R> {
    /// Caches under a fixed key.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: KeySpec::Static(key.into()),
            expiry: ExpirySpec::None,
        }
    }

    /// Caches under a key computed from the call's arguments.
    pub fn key_fn(f: impl Fn(&A) -> String + Send + Sync + 'static) -> Self {
        Self {
            key: KeySpec::Computed(Box::new(f)),
            expiry: ExpirySpec::None,
        }
    }

    /// Expires values a fixed duration after they are written.
    pub fn expire_in(mut self, ttl: Duration) -> Self {
        self.expiry = ExpirySpec::Fixed(Expiry::In(ttl));
        self
    }

    /// Expires values at a fixed wall-clock instant.
    pub fn expire_at(mut self, deadline: DateTime<Utc>) -> Self {
        self.expiry = ExpirySpec::Fixed(Expiry::At(deadline));
        self
    }

    /// Computes the expiry from the call's arguments and result.
    pub fn expire_with(
        mut self,
        f: impl Fn(&A, &R) -> Option<Expiry> + Send + Sync + 'static,
    ) -> Self {
        self.expiry = ExpirySpec::Computed(Box::new(f));
        self
    }

    pub(crate) fn resolve_key(&self, args: &A) -> String {
        match &self.key {
            KeySpec::Static(key) => key.clone(),
            KeySpec::Computed(f) => f(args),
        }
    }
}
