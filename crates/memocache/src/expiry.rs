use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Fallback TTL applied when a caller's expiry hook cannot produce a usable
/// expiration. Caching for one second bounds the blast radius of a
/// misconfigured call site, caching indefinitely would not.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// A caching deadline, either relative to "now" or an absolute point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Expire this long after the value is written.
    In(Duration),
    /// Expire at this wall-clock instant.
    At(DateTime<Utc>),
}

/// Store-level expiration flags, mirroring the wire protocol's `SET` flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetExpiry {
    /// Relative, in milliseconds (`PX`).
    Px(u64),
    /// Relative, in seconds (`EX`).
    Ex(u64),
    /// Absolute unix time, in milliseconds (`PXAT`).
    PxAt(i64),
    /// Absolute unix time, in seconds (`EXAT`).
    ExAt(i64),
}

impl SetExpiry {
    /// Resolves this flag into an absolute deadline relative to `now`.
    pub(crate) fn deadline(self, now: SystemTime) -> SystemTime {
        match self {
            SetExpiry::Px(ms) => now + Duration::from_millis(ms),
            SetExpiry::Ex(secs) => now + Duration::from_secs(secs),
            SetExpiry::PxAt(ms) => UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64),
            SetExpiry::ExAt(secs) => UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64),
        }
    }

    /// The relative TTL in milliseconds, if this is a relative flavor.
    pub(crate) fn relative_ms(self) -> Option<u64> {
        match self {
            SetExpiry::Px(ms) => Some(ms),
            SetExpiry::Ex(secs) => Some(secs * 1000),
            SetExpiry::PxAt(_) | SetExpiry::ExAt(_) => None,
        }
    }
}

/// Options for a store `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// When to expire the written value. `None` keeps it until overwritten.
    pub expiry: Option<SetExpiry>,
    /// Only write if the key does not already hold a live value (`NX`).
    pub only_if_absent: bool,
}

impl SetOptions {
    pub fn with_expiry(expiry: SetExpiry) -> Self {
        Self {
            expiry: Some(expiry),
            only_if_absent: false,
        }
    }

    pub fn if_absent() -> Self {
        Self {
            expiry: None,
            only_if_absent: true,
        }
    }
}

impl Expiry {
    /// Converts this expiry into a store flag, evaluated against `now`.
    ///
    /// An absolute deadline that already passed becomes a 1 ms relative
    /// expiration: the write still happens and the value vanishes almost
    /// instantly, which keeps a stale wall clock from turning into an error.
    pub fn to_set_expiry(self, now: DateTime<Utc>) -> SetExpiry {
        match self {
            Expiry::In(duration) => {
                SetExpiry::Px(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            }
            Expiry::At(deadline) if deadline <= now => SetExpiry::Px(1),
            Expiry::At(deadline) => SetExpiry::PxAt(deadline.timestamp_millis()),
        }
    }
}
