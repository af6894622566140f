//! Unix timestamps for payment authorization freshness.
//!
//! A [`UnixTimestamp`] marks the moment a payer signed an authorization. The
//! verifier compares it against the current clock and the requirement's
//! `maxTimeoutSeconds` to reject stale payloads.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::SystemTime;

/// A Unix timestamp in whole seconds since 1970-01-01T00:00:00Z.
///
/// # Serialization
///
/// Serialized as a JSON integer. Deserialization also accepts a decimal string,
/// since some clients stringify 64-bit integers to survive `JavaScript` number
/// precision limits.
///
/// ```json
/// 1699999999
/// "1699999999"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash, Default)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

struct UnixTimestampVisitor;

impl Visitor<'_> for UnixTimestampVisitor {
    type Value = UnixTimestamp;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("a non-negative integer or a decimal string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(UnixTimestamp(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(UnixTimestamp)
            .map_err(|_| E::custom("timestamp must be a non-negative integer"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.trim()
            .parse::<u64>()
            .map(UnixTimestamp)
            .map_err(|_| E::custom("timestamp must be a non-negative integer"))
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(UnixTimestampVisitor)
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub<u64> for UnixTimestamp {
    type Output = Self;

    fn sub(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_sub(rhs))
    }
}

impl From<u64> for UnixTimestamp {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl UnixTimestamp {
    /// Creates a new [`UnixTimestamp`] from a raw seconds value.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current system time as a [`UnixTimestamp`].
    ///
    /// A clock set before the Unix epoch reads as `0`.
    #[must_use]
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self(now)
    }

    /// Returns the timestamp as raw seconds since the Unix epoch.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Seconds elapsed from `self` until `now`, or `0` if `self` lies in the future.
    #[must_use]
    pub const fn elapsed_until(&self, now: Self) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Seconds `self` lies ahead of `now`, or `0` if it is not in the future.
    #[must_use]
    pub const fn ahead_of(&self, now: Self) -> u64 {
        self.0.saturating_sub(now.0)
    }
}
