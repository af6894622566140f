//! Protocol version marker type.
//!
//! Provides [`Version<N>`], a const-generic version marker that serializes
//! as a bare integer and rejects mismatched values on deserialization.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A protocol version marker parameterized by its numeric value.
///
/// Serializes as a bare integer (e.g., `1`) and rejects any other value on
/// deserialization. Use the alias [`X402Version1`] rather than naming this directly.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Version<const N: u8>;

impl<const N: u8> Version<N> {
    /// The numeric value of this protocol version.
    pub const VALUE: u8 = N;

    /// Returns `true` if `raw` names this version.
    #[must_use]
    pub const fn matches(raw: u64) -> bool {
        raw == N as u64
    }
}

impl<const N: u8> PartialEq<u8> for Version<N> {
    fn eq(&self, other: &u8) -> bool {
        *other == N
    }
}

impl<const N: u8> From<Version<N>> for u64 {
    fn from(_: Version<N>) -> Self {
        Self::from(N)
    }
}

impl<const N: u8> std::fmt::Display for Version<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{N}")
    }
}

impl<const N: u8> Serialize for Version<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(N)
    }
}

impl<'de, const N: u8> Deserialize<'de> for Version<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        if v == N {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {N}, got {v}"
            )))
        }
    }
}

/// The only protocol version this implementation speaks.
pub type X402Version1 = Version<1>;

/// Value form of [`X402Version1`].
pub const V1: X402Version1 = Version;
