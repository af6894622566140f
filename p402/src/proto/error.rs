//! Error taxonomy for payment verification and settlement.
//!
//! [`PaymentError`] is what the verifier and settler produce internally;
//! [`ErrorKind`] is the machine-readable code that travels on the wire.
//! Every message that leaves the process goes through
//! [`sanitize_error_message`] first.

use serde::{Deserialize, Serialize};

/// Upper bound on the length of any error message exposed to clients.
pub const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// Machine-readable error codes for payment failures.
///
/// Serialized in `snake_case`. Codes received from a remote facilitator that
/// this version does not know deserialize as [`ErrorKind::Unexpected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Requirements are missing a field or carry an unparseable one.
    InvalidRequirements,
    /// Protocol version other than `1`.
    UnsupportedVersion,
    /// Scheme other than `"exact"`.
    UnsupportedScheme,
    /// Network identifier does not resolve.
    NetworkUnsupported,
    /// Transport string could not be decoded into a payload.
    InvalidPayload,
    /// Decoded payload is structurally incomplete.
    MalformedAuthorization,
    /// Payload recipient differs from the required `payTo`.
    RecipientMismatch,
    /// Payload amount is below the required amount.
    InsufficientAmount,
    /// Payload timestamp is older than `maxTimeoutSeconds`.
    AuthorizationExpired,
    /// Signature does not recover to the claimed sender.
    InvalidSignature,
    /// Paying account cannot cover the transfer.
    InsufficientBalance,
    /// Asset class has no settlement path, or the payload names another asset.
    UnsupportedAsset,
    /// Transfer was rejected or reverted.
    SettlementFailed,
    /// Transfer was broadcast but no receipt arrived in time.
    SettlementTimeout,
    /// Any code not listed above.
    #[serde(other)]
    Unexpected,
}

impl ErrorKind {
    /// Returns the `snake_case` code matching the wire format.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequirements => "invalid_requirements",
            Self::UnsupportedVersion => "unsupported_version",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::NetworkUnsupported => "network_unsupported",
            Self::InvalidPayload => "invalid_payload",
            Self::MalformedAuthorization => "malformed_authorization",
            Self::RecipientMismatch => "recipient_mismatch",
            Self::InsufficientAmount => "insufficient_amount",
            Self::AuthorizationExpired => "authorization_expired",
            Self::InvalidSignature => "invalid_signature",
            Self::InsufficientBalance => "insufficient_balance",
            Self::UnsupportedAsset => "unsupported_asset",
            Self::SettlementFailed => "settlement_failed",
            Self::SettlementTimeout => "settlement_timeout",
            Self::Unexpected => "unexpected",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment-domain failure.
///
/// These never cross the verifier/settler boundary as `Err`; they are folded
/// into a [`VerificationResult`](super::VerificationResult) or
/// [`SettlementResult`](super::SettlementResult).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PaymentError {
    /// See [`ErrorKind::InvalidRequirements`].
    #[error("Invalid payment requirements: {0}")]
    InvalidRequirements(String),
    /// See [`ErrorKind::UnsupportedVersion`].
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u64),
    /// See [`ErrorKind::UnsupportedScheme`].
    #[error("Unsupported payment scheme '{0}'")]
    UnsupportedScheme(String),
    /// See [`ErrorKind::NetworkUnsupported`].
    #[error("Network '{network}' is not supported; supported networks: {}", supported.join(", "))]
    NetworkUnsupported {
        /// The identifier that failed to resolve.
        network: String,
        /// Every identifier that would have resolved.
        supported: Vec<String>,
    },
    /// See [`ErrorKind::InvalidPayload`].
    #[error("Invalid payment payload: {0}")]
    InvalidPayload(String),
    /// See [`ErrorKind::MalformedAuthorization`].
    #[error("Malformed authorization: {0}")]
    MalformedAuthorization(String),
    /// See [`ErrorKind::RecipientMismatch`].
    #[error("Payment recipient {actual} does not match required recipient {expected}")]
    RecipientMismatch {
        /// Required `payTo`.
        expected: String,
        /// Recipient named in the payload.
        actual: String,
    },
    /// See [`ErrorKind::InsufficientAmount`].
    #[error("Payment amount {actual} is below the required amount {required}")]
    InsufficientAmount {
        /// Required amount in smallest units.
        required: String,
        /// Amount named in the payload.
        actual: String,
    },
    /// See [`ErrorKind::AuthorizationExpired`].
    #[error("Payment authorization is {age}s old, exceeding the {max}s timeout")]
    AuthorizationExpired {
        /// Seconds since the payload timestamp.
        age: u64,
        /// Allowed age.
        max: u64,
    },
    /// A timestamp further in the future than the clock-skew allowance.
    ///
    /// Reported as [`ErrorKind::AuthorizationExpired`]: the payload is outside
    /// its validity window.
    #[error("Payment authorization is dated {ahead}s in the future, beyond the {max}s allowance")]
    AuthorizationFromFuture {
        /// Seconds the payload timestamp lies ahead of the verifier's clock.
        ahead: u64,
        /// Allowed lead.
        max: u64,
    },
    /// See [`ErrorKind::InvalidSignature`].
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    /// See [`ErrorKind::InsufficientBalance`].
    #[error("On-chain balance {available} cannot cover {required}")]
    InsufficientBalance {
        /// Amount that has to be covered.
        required: String,
        /// Balance observed on-chain.
        available: String,
    },
    /// See [`ErrorKind::UnsupportedAsset`].
    #[error("Settlement of asset '{0}' is not supported")]
    UnsupportedAsset(String),
    /// The payload declares an asset other than the required one.
    ///
    /// Reported as [`ErrorKind::UnsupportedAsset`].
    #[error("Payment asset '{actual}' does not match required asset '{expected}'")]
    AssetMismatch {
        /// Asset from the requirements.
        expected: String,
        /// Asset declared by the payload.
        actual: String,
    },
    /// See [`ErrorKind::SettlementFailed`].
    #[error("Settlement failed: {0}")]
    SettlementFailed(String),
    /// See [`ErrorKind::SettlementTimeout`].
    #[error("Settlement receipt not received within {timeout_secs}s")]
    SettlementTimeout {
        /// How long the receipt wait lasted.
        timeout_secs: u64,
        /// Hash of the broadcast transaction, which may still confirm.
        transaction_hash: Option<String>,
    },
}

impl PaymentError {
    /// Returns the wire code for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequirements(_) => ErrorKind::InvalidRequirements,
            Self::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            Self::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            Self::NetworkUnsupported { .. } => ErrorKind::NetworkUnsupported,
            Self::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Self::MalformedAuthorization(_) => ErrorKind::MalformedAuthorization,
            Self::RecipientMismatch { .. } => ErrorKind::RecipientMismatch,
            Self::InsufficientAmount { .. } => ErrorKind::InsufficientAmount,
            Self::AuthorizationExpired { .. } | Self::AuthorizationFromFuture { .. } => {
                ErrorKind::AuthorizationExpired
            }
            Self::InvalidSignature(_) => ErrorKind::InvalidSignature,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::UnsupportedAsset(_) | Self::AssetMismatch { .. } => ErrorKind::UnsupportedAsset,
            Self::SettlementFailed(_) => ErrorKind::SettlementFailed,
            Self::SettlementTimeout { .. } => ErrorKind::SettlementTimeout,
        }
    }

    /// Returns the client-safe rendering of this error.
    #[must_use]
    pub fn message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Makes an error message safe to show to a client.
///
/// Control characters (newlines included) become spaces, whitespace runs
/// collapse, and the result is capped at [`MAX_ERROR_MESSAGE_LEN`] characters
/// with a trailing ellipsis when cut.
#[must_use]
pub fn sanitize_error_message(raw: &str) -> String {
    let flattened: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = flattened.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_wire_codes() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::AuthorizationExpired).unwrap(),
            "\"authorization_expired\""
        );
        let parsed: ErrorKind = serde_json::from_str("\"settlement_timeout\"").unwrap();
        assert_eq!(parsed, ErrorKind::SettlementTimeout);
        let unknown: ErrorKind = serde_json::from_str("\"brand_new_code\"").unwrap();
        assert_eq!(unknown, ErrorKind::Unexpected);
    }

    #[test]
    fn test_as_str_matches_serde() {
        for kind in [
            ErrorKind::InvalidRequirements,
            ErrorKind::NetworkUnsupported,
            ErrorKind::InsufficientBalance,
            ErrorKind::UnsupportedAsset,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json.trim_matches('"'), kind.as_str());
        }
    }

    #[test]
    fn test_network_unsupported_lists_supported_set() {
        let err = PaymentError::NetworkUnsupported {
            network: "moon".into(),
            supported: vec!["base".into(), "base-sepolia".into()],
        };
        assert_eq!(err.kind(), ErrorKind::NetworkUnsupported);
        assert!(err.to_string().contains("base, base-sepolia"));
    }

    #[test]
    fn test_window_and_asset_errors_share_wire_codes() {
        let early = PaymentError::AuthorizationFromFuture { ahead: 600, max: 0 };
        assert_eq!(early.kind(), ErrorKind::AuthorizationExpired);
        let mismatch = PaymentError::AssetMismatch {
            expected: "native".into(),
            actual: "0x00000000000000000000000000000000000000cc".into(),
        };
        assert_eq!(mismatch.kind(), ErrorKind::UnsupportedAsset);
        assert!(mismatch.message().contains("native"));
    }

    #[test]
    fn test_sanitize_strips_newlines_and_caps_length() {
        let raw = "rpc error:\n  code -32000\r\n\tnonce too low";
        assert_eq!(
            sanitize_error_message(raw),
            "rpc error: code -32000 nonce too low"
        );

        let long = "x".repeat(MAX_ERROR_MESSAGE_LEN * 2);
        let clean = sanitize_error_message(&long);
        assert_eq!(clean.chars().count(), MAX_ERROR_MESSAGE_LEN);
        assert!(clean.ends_with("..."));
    }
}
