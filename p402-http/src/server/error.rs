//! Reasons the payment gateway answers `402 Payment Required`.

use p402::proto::ErrorKind;

/// Code for a verified amount below the route price.
pub const INSUFFICIENT_PAYMENT: &str = "insufficient_payment";
/// Code for a verified asset other than the route's.
pub const INVALID_TOKEN: &str = "invalid_token";
/// Code for a `(sender, nonce)` pair seen within its freshness window.
pub const PAYMENT_REPLAYED: &str = "payment_replayed";
/// Code for a facilitator that could not be reached or failed internally.
pub const FACILITATOR_UNAVAILABLE: &str = "facilitator_unavailable";

/// Terminal rejection of a request to a protected route.
///
/// Every variant becomes a 402. Only [`PaygateError::PaymentRequired`]
/// produces a challenge without an `error` field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaygateError {
    /// No payment header was sent.
    #[error("payment required")]
    PaymentRequired,
    /// The facilitator rejected the payload.
    #[error("{message}")]
    Verification {
        /// Failing gate.
        kind: ErrorKind,
        /// Sanitized explanation from the facilitator.
        message: String,
    },
    /// The verified amount is below the route price.
    #[error("payment of {actual} is below the price of {required}")]
    InsufficientPayment {
        /// Route price in smallest units.
        required: String,
        /// Verified amount.
        actual: String,
    },
    /// The verified asset is not the one the route accepts.
    #[error("route accepts {expected}, payment is in {actual}")]
    InvalidToken {
        /// Asset of the route policy.
        expected: String,
        /// Asset of the verified payment.
        actual: String,
    },
    /// The payment was already presented.
    #[error("nonce {nonce} from {sender} was already used")]
    Replayed {
        /// Payer address.
        sender: String,
        /// Payment nonce.
        nonce: String,
    },
    /// Settlement did not confirm.
    #[error("{message}")]
    Settlement {
        /// `settlement_failed`, `settlement_timeout`, or another settle-time code.
        kind: ErrorKind,
        /// Sanitized explanation from the facilitator.
        message: String,
    },
    /// The facilitator itself failed.
    #[error("the payment facilitator is unavailable")]
    FacilitatorUnavailable,
}

impl PaygateError {
    /// The machine-readable code placed before the message in the 402 body.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::PaymentRequired => None,
            Self::Verification { kind, .. } | Self::Settlement { kind, .. } => Some(kind.as_str()),
            Self::InsufficientPayment { .. } => Some(INSUFFICIENT_PAYMENT),
            Self::InvalidToken { .. } => Some(INVALID_TOKEN),
            Self::Replayed { .. } => Some(PAYMENT_REPLAYED),
            Self::FacilitatorUnavailable => Some(FACILITATOR_UNAVAILABLE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(PaygateError::PaymentRequired.code(), None);
        let expired = PaygateError::Verification {
            kind: ErrorKind::AuthorizationExpired,
            message: "too old".into(),
        };
        assert_eq!(expired.code(), Some("authorization_expired"));
        assert_eq!(
            PaygateError::FacilitatorUnavailable.code(),
            Some("facilitator_unavailable")
        );
        let replayed = PaygateError::Replayed {
            sender: "0xabc".into(),
            nonce: "1".into(),
        };
        assert_eq!(replayed.code(), Some("payment_replayed"));
    }
}
