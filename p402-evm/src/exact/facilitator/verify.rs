//! Verification gates for the exact scheme.
//!
//! [`check_payment`] runs gates 1 through 10 in order and stops at the first
//! failure. [`check_settlement`] runs the same gates minus freshness, and
//! lets a payload that omits its recipient fall back to `payTo`. Both are
//! pure: no I/O, no clock reads, no state. The optional balance gate lives in
//! [`check_balance`] because it needs the chain.

use alloy_primitives::{Address, U256};
use p402::networks::{NetworkConfig, NetworkRegistry};
use p402::proto::{
    Asset, PaymentDetails, PaymentError, PaymentPayload, PaymentRequirements, decode_payload,
};
use p402::timestamp::UnixTimestamp;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::Eip155SettlementProvider;
use crate::eip712::{PaymentAuthorization, payment_domain};

/// A payload that passed every mandatory gate.
#[derive(Debug, Clone)]
pub struct CheckedPayment {
    /// Canonical name of the resolved network.
    pub network: String,
    /// The decoded payload. When settling, an omitted recipient is filled in
    /// from `payTo`.
    pub payload: PaymentPayload,
    /// Parsed, signature-checked authorization.
    pub authorization: PaymentAuthorization,
    /// Asset the payload pays in. Equal to the requirements' asset.
    pub asset: Asset,
    /// Required amount from the requirements.
    pub required: U256,
}

impl CheckedPayment {
    /// The verified-payment summary returned to callers.
    #[must_use]
    pub fn details(&self) -> PaymentDetails {
        PaymentDetails {
            amount: self.authorization.amount.to_string(),
            asset: self.asset.to_string(),
            sender: self.authorization.sender.to_string(),
            recipient: self.authorization.recipient.to_string(),
            nonce: self.payload.nonce.clone(),
            timestamp: self.payload.timestamp,
        }
    }
}

/// Outcome of the best-effort balance gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceCheck {
    /// The balance was read.
    Checked {
        /// Whether it covers the amount.
        sufficient: bool,
        /// The balance observed.
        balance: U256,
    },
    /// The balance could not be read; the payment proceeds without this signal.
    Unchecked {
        /// Why the read failed.
        reason: String,
    },
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Verify {
        now: UnixTimestamp,
        clock_skew_secs: u64,
    },
    Settle,
}

/// Runs gates 1 through 10 against `requirements` on the `served` network.
///
/// `now` and `clock_skew_secs` drive the freshness gate: a payload is fresh
/// while `now - timestamp <= maxTimeoutSeconds + clock_skew_secs` and
/// `timestamp - now <= clock_skew_secs`.
///
/// # Errors
///
/// Returns the [`PaymentError`] of the first failing gate.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(network = %requirements.network)))]
pub fn check_payment(
    registry: &NetworkRegistry,
    served: &NetworkConfig,
    payload: &str,
    requirements: &PaymentRequirements,
    now: UnixTimestamp,
    clock_skew_secs: u64,
) -> Result<CheckedPayment, PaymentError> {
    run_gates(
        registry,
        served,
        payload,
        requirements,
        Stage::Verify {
            now,
            clock_skew_secs,
        },
    )
}

/// Preconditions of a settlement.
///
/// Same gates as [`check_payment`] except freshness, which belongs to
/// verification: a payment verified at the edge of its window still settles.
/// A payload without a recipient pays `payTo`, and its signature must cover
/// that recipient.
///
/// # Errors
///
/// Returns the [`PaymentError`] of the first failing gate.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(network = %requirements.network)))]
pub fn check_settlement(
    registry: &NetworkRegistry,
    served: &NetworkConfig,
    payload: &str,
    requirements: &PaymentRequirements,
) -> Result<CheckedPayment, PaymentError> {
    run_gates(registry, served, payload, requirements, Stage::Settle)
}

fn run_gates(
    registry: &NetworkRegistry,
    served: &NetworkConfig,
    payload: &str,
    requirements: &PaymentRequirements,
    stage: Stage,
) -> Result<CheckedPayment, PaymentError> {
    // Gates 1-3
    requirements.check()?;

    // Gate 4
    let network = registry.resolve(&requirements.network)?;
    if network.name != served.name {
        return Err(PaymentError::NetworkUnsupported {
            network: requirements.network.clone(),
            supported: vec![served.name.clone()],
        });
    }
    requirements.check_address_format(network)?;

    // Gate 5
    let mut payload = decode_payload(payload)?;

    // Gate 6
    if matches!(stage, Stage::Settle) && payload.recipient.trim().is_empty() {
        payload.recipient.clone_from(&requirements.pay_to);
    }
    assert_complete(&payload, network)?;
    let asset = assert_declared_asset(&payload, requirements)?;
    let authorization = PaymentAuthorization::from_payload(&payload, &network.name)?;

    // Gate 7
    assert_recipient(&authorization.recipient, &payload.recipient, &requirements.pay_to)?;

    // Gate 8
    let required = requirements.required_amount()?;
    assert_enough_value(authorization.amount, required)?;

    // Gate 9
    if let Stage::Verify {
        now,
        clock_skew_secs,
    } = stage
    {
        assert_fresh(
            payload.timestamp,
            now,
            requirements.max_timeout_seconds,
            clock_skew_secs,
        )?;
    }

    // Gate 10
    let domain = payment_domain(requirements, network)?;
    authorization.verify_signature(&domain, &payload.signature)?;

    Ok(CheckedPayment {
        network: network.name.clone(),
        asset,
        payload,
        authorization,
        required,
    })
}

fn assert_complete(payload: &PaymentPayload, network: &NetworkConfig) -> Result<(), PaymentError> {
    let missing: Vec<&str> = [
        ("sender", &payload.sender),
        ("recipient", &payload.recipient),
        ("amount", &payload.amount),
        ("signature", &payload.signature),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| field)
    .collect();
    if !missing.is_empty() {
        return Err(PaymentError::MalformedAuthorization(format!(
            "missing {}",
            missing.join(", ")
        )));
    }
    for (field, value) in [("sender", &payload.sender), ("recipient", &payload.recipient)] {
        if !network.accepts_address(value) {
            return Err(PaymentError::MalformedAuthorization(format!(
                "{field} '{value}' is not a valid {} address",
                network.name
            )));
        }
    }
    Ok(())
}

/// The payload's optional `asset` must name the same asset as the requirements.
fn assert_declared_asset(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
) -> Result<Asset, PaymentError> {
    let required = requirements.asset_kind()?;
    let Some(declared) = payload.asset.as_deref().map(str::trim).filter(|a| !a.is_empty()) else {
        return Ok(required);
    };
    match Asset::parse(declared) {
        Ok(asset) if asset == required => Ok(asset),
        _ => Err(PaymentError::AssetMismatch {
            expected: required.to_string(),
            actual: declared.to_owned(),
        }),
    }
}

/// Compares as addresses when `pay_to` parses as one, otherwise as
/// case-insensitive strings.
fn assert_recipient(
    recipient: &Address,
    raw_recipient: &str,
    pay_to: &str,
) -> Result<(), PaymentError> {
    let matches = pay_to.trim().parse::<Address>().map_or_else(
        |_| raw_recipient.trim().eq_ignore_ascii_case(pay_to.trim()),
        |expected| expected == *recipient,
    );
    if matches {
        Ok(())
    } else {
        Err(PaymentError::RecipientMismatch {
            expected: pay_to.to_owned(),
            actual: raw_recipient.to_owned(),
        })
    }
}

/// Verifies that the authorized amount covers the required amount.
///
/// # Errors
///
/// Returns [`PaymentError::InsufficientAmount`] if `sent < required`.
pub fn assert_enough_value(sent: U256, required: U256) -> Result<(), PaymentError> {
    if sent < required {
        Err(PaymentError::InsufficientAmount {
            required: required.to_string(),
            actual: sent.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Verifies that `timestamp` is at most `max_timeout + clock_skew` seconds old
/// and at most `clock_skew` seconds ahead of `now`.
///
/// # Errors
///
/// Returns [`PaymentError::AuthorizationExpired`] for an older timestamp and
/// [`PaymentError::AuthorizationFromFuture`] for a later one.
pub fn assert_fresh(
    timestamp: UnixTimestamp,
    now: UnixTimestamp,
    max_timeout_secs: u64,
    clock_skew_secs: u64,
) -> Result<(), PaymentError> {
    let ahead = timestamp.ahead_of(now);
    if ahead > clock_skew_secs {
        return Err(PaymentError::AuthorizationFromFuture {
            ahead,
            max: clock_skew_secs,
        });
    }
    let age = timestamp.elapsed_until(now);
    let max = max_timeout_secs.saturating_add(clock_skew_secs);
    if age > max {
        Err(PaymentError::AuthorizationExpired { age, max })
    } else {
        Ok(())
    }
}

/// Gate 11: reads the balance of `owner` and compares it with `amount`.
///
/// Never fails: an unreadable balance is reported as [`BalanceCheck::Unchecked`].
pub async fn check_balance<P: Eip155SettlementProvider>(
    provider: &P,
    owner: Address,
    asset: &Asset,
    amount: U256,
) -> BalanceCheck {
    match provider.balance(owner, asset).await {
        Ok(balance) => BalanceCheck::Checked {
            sufficient: balance >= amount,
            balance,
        },
        Err(e) => BalanceCheck::Unchecked {
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::hex;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use p402::networks::NativeCurrency;
    use p402::proto::{ErrorKind, PayloadEncoding, encode_payload};

    const SELLER: &str = "0x00000000000000000000000000000000000000aa";
    const NOW: u64 = 1_700_000_000;
    const ONE_ETH: &str = "1000000000000000000";

    fn test_net() -> NetworkConfig {
        NetworkConfig::new("test-net", 31337, None, NativeCurrency::ether())
    }

    fn registry() -> NetworkRegistry {
        NetworkRegistry::from_networks([
            test_net(),
            NetworkConfig::new("base", 8453, None, NativeCurrency::ether()),
        ])
    }

    fn requirements() -> PaymentRequirements {
        PaymentRequirements::exact("test-net", SELLER, ONE_ETH.parse().unwrap())
    }

    fn sign(signer: &PrivateKeySigner, payload: &mut PaymentPayload, req: &PaymentRequirements) {
        let auth = PaymentAuthorization::from_payload(payload, "test-net").unwrap();
        let domain = payment_domain(req, &test_net()).unwrap();
        let sig = signer.sign_hash_sync(&auth.signing_hash(&domain)).unwrap();
        payload.signature = hex::encode_prefixed(sig.as_bytes());
    }

    fn signed_payload(signer: &PrivateKeySigner, amount: &str, timestamp: u64) -> PaymentPayload {
        let mut payload = PaymentPayload {
            sender: signer.address().to_string(),
            recipient: SELLER.into(),
            amount: amount.into(),
            nonce: format!("{timestamp}-abc"),
            timestamp: UnixTimestamp::from_secs(timestamp),
            signature: String::new(),
            resource: Some("/weather".into()),
            asset: None,
        };
        sign(signer, &mut payload, &requirements());
        payload
    }

    fn check(payload: &PaymentPayload, req: &PaymentRequirements) -> Result<CheckedPayment, PaymentError> {
        let encoded = encode_payload(payload, PayloadEncoding::Base64).unwrap();
        check_payment(
            &registry(),
            &test_net(),
            &encoded,
            req,
            UnixTimestamp::from_secs(NOW),
            0,
        )
    }

    fn kind(result: Result<CheckedPayment, PaymentError>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    #[test]
    fn test_happy_path_details() {
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, ONE_ETH, NOW - 10);
        let checked = check(&payload, &requirements()).unwrap();
        let details = checked.details();
        assert_eq!(details.amount, ONE_ETH);
        assert_eq!(details.asset, "native");
        assert_eq!(details.sender, signer.address().to_string());
        assert_eq!(details.nonce, payload.nonce);
        assert_eq!(checked.network, "test-net");
    }

    #[test]
    fn test_checks_are_repeatable() {
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, ONE_ETH, NOW);
        let first = check(&payload, &requirements()).unwrap();
        let second = check(&payload, &requirements()).unwrap();
        assert_eq!(first.details(), second.details());
    }

    #[test]
    fn test_amount_boundary() {
        let signer = PrivateKeySigner::random();
        let exact = signed_payload(&signer, ONE_ETH, NOW);
        assert!(check(&exact, &requirements()).is_ok());

        let under = signed_payload(&signer, "999999999999999999", NOW);
        assert_eq!(kind(check(&under, &requirements())), ErrorKind::InsufficientAmount);

        let over = signed_payload(&signer, "1000000000000000001", NOW);
        assert!(check(&over, &requirements()).is_ok());
    }

    #[test]
    fn test_timeout_boundary() {
        let signer = PrivateKeySigner::random();
        let edge = signed_payload(&signer, ONE_ETH, NOW - 300);
        assert!(check(&edge, &requirements()).is_ok());

        let stale = signed_payload(&signer, ONE_ETH, NOW - 301);
        assert_eq!(kind(check(&stale, &requirements())), ErrorKind::AuthorizationExpired);
    }

    #[test]
    fn test_clock_skew_extends_window() {
        assert!(assert_fresh(
            UnixTimestamp::from_secs(NOW - 310),
            UnixTimestamp::from_secs(NOW),
            300,
            10
        )
        .is_ok());
        assert!(assert_fresh(
            UnixTimestamp::from_secs(NOW - 311),
            UnixTimestamp::from_secs(NOW),
            300,
            10
        )
        .is_err());
    }

    #[test]
    fn test_future_timestamp_never_becomes_valid() {
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, ONE_ETH, NOW + 10_000_000);
        let encoded = encode_payload(&payload, PayloadEncoding::Base64).unwrap();
        for elapsed in [0, 301, 86_400, 9_000_000] {
            let result = check_payment(
                &registry(),
                &test_net(),
                &encoded,
                &requirements(),
                UnixTimestamp::from_secs(NOW + elapsed),
                0,
            );
            assert!(
                matches!(result, Err(PaymentError::AuthorizationFromFuture { .. })),
                "accepted at +{elapsed}s"
            );
        }
    }

    #[test]
    fn test_clock_skew_bounds_future_timestamps() {
        let now = UnixTimestamp::from_secs(NOW);
        assert!(assert_fresh(UnixTimestamp::from_secs(NOW + 10), now, 300, 10).is_ok());
        let err = assert_fresh(UnixTimestamp::from_secs(NOW + 11), now, 300, 10).unwrap_err();
        assert_eq!(err, PaymentError::AuthorizationFromFuture { ahead: 11, max: 10 });
        assert_eq!(err.kind(), ErrorKind::AuthorizationExpired);
        assert!(assert_fresh(UnixTimestamp::from_secs(NOW + 1), now, 300, 0).is_err());
    }

    #[test]
    fn test_settlement_fills_missing_recipient() {
        let signer = PrivateKeySigner::random();
        let mut payload = signed_payload(&signer, ONE_ETH, NOW);
        payload.recipient = String::new();
        let encoded = encode_payload(&payload, PayloadEncoding::Base64).unwrap();

        let checked = check_settlement(&registry(), &test_net(), &encoded, &requirements()).unwrap();
        assert_eq!(checked.authorization.recipient, SELLER.parse::<Address>().unwrap());
        assert_eq!(checked.payload.recipient, SELLER);

        assert_eq!(kind(check(&payload, &requirements())), ErrorKind::MalformedAuthorization);
    }

    #[test]
    fn test_settlement_skips_freshness_but_not_signature() {
        let signer = PrivateKeySigner::random();
        let stale = signed_payload(&signer, ONE_ETH, NOW - 1_000);
        let encoded = encode_payload(&stale, PayloadEncoding::Base64).unwrap();
        assert!(check_settlement(&registry(), &test_net(), &encoded, &requirements()).is_ok());

        let mut forged = stale;
        forged.recipient = String::new();
        let mut req = requirements();
        req.pay_to = "0x00000000000000000000000000000000000000bb".into();
        let encoded = encode_payload(&forged, PayloadEncoding::Base64).unwrap();
        let result = check_settlement(&registry(), &test_net(), &encoded, &req);
        assert_eq!(kind(result), ErrorKind::InvalidSignature);
    }

    #[test]
    fn test_declared_asset_is_checked() {
        let signer = PrivateKeySigner::random();
        let mut payload = signed_payload(&signer, ONE_ETH, NOW);
        payload.asset = Some("0x00000000000000000000000000000000000000cc".into());
        let err = check(&payload, &requirements()).unwrap_err();
        assert!(matches!(err, PaymentError::AssetMismatch { .. }));

        payload.asset = Some("not-an-asset".into());
        assert_eq!(kind(check(&payload, &requirements())), ErrorKind::UnsupportedAsset);

        payload.asset = Some("0x0000000000000000000000000000000000000000".into());
        assert_eq!(check(&payload, &requirements()).unwrap().details().asset, "native");
    }

    #[test]
    fn test_tampered_recipient_fails_signature() {
        let signer = PrivateKeySigner::random();
        let mut payload = signed_payload(&signer, ONE_ETH, NOW);
        let other = "0x00000000000000000000000000000000000000bb";
        payload.recipient = other.into();
        let mut req = requirements();
        req.pay_to = other.into();
        assert_eq!(kind(check(&payload, &req)), ErrorKind::InvalidSignature);
    }

    #[test]
    fn test_recipient_mismatch_is_case_insensitive() {
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, ONE_ETH, NOW);
        let mut req = requirements();
        req.pay_to = SELLER.to_uppercase().replacen("0X", "0x", 1);
        assert!(check(&payload, &req).is_ok());

        req.pay_to = "0x00000000000000000000000000000000000000cc".into();
        assert_eq!(kind(check(&payload, &req)), ErrorKind::RecipientMismatch);
    }

    #[test]
    fn test_gate_order() {
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, ONE_ETH, NOW);

        let mut req = requirements();
        req.scheme = "upto".into();
        req.network = "moon".into();
        assert_eq!(kind(check(&payload, &req)), ErrorKind::UnsupportedScheme);

        let mut req = requirements();
        req.network = "moon".into();
        assert_eq!(kind(check(&payload, &req)), ErrorKind::NetworkUnsupported);

        let mut req = requirements();
        req.network = "base".into();
        assert_eq!(kind(check(&payload, &req)), ErrorKind::NetworkUnsupported);

        let result = check_payment(
            &registry(),
            &test_net(),
            "not a payload",
            &requirements(),
            UnixTimestamp::from_secs(NOW),
            0,
        );
        assert_eq!(kind(result), ErrorKind::InvalidPayload);

        let mut incomplete = payload.clone();
        incomplete.signature = String::new();
        assert_eq!(kind(check(&incomplete, &requirements())), ErrorKind::MalformedAuthorization);

        // A stale payload that also underpays reports the amount first.
        let stale_under = signed_payload(&signer, "1", NOW - 1_000);
        assert_eq!(kind(check(&stale_under, &requirements())), ErrorKind::InsufficientAmount);
    }

    #[test]
    fn test_address_format_applies_to_pay_to_and_payload() {
        let formatted = test_net()
            .with_address_format(regex::Regex::new("^0x[0-9a-fA-F]{40}$").unwrap());
        let registry = NetworkRegistry::from_networks([formatted.clone()]);
        let signer = PrivateKeySigner::random();
        let payload = signed_payload(&signer, ONE_ETH, NOW);
        let encoded = encode_payload(&payload, PayloadEncoding::Hex).unwrap();

        let mut req = requirements();
        req.pay_to = "0xSELLER".into();
        let result = check_payment(&registry, &formatted, &encoded, &req, UnixTimestamp::from_secs(NOW), 0);
        assert_eq!(kind(result), ErrorKind::InvalidRequirements);

        let mut bad_sender = payload;
        bad_sender.sender = "0xBUYER".into();
        let encoded = encode_payload(&bad_sender, PayloadEncoding::Hex).unwrap();
        let result = check_payment(
            &registry,
            &formatted,
            &encoded,
            &requirements(),
            UnixTimestamp::from_secs(NOW),
            0,
        );
        assert_eq!(kind(result), ErrorKind::MalformedAuthorization);
    }
}
