//! Wire format types for p402 payment messages.
//!
//! All types serialize to JSON with camelCase field names.
//!
//! # Key Types
//!
//! - [`PaymentRequirements`] - What a protected resource demands; also the 402 challenge body
//! - [`PaymentPayload`] - The signed authorization a payer submits
//! - [`VerifyRequest`] / [`VerificationResult`] - Verifier contract
//! - [`SettleRequest`] / [`SettlementResult`] - Settler contract
//! - [`SupportedResponse`] - Discovery of configured networks
//! - [`PaymentError`] / [`ErrorKind`] - Error taxonomy

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_with::{VecSkipError, serde_as};

use crate::amount::parse_amount;
use crate::networks::NetworkConfig;

pub mod encoding;
pub mod error;
pub mod version;

pub use encoding::{PayloadEncoding, decode_payload, encode_payload};
pub use error::{ErrorKind, MAX_ERROR_MESSAGE_LEN, PaymentError, sanitize_error_message};
pub use version::{V1, Version, X402Version1};

pub use crate::timestamp::UnixTimestamp;

/// The only payment scheme: pay exactly the required amount.
pub const SCHEME_EXACT: &str = "exact";

/// Asset marker for the chain's base currency.
pub const NATIVE_ASSET: &str = "native";

/// Default `maxTimeoutSeconds` when requirements omit it.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 300;

/// Default MIME type of a protected resource.
pub const DEFAULT_MIME_TYPE: &str = "application/json";

fn default_asset() -> String {
    NATIVE_ASSET.to_owned()
}

const fn default_max_timeout_seconds() -> u64 {
    DEFAULT_MAX_TIMEOUT_SECONDS
}

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.to_owned()
}

/// Which settlement path an asset identifier selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    /// The chain's base currency.
    Native,
    /// A token contract.
    Token(Address),
}

impl Asset {
    /// Classifies an asset identifier.
    ///
    /// `"native"` (any case), an empty string, and the all-zero address mean
    /// [`Asset::Native`]. Anything else must be a contract address.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidRequirements`] for a non-address token identifier.
    pub fn parse(raw: &str) -> Result<Self, PaymentError> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case(NATIVE_ASSET) {
            return Ok(Self::Native);
        }
        let address: Address = raw.parse().map_err(|_| {
            PaymentError::InvalidRequirements(format!("asset '{raw}' is neither 'native' nor an address"))
        })?;
        if address.is_zero() {
            Ok(Self::Native)
        } else {
            Ok(Self::Token(address))
        }
    }

    /// Address used as the EIP-712 verifying contract: the zero address for native.
    #[must_use]
    pub const fn verifying_contract(&self) -> Address {
        match self {
            Self::Native => Address::ZERO,
            Self::Token(address) => *address,
        }
    }
}

impl core::fmt::Display for Asset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Native => f.write_str(NATIVE_ASSET),
            Self::Token(address) => write!(f, "{address}"),
        }
    }
}

/// Declares what a protected resource demands.
///
/// Missing fields deserialize to empty values so that [`check`](Self::check)
/// can report them as [`ErrorKind::InvalidRequirements`] instead of failing
/// inside serde.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Protocol version; must be `1`.
    #[serde(default)]
    pub x402_version: Option<u64>,
    /// Payment scheme; must be `"exact"`.
    #[serde(default)]
    pub scheme: String,
    /// Network identifier resolved through the registry.
    #[serde(default)]
    pub network: String,
    /// Required amount in smallest units, as a decimal integer string.
    #[serde(default)]
    pub max_amount_required: String,
    /// Resource path, informational.
    #[serde(default)]
    pub resource: String,
    /// What the payment grants access to.
    #[serde(default)]
    pub description: String,
    /// Recipient address.
    #[serde(default)]
    pub pay_to: String,
    /// `"native"` or a token contract address.
    #[serde(default = "default_asset")]
    pub asset: String,
    /// Maximum payload age in seconds.
    #[serde(default = "default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,
    /// MIME type of the protected resource.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    /// Free-form extension data. `name` and `version` override the signing domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

impl PaymentRequirements {
    /// Creates version-1 `"exact"` requirements with defaults for everything else.
    #[must_use]
    pub fn exact(network: &str, pay_to: &str, amount: U256) -> Self {
        Self {
            x402_version: Some(V1.into()),
            scheme: SCHEME_EXACT.to_owned(),
            network: network.to_owned(),
            max_amount_required: amount.to_string(),
            resource: String::new(),
            description: String::new(),
            pay_to: pay_to.to_owned(),
            asset: default_asset(),
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            mime_type: default_mime_type(),
            extra: None,
        }
    }

    /// Runs the structural, version, and scheme gates in that order.
    ///
    /// # Errors
    ///
    /// Returns the first failing gate as [`PaymentError::InvalidRequirements`],
    /// [`PaymentError::UnsupportedVersion`] or [`PaymentError::UnsupportedScheme`].
    pub fn check(&self) -> Result<(), PaymentError> {
        let version = self
            .x402_version
            .ok_or_else(|| PaymentError::InvalidRequirements("x402Version is missing".into()))?;
        let missing = [
            ("scheme", &self.scheme),
            ("network", &self.network),
            ("maxAmountRequired", &self.max_amount_required),
            ("payTo", &self.pay_to),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());
        if let Some((field, _)) = missing {
            return Err(PaymentError::InvalidRequirements(format!("{field} is missing")));
        }
        self.required_amount()?;
        self.asset_kind()?;
        if self.max_timeout_seconds == 0 {
            return Err(PaymentError::InvalidRequirements(
                "maxTimeoutSeconds must be positive".into(),
            ));
        }

        if !X402Version1::matches(version) {
            return Err(PaymentError::UnsupportedVersion(version));
        }
        if self.scheme != SCHEME_EXACT {
            return Err(PaymentError::UnsupportedScheme(self.scheme.clone()));
        }
        Ok(())
    }

    /// Checks `payTo` against the resolved network's address format.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidRequirements`] on mismatch.
    pub fn check_address_format(&self, network: &NetworkConfig) -> Result<(), PaymentError> {
        if network.accepts_address(&self.pay_to) {
            Ok(())
        } else {
            Err(PaymentError::InvalidRequirements(format!(
                "payTo '{}' is not a valid {} address",
                self.pay_to, network.name
            )))
        }
    }

    /// Parses `maxAmountRequired`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidRequirements`] if it is not a decimal integer.
    pub fn required_amount(&self) -> Result<U256, PaymentError> {
        parse_amount(&self.max_amount_required).map_err(|e| {
            PaymentError::InvalidRequirements(format!("maxAmountRequired: {e}"))
        })
    }

    /// Classifies `asset`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidRequirements`] for a malformed token address.
    pub fn asset_kind(&self) -> Result<Asset, PaymentError> {
        Asset::parse(&self.asset)
    }

    /// Reads a string entry from [`extra`](Self::extra).
    #[must_use]
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.as_ref()?.get(key)?.as_str()
    }
}

/// The decoded authorization a payer signs.
///
/// The signature covers `{sender, recipient, amount, nonce, timestamp,
/// resource, network}` under a domain bound to the network and asset; see
/// `p402-evm` for the typed-data construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPayload {
    /// Paying address.
    #[serde(default)]
    pub sender: String,
    /// Receiving address.
    #[serde(default)]
    pub recipient: String,
    /// Amount in smallest units, as a decimal integer string.
    #[serde(default)]
    pub amount: String,
    /// Opaque uniqueness token.
    #[serde(default)]
    pub nonce: String,
    /// Signing time.
    pub timestamp: UnixTimestamp,
    /// Hex-encoded signature.
    #[serde(default)]
    pub signature: String,
    /// Resource the payer intends to access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Asset the payer intends to pay with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

/// Summary of a verified payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    /// Verified amount in smallest units.
    pub amount: String,
    /// `"native"` or token address.
    pub asset: String,
    /// Paying address.
    pub sender: String,
    /// Receiving address.
    pub recipient: String,
    /// Payload nonce.
    pub nonce: String,
    /// Payload timestamp.
    pub timestamp: UnixTimestamp,
}

/// Body of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// Transport-encoded [`PaymentPayload`].
    pub payload: String,
    /// Requirements to verify against.
    pub details: PaymentRequirements,
}

/// Body of `POST /settle`.
///
/// Identical to [`VerifyRequest`] on the wire; a distinct type so that a
/// settle call is always an explicit conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleRequest {
    /// Transport-encoded [`PaymentPayload`].
    pub payload: String,
    /// Requirements to settle against.
    pub details: PaymentRequirements,
}

impl From<VerifyRequest> for SettleRequest {
    fn from(value: VerifyRequest) -> Self {
        Self {
            payload: value.payload,
            details: value.details,
        }
    }
}

/// Outcome of verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Whether every gate passed.
    pub valid: bool,
    /// Failing gate, when `valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Sanitized explanation of `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Verified payment, when `valid` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<PaymentDetails>,
}

impl VerificationResult {
    /// A passing result.
    #[must_use]
    pub const fn valid(details: PaymentDetails) -> Self {
        Self {
            valid: true,
            error: None,
            message: None,
            details: Some(details),
        }
    }

    /// A failing result.
    #[must_use]
    pub fn invalid(error: &PaymentError) -> Self {
        Self {
            valid: false,
            error: Some(error.kind()),
            message: Some(error.message()),
            details: None,
        }
    }
}

impl From<Result<PaymentDetails, PaymentError>> for VerificationResult {
    fn from(value: Result<PaymentDetails, PaymentError>) -> Self {
        match value {
            Ok(details) => Self::valid(details),
            Err(error) => Self::invalid(&error),
        }
    }
}

/// Outcome of settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    /// Whether the transfer was confirmed.
    pub success: bool,
    /// Chain transaction identifier. Also set on timeout and revert when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    /// Failure code, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// Sanitized explanation of `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Network the transfer ran on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl SettlementResult {
    /// A confirmed transfer.
    #[must_use]
    pub fn success(transaction_hash: String, network: &str) -> Self {
        Self {
            success: true,
            transaction_hash: Some(transaction_hash),
            error: None,
            message: None,
            network: Some(network.to_owned()),
        }
    }

    /// A failed settlement. A timeout keeps its transaction hash.
    #[must_use]
    pub fn failure(error: &PaymentError, network: Option<&str>) -> Self {
        let transaction_hash = match error {
            PaymentError::SettlementTimeout {
                transaction_hash, ..
            } => transaction_hash.clone(),
            _ => None,
        };
        Self {
            success: false,
            transaction_hash,
            error: Some(error.kind()),
            message: Some(error.message()),
            network: network.map(str::to_owned),
        }
    }

    /// Attaches a transaction hash, e.g. of a reverted transfer.
    #[must_use]
    pub fn with_transaction_hash(mut self, transaction_hash: String) -> Self {
        self.transaction_hash = Some(transaction_hash);
        self
    }
}

/// One accepted `(version, scheme, network)` combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    /// Always `1`.
    pub x402_version: X402Version1,
    /// Always `"exact"`.
    pub scheme: String,
    /// Canonical network name.
    pub network: String,
    /// Network-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response of `GET /supported`, one kind per configured network in configuration order.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedResponse {
    /// Accepted kinds. Entries this version cannot parse are skipped.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedKind>,
}

impl SupportedResponse {
    /// Returns `true` if `network` (exact name) is listed.
    #[must_use]
    pub fn supports(&self, network: &str) -> bool {
        self.kinds.iter().any(|k| k.network == network)
    }
}

/// The 402 challenge body: requirements plus an optional error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Requirements the client must satisfy.
    #[serde(flatten)]
    pub requirements: PaymentRequirements,
    /// Why the previous attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentRequired {
    /// An initial challenge without an error.
    #[must_use]
    pub const fn new(requirements: PaymentRequirements) -> Self {
        Self {
            requirements,
            error: None,
        }
    }

    /// A challenge annotated with `"<code>: <message>"`, sanitized.
    #[must_use]
    pub fn with_error(mut self, code: &str, message: &str) -> Self {
        self.error = Some(sanitize_error_message(&format!("{code}: {message}")));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn requirements() -> PaymentRequirements {
        PaymentRequirements::exact(
            "test-net",
            "0x00000000000000000000000000000000000000aa",
            U256::from(1_000u64),
        )
    }

    #[test]
    fn test_requirements_wire_shape() {
        let json = serde_json::to_value(requirements()).unwrap();
        assert_eq!(json["x402Version"], 1);
        assert_eq!(json["scheme"], "exact");
        assert_eq!(json["maxAmountRequired"], "1000");
        assert_eq!(json["payTo"], "0x00000000000000000000000000000000000000aa");
        assert_eq!(json["asset"], "native");
        assert_eq!(json["maxTimeoutSeconds"], 300);
        assert_eq!(json["mimeType"], "application/json");
        assert!(json.get("extra").is_none());
    }

    #[test]
    fn test_requirements_defaults_on_deserialize() {
        let parsed: PaymentRequirements = serde_json::from_value(json!({
            "x402Version": 1,
            "scheme": "exact",
            "network": "test-net",
            "maxAmountRequired": "5",
            "payTo": "0x00000000000000000000000000000000000000aa"
        }))
        .unwrap();
        assert_eq!(parsed.asset, "native");
        assert_eq!(parsed.max_timeout_seconds, 300);
        assert!(parsed.check().is_ok());
    }

    #[test]
    fn test_check_gate_order() {
        let mut missing = requirements();
        missing.pay_to = String::new();
        missing.x402_version = Some(2);
        assert_eq!(
            missing.check().unwrap_err().kind(),
            ErrorKind::InvalidRequirements
        );

        let mut version = requirements();
        version.x402_version = Some(2);
        version.scheme = "upto".into();
        assert_eq!(
            version.check().unwrap_err(),
            PaymentError::UnsupportedVersion(2)
        );

        let mut scheme = requirements();
        scheme.scheme = "upto".into();
        assert_eq!(
            scheme.check().unwrap_err().kind(),
            ErrorKind::UnsupportedScheme
        );

        let mut amount = requirements();
        amount.max_amount_required = "1.5".into();
        assert_eq!(
            amount.check().unwrap_err().kind(),
            ErrorKind::InvalidRequirements
        );
    }

    #[test]
    fn test_asset_classification() {
        assert_eq!(Asset::parse("native").unwrap(), Asset::Native);
        assert_eq!(Asset::parse("NATIVE").unwrap(), Asset::Native);
        assert_eq!(
            Asset::parse("0x0000000000000000000000000000000000000000").unwrap(),
            Asset::Native
        );
        let token = Asset::parse("0x036CbD53842c5426634e7929541eC2318f3dCF7e").unwrap();
        assert!(matches!(token, Asset::Token(_)));
        assert_eq!(
            Asset::parse("usdc").unwrap_err().kind(),
            ErrorKind::InvalidRequirements
        );
    }

    #[test]
    fn test_challenge_body_error_field() {
        let challenge = PaymentRequired::new(requirements());
        let json = serde_json::to_value(&challenge).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["x402Version"], 1);

        let annotated = challenge.with_error("authorization_expired", "too\nold");
        let json = serde_json::to_value(&annotated).unwrap();
        assert_eq!(json["error"], "authorization_expired: too old");
        assert_eq!(json["payTo"], "0x00000000000000000000000000000000000000aa");
    }

    #[test]
    fn test_verification_result_wire_shape() {
        let result =
            VerificationResult::invalid(&PaymentError::AuthorizationExpired { age: 301, max: 300 });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["error"], "authorization_expired");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_settlement_timeout_keeps_hash() {
        let result = SettlementResult::failure(
            &PaymentError::SettlementTimeout {
                timeout_secs: 30,
                transaction_hash: Some("0xabc".into()),
            },
            Some("test-net"),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "settlement_timeout");
        assert_eq!(json["transactionHash"], "0xabc");
    }

    #[test]
    fn test_supported_skips_unknown_kinds() {
        let parsed: SupportedResponse = serde_json::from_value(json!({
            "kinds": [
                {"x402Version": 1, "scheme": "exact", "network": "base"},
                {"x402Version": 2, "scheme": "exact", "network": "eip155:8453"}
            ]
        }))
        .unwrap();
        assert_eq!(parsed.kinds.len(), 1);
        assert!(parsed.supports("base"));
    }
}
