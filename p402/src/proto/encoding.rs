//! Transport framing for [`PaymentPayload`].
//!
//! A payload travels as canonical JSON wrapped in one of three framings:
//!
//! | Prefix | Framing |
//! |--------|---------|
//! | `0x`   | hex-encoded JSON bytes |
//! | `{`    | raw JSON |
//! | other  | base64 JSON (standard, then URL-safe alphabet) |
//!
//! The JSON itself is either the flat payload object or an envelope that
//! nests it under `payload`. Both normalize to one [`PaymentPayload`].

use alloy_primitives::hex;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Deserialize;

use super::{PaymentError, PaymentPayload};

/// Framing used by [`encode_payload`]. Decoding detects the framing on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Base64 text over the JSON bytes.
    #[default]
    Base64,
    /// `0x`-prefixed hex over the JSON bytes.
    Hex,
}

/// JSON shapes accepted inside any framing.
#[derive(Deserialize)]
#[serde(untagged)]
enum WirePayload {
    Envelope(Envelope),
    Flat(PaymentPayload),
}

/// `{x402Version, scheme, network, payload: {...}}`. Only `payload` is read.
#[derive(Deserialize)]
struct Envelope {
    payload: PaymentPayload,
}

impl From<WirePayload> for PaymentPayload {
    fn from(value: WirePayload) -> Self {
        match value {
            WirePayload::Envelope(envelope) => envelope.payload,
            WirePayload::Flat(payload) => payload,
        }
    }
}

/// Serializes `payload` to canonical JSON and frames it.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn encode_payload(
    payload: &PaymentPayload,
    encoding: PayloadEncoding,
) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(payload)?;
    Ok(match encoding {
        PayloadEncoding::Base64 => STANDARD.encode(json),
        PayloadEncoding::Hex => hex::encode_prefixed(json),
    })
}

/// Decodes a transport string into a [`PaymentPayload`].
///
/// # Errors
///
/// Every failure, from bad framing to a JSON shape mismatch, is returned as
/// [`PaymentError::InvalidPayload`].
pub fn decode_payload(raw: &str) -> Result<PaymentPayload, PaymentError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PaymentError::InvalidPayload("payment payload is empty".into()));
    }
    let json = unframe(raw)?;
    let wire: WirePayload = serde_json::from_slice(&json).map_err(|_| describe_mismatch(&json))?;
    Ok(wire.into())
}

fn unframe(raw: &str) -> Result<Vec<u8>, PaymentError> {
    if let Some(hex_body) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return hex::decode(hex_body)
            .map_err(|e| PaymentError::InvalidPayload(format!("invalid hex framing: {e}")));
    }
    if raw.starts_with('{') {
        return Ok(raw.as_bytes().to_vec());
    }
    STANDARD
        .decode(raw)
        .or_else(|_| URL_SAFE_NO_PAD.decode(raw.trim_end_matches('=')))
        .map_err(|e| PaymentError::InvalidPayload(format!("invalid base64 framing: {e}")))
}

/// Untagged enums lose the inner error, so re-run the flat shape to report it.
fn describe_mismatch(json: &[u8]) -> PaymentError {
    match serde_json::from_slice::<PaymentPayload>(json) {
        Err(e) => PaymentError::InvalidPayload(format!("payload JSON: {e}")),
        Ok(_) => PaymentError::InvalidPayload("payload JSON has an unrecognized shape".into()),
    }
}
