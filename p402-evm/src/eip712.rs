//! EIP-712 typed data for payment authorizations.
//!
//! Signer and verifier both build the hash here, so the two sides cannot drift.
//! The domain is `{name, version, chainId, verifyingContract}`:
//!
//! - `name` / `version` come from `extra.name` / `extra.version` in the
//!   requirements, defaulting to `"x402"` / `"1"`
//! - `chainId` is the resolved network's chain id
//! - `verifyingContract` is the asset address, or the zero address for native
//!
//! Binding the domain to chain and asset makes a signature for one
//! network/asset pair useless on any other.

use alloy_primitives::{Address, B256, Signature, U256, hex};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use p402::amount::parse_amount;
use p402::networks::NetworkConfig;
use p402::proto::{Asset, PaymentError, PaymentPayload, PaymentRequirements};

/// Domain name used when the requirements do not override it.
pub const DEFAULT_DOMAIN_NAME: &str = "x402";

/// Domain version used when the requirements do not override it.
pub const DEFAULT_DOMAIN_VERSION: &str = "1";

sol! {
    /// The signed payment authorization.
    #[allow(missing_docs)]
    #[derive(Debug, PartialEq, Eq)]
    struct PaymentAuthorization {
        address sender;
        address recipient;
        uint256 amount;
        string nonce;
        uint256 timestamp;
        string resource;
        string network;
    }
}

/// Builds the signing domain for `requirements` on `network`.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidRequirements`] if the asset is not `"native"`
/// or a valid address.
pub fn payment_domain(
    requirements: &PaymentRequirements,
    network: &NetworkConfig,
) -> Result<Eip712Domain, PaymentError> {
    let asset = requirements.asset_kind()?;
    let name = requirements
        .extra_str("name")
        .unwrap_or(DEFAULT_DOMAIN_NAME)
        .to_owned();
    let version = requirements
        .extra_str("version")
        .unwrap_or(DEFAULT_DOMAIN_VERSION)
        .to_owned();
    Ok(domain(name, version, network.chain_id, &asset))
}

/// Builds a domain from its parts.
#[must_use]
pub fn domain(name: String, version: String, chain_id: u64, asset: &Asset) -> Eip712Domain {
    eip712_domain! {
        name: name,
        version: version,
        chain_id: chain_id,
        verifying_contract: asset.verifying_contract(),
    }
}

impl PaymentAuthorization {
    /// Lifts a decoded payload into typed data, binding it to `network`.
    ///
    /// `network` must be the canonical name of the resolved network, not the
    /// raw identifier from the requirements.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::MalformedAuthorization`] if the sender or
    /// recipient is not an address or the amount is not a decimal integer.
    pub fn from_payload(payload: &PaymentPayload, network: &str) -> Result<Self, PaymentError> {
        Ok(Self {
            sender: parse_address("sender", &payload.sender)?,
            recipient: parse_address("recipient", &payload.recipient)?,
            amount: parse_amount(&payload.amount)
                .map_err(|e| PaymentError::MalformedAuthorization(format!("amount: {e}")))?,
            nonce: payload.nonce.clone(),
            timestamp: U256::from(payload.timestamp.as_secs()),
            resource: payload.resource.clone().unwrap_or_default(),
            network: network.to_owned(),
        })
    }

    /// The 32-byte digest a signer signs.
    #[must_use]
    pub fn signing_hash(&self, domain: &Eip712Domain) -> B256 {
        self.eip712_signing_hash(domain)
    }

    /// Checks that `signature` over this authorization recovers to `sender`.
    ///
    /// Accepts 65-byte `(r, s, v)` and 64-byte ERC-2098 compact signatures as
    /// hex, with or without `0x`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidSignature`] if the signature cannot be
    /// parsed or recovers to a different address.
    pub fn verify_signature(
        &self,
        domain: &Eip712Domain,
        signature: &str,
    ) -> Result<(), PaymentError> {
        let signature = parse_signature(signature)?;
        let recovered = signature
            .recover_address_from_prehash(&self.signing_hash(domain))
            .map_err(|e| PaymentError::InvalidSignature(format!("recovery failed: {e}")))?;
        if recovered == self.sender {
            Ok(())
        } else {
            Err(PaymentError::InvalidSignature(format!(
                "signature was produced by {recovered}, not by sender {}",
                self.sender
            )))
        }
    }
}

fn parse_address(field: &str, raw: &str) -> Result<Address, PaymentError> {
    raw.trim()
        .parse()
        .map_err(|_| PaymentError::MalformedAuthorization(format!("{field} '{raw}' is not an address")))
}

/// Parses a hex signature into a normalized-s [`Signature`].
///
/// # Errors
///
/// Returns [`PaymentError::InvalidSignature`] for bad hex or an unexpected length.
pub fn parse_signature(raw: &str) -> Result<Signature, PaymentError> {
    let bytes = hex::decode(raw.trim())
        .map_err(|e| PaymentError::InvalidSignature(format!("signature is not hex: {e}")))?;
    match bytes.len() {
        65 => Signature::from_raw(&bytes)
            .map(Signature::normalized_s)
            .map_err(|e| PaymentError::InvalidSignature(e.to_string())),
        64 => Ok(Signature::from_erc2098(&bytes).normalized_s()),
        n => Err(PaymentError::InvalidSignature(format!(
            "signature must be 64 or 65 bytes, got {n}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use p402::networks::NativeCurrency;
    use p402::proto::ErrorKind;
    use p402::timestamp::UnixTimestamp;

    const TOKEN: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

    fn network(name: &str, chain_id: u64) -> NetworkConfig {
        NetworkConfig::new(name, chain_id, None, NativeCurrency::ether())
    }

    fn requirements(network: &str, asset: &str) -> PaymentRequirements {
        let mut r = PaymentRequirements::exact(
            network,
            "0x00000000000000000000000000000000000000aa",
            U256::from(1_000u64),
        );
        r.asset = asset.to_owned();
        r
    }

    fn signed(signer: &PrivateKeySigner, domain: &Eip712Domain) -> (PaymentPayload, String) {
        let payload = PaymentPayload {
            sender: signer.address().to_string(),
            recipient: "0x00000000000000000000000000000000000000aa".into(),
            amount: "1000".into(),
            nonce: "1700000000-1".into(),
            timestamp: UnixTimestamp::from_secs(1_700_000_000),
            signature: String::new(),
            resource: Some("/weather".into()),
            asset: None,
        };
        let auth = PaymentAuthorization::from_payload(&payload, "test-net").unwrap();
        let sig = signer.sign_hash_sync(&auth.signing_hash(domain)).unwrap();
        (payload, hex::encode_prefixed(sig.as_bytes()))
    }

    #[test]
    fn test_hash_is_deterministic() {
        let net = network("test-net", 31337);
        let domain = payment_domain(&requirements("test-net", "native"), &net).unwrap();
        let payload = PaymentPayload {
            sender: "0x00000000000000000000000000000000000000b1".into(),
            recipient: "0x00000000000000000000000000000000000000aa".into(),
            amount: "1".into(),
            nonce: "n".into(),
            timestamp: UnixTimestamp::from_secs(1),
            signature: String::new(),
            resource: None,
            asset: None,
        };
        let a = PaymentAuthorization::from_payload(&payload, "test-net").unwrap();
        let b = PaymentAuthorization::from_payload(&payload.clone(), "test-net").unwrap();
        assert_eq!(a.signing_hash(&domain), b.signing_hash(&domain));
    }

    #[test]
    fn test_every_field_is_bound() {
        let signer = PrivateKeySigner::random();
        let net = network("test-net", 31337);
        let domain = payment_domain(&requirements("test-net", "native"), &net).unwrap();
        let (payload, sig) = signed(&signer, &domain);
        let auth = PaymentAuthorization::from_payload(&payload, "test-net").unwrap();
        assert!(auth.verify_signature(&domain, &sig).is_ok());

        let mutations: Vec<Box<dyn Fn(&mut PaymentAuthorization)>> = vec![
            Box::new(|a| a.sender = Address::repeat_byte(0x11)),
            Box::new(|a| a.recipient = Address::repeat_byte(0x22)),
            Box::new(|a| a.amount += U256::from(1u8)),
            Box::new(|a| a.nonce.push('x')),
            Box::new(|a| a.timestamp += U256::from(1u8)),
            Box::new(|a| a.resource = "/other".into()),
            Box::new(|a| a.network = "base".into()),
        ];
        for mutate in mutations {
            let mut tampered = auth.clone();
            mutate(&mut tampered);
            let err = tampered.verify_signature(&domain, &sig).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidSignature);
        }
    }

    #[test]
    fn test_domain_isolation() {
        let signer = PrivateKeySigner::random();
        let home = payment_domain(&requirements("test-net", "native"), &network("test-net", 31337))
            .unwrap();
        let (payload, sig) = signed(&signer, &home);
        let auth = PaymentAuthorization::from_payload(&payload, "test-net").unwrap();

        let other_chain =
            payment_domain(&requirements("test-net", "native"), &network("test-net", 1)).unwrap();
        assert!(auth.verify_signature(&other_chain, &sig).is_err());

        let other_asset =
            payment_domain(&requirements("test-net", TOKEN), &network("test-net", 31337)).unwrap();
        assert!(auth.verify_signature(&other_asset, &sig).is_err());
    }

    #[test]
    fn test_extra_overrides_domain_name() {
        let mut req = requirements("test-net", "native");
        let net = network("test-net", 31337);
        let default = payment_domain(&req, &net).unwrap();
        assert_eq!(default.name.as_deref(), Some("x402"));
        assert_eq!(default.verifying_contract, Some(Address::ZERO));

        let extra = serde_json::json!({"name": "Shop", "version": "2"});
        req.extra = extra.as_object().cloned();
        let custom = payment_domain(&req, &net).unwrap();
        assert_eq!(custom.name.as_deref(), Some("Shop"));
        assert_eq!(custom.version.as_deref(), Some("2"));
        assert_ne!(custom.separator(), default.separator());
    }

    #[test]
    fn test_compact_signature_accepted() {
        let signer = PrivateKeySigner::random();
        let net = network("test-net", 31337);
        let domain = payment_domain(&requirements("test-net", "native"), &net).unwrap();
        let (payload, _) = signed(&signer, &domain);
        let auth = PaymentAuthorization::from_payload(&payload, "test-net").unwrap();
        let sig = signer.sign_hash_sync(&auth.signing_hash(&domain)).unwrap();
        let compact = hex::encode(sig.as_erc2098());
        assert!(auth.verify_signature(&domain, &compact).is_ok());
    }

    #[test]
    fn test_unparseable_signature() {
        for raw in ["", "0xzz", "0x1234"] {
            assert_eq!(
                parse_signature(raw).unwrap_err().kind(),
                ErrorKind::InvalidSignature
            );
        }
    }
}
