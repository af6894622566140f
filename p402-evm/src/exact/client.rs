//! Client-side payment signing for the EIP-155 exact scheme.
//!
//! [`sign_payment`] turns a set of [`PaymentRequirements`] into a signed
//! [`PaymentPayload`]. [`Eip155ExactClient`] wraps it for the common case of
//! answering a 402 challenge with an `X-PAYMENT` header value.

use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, FixedBytes, Signature, hex};
use alloy_signer_local::PrivateKeySigner;
use p402::networks::{NetworkConfig, NetworkRegistry};
use p402::proto::{
    PayloadEncoding, PaymentError, PaymentPayload, PaymentRequired, PaymentRequirements,
    encode_payload,
};
use p402::timestamp::UnixTimestamp;
use rand::RngExt;
use rand::rng;

use crate::eip712::{PaymentAuthorization, payment_domain};

/// A trait that abstracts signing operations, allowing both owned signers and Arc-wrapped signers.
///
/// This is necessary because Alloy's `Signer` trait is not implemented for `Arc<T>`,
/// but users may want to share signers via `Arc` (especially when `PrivateKeySigner` doesn't implement `Clone`).
pub trait SignerLike: Send + Sync {
    /// Returns the address of the signer.
    fn address(&self) -> Address;

    /// Signs the given hash.
    fn sign_hash(
        &self,
        hash: &FixedBytes<32>,
    ) -> impl Future<Output = Result<Signature, alloy_signer::Error>> + Send;
}

impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        Self::address(self)
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

/// Errors producing a payment.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The requirements cannot be paid.
    #[error(transparent)]
    Requirements(#[from] PaymentError),
    /// The signer refused or failed.
    #[error("Signing failed: {0}")]
    Signing(String),
    /// The payload could not be serialized.
    #[error("Encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Signs a payment of exactly `maxAmountRequired` to `payTo`.
///
/// The nonce is `"<unix secs>-<32 hex chars>"`. The resource is taken from
/// the requirements when they name one.
///
/// # Errors
///
/// Returns [`ClientError::Requirements`] if the requirements fail validation,
/// and [`ClientError::Signing`] if the signer fails.
pub async fn sign_payment<S: SignerLike>(
    signer: &S,
    requirements: &PaymentRequirements,
    network: &NetworkConfig,
) -> Result<PaymentPayload, ClientError> {
    requirements.check()?;
    requirements.check_address_format(network)?;
    let amount = requirements.required_amount()?;
    let asset = requirements.asset_kind()?;

    let now = UnixTimestamp::now();
    let random: [u8; 16] = rng().random();
    let mut payload = PaymentPayload {
        sender: signer.address().to_string(),
        recipient: requirements.pay_to.trim().to_owned(),
        amount: amount.to_string(),
        nonce: format!("{}-{}", now.as_secs(), hex::encode(random)),
        timestamp: now,
        signature: String::new(),
        resource: (!requirements.resource.is_empty()).then(|| requirements.resource.clone()),
        asset: Some(asset.to_string()),
    };

    let authorization = PaymentAuthorization::from_payload(&payload, &network.name)?;
    let domain = payment_domain(requirements, network)?;
    let signature = signer
        .sign_hash(&authorization.signing_hash(&domain))
        .await
        .map_err(|e| ClientError::Signing(format!("{e:?}")))?;
    payload.signature = hex::encode_prefixed(signature.as_bytes());
    Ok(payload)
}

/// Answers 402 challenges with signed, encoded payments.
#[derive(Debug)]
pub struct Eip155ExactClient<S> {
    signer: S,
    registry: Arc<NetworkRegistry>,
    encoding: PayloadEncoding,
}

impl<S: SignerLike> Eip155ExactClient<S> {
    /// Creates a client that resolves networks through `registry`.
    pub const fn new(signer: S, registry: Arc<NetworkRegistry>) -> Self {
        Self {
            signer,
            registry,
            encoding: PayloadEncoding::Base64,
        }
    }

    /// Sets the transport framing of produced headers (default: base64).
    #[must_use]
    pub const fn with_encoding(mut self, encoding: PayloadEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Signs a payment for `challenge` and returns the `X-PAYMENT` header value.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the network is unknown, the requirements are
    /// invalid, or signing fails.
    pub async fn pay(&self, challenge: &PaymentRequired) -> Result<String, ClientError> {
        let requirements = &challenge.requirements;
        let network = self.registry.resolve(&requirements.network)?;
        let payload = sign_payment(&self.signer, requirements, network).await?;
        Ok(encode_payload(&payload, self.encoding)?)
    }
}
