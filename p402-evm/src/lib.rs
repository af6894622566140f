#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EIP-155 (EVM) chain support for the p402 payment protocol.
//!
//! A payer signs an EIP-712 `PaymentAuthorization` over
//! `{sender, recipient, amount, nonce, timestamp, resource, network}` in a
//! domain bound to the chain id and the asset. The facilitator re-derives the
//! hash, recovers the signer, and settles by sending a native-currency transfer.
//!
//! # Modules
//!
//! - [`eip712`] - Typed-data builder shared by signer and verifier
//! - [`chain`] - Settlement-provider trait and the alloy-backed provider
//! - [`exact`] - The `"exact"` scheme: verifier, settler, client signing
//! - [`networks`] - Built-in table of well-known EVM networks
//!
//! # Feature Flags
//!
//! - `client` - Client-side payment signing
//! - `facilitator` - Verification and settlement against a live chain
//! - `telemetry` - Tracing instrumentation

pub mod chain;
pub mod eip712;
pub mod exact;
pub mod networks;

pub use eip712::PaymentAuthorization;
pub use networks::{default_registry, known_networks};

#[cfg(feature = "client")]
pub use exact::client::{ClientError, Eip155ExactClient, SignerLike, sign_payment};
#[cfg(feature = "facilitator")]
pub use exact::facilitator::{Eip155ExactFacilitator, ExactSettings, PayFrom};
