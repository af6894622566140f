#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the p402 pay-per-request payment protocol.
//!
//! A resource server answers an unpaid request with `402 Payment Required` and a
//! set of [`PaymentRequirements`](proto::PaymentRequirements). The client signs a
//! [`PaymentPayload`](proto::PaymentPayload), sends it back in a header, and a
//! facilitator verifies the authorization and settles it on-chain.
//!
//! This crate is chain-agnostic. Chain-specific verification and settlement live
//! in `p402-evm`; the HTTP gateway and the remote facilitator client live in
//! `p402-http`.
//!
//! # Modules
//!
//! - [`amount`] - Integer amount parsing and human-readable price conversion
//! - [`facilitator`] - The [`Facilitator`](facilitator::Facilitator) trait and its error type
//! - [`networks`] - Registry of network configurations
//! - [`proto`] - Wire format types, payload codec, and the error taxonomy
//! - [`timestamp`] - Unix timestamps used for authorization freshness
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod amount;
pub mod facilitator;
pub mod networks;
pub mod proto;
pub mod timestamp;

pub use facilitator::{Facilitator, FacilitatorError};
pub use networks::{NativeCurrency, NetworkConfig, NetworkRegistry};
pub use proto::{
    ErrorKind, PaymentDetails, PaymentError, PaymentPayload, PaymentRequirements,
    SettleRequest, SettlementResult, SupportedKind, SupportedResponse, VerificationResult,
    VerifyRequest,
};
pub use timestamp::UnixTimestamp;
