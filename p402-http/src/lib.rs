#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the p402 payment protocol.
//!
//! The [`server`] module holds the payment gateway: a tower layer that answers
//! unpaid requests to protected routes with `402 Payment Required`, verifies
//! and settles the `X-PAYMENT` header through a
//! [`Facilitator`](p402::facilitator::Facilitator), and forwards paid requests
//! with settlement evidence attached. It also holds [`FacilitatorClient`], a
//! `Facilitator` that talks to a remote facilitator over HTTP.
//!
//! # Modules
//!
//! - [`constants`] - Header names
//! - [`server`] - Payment gateway, route policy, replay guard, remote client (feature: `server`)
//!
//! # Feature Flags
//!
//! - `server` - The gateway and the remote facilitator client (default)
//! - `telemetry` - Tracing instrumentation

pub mod constants;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "server")]
pub use server::{FacilitatorClient, PaymentGateway, RouteTable, VerifiedPayment};
