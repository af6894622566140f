//! Payment gateway for axum applications.
//!
//! [`PaymentGateway`] is a tower layer. Requests to priced routes without an
//! `X-PAYMENT` header get a `402 Payment Required` challenge. Requests with
//! one are verified and settled through a [`Facilitator`] before the inner
//! service runs; the settled payment reaches handlers as a
//! [`VerifiedPayment`] extension.
//!
//! The facilitator may run in-process (for example the EVM facilitator of
//! `p402-evm`) or remotely behind [`FacilitatorClient`].
//!
//! [`Facilitator`]: p402::facilitator::Facilitator

pub mod error;
pub mod facilitator_client;
pub mod layer;
pub mod paygate;
pub mod policy;
pub mod replay;

pub use error::PaygateError;
pub use facilitator_client::{FacilitatorClient, FacilitatorClientError, SupportedCache};
pub use layer::{PaymentGateway, PaymentGatewayBuilder, PaymentGatewayService};
pub use paygate::{Authorized, Paygate, VerifiedPayment, payment_required_response};
pub use policy::{PolicyError, Price, Route, RoutePattern, RoutePrice, RouteTable};
pub use replay::ReplayGuard;
