//! The facilitator contract shared by in-process and remote implementations.
//!
//! A [`Facilitator`] verifies and settles payments. The HTTP gateway only
//! sees this trait, so an in-process EVM facilitator and a remote client
//! speaking the `{payload, details}` JSON contract are interchangeable.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::proto::{
    SettleRequest, SettlementResult, SupportedResponse, VerificationResult, VerifyRequest,
};

/// A boxed, `Send` future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Verifies and settles payments.
///
/// Payment-domain failures (bad signature, expired payload, reverted transfer)
/// are returned inside `Ok` with `valid: false` / `success: false`. `Err` is
/// reserved for failures of the facilitator itself.
pub trait Facilitator: Send + Sync {
    /// Runs the verification gates. Never mutates state.
    fn verify(
        &self,
        request: VerifyRequest,
    ) -> BoxFuture<'_, Result<VerificationResult, FacilitatorError>>;

    /// Converts a verified authorization into a confirmed on-chain transfer.
    ///
    /// Not idempotent: two calls with the same payload attempt two transfers.
    fn settle(
        &self,
        request: SettleRequest,
    ) -> BoxFuture<'_, Result<SettlementResult, FacilitatorError>>;

    /// Lists the accepted `(version, scheme, network)` combinations.
    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, FacilitatorError>>;
}

impl<T: Facilitator + ?Sized> Facilitator for Arc<T> {
    fn verify(
        &self,
        request: VerifyRequest,
    ) -> BoxFuture<'_, Result<VerificationResult, FacilitatorError>> {
        (**self).verify(request)
    }

    fn settle(
        &self,
        request: SettleRequest,
    ) -> BoxFuture<'_, Result<SettlementResult, FacilitatorError>> {
        (**self).settle(request)
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, FacilitatorError>> {
        (**self).supported()
    }
}

/// Infrastructure failure of a facilitator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FacilitatorError {
    /// The chain node could not be reached during a mandatory step.
    #[error("RPC failure: {0}")]
    Rpc(String),
    /// A remote facilitator could not be reached or answered garbage.
    #[error("Facilitator transport failure: {0}")]
    Transport(String),
    /// Anything else that prevents the facilitator from functioning.
    #[error("Internal facilitator error: {0}")]
    Internal(String),
}
