//! The `"exact"` payment scheme on EVM chains.
//!
//! The payer authorizes exactly one transfer of at least the required amount,
//! signed as EIP-712 typed data (see [`crate::eip712`]). Settlement sends the
//! authorized amount in the chain's native currency; token assets verify but
//! do not settle.

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "facilitator")]
pub mod facilitator;

pub use p402::proto::SCHEME_EXACT;
