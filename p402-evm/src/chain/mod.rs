//! Chain access for settlement.
//!
//! The exact-scheme facilitator talks to the chain only through
//! [`Eip155SettlementProvider`]: balance reads, signer lookup, and one
//! native-currency transfer per settlement. [`Eip155ChainProvider`] implements
//! it over alloy with nonce management, signer rotation, and a receipt timeout.
//!
//! # Submodules
//!
//! - `nonce` - Pending-aware nonce tracking for concurrent submissions
//! - `provider` - alloy-backed [`Eip155SettlementProvider`]

use std::future::Future;
use std::sync::Arc;

use alloy_primitives::{Address, TxHash, U256};
use p402::proto::Asset;

/// Pending nonce management for EVM transactions.
#[cfg(feature = "facilitator")]
pub mod nonce;
/// alloy-backed chain provider.
#[cfg(feature = "facilitator")]
pub mod provider;

#[cfg(feature = "facilitator")]
pub use nonce::PendingNonceManager;
#[cfg(feature = "facilitator")]
pub use provider::{ChainProviderConfig, Eip155ChainProvider};

/// A native-currency transfer to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTransfer {
    /// Paying account; a signer for it must be loaded.
    pub from: Address,
    /// Receiving account.
    pub to: Address,
    /// Amount in smallest units.
    pub value: U256,
    /// Block confirmations to wait for.
    pub confirmations: u64,
}

/// A confirmed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Transaction hash.
    pub transaction_hash: TxHash,
    /// Block that included the transaction, if the node reported it.
    pub block_number: Option<u64>,
}

/// Failure talking to, or transacting on, the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The node could not be reached or failed to answer.
    #[error("RPC request failed: {0}")]
    Rpc(String),
    /// No signing key is loaded for the paying account.
    #[error("no signing key loaded for {0}")]
    NoSigner(Address),
    /// The node refused the transaction before it entered the mempool.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// The transaction was mined but reverted.
    #[error("transaction {0} reverted")]
    Reverted(TxHash),
    /// The transaction was broadcast but no receipt arrived in time.
    #[error("transaction {tx_hash} not confirmed within {timeout_secs}s")]
    Timeout {
        /// Hash of the broadcast transaction; it may still confirm.
        tx_hash: TxHash,
        /// How long the receipt wait lasted.
        timeout_secs: u64,
    },
}

/// Chain operations needed to verify and settle native payments.
///
/// Implementations must be safe to share across concurrent requests.
pub trait Eip155SettlementProvider: Send + Sync {
    /// Balance of `owner` in `asset`, in smallest units.
    fn balance(
        &self,
        owner: Address,
        asset: &Asset,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send;

    /// Every address with a loaded signing key.
    fn signer_addresses(&self) -> Vec<Address>;

    /// Returns `true` if a signing key for `address` is loaded.
    fn has_signer(&self, address: &Address) -> bool {
        self.signer_addresses().contains(address)
    }

    /// Picks the facilitator's own account for the next transfer.
    fn next_signer_address(&self) -> Option<Address>;

    /// Signs, broadcasts, and waits for the receipt of a native transfer.
    ///
    /// Once the transaction is broadcast, dropping the returned future must
    /// not abandon the receipt wait.
    fn send_native_transfer(
        &self,
        transfer: NativeTransfer,
    ) -> impl Future<Output = Result<TransferReceipt, ChainError>> + Send;
}

impl<T: Eip155SettlementProvider> Eip155SettlementProvider for Arc<T> {
    fn balance(
        &self,
        owner: Address,
        asset: &Asset,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send {
        (**self).balance(owner, asset)
    }

    fn signer_addresses(&self) -> Vec<Address> {
        (**self).signer_addresses()
    }

    fn has_signer(&self, address: &Address) -> bool {
        (**self).has_signer(address)
    }

    fn next_signer_address(&self) -> Option<Address> {
        (**self).next_signer_address()
    }

    fn send_native_transfer(
        &self,
        transfer: NativeTransfer,
    ) -> impl Future<Output = Result<TransferReceipt, ChainError>> + Send {
        (**self).send_native_transfer(transfer)
    }
}
