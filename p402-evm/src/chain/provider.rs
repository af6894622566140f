use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_network::{Ethereum, EthereumWallet, NetworkWallet, TransactionBuilder};
use alloy_primitives::{Address, TxHash, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{
    Identity, PendingTransactionError, Provider, ProviderBuilder, RootProvider, WatchTxError,
};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockId, TransactionRequest};
use alloy_sol_types::sol;
use alloy_transport::TransportError;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use p402::proto::Asset;
use tower::ServiceBuilder;
use url::Url;

use super::nonce::PendingNonceManager;
use super::{ChainError, Eip155SettlementProvider, NativeTransfer, TransferReceipt};

/// Awaits a future, optionally instrumenting it with a tracing span.
macro_rules! traced {
    ($fut:expr, $span:expr) => {{
        #[cfg(feature = "telemetry")]
        {
            use tracing::Instrument;
            $fut.instrument($span).await
        }
        #[cfg(not(feature = "telemetry"))]
        {
            $fut.await
        }
    }};
}

sol! {
    /// Minimal ERC-20 interface for balance checks.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
    }
}

/// Combined filler type: Gas + `BlobGas` + Nonce([`PendingNonceManager`]) + `ChainId`.
pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// Fully composed Ethereum provider with all fillers and wallet signing.
pub type FullProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Errors building an [`Eip155ChainProvider`].
#[derive(Debug, thiserror::Error)]
pub enum ChainSetupError {
    /// None of the configured endpoints is an HTTP(S) URL.
    #[error("no HTTP(S) RPC endpoint configured")]
    NoEndpoints,
    /// The wallet holds no signers.
    #[error("at least one signer must be provided")]
    NoSigners,
}

/// Configuration for [`Eip155ChainProvider`].
#[derive(Debug, Clone, Copy)]
pub struct ChainProviderConfig {
    /// Whether the chain supports EIP-1559 gas pricing (default: `true`).
    pub eip1559: bool,
    /// Seconds to wait for a transaction receipt (default: 30).
    pub receipt_timeout_secs: u64,
}

impl Default for ChainProviderConfig {
    fn default() -> Self {
        Self {
            eip1559: true,
            receipt_timeout_secs: 30,
        }
    }
}

/// EVM chain provider with nonce management and signer rotation.
///
/// Wraps a fully-composed alloy provider with:
/// - [`GasFiller`] + [`BlobGasFiller`] for automatic gas estimation
/// - [`NonceFiller`] with [`PendingNonceManager`] for concurrent nonce tracking
/// - [`ChainIdFiller`] for automatic chain ID
/// - [`WalletFiller`] for transaction signing
///
/// Clones share the RPC client, wallet, nonce cache, and signer cursor.
#[derive(Debug, Clone)]
pub struct Eip155ChainProvider {
    inner: FullProvider,
    eip1559: bool,
    receipt_timeout_secs: u64,
    signer_addrs: Arc<Vec<Address>>,
    signer_cursor: Arc<AtomicUsize>,
    nonce_manager: PendingNonceManager,
}

impl Eip155ChainProvider {
    /// Creates an RPC client over HTTP endpoints with optional per-endpoint
    /// rate limits (requests per second).
    ///
    /// Endpoints are combined with a fallback layer. Non-HTTP(S) URLs are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ChainSetupError::NoEndpoints`] if no HTTP(S) endpoint remains.
    pub fn rpc_client(endpoints: &[(Url, Option<u32>)]) -> Result<RpcClient, ChainSetupError> {
        let transports = endpoints
            .iter()
            .filter(|(url, _)| matches!(url.scheme(), "http" | "https"))
            .map(|(url, rate_limit)| {
                #[cfg(feature = "telemetry")]
                tracing::info!(rpc_url = %url, rate_limit = ?rate_limit, "Using HTTP transport");
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit.unwrap_or(u32::MAX)))
                    .service(Http::new(url.clone()))
            })
            .collect::<Vec<_>>();
        let count = NonZeroUsize::new(transports.len()).ok_or(ChainSetupError::NoEndpoints)?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(count))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    /// Creates a provider from a pre-built RPC client and wallet.
    ///
    /// # Errors
    ///
    /// Returns [`ChainSetupError::NoSigners`] if the wallet is empty.
    pub fn new(
        rpc_client: RpcClient,
        wallet: EthereumWallet,
        config: ChainProviderConfig,
    ) -> Result<Self, ChainSetupError> {
        let signer_addrs: Vec<Address> =
            NetworkWallet::<Ethereum>::signer_addresses(&wallet).collect();
        if signer_addrs.is_empty() {
            return Err(ChainSetupError::NoSigners);
        }
        let nonce_manager = PendingNonceManager::default();

        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(
                    NonceFiller::new(nonce_manager.clone()),
                    ChainIdFiller::default(),
                ),
            ),
        );

        let inner: FullProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(rpc_client);

        #[cfg(feature = "telemetry")]
        tracing::info!(signers = ?signer_addrs, "Using EVM provider");

        Ok(Self {
            inner,
            eip1559: config.eip1559,
            receipt_timeout_secs: config.receipt_timeout_secs,
            signer_addrs: Arc::new(signer_addrs),
            signer_cursor: Arc::new(AtomicUsize::new(0)),
            nonce_manager,
        })
    }

    /// The underlying alloy provider, for read calls.
    #[must_use]
    pub const fn inner(&self) -> &FullProvider {
        &self.inner
    }
}

#[allow(unused_variables)] // only read when tracing
fn log_unconfirmed(tx_hash: &TxHash, reason: &dyn std::fmt::Display) {
    #[cfg(feature = "telemetry")]
    tracing::warn!(tx = %tx_hash, error = %reason, "Receipt wait failed after broadcast");
}

fn classify_send_error(error: &TransportError) -> ChainError {
    if error.is_error_resp() {
        ChainError::Rejected(error.to_string())
    } else {
        ChainError::Rpc(error.to_string())
    }
}

impl Eip155SettlementProvider for Eip155ChainProvider {
    async fn balance(&self, owner: Address, asset: &Asset) -> Result<U256, ChainError> {
        match asset {
            Asset::Native => {
                let balance_fut = self.inner.get_balance(owner).into_future();
                traced!(
                    balance_fut,
                    tracing::info_span!("fetch_native_balance", owner = %owner, otel.kind = "client")
                )
                .map_err(|e| ChainError::Rpc(e.to_string()))
            }
            Asset::Token(token) => {
                let contract = IERC20::new(*token, &self.inner);
                let balance_of = contract.balanceOf(owner);
                let balance_fut = balance_of.call().into_future();
                traced!(
                    balance_fut,
                    tracing::info_span!(
                        "fetch_token_balance",
                        token_contract = %token,
                        owner = %owner,
                        otel.kind = "client"
                    )
                )
                .map_err(|e| ChainError::Rpc(e.to_string()))
            }
        }
    }

    fn signer_addresses(&self) -> Vec<Address> {
        self.signer_addrs.as_ref().clone()
    }

    fn next_signer_address(&self) -> Option<Address> {
        match self.signer_addrs.len() {
            0 => None,
            1 => self.signer_addrs.first().copied(),
            n => {
                let idx = self.signer_cursor.fetch_add(1, Ordering::Relaxed) % n;
                self.signer_addrs.get(idx).copied()
            }
        }
    }

    /// Sends `transfer.value` from `transfer.from` to `transfer.to`.
    ///
    /// The nonce of the sending account is reset whenever submission or the
    /// receipt wait fails. The receipt wait runs on its own task, so it
    /// completes (and keeps nonce bookkeeping consistent) even if the caller
    /// is dropped after broadcast.
    async fn send_native_transfer(
        &self,
        transfer: NativeTransfer,
    ) -> Result<TransferReceipt, ChainError> {
        let from = transfer.from;
        if !self.has_signer(&from) {
            return Err(ChainError::NoSigner(from));
        }

        let mut txr = TransactionRequest::default()
            .with_from(from)
            .with_to(transfer.to)
            .with_value(transfer.value);

        // Legacy gas pricing for non-EIP-1559 chains
        if !self.eip1559 {
            let gas_fut = self.inner.get_gas_price().into_future();
            let gas = traced!(gas_fut, tracing::info_span!("get_gas_price", otel.kind = "client"))
                .map_err(|e| ChainError::Rpc(e.to_string()))?;
            txr.set_gas_price(gas);
        }

        let gas_limit = self
            .inner
            .estimate_gas(txr.clone())
            .block(BlockId::pending())
            .await
            .map_err(|e| classify_send_error(&e))?;
        txr.set_gas_limit(gas_limit);

        let pending_tx = match self.inner.send_transaction(txr).await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonce_manager.reset_nonce(from).await;
                return Err(classify_send_error(&e));
            }
        };

        let tx_hash = *pending_tx.tx_hash();
        let timeout_secs = self.receipt_timeout_secs;
        let watcher = pending_tx
            .with_required_confirmations(transfer.confirmations)
            .with_timeout(Some(Duration::from_secs(timeout_secs)));
        let nonce_manager = self.nonce_manager.clone();
        let receipt_task = tokio::spawn(async move {
            let receipt = watcher.get_receipt().await;
            if receipt.is_err() {
                nonce_manager.reset_nonce(from).await;
            }
            receipt
        });

        let receipt = match receipt_task.await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(PendingTransactionError::TxWatcher(WatchTxError::Timeout))) => {
                return Err(ChainError::Timeout {
                    tx_hash,
                    timeout_secs,
                });
            }
            // Broadcast already happened; the transaction may still confirm.
            Ok(Err(e)) => {
                log_unconfirmed(&tx_hash, &e);
                return Err(ChainError::Timeout {
                    tx_hash,
                    timeout_secs,
                });
            }
            Err(e) => {
                log_unconfirmed(&tx_hash, &e);
                return Err(ChainError::Timeout {
                    tx_hash,
                    timeout_secs,
                });
            }
        };

        if !receipt.status() {
            return Err(ChainError::Reverted(receipt.transaction_hash));
        }
        Ok(TransferReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
        })
    }
}
