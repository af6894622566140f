//! In-process facilitator that dispatches by network.
//!
//! [`LocalFacilitator`] holds one [`Facilitator`] per served network, in
//! configuration order, and routes each request by its `details.network`.
//! Identifiers resolve through the network registry, so aliases and case
//! variants of a configured network reach the same handler.

use std::sync::Arc;

use alloy_network::EthereumWallet;
use alloy_signer_local::PrivateKeySigner;
use p402::facilitator::{BoxFuture, Facilitator, FacilitatorError};
use p402::networks::NetworkRegistry;
use p402::proto::{
    PaymentError, SettleRequest, SettlementResult, SupportedResponse, VerificationResult,
    VerifyRequest,
};
use p402_evm::Eip155ExactFacilitator;
use p402_evm::chain::provider::ChainSetupError;
use p402_evm::chain::{ChainProviderConfig, Eip155ChainProvider};
use url::Url;

use crate::config::FacilitatorConfig;

/// Errors building the facilitator from configuration.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// A signer key does not parse.
    #[error("invalid signer key for {network}: {reason}")]
    InvalidKey {
        /// Chain entry with the bad key.
        network: String,
        /// Parser message; never contains the key.
        reason: String,
    },
    /// An RPC URL does not parse.
    #[error("invalid RPC URL for {network}: {source}")]
    InvalidRpcUrl {
        /// Chain entry with the bad URL.
        network: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The chain provider could not be assembled.
    #[error(transparent)]
    Chain(#[from] ChainSetupError),
    /// The network does not resolve.
    #[error(transparent)]
    Network(#[from] PaymentError),
}

/// Dispatches verify and settle calls to per-network facilitators.
#[allow(missing_debug_implementations)] // dyn Facilitator does not implement Debug
pub struct LocalFacilitator {
    registry: Arc<NetworkRegistry>,
    handlers: Vec<(String, Arc<dyn Facilitator>)>,
}

impl LocalFacilitator {
    /// Creates a dispatcher with no networks.
    #[must_use]
    pub const fn new(registry: Arc<NetworkRegistry>) -> Self {
        Self {
            registry,
            handlers: Vec::new(),
        }
    }

    /// Serves `network` with `handler`, replacing any earlier handler for it.
    pub fn register(&mut self, network: &str, handler: Arc<dyn Facilitator>) {
        match self.handlers.iter_mut().find(|(name, _)| name == network) {
            Some(slot) => slot.1 = handler,
            None => self.handlers.push((network.to_owned(), handler)),
        }
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_handler(mut self, network: &str, handler: Arc<dyn Facilitator>) -> Self {
        self.register(network, handler);
        self
    }

    /// Names of served networks, in registration order.
    pub fn networks(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|(name, _)| name.as_str())
    }

    /// Number of served networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no network is served.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn handler(&self, identifier: &str) -> Result<&dyn Facilitator, PaymentError> {
        let canonical = self.registry.get(identifier).map(|n| n.name.as_str());
        canonical
            .and_then(|name| self.handlers.iter().find(|(n, _)| n == name))
            .map(|(_, handler)| handler.as_ref())
            .ok_or_else(|| PaymentError::NetworkUnsupported {
                network: identifier.to_owned(),
                supported: self.networks().map(str::to_owned).collect(),
            })
    }

    /// Builds EVM facilitators for every usable `[chains]` entry.
    ///
    /// Entries with missing or unexpanded keys, unknown networks, or no RPC
    /// endpoint are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] for an invalid key or URL.
    pub fn from_config(config: &FacilitatorConfig) -> Result<Self, SetupError> {
        let registry = Arc::new(config.registry());
        let mut local = Self::new(Arc::clone(&registry));
        let provider_config = ChainProviderConfig {
            receipt_timeout_secs: config.settlement.receipt_timeout_secs,
            ..ChainProviderConfig::default()
        };
        for (name, chain) in &config.chains {
            let keys = chain.resolved_keys();
            if keys.is_empty() {
                tracing::warn!(network = %name, "Skipping chain: signer keys missing or not expanded");
                continue;
            }
            let Some(network) = registry.get(name) else {
                tracing::warn!(network = %name, "Skipping chain: unknown network");
                continue;
            };
            let Some(rpc_url) = chain.rpc_url.as_deref().or(network.rpc_url.as_deref()) else {
                tracing::warn!(network = %name, "Skipping chain: no RPC endpoint");
                continue;
            };
            let rpc_url: Url = rpc_url.parse().map_err(|source| SetupError::InvalidRpcUrl {
                network: name.clone(),
                source,
            })?;
            let rpc = Eip155ChainProvider::rpc_client(&[(rpc_url, chain.rate_limit)])?;
            let provider = Eip155ChainProvider::new(
                rpc,
                wallet(name, &keys)?,
                ChainProviderConfig {
                    eip1559: chain.eip1559,
                    ..provider_config
                },
            )?;
            let facilitator = Eip155ExactFacilitator::new(Arc::clone(&registry), name, provider)?
                .with_settings(config.settlement.exact_settings());
            tracing::info!(
                network = %network.name,
                chain_id = network.chain_id,
                signers = keys.len(),
                "Serving network"
            );
            local.register(&network.name, Arc::new(facilitator));
        }
        Ok(local)
    }
}

fn wallet(network: &str, keys: &[&str]) -> Result<EthereumWallet, SetupError> {
    let invalid = |e: alloy_signer_local::LocalSignerError| SetupError::InvalidKey {
        network: network.to_owned(),
        reason: e.to_string(),
    };
    let mut signers = keys.iter().map(|k| k.parse::<PrivateKeySigner>().map_err(invalid));
    let first = signers.next().ok_or(ChainSetupError::NoSigners)??;
    let mut wallet = EthereumWallet::from(first);
    for signer in signers {
        wallet.register_signer(signer?);
    }
    Ok(wallet)
}

impl Facilitator for LocalFacilitator {
    fn verify(
        &self,
        request: VerifyRequest,
    ) -> BoxFuture<'_, Result<VerificationResult, FacilitatorError>> {
        Box::pin(async move {
            let handler = request
                .details
                .check()
                .and_then(|()| self.handler(&request.details.network));
            match handler {
                Ok(handler) => handler.verify(request).await,
                Err(e) => Ok(VerificationResult::invalid(&e)),
            }
        })
    }

    fn settle(
        &self,
        request: SettleRequest,
    ) -> BoxFuture<'_, Result<SettlementResult, FacilitatorError>> {
        Box::pin(async move {
            let handler = request
                .details
                .check()
                .and_then(|()| self.handler(&request.details.network));
            match handler {
                Ok(handler) => handler.settle(request).await,
                Err(e) => Ok(SettlementResult::failure(&e, None)),
            }
        })
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, FacilitatorError>> {
        Box::pin(async move {
            let mut kinds = Vec::with_capacity(self.handlers.len());
            for (_, handler) in &self.handlers {
                kinds.extend(handler.supported().await?.kinds);
            }
            Ok(SupportedResponse { kinds })
        })
    }
}
