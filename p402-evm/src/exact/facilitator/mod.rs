//! Facilitator-side verification and settlement for the EIP-155 exact scheme.
//!
//! [`Eip155ExactFacilitator`] serves one network. Verification runs the pure
//! gates in [`check_payment`] and then, when enabled, the best-effort balance
//! gate. Settlement runs [`check_settlement`] before sending a native
//! transfer, since a settle call may arrive without a prior verify.

mod settle;
mod verify;

use std::sync::Arc;

use p402::facilitator::{BoxFuture, Facilitator, FacilitatorError};
use p402::networks::{NetworkConfig, NetworkRegistry};
use p402::proto::{
    NATIVE_ASSET, PaymentError, PaymentRequirements, SCHEME_EXACT, SettleRequest,
    SettlementResult, SupportedKind, SupportedResponse, V1, VerificationResult, VerifyRequest,
};
use p402::timestamp::UnixTimestamp;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub use settle::settle_payment;
pub use verify::{
    BalanceCheck, CheckedPayment, assert_enough_value, assert_fresh, check_balance, check_payment,
    check_settlement,
};

use crate::chain::Eip155SettlementProvider;

/// Which account funds the settlement transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayFrom {
    /// The payload sender. The facilitator wallet must hold the sender's key.
    #[default]
    Payer,
    /// The facilitator's own signers, in round-robin order.
    Facilitator,
}

/// Tunables of [`Eip155ExactFacilitator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactSettings {
    /// Extra tolerance, in seconds, on the freshness gate (default: 0).
    pub clock_skew_secs: u64,
    /// Whether verification reads the sender's balance (default: `true`).
    pub balance_check: bool,
    /// Which account pays on settlement.
    pub pay_from: PayFrom,
    /// Confirmations to wait for before a transfer counts as settled (default: 1).
    pub confirmations: u64,
}

impl Default for ExactSettings {
    fn default() -> Self {
        Self {
            clock_skew_secs: 0,
            balance_check: true,
            pay_from: PayFrom::Payer,
            confirmations: 1,
        }
    }
}

/// Facilitator for exact-scheme payments on one EVM network.
pub struct Eip155ExactFacilitator<P> {
    registry: Arc<NetworkRegistry>,
    network: NetworkConfig,
    provider: P,
    settings: ExactSettings,
}

impl<P> std::fmt::Debug for Eip155ExactFacilitator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eip155ExactFacilitator")
            .field("network", &self.network.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<P> Eip155ExactFacilitator<P> {
    /// Creates a facilitator serving `network`, resolved through `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::NetworkUnsupported`] if `network` does not resolve.
    pub fn new(
        registry: Arc<NetworkRegistry>,
        network: &str,
        provider: P,
    ) -> Result<Self, PaymentError> {
        let network = registry.resolve(network)?.clone();
        Ok(Self {
            registry,
            network,
            provider,
            settings: ExactSettings::default(),
        })
    }

    /// Replaces all settings at once.
    #[must_use]
    pub const fn with_settings(mut self, settings: ExactSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the clock-skew tolerance of the freshness gate.
    #[must_use]
    pub const fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.settings.clock_skew_secs = seconds;
        self
    }

    /// Enables or disables the best-effort balance gate.
    #[must_use]
    pub const fn with_balance_check(mut self, enabled: bool) -> Self {
        self.settings.balance_check = enabled;
        self
    }

    /// Sets which account pays on settlement.
    #[must_use]
    pub const fn with_pay_from(mut self, pay_from: PayFrom) -> Self {
        self.settings.pay_from = pay_from;
        self
    }

    /// The network this facilitator serves.
    #[must_use]
    pub const fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// The chain provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    fn check(
        &self,
        payload: &str,
        requirements: &PaymentRequirements,
    ) -> Result<CheckedPayment, PaymentError> {
        check_payment(
            &self.registry,
            &self.network,
            payload,
            requirements,
            UnixTimestamp::now(),
            self.settings.clock_skew_secs,
        )
    }

    fn supported_kind(&self) -> SupportedKind {
        SupportedKind {
            x402_version: V1,
            scheme: SCHEME_EXACT.to_owned(),
            network: self.network.name.clone(),
            extra: Some(json!({
                "chainId": self.network.chain_id,
                "asset": NATIVE_ASSET,
                "nativeCurrency": self.network.native_currency,
            })),
        }
    }
}

#[allow(unused_variables)] // only read when tracing
fn log_unchecked_balance(network: &str, reason: &str) {
    #[cfg(feature = "telemetry")]
    tracing::warn!(network = %network, reason = %reason, "Balance check skipped");
}

impl<P: Eip155SettlementProvider> Facilitator for Eip155ExactFacilitator<P> {
    fn verify(
        &self,
        request: VerifyRequest,
    ) -> BoxFuture<'_, Result<VerificationResult, FacilitatorError>> {
        Box::pin(async move {
            let checked = match self.check(&request.payload, &request.details) {
                Ok(checked) => checked,
                Err(e) => return Ok(VerificationResult::invalid(&e)),
            };
            if self.settings.balance_check {
                let amount = checked.authorization.amount;
                let outcome = check_balance(
                    &self.provider,
                    checked.authorization.sender,
                    &checked.asset,
                    amount,
                )
                .await;
                match outcome {
                    BalanceCheck::Checked {
                        sufficient: false,
                        balance,
                    } => {
                        return Ok(VerificationResult::invalid(
                            &PaymentError::InsufficientBalance {
                                required: amount.to_string(),
                                available: balance.to_string(),
                            },
                        ));
                    }
                    BalanceCheck::Checked { .. } => {}
                    BalanceCheck::Unchecked { reason } => {
                        log_unchecked_balance(&self.network.name, &reason);
                    }
                }
            }
            Ok(VerificationResult::valid(checked.details()))
        })
    }

    fn settle(
        &self,
        request: SettleRequest,
    ) -> BoxFuture<'_, Result<SettlementResult, FacilitatorError>> {
        Box::pin(async move {
            let checked = match check_settlement(
                &self.registry,
                &self.network,
                &request.payload,
                &request.details,
            ) {
                Ok(checked) => checked,
                Err(e) => {
                    return Ok(SettlementResult::failure(&e, Some(&self.network.name)));
                }
            };
            settle_payment(
                &self.provider,
                &checked,
                self.settings.pay_from,
                self.settings.confirmations,
            )
            .await
        })
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, FacilitatorError>> {
        Box::pin(async move {
            Ok(SupportedResponse {
                kinds: vec![self.supported_kind()],
            })
        })
    }
}
