//! Native-currency settlement for the exact scheme.

use p402::facilitator::FacilitatorError;
use p402::proto::{Asset, PaymentError, SettlementResult};
#[cfg(feature = "telemetry")]
use tracing_core::Level;

use super::PayFrom;
use super::verify::CheckedPayment;
use crate::chain::{ChainError, Eip155SettlementProvider, NativeTransfer};

/// Settles a checked payment by sending a native transfer.
///
/// Payment-domain outcomes (unsupported asset, no key for the payer,
/// insufficient balance, revert, timeout) come back as a failed
/// [`SettlementResult`]. `Err` means the node could not be reached before
/// broadcast.
///
/// # Errors
///
/// Returns [`FacilitatorError::Rpc`] if the balance read or the submission
/// fails at the transport level.
pub async fn settle_payment<P: Eip155SettlementProvider>(
    provider: &P,
    checked: &CheckedPayment,
    pay_from: PayFrom,
    confirmations: u64,
) -> Result<SettlementResult, FacilitatorError> {
    let network = checked.network.as_str();
    let failure = |error: PaymentError| Ok(SettlementResult::failure(&error, Some(network)));

    if let Asset::Token(token) = checked.asset {
        return failure(PaymentError::UnsupportedAsset(token.to_string()));
    }

    let authorization = &checked.authorization;
    let from = match pay_from {
        PayFrom::Payer => authorization.sender,
        PayFrom::Facilitator => match provider.next_signer_address() {
            Some(address) => address,
            None => {
                return failure(PaymentError::SettlementFailed(
                    "no facilitator signing key is loaded".into(),
                ));
            }
        },
    };
    if !provider.has_signer(&from) {
        return failure(PaymentError::SettlementFailed(format!(
            "no signing key is loaded for {from}"
        )));
    }
    let to = authorization.recipient;
    let value = authorization.amount;

    let balance = provider
        .balance(from, &Asset::Native)
        .await
        .map_err(|e| FacilitatorError::Rpc(e.to_string()))?;
    if balance < value {
        return failure(PaymentError::InsufficientBalance {
            required: value.to_string(),
            available: balance.to_string(),
        });
    }

    let transfer = NativeTransfer {
        from,
        to,
        value,
        confirmations,
    };
    match provider.send_native_transfer(transfer).await {
        Ok(receipt) => {
            let tx = receipt.transaction_hash.to_string();
            #[cfg(feature = "telemetry")]
            tracing::event!(Level::INFO, status = "ok", tx = %tx, network = %network, "Native transfer confirmed");
            Ok(SettlementResult::success(tx, network))
        }
        Err(ChainError::Rpc(e)) => Err(FacilitatorError::Rpc(e)),
        Err(ChainError::Timeout {
            tx_hash,
            timeout_secs,
        }) => {
            #[cfg(feature = "telemetry")]
            tracing::event!(Level::WARN, status = "timeout", tx = %tx_hash, network = %network, timeout_secs, "Native transfer not confirmed in time");
            failure(PaymentError::SettlementTimeout {
                timeout_secs,
                transaction_hash: Some(tx_hash.to_string()),
            })
        }
        Err(ChainError::Reverted(tx_hash)) => {
            #[cfg(feature = "telemetry")]
            tracing::event!(Level::ERROR, status = "failed", tx = %tx_hash, network = %network, "Native transfer reverted");
            let tx = tx_hash.to_string();
            Ok(SettlementResult::failure(
                &PaymentError::SettlementFailed(format!("transaction {tx} reverted")),
                Some(network),
            )
            .with_transaction_hash(tx))
        }
        Err(ChainError::Rejected(reason)) => {
            log_rejected(network, &reason);
            failure(PaymentError::SettlementFailed(
                "the node rejected the transfer".into(),
            ))
        }
        Err(ChainError::NoSigner(address)) => failure(PaymentError::SettlementFailed(format!(
            "no signing key is loaded for {address}"
        ))),
    }
}

#[allow(unused_variables)] // only read when tracing
fn log_rejected(network: &str, reason: &str) {
    #[cfg(feature = "telemetry")]
    tracing::event!(Level::ERROR, status = "rejected", network = %network, reason = %reason, "Native transfer rejected");
}
