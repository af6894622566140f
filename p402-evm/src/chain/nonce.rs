use std::sync::Arc;

use alloy_network::Network;
use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use dashmap::DashMap;
use futures_util::lock::Mutex;

const NONCE_UNSET: u64 = u64::MAX;

/// Nonce manager seeded from the `pending` transaction count.
///
/// The first transaction per account asks the node for its pending count, so a
/// restart while transfers sit in the mempool does not reuse a nonce. Later
/// transactions increment locally under a per-account lock, which lets
/// concurrent settlements from the same signer proceed without collisions.
///
/// After a failed broadcast or receipt wait the chain state is uncertain, so
/// callers invoke [`reset_nonce`](Self::reset_nonce) to force a re-query.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

#[cfg_attr(target_family = "wasm", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait::async_trait)]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: Network,
    {
        let slot = {
            let entry = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(NONCE_UNSET)));
            Arc::clone(entry.value())
        };

        let mut nonce = slot.lock().await;
        let next = if *nonce == NONCE_UNSET {
            provider.get_transaction_count(address).pending().await?
        } else {
            *nonce + 1
        };
        *nonce = next;
        Ok(next)
    }
}

impl PendingNonceManager {
    /// Forgets the cached nonce of `address`; the next transaction re-queries it.
    pub async fn reset_nonce(&self, address: Address) {
        let slot = self.nonces.get(&address).map(|entry| Arc::clone(entry.value()));
        if let Some(slot) = slot {
            *slot.lock().await = NONCE_UNSET;
        }
    }

    /// Cached nonce of `address`, if one has been assigned since the last reset.
    pub async fn cached_nonce(&self, address: Address) -> Option<u64> {
        let slot = self.nonces.get(&address).map(|entry| Arc::clone(entry.value()))?;
        let nonce = *slot.lock().await;
        (nonce != NONCE_UNSET).then_some(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reset_of_unknown_address_is_a_no_op() {
        let manager = PendingNonceManager::default();
        let address = Address::repeat_byte(0x42);
        manager.reset_nonce(address).await;
        assert_eq!(manager.cached_nonce(address).await, None);
    }

    #[tokio::test]
    async fn test_reset_clears_cached_nonce() {
        let manager = PendingNonceManager::default();
        let address = Address::repeat_byte(0x42);
        manager
            .nonces
            .insert(address, Arc::new(Mutex::new(7)));
        assert_eq!(manager.cached_nonce(address).await, Some(7));
        manager.reset_nonce(address).await;
        assert_eq!(manager.cached_nonce(address).await, None);
    }
}
