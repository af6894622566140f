//! Network configuration and lookup.
//!
//! A [`NetworkRegistry`] maps network identifiers (e.g. `"base-sepolia"`) to
//! [`NetworkConfig`] values: chain id, RPC endpoint, native currency, and an
//! optional address format. Chain crates ship a table of well-known networks;
//! applications may register more at startup.
//!
//! The registry is built once and then shared read-only (typically behind an
//! `Arc`). It has no interior mutability.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use std::collections::HashMap;

use crate::proto::PaymentError;

/// Metadata of a chain's base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    /// Display name, e.g. `"Ether"`.
    pub name: String,
    /// Ticker, e.g. `"ETH"`.
    pub symbol: String,
    /// Decimal places of the smallest unit.
    pub decimals: u8,
}

impl NativeCurrency {
    /// Creates a currency description.
    #[must_use]
    pub fn new(name: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            name: name.to_owned(),
            symbol: symbol.to_owned(),
            decimals,
        }
    }

    /// Ether with 18 decimals, shared by most EVM chains.
    #[must_use]
    pub fn ether() -> Self {
        Self::new("Ether", "ETH", 18)
    }
}

/// Static parameters of one network.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Canonical identifier, e.g. `"base-sepolia"`.
    pub name: String,
    /// Numeric chain id used for domain separation.
    pub chain_id: u64,
    /// Default JSON-RPC endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    /// Base currency of the chain.
    pub native_currency: NativeCurrency,
    /// Pattern every address on this network must match.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_format: Option<Regex>,
}

impl NetworkConfig {
    /// Creates a network description without an address format.
    #[must_use]
    pub fn new(name: &str, chain_id: u64, rpc_url: Option<&str>, native: NativeCurrency) -> Self {
        Self {
            name: name.to_owned(),
            chain_id,
            rpc_url: rpc_url.map(str::to_owned),
            native_currency: native,
            address_format: None,
        }
    }

    /// Sets the address format pattern.
    #[must_use]
    pub fn with_address_format(mut self, format: Regex) -> Self {
        self.address_format = Some(format);
        self
    }

    /// Returns `true` if `address` satisfies this network's address format.
    /// Networks without a format accept anything.
    #[must_use]
    pub fn accepts_address(&self, address: &str) -> bool {
        self.address_format
            .as_ref()
            .is_none_or(|format| format.is_match(address))
    }
}

/// Lookup table from network identifier to [`NetworkConfig`].
///
/// [`resolve`](Self::resolve) tries an exact match first, then a
/// case-insensitive one.
///
/// # Example
///
/// ```
/// use p402::networks::{NativeCurrency, NetworkConfig, NetworkRegistry};
///
/// let registry = NetworkRegistry::from_networks([NetworkConfig::new(
///     "base-sepolia",
///     84532,
///     None,
///     NativeCurrency::ether(),
/// )]);
/// assert_eq!(registry.resolve("Base-Sepolia").unwrap().chain_id, 84532);
/// assert!(registry.resolve("moon").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    networks: Vec<NetworkConfig>,
    by_name: HashMap<String, usize>,
    by_lowercase: HashMap<String, usize>,
}

impl NetworkRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated from `networks`.
    #[must_use]
    pub fn from_networks<I: IntoIterator<Item = NetworkConfig>>(networks: I) -> Self {
        let mut registry = Self::new();
        for network in networks {
            registry.register(network);
        }
        registry
    }

    /// Builder-style variant of [`register`](Self::register) for several networks.
    #[must_use]
    pub fn with_networks<I: IntoIterator<Item = NetworkConfig>>(mut self, networks: I) -> Self {
        for network in networks {
            self.register(network);
        }
        self
    }

    /// Adds a network, replacing any earlier entry with the same name.
    pub fn register(&mut self, network: NetworkConfig) {
        let lowercase = network.name.to_ascii_lowercase();
        if let Some(&index) = self.by_name.get(&network.name) {
            self.networks[index] = network;
            self.by_lowercase.insert(lowercase, index);
            return;
        }
        let index = self.networks.len();
        self.by_name.insert(network.name.clone(), index);
        self.by_lowercase.insert(lowercase, index);
        self.networks.push(network);
    }

    /// Resolves an identifier: exact match, then case-insensitive match.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::NetworkUnsupported`] listing every registered
    /// name when nothing matches.
    pub fn resolve(&self, identifier: &str) -> Result<&NetworkConfig, PaymentError> {
        self.get(identifier)
            .ok_or_else(|| PaymentError::NetworkUnsupported {
                network: identifier.to_owned(),
                supported: self.names().map(str::to_owned).collect(),
            })
    }

    /// Like [`resolve`](Self::resolve) without the error detail.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&NetworkConfig> {
        let index = self
            .by_name
            .get(identifier)
            .or_else(|| self.by_lowercase.get(&identifier.to_ascii_lowercase()))?;
        self.networks.get(*index)
    }

    /// Finds the first network registered with `chain_id`.
    #[must_use]
    pub fn by_chain_id(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.networks.iter().map(|n| n.name.as_str())
    }

    /// Iterates over the registered networks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &NetworkConfig> {
        self.networks.iter()
    }

    /// Returns the number of registered networks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Returns `true` if no networks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}
