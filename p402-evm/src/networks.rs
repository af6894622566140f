//! Well-known EVM networks.
//!
//! Names follow the short identifiers used in payment requirements
//! (`"base-sepolia"`, `"polygon-amoy"`, ...). Operators add or override
//! networks through configuration; this table only provides defaults.

use p402::networks::{NativeCurrency, NetworkConfig, NetworkRegistry};
use regex::Regex;

/// Base Mainnet chain ID.
pub const BASE_MAINNET: u64 = 8453;

/// Base Sepolia (testnet) chain ID.
pub const BASE_SEPOLIA: u64 = 84532;

/// Ethereum Mainnet chain ID.
pub const ETHEREUM_MAINNET: u64 = 1;

/// Ethereum Sepolia (testnet) chain ID.
pub const ETHEREUM_SEPOLIA: u64 = 11_155_111;

/// Polygon Mainnet chain ID.
pub const POLYGON_MAINNET: u64 = 137;

/// Polygon Amoy (testnet) chain ID.
pub const POLYGON_AMOY: u64 = 80002;

/// Avalanche C-Chain chain ID.
pub const AVALANCHE_MAINNET: u64 = 43114;

/// Avalanche Fuji (testnet) chain ID.
pub const AVALANCHE_FUJI: u64 = 43113;

/// Pattern of a `0x`-prefixed 20-byte hex address.
pub const EVM_ADDRESS_PATTERN: &str = "^0x[0-9a-fA-F]{40}$";

fn evm_address_format() -> Option<Regex> {
    Regex::new(EVM_ADDRESS_PATTERN).ok()
}

fn evm_network(name: &str, chain_id: u64, rpc_url: &str, native: NativeCurrency) -> NetworkConfig {
    let network = NetworkConfig::new(name, chain_id, Some(rpc_url), native);
    match evm_address_format() {
        Some(format) => network.with_address_format(format),
        None => network,
    }
}

/// Returns configurations for all built-in EVM networks.
#[must_use]
pub fn known_networks() -> Vec<NetworkConfig> {
    let pol = NativeCurrency::new("POL", "POL", 18);
    let avax = NativeCurrency::new("Avalanche", "AVAX", 18);
    vec![
        evm_network("base", BASE_MAINNET, "https://mainnet.base.org", NativeCurrency::ether()),
        evm_network(
            "base-sepolia",
            BASE_SEPOLIA,
            "https://sepolia.base.org",
            NativeCurrency::ether(),
        ),
        evm_network(
            "ethereum",
            ETHEREUM_MAINNET,
            "https://ethereum-rpc.publicnode.com",
            NativeCurrency::ether(),
        ),
        evm_network(
            "sepolia",
            ETHEREUM_SEPOLIA,
            "https://ethereum-sepolia-rpc.publicnode.com",
            NativeCurrency::new("Sepolia Ether", "ETH", 18),
        ),
        evm_network("polygon", POLYGON_MAINNET, "https://polygon-rpc.com", pol.clone()),
        evm_network(
            "polygon-amoy",
            POLYGON_AMOY,
            "https://rpc-amoy.polygon.technology",
            pol,
        ),
        evm_network(
            "avalanche",
            AVALANCHE_MAINNET,
            "https://api.avax.network/ext/bc/C/rpc",
            avax.clone(),
        ),
        evm_network(
            "avalanche-fuji",
            AVALANCHE_FUJI,
            "https://api.avax-test.network/ext/bc/C/rpc",
            avax,
        ),
    ]
}

/// A registry holding [`known_networks`].
#[must_use]
pub fn default_registry() -> NetworkRegistry {
    NetworkRegistry::from_networks(known_networks())
}
