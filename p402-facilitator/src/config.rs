//! Facilitator server configuration.
//!
//! Settings come from a TOML file. `$VAR` and `${VAR}` references anywhere
//! in the file are expanded from the process environment before parsing;
//! unresolved references stay as written. `HOST` and `PORT` override the
//! file.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4021
//!
//! [settlement]
//! receipt_timeout_secs = 30
//! pay_from = "payer"
//!
//! [networks."test-net"]
//! chain_id = 31337
//! rpc_url = "http://127.0.0.1:8545"
//!
//! [chains."base-sepolia"]
//! rate_limit = 20
//! signer_private_keys = ["$SIGNER_KEY"]
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use p402::networks::{NativeCurrency, NetworkConfig, NetworkRegistry};
use p402_evm::{ExactSettings, PayFrom, default_registry};
use regex::Regex;
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but cannot be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct FacilitatorConfig {
    /// Bind address (default `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Bind port (default `4021`).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Settlement behavior shared by every chain.
    #[serde(default)]
    pub settlement: SettlementConfig,
    /// Extra network definitions, merged over the built-in table.
    #[serde_as(as = "serde_with::Map<_, _>")]
    #[serde(default)]
    pub networks: Vec<(String, NetworkDefinition)>,
    /// Chains served, in the order `/supported` lists them.
    #[serde_as(as = "serde_with::Map<_, _>")]
    #[serde(default)]
    pub chains: Vec<(String, ChainConfig)>,
}

/// The `[settlement]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Seconds to wait for a receipt before reporting `settlement_timeout`.
    pub receipt_timeout_secs: u64,
    /// Confirmations a transfer needs.
    pub confirmations: u64,
    /// Which account funds the transfer.
    pub pay_from: PayFrom,
    /// Whether verification reads the payer's balance.
    pub balance_check: bool,
    /// Extra tolerance on payload freshness.
    pub clock_skew_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        let exact = ExactSettings::default();
        Self {
            receipt_timeout_secs: 30,
            confirmations: exact.confirmations,
            pay_from: exact.pay_from,
            balance_check: exact.balance_check,
            clock_skew_secs: exact.clock_skew_secs,
        }
    }
}

impl SettlementConfig {
    /// Settings for each per-network facilitator.
    #[must_use]
    pub const fn exact_settings(&self) -> ExactSettings {
        ExactSettings {
            clock_skew_secs: self.clock_skew_secs,
            balance_check: self.balance_check,
            pay_from: self.pay_from,
            confirmations: self.confirmations,
        }
    }
}

/// A `[networks."<name>"]` entry.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkDefinition {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Default RPC endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Base currency, Ether by default.
    #[serde(default = "NativeCurrency::ether")]
    pub native_currency: NativeCurrency,
    /// Pattern every address must match.
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub address_format: Option<Regex>,
}

impl NetworkDefinition {
    fn to_network(&self, name: &str) -> NetworkConfig {
        let network = NetworkConfig::new(
            name,
            self.chain_id,
            self.rpc_url.as_deref(),
            self.native_currency.clone(),
        );
        match &self.address_format {
            Some(format) => network.with_address_format(format.clone()),
            None => network,
        }
    }
}

/// A `[chains."<network>"]` entry: a network this facilitator settles on.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// RPC endpoint; defaults to the network's registry endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Requests per second allowed against the endpoint.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Hex private keys of the facilitator wallet.
    #[serde(default)]
    pub signer_private_keys: Vec<String>,
    /// Whether the chain prices gas with EIP-1559.
    #[serde(default = "default_eip1559")]
    pub eip1559: bool,
}

impl ChainConfig {
    /// Keys that are set and fully expanded. Empty when the chain should be skipped.
    #[must_use]
    pub fn resolved_keys(&self) -> Vec<&str> {
        let keys: Vec<&str> = self
            .signer_private_keys
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.iter().any(|k| k.starts_with('$')) {
            Vec::new()
        } else {
            keys
        }
    }
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    4021
}

const fn default_eip1559() -> bool {
    true
}

impl FacilitatorConfig {
    /// Loads `path`, or defaults if it does not exist, then applies
    /// `HOST` / `PORT` overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?
        } else {
            tracing::warn!(path = %path.display(), "Configuration file not found, using defaults");
            String::new()
        };
        let mut config = Self::parse_with(&content, |name| std::env::var(name).ok())?;
        if let Some(host) = std::env::var("HOST").ok().and_then(|h| h.parse().ok()) {
            config.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }
        Ok(config)
    }

    /// Parses TOML, expanding variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML.
    pub fn parse_with<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = expand_env_vars(content, lookup);
        Ok(toml::from_str(&expanded)?)
    }

    /// The built-in network table with `[networks]` entries merged in.
    #[must_use]
    pub fn registry(&self) -> NetworkRegistry {
        let mut registry = default_registry();
        for (name, definition) in &self.networks {
            registry.register(definition.to_network(name));
        }
        registry
    }
}

/// Replaces `$VAR` and `${VAR}` with `lookup(VAR)`.
///
/// References `lookup` cannot resolve are left verbatim.
pub fn expand_env_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(at) = rest.find('$') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        let (name, reference_len) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        let value = (!name.is_empty()).then(|| lookup(name)).flatten();
        match value {
            Some(value) => {
                out.push_str(&value);
                rest = &after[reference_len..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "KEY" => Some("0xabc".into()),
            "RPC" => Some("http://node:8545".into()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_env_vars() {
        assert_eq!(expand_env_vars("$KEY", env), "0xabc");
        assert_eq!(expand_env_vars("k=${KEY}!", env), "k=0xabc!");
        assert_eq!(expand_env_vars("$MISSING and ${MISSING}", env), "$MISSING and ${MISSING}");
        assert_eq!(expand_env_vars("cost: 5$", env), "cost: 5$");
        assert_eq!(expand_env_vars("${KEY", env), "${KEY");
    }

    #[test]
    fn test_defaults_from_empty_file() {
        let config = FacilitatorConfig::parse_with("", env).unwrap();
        assert_eq!(config.port, 4021);
        assert_eq!(config.host, default_host());
        assert!(config.chains.is_empty());
        assert_eq!(config.settlement.receipt_timeout_secs, 30);
        assert_eq!(config.settlement.exact_settings(), ExactSettings::default());
    }

    #[test]
    fn test_full_file() {
        let content = r#"
            port = 8080

            [settlement]
            receipt_timeout_secs = 60
            pay_from = "facilitator"
            balance_check = false
            clock_skew_secs = 5

            [networks."test-net"]
            chain_id = 31337
            rpc_url = "$RPC"
            native_currency = { name = "Test", symbol = "TST", decimals = 6 }
            address_format = "^0x[0-9a-fA-F]{40}$"

            [chains."test-net"]
            signer_private_keys = ["$KEY"]

            [chains."base-sepolia"]
            rpc_url = "https://sepolia.base.org"
            rate_limit = 20
            signer_private_keys = ["$UNSET"]
        "#;
        let config = FacilitatorConfig::parse_with(content, env).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.settlement.pay_from, PayFrom::Facilitator);
        assert!(!config.settlement.balance_check);
        assert_eq!(config.settlement.confirmations, 1);

        let names: Vec<&str> = config.chains.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["test-net", "base-sepolia"]);
        assert_eq!(config.chains[0].1.resolved_keys(), ["0xabc"]);
        assert!(config.chains[1].1.resolved_keys().is_empty());
        assert_eq!(config.chains[1].1.rate_limit, Some(20));

        let registry = config.registry();
        let test_net = registry.resolve("test-net").unwrap();
        assert_eq!(test_net.chain_id, 31337);
        assert_eq!(test_net.rpc_url.as_deref(), Some("http://node:8545"));
        assert_eq!(test_net.native_currency.decimals, 6);
        assert!(!test_net.accepts_address("0x1234"));
        assert!(registry.resolve("base-sepolia").is_ok());
    }

    #[test]
    fn test_bad_address_format_is_rejected() {
        let content = r#"
            [networks."bad"]
            chain_id = 1
            address_format = "(unclosed"
        "#;
        assert!(matches!(
            FacilitatorConfig::parse_with(content, env),
            Err(ConfigError::Parse(_))
        ));
    }
}
