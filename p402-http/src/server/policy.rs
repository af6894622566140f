//! Route prices: which paths are protected and what they cost.

use alloy_primitives::U256;
use p402::amount::{AmountError, parse_amount, parse_price};

/// A path pattern: an exact path, or a prefix written as `"/api/*"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    /// Matches one path.
    Exact(String),
    /// Matches the prefix itself and everything below it.
    Prefix(String),
}

impl RoutePattern {
    /// Parses `"/weather"` as exact and `"/premium/*"` as a prefix.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        pattern.strip_suffix("/*").map_or_else(
            || Self::Exact(pattern.to_owned()),
            |prefix| Self::Prefix(prefix.to_owned()),
        )
    }

    /// Returns `true` if `path` falls under this pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == path,
            Self::Prefix(prefix) => {
                path.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            }
        }
    }
}

/// How a route price is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Price {
    /// Smallest currency units, e.g. `"1000000000000000"`.
    Units(String),
    /// A human decimal amount, e.g. `"0.001"`, scaled by the currency decimals.
    Human(String),
}

/// A configured, not yet resolved, route price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePrice {
    /// Protected path pattern.
    pub pattern: RoutePattern,
    /// Price of one request.
    pub price: Price,
    /// Description shown in the challenge.
    pub description: Option<String>,
    /// MIME type of the resource.
    pub mime_type: Option<String>,
}

impl RoutePrice {
    /// A route priced in smallest units.
    #[must_use]
    pub fn units(pattern: &str, amount: &str) -> Self {
        Self::new(pattern, Price::Units(amount.to_owned()))
    }

    /// A route priced as a human decimal amount.
    #[must_use]
    pub fn human(pattern: &str, price: &str) -> Self {
        Self::new(pattern, Price::Human(price.to_owned()))
    }

    fn new(pattern: &str, price: Price) -> Self {
        Self {
            pattern: RoutePattern::parse(pattern),
            price,
            description: None,
            mime_type: None,
        }
    }

    /// Sets the description shown in the challenge.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }

    /// Sets the MIME type of the resource.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = Some(mime_type.to_owned());
        self
    }
}

/// A protected route with its price in smallest units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Protected path pattern.
    pub pattern: RoutePattern,
    /// Price in smallest units.
    pub amount: U256,
    /// Description shown in the challenge.
    pub description: Option<String>,
    /// MIME type of the resource.
    pub mime_type: Option<String>,
}

/// A route price that cannot be resolved.
#[derive(Debug, thiserror::Error)]
#[error("invalid price for route {pattern:?}: {source}")]
pub struct PolicyError {
    /// The offending pattern.
    pub pattern: RoutePattern,
    /// Why the price was rejected.
    #[source]
    pub source: AmountError,
}

/// Protected routes, looked up by request path.
///
/// An exact pattern beats any prefix; among prefixes the longest wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Resolves configured prices, scaling human prices by `decimals`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] for the first price that does not parse.
    pub fn resolve<I>(prices: I, decimals: u8) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = RoutePrice>,
    {
        let routes = prices
            .into_iter()
            .map(|p| {
                let amount = match &p.price {
                    Price::Units(units) => parse_amount(units),
                    Price::Human(human) => parse_price(human, decimals),
                }
                .map_err(|source| PolicyError {
                    pattern: p.pattern.clone(),
                    source,
                })?;
                Ok(Route {
                    pattern: p.pattern,
                    amount,
                    description: p.description,
                    mime_type: p.mime_type,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(Self { routes })
    }

    /// The route protecting `path`, if any.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&Route> {
        let exact = self
            .routes
            .iter()
            .find(|r| matches!(&r.pattern, RoutePattern::Exact(p) if p == path));
        exact.or_else(|| {
            self.routes
                .iter()
                .filter(|r| matches!(r.pattern, RoutePattern::Prefix(_)) && r.pattern.matches(path))
                .max_by_key(|r| match &r.pattern {
                    RoutePattern::Prefix(p) => p.len(),
                    RoutePattern::Exact(_) => 0,
                })
        })
    }

    /// Number of routes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no route is protected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::resolve(
            [
                RoutePrice::units("/weather", "1000"),
                RoutePrice::human("/premium/*", "0.01"),
                RoutePrice::units("/premium/reports/*", "5"),
                RoutePrice::units("/premium/free", "0"),
            ],
            18,
        )
        .unwrap()
    }

    #[test]
    fn test_exact_and_prefix_matching() {
        let t = table();
        assert_eq!(t.find("/weather").unwrap().amount, U256::from(1000u64));
        assert!(t.find("/weather/today").is_none());
        assert!(t.find("/premiumx").is_none());
        assert_eq!(
            t.find("/premium").unwrap().amount,
            U256::from(10_000_000_000_000_000u64)
        );
        assert_eq!(
            t.find("/premium/a/b").unwrap().amount,
            U256::from(10_000_000_000_000_000u64)
        );
    }

    #[test]
    fn test_most_specific_route_wins() {
        let t = table();
        assert_eq!(t.find("/premium/reports/q3").unwrap().amount, U256::from(5u64));
        assert_eq!(t.find("/premium/free").unwrap().amount, U256::ZERO);
    }

    #[test]
    fn test_root_prefix_protects_everything() {
        let t = RouteTable::resolve([RoutePrice::units("/*", "1")], 18).unwrap();
        assert!(t.find("/").is_some());
        assert!(t.find("/anything/at/all").is_some());
    }

    #[test]
    fn test_bad_price_is_rejected() {
        let err = RouteTable::resolve([RoutePrice::units("/x", "1.5")], 18).unwrap_err();
        assert_eq!(err.pattern, RoutePattern::Exact("/x".into()));
        assert!(RouteTable::resolve([RoutePrice::human("/x", "abc")], 6).is_err());
    }
}
