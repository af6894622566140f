//! A [`Facilitator`] that talks to a remote facilitator over HTTP.
//!
//! [`FacilitatorClient`] POSTs `{payload, details}` to `./verify` and
//! `./settle` and GETs `./supported`, relative to a base URL. Because it
//! implements [`Facilitator`], the gateway treats it exactly like an
//! in-process facilitator.
//!
//! A remote facilitator answers payment-domain failures with `200` and
//! `valid: false` / `success: false`. Any other status, and any transport or
//! decoding failure, becomes [`FacilitatorError::Transport`].

use std::time::{Duration, Instant};

use http::{HeaderMap, StatusCode};
use p402::facilitator::{BoxFuture, Facilitator, FacilitatorError};
use p402::proto::{
    SettleRequest, SettlementResult, SupportedResponse, VerificationResult, VerifyRequest,
};
use reqwest::Client;
use tokio::sync::RwLock;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Span};

#[derive(Clone, Debug)]
struct SupportedCacheState {
    response: SupportedResponse,
    expires_at: Instant,
}

/// TTL cache for the `/supported` response.
///
/// Each clone starts empty.
#[derive(Debug)]
pub struct SupportedCache {
    ttl: Duration,
    state: RwLock<Option<SupportedCacheState>>,
}

impl SupportedCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(None),
        }
    }

    /// The cached response, unless it has expired.
    pub async fn get(&self) -> Option<SupportedResponse> {
        let guard = self.state.read().await;
        let cache = guard.as_ref()?;
        (Instant::now() < cache.expires_at).then(|| cache.response.clone())
    }

    /// Stores `response` for one TTL.
    pub async fn set(&self, response: SupportedResponse) {
        *self.state.write().await = Some(SupportedCacheState {
            response,
            expires_at: Instant::now() + self.ttl,
        });
    }

    /// Empties the cache.
    pub async fn clear(&self) {
        *self.state.write().await = None;
    }
}

impl Clone for SupportedCache {
    fn clone(&self) -> Self {
        Self::new(self.ttl)
    }
}

/// Errors talking to a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// A URL could not be built.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// What was being built.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The request could not be sent or the body not read.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Endpoint, e.g. `"POST /verify"`.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The response body is not the expected JSON.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Endpoint, e.g. `"POST /verify"`.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The facilitator answered with a status other than 200.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Endpoint, e.g. `"POST /verify"`.
        context: &'static str,
        /// The status received.
        status: StatusCode,
        /// The response body.
        body: String,
    },
}

impl From<FacilitatorClientError> for FacilitatorError {
    fn from(value: FacilitatorClientError) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Client for a remote facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
    supported_cache: SupportedCache,
}

impl FacilitatorClient {
    /// Default TTL of the `/supported` cache.
    pub const DEFAULT_SUPPORTED_CACHE_TTL: Duration = Duration::from_secs(600);

    /// Builds a client whose endpoints are relative to `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError::UrlParse`] if an endpoint URL cannot be built.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| FacilitatorClientError::UrlParse { context, source })
        };
        let verify_url = join("./verify", "Failed to construct ./verify URL")?;
        let settle_url = join("./settle", "Failed to construct ./settle URL")?;
        let supported_url = join("./supported", "Failed to construct ./supported URL")?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            settle_url,
            supported_url,
            headers: HeaderMap::new(),
            timeout: None,
            supported_cache: SupportedCache::new(Self::DEFAULT_SUPPORTED_CACHE_TTL),
        })
    }

    /// The base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sends `headers` with every request, e.g. an API key.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the `/supported` cache TTL. Zero disables caching.
    #[must_use]
    pub fn with_supported_cache_ttl(mut self, ttl: Duration) -> Self {
        self.supported_cache = SupportedCache::new(ttl);
        self
    }

    /// Sends `POST /verify`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the request fails or the answer is not a 200 result.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerificationResult, FacilitatorClientError> {
        self.send(self.client.post(self.verify_url.clone()).json(request), "POST /verify")
            .await
    }

    /// Sends `POST /settle`.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the request fails or the answer is not a 200 result.
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettlementResult, FacilitatorClientError> {
        self.send(self.client.post(self.settle_url.clone()).json(request), "POST /settle")
            .await
    }

    /// Sends `GET /supported`, served from the cache while it is fresh.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on a cache miss whose request fails.
    pub async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        if let Some(response) = self.supported_cache.get().await {
            return Ok(response);
        }
        #[cfg(feature = "telemetry")]
        tracing::debug!("p402.facilitator_client.supported_cache_miss");

        let response: SupportedResponse = self
            .send(self.client.get(self.supported_url.clone()), "GET /supported")
            .await?;
        self.supported_cache.set(response.clone()).await;
        Ok(response)
    }

    async fn send<R>(
        &self,
        mut req: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;

        let result = if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|source| FacilitatorClientError::JsonDeserialization { context, source })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|source| FacilitatorClientError::Http { context, source })?;
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        };
        record_result_on_span(&result);
        result
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    /// Parses a base URL, normalizing it to exactly one trailing slash.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_owned();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|source| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source,
        })?;
        Self::try_new(url)
    }
}

impl Facilitator for FacilitatorClient {
    fn verify(
        &self,
        request: VerifyRequest,
    ) -> BoxFuture<'_, Result<VerificationResult, FacilitatorError>> {
        Box::pin(async move {
            let fut = Self::verify(self, &request);
            #[cfg(feature = "telemetry")]
            let fut = fut.instrument(tracing::info_span!("p402.facilitator_client.verify", timeout = ?self.timeout));
            Ok(fut.await?)
        })
    }

    fn settle(
        &self,
        request: SettleRequest,
    ) -> BoxFuture<'_, Result<SettlementResult, FacilitatorError>> {
        Box::pin(async move {
            let fut = Self::settle(self, &request);
            #[cfg(feature = "telemetry")]
            let fut = fut.instrument(tracing::info_span!("p402.facilitator_client.settle", timeout = ?self.timeout));
            Ok(fut.await?)
        })
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, FacilitatorError>> {
        Box::pin(async move { Ok(Self::supported(self).await?) })
    }
}

#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: std::fmt::Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            tracing::event!(tracing::Level::ERROR, error = %err, "Request to facilitator failed");
        }
    }
}

#[cfg(not(feature = "telemetry"))]
const fn record_result_on_span<R, E>(_result: &Result<R, E>) {}
