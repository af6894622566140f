//! Tower layer enforcing payments on protected routes.
//!
//! Build one [`PaymentGateway`] per application with
//! [`PaymentGateway::builder`], then apply it to an axum router:
//!
//! ```ignore
//! let gateway = PaymentGateway::builder(facilitator, "base-sepolia", SELLER)
//!     .with_route(RoutePrice::human("/weather", "0.001"))
//!     .with_route(RoutePrice::units("/premium/*", "5000000000000000"))
//!     .build()?;
//! let app = Router::new().route("/weather", get(weather)).layer(gateway);
//! ```
//!
//! Requests to paths without a route pass through untouched. Requests to
//! protected paths go through a [`Paygate`]: they are settled before the
//! inner service runs, and the inner service runs at most once.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::extract::Request;
use axum_core::response::Response;
use p402::facilitator::Facilitator;
use p402::networks::NetworkConfig;
use p402::proto::{Asset, DEFAULT_MAX_TIMEOUT_SECONDS, DEFAULT_MIME_TYPE, PaymentRequirements};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use super::paygate::{Paygate, strip_spoofed_marker};
use super::policy::{PolicyError, Route, RoutePrice, RouteTable};
use super::replay::ReplayGuard;

/// Decimals used to scale human route prices unless told otherwise.
const DEFAULT_DECIMALS: u8 = 18;

/// Seller-side settings shared by every request.
#[derive(Debug)]
struct GatewayPolicy {
    network: String,
    pay_to: String,
    asset: Asset,
    max_timeout_seconds: u64,
    clock_skew_secs: u64,
    description: String,
    mime_type: String,
    routes: RouteTable,
    replay: Option<ReplayGuard>,
}

impl GatewayPolicy {
    fn requirements(&self, route: &Route, path: &str) -> PaymentRequirements {
        let mut requirements = PaymentRequirements::exact(&self.network, &self.pay_to, route.amount);
        requirements.resource = path.to_owned();
        requirements.description = route
            .description
            .clone()
            .unwrap_or_else(|| self.description.clone());
        requirements.mime_type = route
            .mime_type
            .clone()
            .unwrap_or_else(|| self.mime_type.clone());
        requirements.asset = self.asset.to_string();
        requirements.max_timeout_seconds = self.max_timeout_seconds;
        requirements
    }
}

/// The payment gateway: a [`Layer`] that protects priced routes.
///
/// Cheap to clone; clones share the route table and the replay guard.
pub struct PaymentGateway<F> {
    facilitator: F,
    policy: Arc<GatewayPolicy>,
}

impl<F: Clone> Clone for PaymentGateway<F> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            policy: Arc::clone(&self.policy),
        }
    }
}

impl<F: std::fmt::Debug> std::fmt::Debug for PaymentGateway<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentGateway")
            .field("facilitator", &self.facilitator)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<F> PaymentGateway<F> {
    /// Starts a gateway that charges on `network` and pays `pay_to`.
    #[must_use]
    pub fn builder(facilitator: F, network: &str, pay_to: &str) -> PaymentGatewayBuilder<F> {
        PaymentGatewayBuilder {
            facilitator,
            network: network.to_owned(),
            pay_to: pay_to.to_owned(),
            decimals: DEFAULT_DECIMALS,
            asset: Asset::Native,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            clock_skew_secs: 0,
            description: String::new(),
            mime_type: DEFAULT_MIME_TYPE.to_owned(),
            prices: Vec::new(),
            replay_protection: true,
        }
    }

    /// Returns a reference to the underlying facilitator.
    pub const fn facilitator(&self) -> &F {
        &self.facilitator
    }

    /// The resolved route table.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.policy.routes
    }

    /// The requirements a request to `path` must satisfy, or `None` if
    /// the path is not protected.
    #[must_use]
    pub fn requirements_for(&self, path: &str) -> Option<PaymentRequirements> {
        self.policy
            .routes
            .find(path)
            .map(|route| self.policy.requirements(route, path))
    }
}

/// Builder for [`PaymentGateway`].
#[allow(missing_debug_implementations)] // generic facilitator may not implement Debug
pub struct PaymentGatewayBuilder<F> {
    facilitator: F,
    network: String,
    pay_to: String,
    decimals: u8,
    asset: Asset,
    max_timeout_seconds: u64,
    clock_skew_secs: u64,
    description: String,
    mime_type: String,
    prices: Vec<RoutePrice>,
    replay_protection: bool,
}

impl<F> PaymentGatewayBuilder<F> {
    /// Takes the network name and currency decimals from a registry entry.
    #[must_use]
    pub fn with_network(mut self, network: &NetworkConfig) -> Self {
        self.network.clone_from(&network.name);
        self.decimals = network.native_currency.decimals;
        self
    }

    /// Decimals used to scale human route prices. Defaults to 18.
    #[must_use]
    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    /// The only asset routes accept. Defaults to [`Asset::Native`].
    #[must_use]
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.asset = asset;
        self
    }

    /// Maximum payload age, and lifetime of replay reservations.
    #[must_use]
    pub fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    /// Clock-skew tolerance configured on the facilitator. Replay
    /// reservations outlive the freshness window by this much. Defaults to 0.
    #[must_use]
    pub fn with_clock_skew_secs(mut self, seconds: u64) -> Self {
        self.clock_skew_secs = seconds;
        self
    }

    /// Description for routes that do not set their own.
    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    /// MIME type for routes that do not set their own.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = mime_type.to_owned();
        self
    }

    /// Protects one more route.
    #[must_use]
    pub fn with_route(mut self, price: RoutePrice) -> Self {
        self.prices.push(price);
        self
    }

    /// Protects several routes.
    #[must_use]
    pub fn with_routes<I: IntoIterator<Item = RoutePrice>>(mut self, prices: I) -> Self {
        self.prices.extend(prices);
        self
    }

    /// Turns the in-memory replay guard on or off. On by default.
    #[must_use]
    pub fn with_replay_protection(mut self, enabled: bool) -> Self {
        self.replay_protection = enabled;
        self
    }

    /// Resolves route prices and builds the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] if a route price does not parse.
    pub fn build(self) -> Result<PaymentGateway<F>, PolicyError> {
        let routes = RouteTable::resolve(self.prices, self.decimals)?;
        let replay = self.replay_protection.then(ReplayGuard::new);
        Ok(PaymentGateway {
            facilitator: self.facilitator,
            policy: Arc::new(GatewayPolicy {
                network: self.network,
                pay_to: self.pay_to,
                asset: self.asset,
                max_timeout_seconds: self.max_timeout_seconds,
                clock_skew_secs: self.clock_skew_secs,
                description: self.description,
                mime_type: self.mime_type,
                routes,
                replay,
            }),
        })
    }
}

impl<S, F> Layer<S> for PaymentGateway<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone,
{
    type Service = PaymentGatewayService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGatewayService {
            facilitator: self.facilitator.clone(),
            policy: Arc::clone(&self.policy),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Service produced by [`PaymentGateway`].
#[derive(Clone)]
#[allow(missing_debug_implementations)] // BoxCloneSyncService does not implement Debug
pub struct PaymentGatewayService<F> {
    facilitator: F,
    policy: Arc<GatewayPolicy>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Service<Request> for PaymentGatewayService<F>
where
    F: Facilitator + Clone + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        strip_spoofed_marker(req.headers_mut());
        let facilitator = self.facilitator.clone();
        let policy = Arc::clone(&self.policy);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path().to_owned();
            let Some(route) = policy.routes.find(&path) else {
                return inner.call(req).await;
            };
            let gate = Paygate {
                facilitator: &facilitator,
                requirements: policy.requirements(route, &path),
                price: route.amount,
                asset: policy.asset,
                replay: policy.replay.as_ref(),
                clock_skew_secs: policy.clock_skew_secs,
            };
            gate.handle_request(inner, req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::body::{Body, to_bytes};
    use axum::routing::get;
    use axum::{Extension, Router};
    use http::{HeaderMap, StatusCode};
    use p402::facilitator::{BoxFuture, FacilitatorError};
    use p402::proto::{
        PaymentDetails, PaymentError, PaymentRequired, SettleRequest, SettlementResult,
        SupportedResponse, UnixTimestamp, VerificationResult, VerifyRequest,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::server::paygate::VerifiedPayment;

    const SELLER: &str = "0x00000000000000000000000000000000000000aa";
    const BUYER: &str = "0x00000000000000000000000000000000000000bb";
    const TX: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn details(amount: &str, asset: &str, nonce: &str) -> PaymentDetails {
        PaymentDetails {
            amount: amount.into(),
            asset: asset.into(),
            sender: BUYER.into(),
            recipient: SELLER.into(),
            nonce: nonce.into(),
            timestamp: UnixTimestamp::from_secs(1_700_000_000),
        }
    }

    /// Answers with canned results and counts every call.
    #[derive(Clone)]
    struct CountingFacilitator {
        verification: Arc<Mutex<Result<VerificationResult, FacilitatorError>>>,
        settlement: Arc<Mutex<Result<SettlementResult, FacilitatorError>>>,
        verify_calls: Arc<AtomicUsize>,
        settle_calls: Arc<AtomicUsize>,
        last_verify: Arc<Mutex<Option<VerifyRequest>>>,
    }

    impl CountingFacilitator {
        fn paying(details: PaymentDetails) -> Self {
            Self {
                verification: Arc::new(Mutex::new(Ok(VerificationResult::valid(details)))),
                settlement: Arc::new(Mutex::new(Ok(SettlementResult::success(
                    TX.into(),
                    "test-net",
                )))),
                verify_calls: Arc::default(),
                settle_calls: Arc::default(),
                last_verify: Arc::default(),
            }
        }

        fn with_verification(self, result: Result<VerificationResult, FacilitatorError>) -> Self {
            *self.verification.lock().unwrap() = result;
            self
        }

        fn with_settlement(self, result: Result<SettlementResult, FacilitatorError>) -> Self {
            *self.settlement.lock().unwrap() = result;
            self
        }

        fn settles(&self) -> usize {
            self.settle_calls.load(Ordering::SeqCst)
        }
    }

    impl Facilitator for CountingFacilitator {
        fn verify(
            &self,
            request: VerifyRequest,
        ) -> BoxFuture<'_, Result<VerificationResult, FacilitatorError>> {
            Box::pin(async move {
                self.verify_calls.fetch_add(1, Ordering::SeqCst);
                *self.last_verify.lock().unwrap() = Some(request);
                self.verification.lock().unwrap().clone()
            })
        }

        fn settle(
            &self,
            _request: SettleRequest,
        ) -> BoxFuture<'_, Result<SettlementResult, FacilitatorError>> {
            Box::pin(async move {
                self.settle_calls.fetch_add(1, Ordering::SeqCst);
                self.settlement.lock().unwrap().clone()
            })
        }

        fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, FacilitatorError>> {
            Box::pin(async { Ok(SupportedResponse::default()) })
        }
    }

    async fn weather(Extension(payment): Extension<VerifiedPayment>, headers: HeaderMap) -> String {
        let marker = headers
            .get("x-payment-verified")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("missing");
        format!("sunny for {} ({marker})", payment.sender)
    }

    async fn echo_marker(headers: HeaderMap) -> String {
        headers
            .get("x-payment-verified")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("absent")
            .to_owned()
    }

    fn app(facilitator: CountingFacilitator) -> Router {
        let gateway = PaymentGateway::builder(facilitator, "test-net", SELLER)
            .with_description("Weather data")
            .with_route(RoutePrice::units("/weather", "1000"))
            .with_route(RoutePrice::human("/premium/*", "0.000000000000002"))
            .build()
            .unwrap();
        Router::new()
            .route("/weather", get(weather))
            .route("/premium/report", get(weather))
            .route("/free", get(echo_marker))
            .layer(gateway)
    }

    fn request(path: &str, payment: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri(path);
        if let Some(payment) = payment {
            builder = builder.header("X-PAYMENT", payment);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn challenge(response: Response) -> PaymentRequired {
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn error_code(challenge: &PaymentRequired) -> &str {
        challenge
            .error
            .as_deref()
            .and_then(|e| e.split(':').next())
            .unwrap_or_default()
    }

    #[test]
    fn test_reservation_covers_payload_window() {
        use std::time::Duration;

        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"));
        let gateway = PaymentGateway::builder(facilitator.clone(), "test-net", SELLER)
            .with_route(RoutePrice::units("/weather", "1000"))
            .with_clock_skew_secs(30)
            .build()
            .unwrap();
        let gate = Paygate {
            facilitator: &facilitator,
            requirements: gateway.requirements_for("/weather").unwrap(),
            price: gateway.routes().find("/weather").unwrap().amount,
            asset: Asset::Native,
            replay: None,
            clock_skew_secs: gateway.policy.clock_skew_secs,
        };

        let now = UnixTimestamp::from_secs(1_700_000_000);
        let mut paid = details("1000", "native", "n1");
        assert_eq!(gate.reservation_ttl(&paid, now), Duration::from_secs(330));

        paid.timestamp = UnixTimestamp::from_secs(1_700_000_000 + 10_000_000);
        assert_eq!(
            gate.reservation_ttl(&paid, now),
            Duration::from_secs(10_000_330)
        );
    }

    #[tokio::test]
    async fn test_missing_payment_gets_plain_challenge() {
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"));
        let response = app(facilitator.clone())
            .oneshot(request("/weather", None))
            .await
            .unwrap();
        let body = challenge(response).await;
        assert_eq!(body.error, None);
        assert_eq!(body.requirements.x402_version, Some(1));
        assert_eq!(body.requirements.scheme, "exact");
        assert_eq!(body.requirements.pay_to, SELLER);
        assert_eq!(body.requirements.max_amount_required, "1000");
        assert_eq!(body.requirements.resource, "/weather");
        assert_eq!(body.requirements.description, "Weather data");
        assert_eq!(body.requirements.asset, "native");
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_paid_request_is_forwarded_once() {
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"));
        let response = app(facilitator.clone())
            .oneshot(request("/weather", Some("opaque-payment")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers["x-payment-verified"], "true");
        assert_eq!(headers["x-payment-amount"], "1000");
        assert_eq!(headers["x-payment-transaction"], TX);
        let summary: SettlementResult =
            serde_json::from_str(headers["x-payment-response"].to_str().unwrap()).unwrap();
        assert!(summary.success);
        assert!(
            headers["access-control-expose-headers"]
                .to_str()
                .unwrap()
                .contains("X-PAYMENT-TRANSACTION")
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, format!("sunny for {BUYER} (true)"));
        assert_eq!(facilitator.settles(), 1);

        let verified = facilitator.last_verify.lock().unwrap().clone().unwrap();
        assert_eq!(verified.payload, "opaque-payment");
        assert_eq!(verified.details.max_amount_required, "1000");
    }

    #[tokio::test]
    async fn test_invalid_payment_is_never_settled() {
        let expired = PaymentError::AuthorizationExpired { age: 301, max: 300 };
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"))
            .with_verification(Ok(VerificationResult::invalid(&expired)));
        let response = app(facilitator.clone())
            .oneshot(request("/weather", Some("stale")))
            .await
            .unwrap();
        let body = challenge(response).await;
        assert_eq!(error_code(&body), "authorization_expired");
        assert_eq!(body.requirements.max_amount_required, "1000");
        assert_eq!(facilitator.settles(), 0);
    }

    #[tokio::test]
    async fn test_underpayment_against_route_policy() {
        let facilitator = CountingFacilitator::paying(details("999", "native", "n1"));
        let response = app(facilitator.clone())
            .oneshot(request("/weather", Some("cheap")))
            .await
            .unwrap();
        let body = challenge(response).await;
        assert_eq!(error_code(&body), "insufficient_payment");
        assert_eq!(facilitator.settles(), 0);
    }

    #[tokio::test]
    async fn test_human_price_on_prefix_route() {
        let facilitator = CountingFacilitator::paying(details("1999", "native", "n1"));
        let response = app(facilitator.clone())
            .oneshot(request("/premium/report", Some("cheap")))
            .await
            .unwrap();
        let body = challenge(response).await;
        assert_eq!(error_code(&body), "insufficient_payment");
        assert_eq!(body.requirements.max_amount_required, "2000");
        assert_eq!(body.requirements.resource, "/premium/report");
    }

    #[tokio::test]
    async fn test_wrong_asset_is_rejected() {
        let token = "0x00000000000000000000000000000000000000cc";
        let facilitator = CountingFacilitator::paying(details("1000", token, "n1"));
        let response = app(facilitator.clone())
            .oneshot(request("/weather", Some("token-payment")))
            .await
            .unwrap();
        let body = challenge(response).await;
        assert_eq!(error_code(&body), "invalid_token");
        assert_eq!(facilitator.settles(), 0);
    }

    #[tokio::test]
    async fn test_replayed_nonce_is_rejected() {
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"));
        let app = app(facilitator.clone());
        let first = app
            .clone()
            .oneshot(request("/weather", Some("p")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app.oneshot(request("/weather", Some("p"))).await.unwrap();
        let body = challenge(second).await;
        assert_eq!(error_code(&body), "payment_replayed");
        assert_eq!(facilitator.settles(), 1);
    }

    #[tokio::test]
    async fn test_replay_protection_can_be_disabled() {
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"));
        let gateway = PaymentGateway::builder(facilitator.clone(), "test-net", SELLER)
            .with_route(RoutePrice::units("/weather", "1000"))
            .with_replay_protection(false)
            .build()
            .unwrap();
        let app = Router::new().route("/weather", get(weather)).layer(gateway);
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("/weather", Some("p")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(facilitator.settles(), 2);
    }

    #[tokio::test]
    async fn test_failed_settlement_releases_nonce() {
        let reverted = PaymentError::SettlementFailed("transfer reverted".into());
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"))
            .with_settlement(Ok(SettlementResult::failure(&reverted, Some("test-net"))));
        let app = app(facilitator.clone());
        let response = app
            .clone()
            .oneshot(request("/weather", Some("p")))
            .await
            .unwrap();
        let body = challenge(response).await;
        assert_eq!(error_code(&body), "settlement_failed");

        let response = app.oneshot(request("/weather", Some("p"))).await.unwrap();
        let body = challenge(response).await;
        assert_eq!(error_code(&body), "settlement_failed");
        assert_eq!(facilitator.settles(), 2);
    }

    #[tokio::test]
    async fn test_settlement_timeout_keeps_nonce() {
        let timeout = PaymentError::SettlementTimeout {
            timeout_secs: 30,
            transaction_hash: Some(TX.into()),
        };
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"))
            .with_settlement(Ok(SettlementResult::failure(&timeout, Some("test-net"))));
        let app = app(facilitator.clone());
        let response = app
            .clone()
            .oneshot(request("/weather", Some("p")))
            .await
            .unwrap();
        assert_eq!(error_code(&challenge(response).await), "settlement_timeout");
        let response = app.oneshot(request("/weather", Some("p"))).await.unwrap();
        assert_eq!(error_code(&challenge(response).await), "payment_replayed");
        assert_eq!(facilitator.settles(), 1);
    }

    #[tokio::test]
    async fn test_facilitator_outage_is_a_402() {
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"))
            .with_verification(Err(FacilitatorError::Transport("connection refused".into())));
        let response = app(facilitator.clone())
            .oneshot(request("/weather", Some("p")))
            .await
            .unwrap();
        let body = challenge(response).await;
        assert_eq!(error_code(&body), "facilitator_unavailable");
        assert_eq!(facilitator.settles(), 0);
    }

    #[tokio::test]
    async fn test_spoofed_marker_is_stripped() {
        let facilitator = CountingFacilitator::paying(details("1000", "native", "n1"));
        let request = http::Request::builder()
            .uri("/free")
            .header("X-PAYMENT-VERIFIED", "true")
            .body(Body::empty())
            .unwrap();
        let response = app(facilitator.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "absent");
        assert_eq!(facilitator.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restated_requirements_are_not_trusted() {
        let facilitator = CountingFacilitator::paying(details("1", "native", "n1"));
        let mut restated =
            PaymentRequirements::exact("test-net", SELLER, alloy_primitives::U256::from(1u64));
        restated.resource = "/weather".into();
        let request = http::Request::builder()
            .uri("/weather")
            .header("X-PAYMENT", "p")
            .header("X-PAYMENT-REQUIREMENTS", serde_json::to_string(&restated).unwrap())
            .body(Body::empty())
            .unwrap();
        let response = app(facilitator.clone()).oneshot(request).await.unwrap();
        let body = challenge(response).await;
        assert_eq!(error_code(&body), "insufficient_payment");
        let verified = facilitator.last_verify.lock().unwrap().clone().unwrap();
        assert_eq!(verified.details.max_amount_required, "1000");
    }

    #[test]
    fn test_requirements_for_path() {
        let facilitator = CountingFacilitator::paying(details("1", "native", "n1"));
        let gateway = PaymentGateway::builder(facilitator, "test-net", SELLER)
            .with_max_timeout_seconds(60)
            .with_route(RoutePrice::units("/a", "7").with_mime_type("text/plain"))
            .build()
            .unwrap();
        let requirements = gateway.requirements_for("/a").unwrap();
        assert_eq!(requirements.max_timeout_seconds, 60);
        assert_eq!(requirements.mime_type, "text/plain");
        assert!(gateway.requirements_for("/b").is_none());
        assert_eq!(gateway.routes().len(), 1);

        let json: Value = serde_json::to_value(&requirements).unwrap();
        assert_eq!(json["maxAmountRequired"], "7");
    }

    #[test]
    fn test_bad_route_price_fails_build() {
        let facilitator = CountingFacilitator::paying(details("1", "native", "n1"));
        let result = PaymentGateway::builder(facilitator, "test-net", SELLER)
            .with_route(RoutePrice::human("/a", "free"))
            .build();
        assert!(result.is_err());
    }
}
