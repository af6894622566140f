//! Per-request payment pipeline.
//!
//! A request to a protected route walks a fixed sequence of states:
//!
//! ```text
//! Unauthenticated -> PayloadPresent -> Verifying -> AmountPolicyCheck -> Settling -> Authorized
//! ```
//!
//! Every state either advances to the next one or stops with a
//! [`PaygateError`], which becomes a 402. There are no loops back. The
//! facilitator's `settle` runs at most once per request.

use std::convert::Infallible;
use std::time::Duration;

use alloy_primitives::U256;
use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::Response;
use http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use p402::amount::parse_amount;
use p402::facilitator::Facilitator;
use p402::proto::{
    Asset, ErrorKind, PaymentDetails, PaymentRequired, PaymentRequirements, SettleRequest,
    SettlementResult, VerifyRequest,
};
use p402::timestamp::UnixTimestamp;
use tower::Service;

#[cfg(feature = "telemetry")]
use tracing::Instrument;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::error::PaygateError;
use super::replay::ReplayGuard;
use crate::constants::{
    EXPOSED_PAYMENT_HEADERS, X_PAYMENT_AMOUNT_HEADER, X_PAYMENT_HEADER,
    X_PAYMENT_REQUIREMENTS_HEADER, X_PAYMENT_RESPONSE_HEADER, X_PAYMENT_TRANSACTION_HEADER,
    X_PAYMENT_VERIFIED_HEADER,
};

/// A settled payment, attached to the forwarded request as an extension.
///
/// Handlers behind the gateway can extract it to learn who paid and how much.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    /// Amount in smallest units.
    pub amount: String,
    /// `"native"` or a token address.
    pub asset: String,
    /// Paying address.
    pub sender: String,
    /// Payload nonce.
    pub nonce: String,
    /// Settlement transaction hash.
    pub transaction_hash: String,
    /// Network the transfer ran on.
    pub network: String,
}

/// Terminal success state: the payment is verified and settled.
#[derive(Debug, Clone)]
pub struct Authorized {
    /// The payment, as seen by downstream handlers.
    pub payment: VerifiedPayment,
    /// The facilitator's settlement result, echoed to the client.
    pub settlement: SettlementResult,
}

enum GateState {
    Unauthenticated {
        header: Option<String>,
    },
    PayloadPresent {
        payload: String,
    },
    Verifying {
        payload: String,
    },
    AmountPolicyCheck {
        payload: String,
        details: PaymentDetails,
    },
    Settling {
        payload: String,
        details: PaymentDetails,
    },
    Authorized(Box<Authorized>),
}

/// The payment pipeline for one request.
#[allow(missing_debug_implementations)]
pub struct Paygate<'a, F> {
    /// Verifies and settles.
    pub facilitator: &'a F,
    /// Requirements of the matched route, as sent in the challenge.
    pub requirements: PaymentRequirements,
    /// Route price; the verified amount must reach it.
    pub price: U256,
    /// Asset the route accepts.
    pub asset: Asset,
    /// Seen-nonce set, when replay protection is on.
    pub replay: Option<&'a ReplayGuard>,
    /// Clock-skew tolerance of the facilitator's freshness gate.
    pub clock_skew_secs: u64,
}

impl<F: Facilitator> Paygate<'_, F> {
    /// Handles a request to a protected route.
    ///
    /// A rejected payment becomes a 402 challenge. A settled payment is
    /// forwarded to `inner` with [`VerifiedPayment`] attached, and the
    /// response gains the payment headers.
    ///
    /// # Errors
    ///
    /// This method is infallible (`Infallible` error type).
    #[cfg_attr(feature = "telemetry", instrument(name = "p402.paygate", skip_all, fields(resource = %self.requirements.resource)))]
    pub async fn handle_request<S>(&self, inner: S, mut req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        let header = header_str(req.headers(), X_PAYMENT_HEADER);
        let restated = header_str(req.headers(), X_PAYMENT_REQUIREMENTS_HEADER);
        match self.run(header, restated.as_deref()).await {
            Ok(authorized) => {
                let Authorized {
                    payment,
                    settlement,
                } = authorized;
                req.headers_mut().insert(
                    HeaderName::from_static("x-payment-verified"),
                    HeaderValue::from_static("true"),
                );
                req.extensions_mut().insert(payment.clone());
                let mut response = call_inner(inner, req).await?;
                attach_payment_headers(response.headers_mut(), &payment, &settlement);
                Ok(response)
            }
            Err(err) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(code = ?err.code(), error = %err, "Payment rejected");
                Ok(payment_required_response(&self.requirements, &err))
            }
        }
    }

    /// Runs the pipeline from `Unauthenticated` to `Authorized`.
    ///
    /// `header` is the raw `X-PAYMENT` value. `restated` is the optional
    /// `X-PAYMENT-REQUIREMENTS` value; it is advisory and never trusted.
    ///
    /// # Errors
    ///
    /// Returns the [`PaygateError`] of the state that stopped the request.
    pub async fn run(
        &self,
        header: Option<String>,
        restated: Option<&str>,
    ) -> Result<Authorized, PaygateError> {
        let mut state = GateState::Unauthenticated { header };
        loop {
            state = match state {
                GateState::Unauthenticated { header: None } => {
                    return Err(PaygateError::PaymentRequired);
                }
                GateState::Unauthenticated {
                    header: Some(payload),
                } => GateState::PayloadPresent { payload },
                GateState::PayloadPresent { payload } => {
                    if let Some(restated) = restated {
                        self.note_restated(restated);
                    }
                    GateState::Verifying { payload }
                }
                GateState::Verifying { payload } => self.verify(payload).await?,
                GateState::AmountPolicyCheck { payload, details } => {
                    self.check_policy(payload, details)?
                }
                GateState::Settling { payload, details } => self.settle(payload, details).await?,
                GateState::Authorized(authorized) => return Ok(*authorized),
            };
        }
    }

    async fn verify(&self, payload: String) -> Result<GateState, PaygateError> {
        let request = VerifyRequest {
            payload,
            details: self.requirements.clone(),
        };
        let payload = request.payload.clone();
        let result = self.facilitator.verify(request).await.map_err(|e| {
            log_facilitator_failure("verify", &e);
            PaygateError::FacilitatorUnavailable
        })?;
        if !result.valid {
            return Err(PaygateError::Verification {
                kind: result.error.unwrap_or(ErrorKind::Unexpected),
                message: result.message.unwrap_or_default(),
            });
        }
        let details = result.details.ok_or_else(|| PaygateError::Verification {
            kind: ErrorKind::Unexpected,
            message: "the facilitator returned no payment details".into(),
        })?;
        Ok(GateState::AmountPolicyCheck { payload, details })
    }

    fn check_policy(
        &self,
        payload: String,
        details: PaymentDetails,
    ) -> Result<GateState, PaygateError> {
        let insufficient = || PaygateError::InsufficientPayment {
            required: self.price.to_string(),
            actual: details.amount.clone(),
        };
        let paid = parse_amount(&details.amount).map_err(|_| insufficient())?;
        if paid < self.price {
            return Err(insufficient());
        }
        if Asset::parse(&details.asset).ok() != Some(self.asset) {
            return Err(PaygateError::InvalidToken {
                expected: self.asset.to_string(),
                actual: details.asset.clone(),
            });
        }
        if let Some(guard) = self.replay {
            let ttl = self.reservation_ttl(&details, UnixTimestamp::now());
            if !guard.reserve(&details.sender, &details.nonce, ttl) {
                return Err(PaygateError::Replayed {
                    sender: details.sender.clone(),
                    nonce: details.nonce.clone(),
                });
            }
        }
        Ok(GateState::Settling { payload, details })
    }

    async fn settle(
        &self,
        payload: String,
        details: PaymentDetails,
    ) -> Result<GateState, PaygateError> {
        let request = SettleRequest {
            payload,
            details: self.requirements.clone(),
        };
        let settlement = match self.facilitator.settle(request).await {
            Ok(settlement) => settlement,
            Err(e) => {
                log_facilitator_failure("settle", &e);
                self.release(&details);
                return Err(PaygateError::FacilitatorUnavailable);
            }
        };
        let transaction_hash = match (&settlement.transaction_hash, settlement.success) {
            (Some(hash), true) => hash.clone(),
            _ => {
                let kind = settlement.error.unwrap_or(ErrorKind::SettlementFailed);
                // The transfer may still land after a timeout; keep the nonce burnt.
                if kind != ErrorKind::SettlementTimeout {
                    self.release(&details);
                }
                return Err(PaygateError::Settlement {
                    kind,
                    message: settlement.message.unwrap_or_default(),
                });
            }
        };
        #[cfg(feature = "telemetry")]
        tracing::info!(tx = %transaction_hash, sender = %details.sender, "Payment settled");
        let payment = VerifiedPayment {
            amount: details.amount,
            asset: details.asset,
            sender: details.sender,
            nonce: details.nonce,
            transaction_hash,
            network: settlement
                .network
                .clone()
                .unwrap_or_else(|| self.requirements.network.clone()),
        };
        Ok(GateState::Authorized(Box::new(Authorized {
            payment,
            settlement,
        })))
    }

    /// How long a payload stays acceptable to the facilitator, counted from `now`.
    ///
    /// A payload dated ahead of `now` stays fresh for that much longer.
    #[must_use]
    pub fn reservation_ttl(&self, details: &PaymentDetails, now: UnixTimestamp) -> Duration {
        let secs = self
            .requirements
            .max_timeout_seconds
            .saturating_add(self.clock_skew_secs)
            .saturating_add(details.timestamp.ahead_of(now));
        Duration::from_secs(secs)
    }

    fn release(&self, details: &PaymentDetails) {
        if let Some(guard) = self.replay {
            guard.release(&details.sender, &details.nonce);
        }
    }

    #[allow(unused_variables)] // only read when tracing
    fn note_restated(&self, restated: &str) {
        #[cfg(feature = "telemetry")]
        match serde_json::from_str::<PaymentRequirements>(restated) {
            Ok(claimed) if claimed != self.requirements => {
                tracing::debug!(?claimed, "Restated requirements differ from route policy");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Restated requirements are not valid JSON"),
        }
    }
}

async fn call_inner<S>(mut inner: S, req: Request) -> Result<Response, Infallible>
where
    S: Service<Request, Response = Response, Error = Infallible>,
    S::Future: Send,
{
    #[cfg(feature = "telemetry")]
    {
        inner
            .call(req)
            .instrument(tracing::info_span!("inner"))
            .await
    }
    #[cfg(not(feature = "telemetry"))]
    {
        inner.call(req).await
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

#[allow(unused_variables)] // only read when tracing
fn log_facilitator_failure(operation: &str, error: &p402::facilitator::FacilitatorError) {
    #[cfg(feature = "telemetry")]
    tracing::error!(operation, error = %error, "Facilitator failure");
}

/// Builds the 402 challenge for `requirements`, annotated with `err` unless
/// the request simply carried no payment.
#[must_use]
pub fn payment_required_response(requirements: &PaymentRequirements, err: &PaygateError) -> Response {
    let mut body = PaymentRequired::new(requirements.clone());
    if let Some(code) = err.code() {
        body = body.with_error(code, &err.to_string());
    }
    let mut response = serde_json::to_vec(&body).map_or_else(
        |_| Response::new(Body::empty()),
        |json| Response::new(Body::from(json)),
    );
    *response.status_mut() = StatusCode::PAYMENT_REQUIRED;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn attach_payment_headers(
    headers: &mut HeaderMap,
    payment: &VerifiedPayment,
    settlement: &SettlementResult,
) {
    headers.insert(
        HeaderName::from_static("x-payment-verified"),
        HeaderValue::from_static("true"),
    );
    let values = [
        (X_PAYMENT_AMOUNT_HEADER, payment.amount.clone()),
        (X_PAYMENT_TRANSACTION_HEADER, payment.transaction_hash.clone()),
        (
            X_PAYMENT_RESPONSE_HEADER,
            serde_json::to_string(settlement).unwrap_or_default(),
        ),
    ];
    for (name, value) in values {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            headers.insert(name, value);
        }
    }
    if let Ok(value) = HeaderValue::try_from(EXPOSED_PAYMENT_HEADERS.join(", ")) {
        headers.append(ACCESS_CONTROL_EXPOSE_HEADERS, value);
    }
}

/// Removes any client-supplied `X-PAYMENT-VERIFIED` header.
pub fn strip_spoofed_marker(headers: &mut HeaderMap) {
    headers.remove(X_PAYMENT_VERIFIED_HEADER);
}
