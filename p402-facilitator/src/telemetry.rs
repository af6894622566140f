//! Logging and optional OpenTelemetry export.
//!
//! Logs always go to stdout through `tracing-subscriber`, filtered by
//! `RUST_LOG` (default `info`). With the `telemetry` feature and any
//! `OTEL_EXPORTER_OTLP_*` variable set, spans and metrics are also exported
//! over OTLP, using HTTP unless `OTEL_EXPORTER_OTLP_PROTOCOL=grpc`.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[cfg(feature = "telemetry")]
use opentelemetry::trace::TracerProvider as _;
#[cfg(feature = "telemetry")]
use opentelemetry::{KeyValue, global};
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::Resource;
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
#[cfg(feature = "telemetry")]
use opentelemetry_semantic_conventions::SCHEMA_URL;
#[cfg(feature = "telemetry")]
use opentelemetry_semantic_conventions::attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION};

/// OTLP transport.
#[cfg(feature = "telemetry")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Http,
    Grpc,
}

#[cfg(feature = "telemetry")]
impl Protocol {
    /// `None` unless an `OTEL_EXPORTER_OTLP_*` variable is set.
    fn from_env() -> Option<Self> {
        let configured = ["ENDPOINT", "HEADERS", "PROTOCOL"]
            .iter()
            .any(|suffix| std::env::var(format!("OTEL_EXPORTER_OTLP_{suffix}")).is_ok());
        if !configured {
            return None;
        }
        match std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Ok("grpc") => Some(Self::Grpc),
            _ => Some(Self::Http),
        }
    }
}

/// Installed logging and telemetry; flushes exporters on drop.
#[derive(Debug)]
pub struct Telemetry {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<SdkTracerProvider>,
    #[cfg(feature = "telemetry")]
    meter_provider: Option<SdkMeterProvider>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

impl Telemetry {
    /// Installs the global subscriber. Call once, early in `main`.
    #[must_use]
    pub fn init() -> Self {
        #[cfg(feature = "telemetry")]
        if let Some(protocol) = Protocol::from_env() {
            match otel_providers(protocol) {
                Ok((tracer_provider, meter_provider)) => {
                    let tracer = tracer_provider.tracer(env!("CARGO_PKG_NAME"));
                    tracing_subscriber::registry()
                        .with(env_filter())
                        .with(tracing_subscriber::fmt::layer())
                        .with(tracing_opentelemetry::MetricsLayer::new(meter_provider.clone()))
                        .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
                        .init();
                    tracing::info!(?protocol, "OpenTelemetry export enabled");
                    return Self {
                        tracer_provider: Some(tracer_provider),
                        meter_provider: Some(meter_provider),
                    };
                }
                Err(e) => {
                    init_plain();
                    tracing::warn!(error = %e, "OpenTelemetry export disabled");
                    return Self::plain();
                }
            }
        }
        init_plain();
        Self::plain()
    }

    const fn plain() -> Self {
        Self {
            #[cfg(feature = "telemetry")]
            tracer_provider: None,
            #[cfg(feature = "telemetry")]
            meter_provider: None,
        }
    }

    /// Request tracing for the HTTP server.
    #[must_use]
    pub fn http_tracing() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO))
    }
}

fn init_plain() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(feature = "telemetry")]
fn resource() -> Resource {
    let environment = std::env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_owned());
    Resource::builder()
        .with_service_name(env!("CARGO_PKG_NAME"))
        .with_schema_url(
            [
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, environment),
            ],
            SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "telemetry")]
fn otel_providers(
    protocol: Protocol,
) -> Result<(SdkTracerProvider, SdkMeterProvider), opentelemetry_otlp::ExporterBuildError> {
    let spans = opentelemetry_otlp::SpanExporter::builder();
    let spans = match protocol {
        Protocol::Http => spans.with_http().build()?,
        Protocol::Grpc => spans.with_tonic().build()?,
    };
    let tracer_provider = SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_resource(resource())
        .with_batch_exporter(spans)
        .build();

    let metrics = opentelemetry_otlp::MetricExporter::builder();
    let metrics = match protocol {
        Protocol::Http => metrics.with_http().build()?,
        Protocol::Grpc => metrics.with_tonic().build()?,
    };
    let reader = PeriodicReader::builder(metrics)
        .with_interval(std::time::Duration::from_secs(30))
        .build();
    let stdout = PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default()).build();
    let meter_provider = SdkMeterProvider::builder()
        .with_resource(resource())
        .with_reader(reader)
        .with_reader(stdout)
        .build();
    global::set_meter_provider(meter_provider.clone());
    Ok((tracer_provider, meter_provider))
}

#[cfg(feature = "telemetry")]
impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = ?e, "Tracer provider shutdown failed");
            }
        }
        if let Some(provider) = self.meter_provider.take() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = ?e, "Meter provider shutdown failed");
            }
        }
    }
}
