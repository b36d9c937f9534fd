//! Log and trace bootstrap.
//!
//! Events go to stderr through a `fmt` layer filtered by `RUST_LOG` (default
//! `info`); stdout is left for fetched content. With the `telemetry` feature,
//! spans are also exported over OTLP when any `OTEL_EXPORTER_OTLP_*` variable
//! is set.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Holds the span exporter, if any, and flushes it on drop.
pub struct Telemetry {
    #[cfg(feature = "telemetry")]
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Installs the global subscriber. Call once, before anything logs.
    pub fn new() -> Self {
        #[cfg(feature = "telemetry")]
        {
            if let Some(protocol) = otlp::TelemetryProtocol::from_env() {
                use opentelemetry::trace::TracerProvider as _;
                match otlp::init_tracer_provider(protocol) {
                    Ok(tracer_provider) => {
                        let tracer = tracer_provider.tracer("x402-access");
                        tracing_subscriber::registry()
                            .with(env_filter())
                            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                            .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
                            .init();
                        tracing::info!("OpenTelemetry span export is enabled via {protocol:?}");
                        return Self {
                            tracer_provider: Some(tracer_provider),
                        };
                    }
                    Err(err) => {
                        tracing_subscriber::registry()
                            .with(env_filter())
                            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                            .init();
                        tracing::warn!(error = %err, "OTLP exporter unavailable, logging locally");
                        return Self {
                            tracer_provider: None,
                        };
                    }
                }
            }
        }

        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        tracing::debug!("OpenTelemetry is not enabled");
        Self {
            #[cfg(feature = "telemetry")]
            tracer_provider: None,
        }
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        #[cfg(feature = "telemetry")]
        {
            if let Some(tracer_provider) = self.tracer_provider.as_ref() {
                if let Err(err) = tracer_provider.shutdown() {
                    eprintln!("{err:?}");
                }
            }
        }
    }
}

#[cfg(feature = "telemetry")]
mod otlp {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::ExporterBuildError;
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_semantic_conventions::{
        SCHEMA_URL,
        attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION},
    };
    use std::env;

    #[allow(clippy::upper_case_acronyms)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TelemetryProtocol {
        HTTP,
        GRPC,
    }

    impl TelemetryProtocol {
        /// `None` unless one of the OTLP exporter variables is set.
        pub fn from_env() -> Option<Self> {
            let is_enabled = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
                || env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
                || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
            if !is_enabled {
                return None;
            }
            let protocol = match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
                Ok("grpc") => TelemetryProtocol::GRPC,
                _ => TelemetryProtocol::HTTP,
            };
            Some(protocol)
        }
    }

    fn resource() -> Resource {
        let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
        Resource::builder()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    pub fn init_tracer_provider(
        protocol: TelemetryProtocol,
    ) -> Result<SdkTracerProvider, ExporterBuildError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder();
        let exporter = match protocol {
            TelemetryProtocol::HTTP => exporter.with_http().build()?,
            TelemetryProtocol::GRPC => exporter.with_tonic().build()?,
        };
        Ok(SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource())
            .with_batch_exporter(exporter)
            .build())
    }
}
