//! Observability bootstrap shared by every daemon binary (spec §6.4's
//! "each daemon takes ... the config options above", ambient logging is
//! carried regardless of the metrics-emission Non-goal in §1). A thin
//! `tracing` + optional OTLP-exporter init, since the control plane's own
//! code instruments itself with `tracing` macros directly rather than a
//! bespoke span API.

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitError, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum OtelInitError {
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInitialized(#[from] SubscriberInitError),
    #[cfg(feature = "otel")]
    #[error("failed to build OTLP trace exporter: {0}")]
    Exporter(#[from] opentelemetry::trace::TraceError),
}

/// Initializes the process-wide `tracing` subscriber: an `EnvFilter` read
/// from `RUST_LOG` (defaulting to `info`) plus a human-readable formatter.
/// With the `otel` feature, also installs a global OTLP trace exporter and
/// layers a `tracing-opentelemetry` bridge on top, so spans created via
/// `tracing::instrument` are exported without any call-site changes.
pub fn init_tracing(service_name: &str, otlp_endpoint: Option<&str>) -> Result<(), OtelInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = otlp_endpoint {
            let tracer = build_otlp_tracer(service_name, endpoint)?;
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            let subscriber = Registry::default()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer);
            return tracing::subscriber::set_global_default(subscriber)
                .map_err(|e| OtelInitError::AlreadyInitialized(e.into()));
        }
    }
    #[cfg(not(feature = "otel"))]
    {
        let _ = service_name;
        let _ = otlp_endpoint;
    }

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| OtelInitError::AlreadyInitialized(e.into()))
}

#[cfg(feature = "otel")]
fn build_otlp_tracer(
    service_name: &str,
    endpoint: &str,
) -> Result<opentelemetry_sdk::trace::Tracer, opentelemetry::trace::TraceError> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(endpoint),
        )
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
        ])))
        .install_batch(runtime::Tokio)
}
