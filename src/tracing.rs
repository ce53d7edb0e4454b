//! Tracing setup: console logging plus optional OpenTelemetry export
//!
//! ```text
//! dataloom → fmt layer (stderr)
//!          → OTLP (gRPC) → collector   (only when an endpoint is configured)
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,dataloom=debug";

/// Initialize the tracing subsystem
///
/// Console logging is always installed, as plain text or as JSON lines.
/// When `otlp_endpoint` is set, spans are additionally exported through a
/// batching OTLP pipeline.
///
/// # Example
/// ```ignore
/// init_tracing("dataloom", config.otlp_endpoint.as_deref(), config.log_json)?;
/// ```
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
    json_logs: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let text_layer = (!json_logs).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });
    let json_layer = json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
    });

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let otel_layer = match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                    vec![
                        KeyValue::new("service.name", service_name.to_string()),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ],
                )))
                .install_batch(runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let exporting = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()?;

    if exporting {
        tracing::info!(
            service = service_name,
            endpoint = otlp_endpoint.unwrap_or_default(),
            "OpenTelemetry tracing initialized"
        );
    } else {
        tracing::debug!(service = service_name, "Console tracing initialized");
    }

    Ok(())
}

/// Flush pending spans to the collector
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Log with the turn's trace id attached
#[macro_export]
macro_rules! trace_log {
    ($level:ident, $trace_id:expr, $($arg:tt)*) => {
        ::tracing::$level!(trace_id = %$trace_id, $($arg)*)
    };
}
