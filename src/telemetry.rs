//! OpenTelemetry wiring
//!
//! Kept from the teacher crate almost verbatim: a tracing layer that, when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set, ships spans to an OTLP collector.
//! Nothing here is specific to the reconciled resource type.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{registry::LookupSpan, Layer};

/// Build the tracing-opentelemetry layer, wired to an OTLP/gRPC exporter.
///
/// Returns `None` (and logs a warning) if the exporter pipeline could not be
/// constructed; callers fall back to stdout-only logging in that case.
pub fn init_telemetry<S>(_registry: &S) -> Option<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .ok()?;

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(opentelemetry_sdk::Resource::new(vec![
            opentelemetry::KeyValue::new("service.name", "eks-operator"),
        ]))
        .build();

    let tracer = provider.tracer("eks-operator");
    opentelemetry::global::set_tracer_provider(provider);

    Some(Box::new(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Flush any buffered spans on shutdown. Best-effort: a failure here must
/// never stop the process from exiting.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
