//! Tracing, trace propagation and Prometheus metrics for the contact database service.
//!
//! # Purpose
//! Installs the `tracing` subscriber (env filter, fmt output, optional OTLP export), the W3C
//! trace-context propagator used by the HTTP trace layer, and the Prometheus recorder that
//! backs the `contactdb_*` counters.
//!
//! # Notes
//! Every initializer is guarded by a `OnceLock`, so tests may call them repeatedly.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const SERVICE_NAME: &str = "contactdb";

static SUBSCRIBER: OnceLock<()> = OnceLock::new();
static PROPAGATOR: OnceLock<()> = OnceLock::new();
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

// Optional resource attributes: (environment variable, OpenTelemetry attribute key).
const RESOURCE_ENV: [(&str, &str); 4] = [
    ("K8S_NAMESPACE_NAME", "k8s.namespace.name"),
    ("K8S_POD_NAME", "k8s.pod.name"),
    ("DEPLOYMENT_ENVIRONMENT", "deployment.environment"),
    ("CONTACTDB_SITE", "contactdb.site"),
];

/// Installs tracing and metrics once and returns the Prometheus handle.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    SUBSCRIBER.get_or_init(|| {
        install_propagator();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        match otlp_provider(service_name) {
            Some(provider) => {
                let tracer = provider.tracer(service_name.to_string());
                let _ = registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
            }
            None => {
                let _ = registry.try_init();
            }
        }
    });
    metrics_handle()
}

fn install_propagator() {
    PROPAGATOR.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

// Span export is only enabled when an OTLP endpoint is configured.
fn otlp_provider(service_name: &str) -> Option<SdkTracerProvider> {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let instance = std::env::var("CONTACTDB_INSTANCE_ID").or_else(|_| std::env::var("HOSTNAME"));
    std::iter::once(KeyValue::new("service.name", service_name.to_string()))
        .chain(instance.ok().map(|id| KeyValue::new("service.instance.id", id)))
        .chain(RESOURCE_ENV.iter().filter_map(|(var, key)| {
            std::env::var(var)
                .ok()
                .map(|value| KeyValue::new(*key, value))
        }))
        .collect()
}

/// Parent context carried by `traceparent`/`tracestate` request headers.
pub fn trace_context_from_headers(headers: &axum::http::HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

struct HeaderExtractor<'a>(&'a axum::http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Serves `/metrics` on `addr` until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_metrics_on(handle, listener, std::future::pending()).await
}

async fn serve_metrics_on<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

fn metrics_handle() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("install metrics recorder")
        })
        .clone()
}
