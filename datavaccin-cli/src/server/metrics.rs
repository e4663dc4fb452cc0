use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::{MatchedPath, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use datavaccin_lib::RefreshOutcome;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use super::state::AppState;

/// Global metrics registry
static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// All application metrics
pub struct Metrics {
    // HTTP request metrics
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,

    // Store
    pub records_total: IntGauge,
    pub store_mutations: IntCounterVec,
    pub persist_duration: Histogram,

    // Refresh job
    pub refresh_runs: IntCounterVec,
    pub refresh_appended: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new(registry: &Registry) -> Self {
        // ── HTTP request metrics ──────────────────────────────────────
        let http_requests_total = IntCounterVec::new(
            Opts::new("dv_http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("failed to create http_requests_total metric");

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "dv_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
            &["method", "path"],
        )
        .expect("failed to create http_request_duration metric");

        // ── Store metrics ─────────────────────────────────────────────
        let records_total = IntGauge::new("dv_records_total", "Number of records in the store")
            .expect("failed to create records_total metric");

        let store_mutations = IntCounterVec::new(
            Opts::new("dv_store_mutations_total", "Store mutations by operation and outcome"),
            &["op", "status"],
        )
        .expect("failed to create store_mutations metric");

        let persist_duration = Histogram::with_opts(
            HistogramOpts::new(
                "dv_persist_duration_seconds",
                "Duration of records file writes",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .expect("failed to create persist_duration metric");

        // ── Refresh metrics ───────────────────────────────────────────
        let refresh_runs = IntCounterVec::new(
            Opts::new("dv_refresh_runs_total", "Refresh cycles by outcome"),
            &["outcome"],
        )
        .expect("failed to create refresh_runs metric");

        let refresh_appended = IntCounter::new(
            "dv_refresh_appended_total",
            "Records appended by the refresh job",
        )
        .expect("failed to create refresh_appended metric");

        registry.register(Box::new(http_requests_total.clone())).expect("register http_requests_total");
        registry.register(Box::new(http_request_duration.clone())).expect("register http_request_duration");
        registry.register(Box::new(records_total.clone())).expect("register records_total");
        registry.register(Box::new(store_mutations.clone())).expect("register store_mutations");
        registry.register(Box::new(persist_duration.clone())).expect("register persist_duration");
        registry.register(Box::new(refresh_runs.clone())).expect("register refresh_runs");
        registry.register(Box::new(refresh_appended.clone())).expect("register refresh_appended");

        Self {
            http_requests_total,
            http_request_duration,
            records_total,
            store_mutations,
            persist_duration,
            refresh_runs,
            refresh_appended,
        }
    }
}

/// Get the global metrics instance, initializing on first call
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = REGISTRY.get_or_init(Registry::new);
        Metrics::new(registry)
    })
}

/// Count one store mutation. `status` is "ok" or an error label.
pub fn record_mutation(op: &str, status: &str) {
    metrics()
        .store_mutations
        .with_label_values(&[op, status])
        .inc();
}

/// Count one finished refresh cycle. Failed cycles are counted as "error".
pub fn record_refresh(outcome: Option<&RefreshOutcome>) {
    let m = metrics();
    let Some(outcome) = outcome else {
        m.refresh_runs.with_label_values(&["error"]).inc();
        return;
    };
    m.refresh_runs.with_label_values(&[outcome.label()]).inc();
    if let RefreshOutcome::Refreshed { appended, meta, .. } = outcome {
        m.refresh_appended.inc_by(*appended as u64);
        m.persist_duration.observe(meta.elapsed.as_secs_f64());
        m.records_total.set(meta.records_count as i64);
    }
}

/// Axum handler for GET /metrics, Prometheus text format
pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    metrics().records_total.set(state.store.len().await as i64);

    let registry = REGISTRY.get_or_init(Registry::new);
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Axum handler for GET /readyz
///
/// The store is loaded before the listener is bound, so a running server is
/// ready; the body reports what it serves.
pub async fn handle_readyz(State(state): State<AppState>) -> Response {
    let records_loaded = state.store.len().await;
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "ready": true,
            "records_loaded": records_loaded,
            "refresh_enabled": state.config.refresh.enabled,
        })),
    )
        .into_response()
}

/// Axum middleware that records HTTP request count and duration.
pub async fn track_metrics(request: Request<axum::body::Body>, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let m = metrics();
    m.http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    m.http_request_duration
        .with_label_values(&[&method, &path])
        .observe(elapsed);

    response
}

/// Axum handler for GET /health, always 200
pub async fn handle_health_check() -> Response {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({"status": "ok"})),
    )
        .into_response()
}
