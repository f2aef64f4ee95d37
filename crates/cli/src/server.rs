// Report query routes
//
// Serves the report queries of the orchestrator's latest run over HTTP. Every
// report route answers 409 until the run reached the reporting phase.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use stampede_bench::{BenchError, BenchOrchestrator, MetricsError};

/// App state for report routes
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BenchOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<BenchOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Create report routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/histogram", get(histogram))
        .route("/histogram.csv", get(histogram_csv))
        .route("/histogram.html", get(histogram_html))
        .route("/metrics", get(metrics))
        .route("/metrics.csv", get(metrics_csv))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct CsvParams {
    pub separator: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    phase: String,
}

/// Report error mapped onto an HTTP status
pub struct ApiError(BenchError);

impl From<BenchError> for ApiError {
    fn from(err: BenchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BenchError::NotReady(_) => StatusCode::CONFLICT,
            BenchError::Metrics(MetricsError::NotConfigured) => StatusCode::NOT_FOUND,
            BenchError::Metrics(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

fn json_body(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn csv_body(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response()
}

/// GET /health - Liveness and current run phase
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        phase: state.orchestrator.phase().to_string(),
    })
}

/// GET /histogram - Histogram buckets as JSON
async fn histogram(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(json_body(state.orchestrator.histogram_json()?))
}

/// GET /histogram.csv?separator= - Histogram as CSV
async fn histogram_csv(
    State(state): State<AppState>,
    Query(params): Query<CsvParams>,
) -> Result<Response, ApiError> {
    let csv = state
        .orchestrator
        .histogram_csv(params.separator.as_deref())?;
    Ok(csv_body(csv))
}

/// GET /histogram.html - Chart page
async fn histogram_html(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    Ok(Html(state.orchestrator.histogram_html()?))
}

/// GET /metrics - Correlated server metrics as JSON
async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(json_body(state.orchestrator.metrics_json().await?))
}

/// GET /metrics.csv?separator= - Correlated server metrics as CSV
async fn metrics_csv(
    State(state): State<AppState>,
    Query(params): Query<CsvParams>,
) -> Result<Response, ApiError> {
    let csv = state
        .orchestrator
        .metrics_csv(params.separator.as_deref())
        .await?;
    Ok(csv_body(csv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use stampede_bench::{BenchConfig, InMemoryExecutionStore, RunSpec};
    use std::time::Duration;
    use tower::ServiceExt;

    fn orchestrator() -> Arc<BenchOrchestrator> {
        let store = Arc::new(InMemoryExecutionStore::new());
        let config = BenchConfig {
            monitor_poll_interval: Duration::from_millis(10),
            ..BenchConfig::default()
        };
        Arc::new(BenchOrchestrator::new(config, store.clone(), store))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn finished_app() -> Router {
        let orchestrator = orchestrator();
        let spec = RunSpec::from_json(
            r#"{"steps":[{"count":4,"concurrency":2}],"workflow":{"name":"basic"}}"#,
        )
        .unwrap();
        orchestrator.run(spec).await.unwrap();
        routes(AppState::new(orchestrator))
    }

    #[tokio::test]
    async fn test_health_reports_phase() {
        let app = routes(AppState::new(orchestrator()));

        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["phase"], "idle");
    }

    #[tokio::test]
    async fn test_reports_conflict_before_run() {
        let app = routes(AppState::new(orchestrator()));

        let (status, body) = get(app, "/histogram").await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.contains("phase idle"));
    }

    #[tokio::test]
    async fn test_histogram_routes_after_run() {
        let app = finished_app().await;

        let (status, body) = get(app.clone(), "/histogram").await;
        assert_eq!(status, StatusCode::OK);
        let buckets: serde_json::Value = serde_json::from_str(&body).unwrap();
        let started: u64 = buckets
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["started"].as_u64().unwrap())
            .sum();
        assert_eq!(started, 4);

        let (status, body) = get(app.clone(), "/histogram.csv?separator=,").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("Time (seconds),Workflows Started,"));

        let (status, body) = get(app, "/histogram.html").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Benchmark: basic"));
    }

    #[tokio::test]
    async fn test_metrics_without_source_is_not_found() {
        let app = finished_app().await;

        let (status, _) = get(app, "/metrics.csv").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
