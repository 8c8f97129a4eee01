use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Form, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    engine::DetectionEngine,
    error::AppError,
    layout::{layout_hash, FEATURE_VERSION},
    types::{AnalyzeForm, AnalyzeResponse, HealthResponse},
};

const INDEX_HTML: &str = include_str!("../templates/index.html");

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DetectionEngine>,
    /// `None` when no recorder is installed, as in tests.
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/analyze", post(analyze))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Always 200 with a JSON body; scoring failures are reported inside it.
pub async fn analyze(State(state): State<AppState>, Form(form): Form<AnalyzeForm>) -> Response {
    let url = form.url.unwrap_or_default();
    if url.trim().is_empty() {
        debug!("Analyze request without a URL");
        return Json(json!({ "error": "No URL provided" })).into_response();
    }

    info!("Received analyze request for {}", url);
    let result = state.engine.score(&url).await;

    Json(AnalyzeResponse {
        url,
        timestamp: chrono::Utc::now().to_rfc3339(),
        result,
    })
    .into_response()
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        model_loaded: state.engine.model_loaded(),
        feature_version: FEATURE_VERSION,
        layout_hash: format!("{:08x}", layout_hash()),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn metrics(State(state): State<AppState>) -> Result<Response, AppError> {
    let handle = state.metrics.as_ref().ok_or(AppError::MetricsUnavailable)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::Classifier, domain_age::DisabledLookup, features::FeatureExtractor, parser::UrlParser,
        whitelist::Whitelist,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn app() -> Router {
        let parser = Arc::new(UrlParser::new().unwrap());
        let extractor = FeatureExtractor::new(parser.clone(), Arc::new(DisabledLookup));
        let engine = DetectionEngine::new(parser, Whitelist::new(), extractor, Classifier::unloaded());
        router(AppState { engine: Arc::new(engine), metrics: None })
    }

    fn form_post(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/analyze")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_without_url() {
        for body in ["", "url=", "url=%20%20"] {
            let response = app().oneshot(form_post(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await, json!({ "error": "No URL provided" }));
        }
    }

    #[tokio::test]
    async fn test_analyze_whitelisted() {
        let response = app()
            .oneshot(form_post("url=https%3A%2F%2Fwww.google.com%2Fanything%3Fx%3D1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["url"], "https://www.google.com/anything?x=1");
        assert_eq!(body["is_phishing"], false);
        assert_eq!(body["confidence"], 0.99);
        assert_eq!(body["features"], json!({ "is_legitimate": true }));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_analyze_without_model_is_still_ok() {
        let response = app().oneshot(form_post("url=http%3A%2F%2Fsecure-paypal.com")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["is_phishing"], Value::Null);
        assert_eq!(body["confidence"], 0.0);
        assert_eq!(body["error"], "model not loaded");
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], false);
        assert_eq!(body["feature_version"], FEATURE_VERSION);
        assert_eq!(body["layout_hash"], format!("{:08x}", layout_hash()));
    }

    #[tokio::test]
    async fn test_index_serves_form() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("action=\"/analyze\""));
    }

    #[tokio::test]
    async fn test_metrics_without_recorder_is_503() {
        let response = app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = json_body(response).await;
        assert_eq!(body["error"], "metrics exporter not installed");
        assert_eq!(body["status"], 503);
    }
}
