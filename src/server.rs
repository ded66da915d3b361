use crate::constants::INTAKE_API_KEY_HEADER;
use crate::error::PipelineError;
use crate::intake::{self, IntakeReport};
use crate::storage::Storage;
use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hyper::Server;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub api_key: String,
}

/// Intake failures mapped onto HTTP statuses
pub enum ApiError {
    Unauthorized,
    Pipeline(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid or missing API key").into_response(),
            ApiError::Pipeline(e @ PipelineError::InvalidRecord { .. }) => {
                (StatusCode::BAD_REQUEST, e.to_string()).into_response()
            }
            ApiError::Pipeline(e) => {
                error!("Intake request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let provided = headers
        .get(INTAKE_API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if provided == Some(state.api_key.as_str()) {
        Ok(())
    } else {
        warn!("Rejected intake request with bad {} header", INTAKE_API_KEY_HEADER);
        Err(ApiError::Unauthorized)
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "classical-concerts-intake",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Crawlers unpack the body as `[inserted, skipped]`.
async fn add_concerts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(records): Json<Vec<Value>>,
) -> Result<Json<(usize, usize)>, ApiError> {
    authorize(&state, &headers)?;
    let report: IntakeReport = intake::upload_concerts(state.storage.as_ref(), records).await?;
    Ok(Json(report.as_tuple()))
}

async fn add_potential_concerts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(records): Json<Vec<Value>>,
) -> Result<Json<(usize, usize)>, ApiError> {
    authorize(&state, &headers)?;
    let report = intake::upload_potential_concerts(state.storage.as_ref(), records).await?;
    Ok(Json(report.as_tuple()))
}

/// Create the HTTP router with the intake routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/add-concerts", post(add_concerts))
        .route("/api/add-potential-concerts", post(add_potential_concerts))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
}

/// Start the intake server on `bind`
pub async fn start_server(state: AppState, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let app = create_server(state);

    info!("Intake server listening on http://{}", addr);
    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        create_server(AppState {
            storage: Arc::new(InMemoryStorage::new()),
            api_key: "secret".to_string(),
        })
    }

    fn upload_request(key: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/add-concerts")
            .header("content-type", "application/json")
            .header(INTAKE_API_KEY_HEADER, key)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn add_concerts_returns_inserted_and_skipped() {
        let body = r#"[
            {"title": "Mahler 2", "date": "2025-05-01", "url": "u1"},
            {"title": "Mahler 2", "date": "2025-05-01", "url": "u1"}
        ]"#;
        let response = app().oneshot(upload_request("secret", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let counts: (usize, usize) = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(counts, (1, 1));
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let response = app().oneshot(upload_request("nope", "[]")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_record_is_bad_request() {
        let body = r#"[{"title": "Mahler 2"}]"#;
        let response = app().oneshot(upload_request("secret", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
