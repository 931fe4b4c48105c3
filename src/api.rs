//! REST API Server for the finance query orchestrator
//!
//! Exposes `process_query` over HTTP

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::Orchestrator;
use crate::models::ResponseStatus;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
    pub context: Option<Value>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Real UUIDs pass through; any other identifier maps to a stable UUID
fn parse_or_stable_uuid(value: Option<&str>, fallback_seed: &str) -> uuid::Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            uuid::Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => stable_uuid_from_string(fallback_seed),
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Query Endpoint
/// =============================

async fn query_handler(
    State(state): State<ApiState>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let text = req.query.trim();
    if text.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Query text is empty".into())),
        );
    }

    let org_id = parse_or_stable_uuid(req.org_id.as_deref(), "default-org");
    let user_id = parse_or_stable_uuid(req.user_id.as_deref(), "anonymous-user");
    info!(org_id = %org_id, user_id = %user_id, "Received query request");

    let response = state
        .orchestrator
        .process_query(org_id, user_id, text, req.context)
        .await;

    let status = match response.status {
        ResponseStatus::WaitingApproval => StatusCode::ACCEPTED,
        ResponseStatus::Completed | ResponseStatus::Degraded => StatusCode::OK,
    };

    (status, Json(ApiResponse::success(response)))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/query", post(query_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::registry::builtin_registry;
    use crate::state::InMemoryFinancialDataStore;
    use tokio_test::assert_ok;

    fn state() -> ApiState {
        let config = OrchestratorConfig::default();
        ApiState {
            orchestrator: Arc::new(Orchestrator::new(
                &config,
                Arc::new(builtin_registry(&config)),
                Arc::new(InMemoryFinancialDataStore::new()),
                None,
            )),
        }
    }

    fn request(query: &str) -> QueryRequest {
        QueryRequest {
            query: query.to_string(),
            org_id: Some("acme-corp".to_string()),
            user_id: None,
            context: None,
        }
    }

    #[test]
    fn test_stable_uuid_mapping() {
        let a = parse_or_stable_uuid(Some("acme-corp"), "x");
        assert_eq!(a, parse_or_stable_uuid(Some("acme-corp"), "y"));
        assert_eq!(a.get_version_num(), 4);

        let real = uuid::Uuid::new_v4();
        assert_eq!(parse_or_stable_uuid(Some(&real.to_string()), "x"), real);
        assert_eq!(parse_or_stable_uuid(Some("  "), "seed"), parse_or_stable_uuid(None, "seed"));
    }

    #[tokio::test]
    async fn test_query_endpoint_wraps_response() {
        let (status, Json(body)) = query_handler(State(state()), Json(request("What is our cash runway?"))).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.success);
        let data = body.data.unwrap();
        assert_eq!(data["status"], "completed");
        assert_eq!(data["sections"].as_array().map(Vec::len), Some(10));
        assert!(data["certification"]["maturityScore"].is_f64());

        let reparsed: crate::models::QueryResponse = assert_ok!(serde_json::from_value(data));
        assert_eq!(reparsed.status, ResponseStatus::Completed);
    }

    #[tokio::test]
    async fn test_gated_query_returns_accepted() {
        let (status, Json(body)) =
            query_handler(State(state()), Json(request("Wire $2m to the escrow account"))).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let data = body.data.unwrap();
        assert_eq!(data["status"], "waiting_approval");
        assert_eq!(data["requiresApproval"], true);
        let planned = data["approval"]["plannedTaskDescriptions"].as_array().unwrap();
        assert_eq!(planned.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let (status, Json(body)) = query_handler(State(state()), Json(request("   "))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
    }
}
