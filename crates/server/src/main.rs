mod auth;
mod cases;
mod config;
mod cors;
mod error;
mod escalation;
mod limiter;
mod notify;
mod pipeline;
mod processor;
mod rooms;
mod session;
mod store;
mod vault;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lexhub_common::types::CaseUpdateType;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::jwt::TokenIdentity;
use crate::config::HubConfig;
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    ErrorCode, HubError,
};
use crate::processor::IntentResponder;
use crate::store::MemoryStore;
use crate::ws::HubState;

const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;
const VAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HubConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set LEXHUB_JWT_SECRET in production");
    }

    let store = Arc::new(MemoryStore::new());
    let state = HubState::build(&config, store, Arc::new(IntentResponder::new()))
        .context("failed to build hub state")?;

    spawn_vault_sweeper(state.clone());

    let app = build_router(state);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind hub listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting hub server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("hub server exited unexpectedly")
}

/// Expired reconnection tokens are swept in the background so the vault
/// does not grow with abandoned sessions.
fn spawn_vault_sweeper(state: HubState) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(VAULT_SWEEP_INTERVAL_SECS));
        interval.tick().await; // skip immediate first tick
        loop {
            interval.tick().await;
            let swept = state.vault.sweep_expired().await;
            if swept > 0 {
                info!(swept, "expired reconnection tokens removed");
            }
        }
    });
}

fn build_router(state: HubState) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/v1/hub/stats", get(hub_stats))
            .route("/v1/cases/{case_id}/updates", post(publish_case_update))
            .with_state(state.clone())
            .merge(ws::router(state)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(cors::cors_layer())
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Live hub counters for operators.
async fn hub_stats(
    State(state): State<HubState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<Value>, HubError> {
    require_staff_bearer(&state, &headers)?;

    Ok(Json(json!({
        "activeConnections": state.sessions.count().await,
        "activeRooms": state.rooms.registry().room_count().await,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaseUpdateRequest {
    update_type: CaseUpdateType,
    #[serde(default)]
    data: Value,
}

/// Ingress for the firm's case-management system. Fans the update out to
/// live case-room subscribers and notifies offline participants.
async fn publish_case_update(
    State(state): State<HubState>,
    Path(case_id): Path<Uuid>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<CaseUpdateRequest>,
) -> Result<impl IntoResponse, HubError> {
    require_staff_bearer(&state, &headers)?;

    state.cases.publish(case_id, payload.update_type, payload.data).await;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

/// Validate the `Authorization: Bearer` token and require a staff role.
fn require_staff_bearer(
    state: &HubState,
    headers: &axum::http::HeaderMap,
) -> Result<TokenIdentity, HubError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| HubError::from_code(ErrorCode::AuthRequired))?;

    let identity = state
        .verifier
        .verify(token)
        .map_err(|_| HubError::from_code(ErrorCode::AuthInvalidToken))?;

    if !identity.role.is_some_and(lexhub_common::types::UserRole::is_elevated) {
        return Err(HubError::from_code(ErrorCode::AuthForbidden));
    }

    Ok(identity)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response =
        with_request_id_scope(request_id.clone(), async move { next.run(request).await }).await;

    if HeaderValue::from_str(&request_id).is_ok() {
        attach_request_id_header(&mut response, &request_id);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        routing::get,
        Router,
    };
    use lexhub_common::types::{CaseRecord, UserRole};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::{apply_middleware, build_router};
    use crate::config::HubConfig;
    use crate::processor::IntentResponder;
    use crate::store::{ChatStore, MemoryStore};
    use crate::ws::HubState;

    fn test_state() -> (HubState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = HubState::build(
            &HubConfig::from_env(),
            store.clone(),
            Arc::new(IntentResponder::new()),
        )
        .expect("test hub state should build");
        (state, store)
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let (state, _store) = test_state();
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn stats_require_a_staff_bearer_token() {
        let (state, _store) = test_state();
        let client_token = state.verifier.issue_token("client-1", Some(UserRole::Client)).unwrap();
        let admin_token = state.verifier.issue_token("admin-1", Some(UserRole::Admin)).unwrap();
        let app = build_router(state);

        let anonymous = app
            .clone()
            .oneshot(Request::builder().uri("/v1/hub/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let forbidden = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/v1/hub/stats")
                    .header("authorization", format!("Bearer {client_token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let allowed = app
            .oneshot(
                Request::builder()
                    .uri("/v1/hub/stats")
                    .header("authorization", format!("Bearer {admin_token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);

        let body = to_bytes(allowed.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["activeConnections"], 0);
        assert_eq!(parsed["activeRooms"], 0);
    }

    #[tokio::test]
    async fn case_updates_are_accepted_and_notify_participants() {
        let (state, store) = test_state();
        let case_id = Uuid::new_v4();
        store
            .insert_case(CaseRecord {
                id: case_id,
                case_number: "2026-00042".to_string(),
                client_id: Some("client-1".to_string()),
                attorney_id: None,
            })
            .await;
        let admin_token = state.verifier.issue_token("admin-1", Some(UserRole::Admin)).unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("/v1/cases/{case_id}/updates"))
                    .header("authorization", format!("Bearer {admin_token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "updateType": "status_change", "data": { "status": "discovery" } })
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let notifications = store.unread_notifications("client-1", 10).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications[0].message.contains("2026-00042"));
    }

    #[tokio::test]
    async fn case_updates_reject_non_staff_callers() {
        let (state, _store) = test_state();
        let client_token = state.verifier.issue_token("client-1", Some(UserRole::Client)).unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("/v1/cases/{}/updates", Uuid::new_v4()))
                    .header("authorization", format!("Bearer {client_token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "updateType": "note_added" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
