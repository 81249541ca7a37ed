//! HTTP surface of the admin service
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/connections` | List live connections |
//! | POST | `/login` | Connect, register and save a connection |
//! | POST | `/login/detectDb` | Probe a server for used databases |
//! | POST | `/logout/{connectionId}` | Disconnect and forget a connection |

use crate::core::builder::LoginRequest;
use crate::core::ConnectionSummary;
use crate::error::{ErrorSeverity, PorteroError};
use crate::service::AdminService;
use crate::store::ConnectionStore;
use crate::transport::Connector;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared state for API handlers
pub struct ApiState<C: Connector, S> {
    pub service: Arc<AdminService<C, S>>,
}

impl<C: Connector, S> Clone for ApiState<C, S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

#[derive(Serialize)]
struct ConnectionList {
    ok: bool,
    connections: Vec<ConnectionSummary>,
}

#[derive(Serialize)]
struct FailureBody {
    ok: bool,
    message: String,
}

/// Build the admin router around a shared service
pub fn build_router<C, S>(service: Arc<AdminService<C, S>>) -> Router
where
    C: Connector,
    S: ConnectionStore,
{
    Router::new()
        .route("/connections", get(list_connections::<C, S>))
        .route("/login", post(login::<C, S>))
        .route("/login/detectDb", post(detect_databases::<C, S>))
        .route("/logout/{connection_id}", post(logout::<C, S>))
        .with_state(ApiState { service })
}

/// Persistence and other unexpected failures become a 500
fn fatal(e: PorteroError) -> Response {
    match e.severity() {
        ErrorSeverity::Critical | ErrorSeverity::Error => error!("[{}] {}", e.severity(), e),
        ErrorSeverity::Warning | ErrorSeverity::Info => warn!("[{}] {}", e.severity(), e),
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(FailureBody {
            ok: false,
            message: e.to_string(),
        }),
    )
        .into_response()
}

/// GET /connections
async fn list_connections<C: Connector, S: ConnectionStore>(
    State(state): State<ApiState<C, S>>,
) -> impl IntoResponse {
    Json(ConnectionList {
        ok: true,
        connections: state.service.connections().await,
    })
}

/// POST /login
async fn login<C: Connector, S: ConnectionStore>(
    State(state): State<ApiState<C, S>>,
    Json(request): Json<LoginRequest>,
) -> Response {
    match state.service.login(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => fatal(e),
    }
}

/// POST /login/detectDb
async fn detect_databases<C: Connector, S: ConnectionStore>(
    State(state): State<ApiState<C, S>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    Json(state.service.detect_databases(&request).await)
}

/// POST /logout/{connectionId}
async fn logout<C: Connector, S: ConnectionStore>(
    State(state): State<ApiState<C, S>>,
    Path(connection_id): Path<String>,
) -> Response {
    match state.service.logout(&connection_id).await {
        Ok(outcome) => {
            info!(
                connection_id = %connection_id,
                live_removed = outcome.live_removed,
                saved_removed = outcome.saved_removed,
                "Logout handled"
            );
            "OK".into_response()
        }
        Err(e) => fatal(e),
    }
}
