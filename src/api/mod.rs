//! HTTP API for health checks and per-order swap status

use crate::chain::ChainProvider;
use crate::config::ApiConfig;
use crate::coordination::{OrderView, SwapCoordinator};
use crate::error::{CoordinatorError, CoordinatorResult, ErrorKind, ErrorReport};
use crate::secret::SqliteSecretStore;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SwapCoordinator>,
    /// Durable secret store, checked by readiness
    pub store: Option<Arc<SqliteSecretStore>>,
    /// EVM chain providers, checked by readiness
    pub providers: Vec<Arc<ChainProvider>>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/orders", get(list_orders))
        .route(
            "/orders/:order_id",
            get(get_order).post(track_order).delete(untrack_order),
        )
        .route("/orders/:order_id/retry", post(retry_order))
        .route("/orders/:order_id/refresh", post(refresh_order))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> CoordinatorResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoordinatorError::Config(format!("Cannot bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Error response wrapper
struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoordinatorError::NotFound { .. } => StatusCode::NOT_FOUND,
            err if err.kind() == ErrorKind::Input => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: ErrorReport::from(&self.0),
            }),
        )
            .into_response()
    }
}

fn not_tracked(order_id: &str) -> ApiError {
    ApiError(CoordinatorError::NotFound {
        order_id: order_id.to_string(),
    })
}

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tracked_orders: state.coordinator.len(),
    })
}

/// Readiness check - secret store and chain RPCs
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = match &state.store {
        Some(store) => store.health_check().await.is_ok(),
        None => true,
    };

    let details: Vec<ChainHealth> = join_all(state.providers.iter().map(|provider| async move {
        let healthy = provider.health_check().await;
        crate::metrics::record_chain_health(provider.chain_id(), healthy);
        ChainHealth {
            chain_id: provider.chain_id(),
            name: provider.name().to_string(),
            healthy,
        }
    }))
    .await;
    let chains_ok = details.iter().all(|c| c.healthy);

    let ready = store_ok && chains_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            store: store_ok,
            chains: chains_ok,
            details,
        }),
    )
}

async fn list_orders(State(state): State<AppState>) -> impl IntoResponse {
    Json(OrdersResponse {
        orders: state.coordinator.list(),
    })
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
    state
        .coordinator
        .view(&order_id)
        .map(Json)
        .ok_or_else(|| not_tracked(&order_id))
}

/// Start tracking an order
async fn track_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
    Ok(Json(state.coordinator.track(&order_id)?))
}

async fn untrack_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.coordinator.untrack(&order_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Re-arm a blocked auto-trigger rule
async fn retry_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(request): Json<RetryRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    match request.action {
        RetryAction::Secret => state.coordinator.retry_secret(&order_id).await?,
        RetryAction::Redeem => state.coordinator.retry_redeem(&order_id).await?,
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            order_id,
            action: request.action.as_str().to_string(),
        }),
    ))
}

async fn refresh_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    state.coordinator.refresh(&order_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            order_id,
            action: "refresh".to_string(),
        }),
    ))
}

// Request and response types

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RetryAction {
    Secret,
    Redeem,
}

impl RetryAction {
    fn as_str(&self) -> &'static str {
        match self {
            RetryAction::Secret => "secret",
            RetryAction::Redeem => "redeem",
        }
    }
}

#[derive(Deserialize)]
struct RetryRequest {
    action: RetryAction,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    tracked_orders: usize,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    name: String,
    healthy: bool,
}

#[derive(Serialize)]
struct OrdersResponse {
    orders: Vec<OrderView>,
}

#[derive(Serialize)]
struct AcceptedResponse {
    order_id: String,
    action: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorReport,
}
