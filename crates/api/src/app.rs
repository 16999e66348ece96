use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use reviva_reconciler::{ReconcileError, Reconciler, WebhookEnvelope};

use crate::errors;

/// Shared per-process services, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub webhook_secret: Option<String>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/webhooks/subscription",
            post(handle_subscription_webhook).options(webhook_preflight),
        )
        .layer(Extension(Arc::new(state)))
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Permissive CORS response for browser-originated test calls.
async fn webhook_preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                "Authorization, Content-Type",
            ),
        ],
    )
}

async fn handle_subscription_webhook(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(envelope): Json<WebhookEnvelope>,
) -> axum::response::Response {
    if let Some(expected) = &state.webhook_secret {
        match errors::extract_bearer(&headers) {
            Some(token) if token == expected => {}
            _ => {
                tracing::warn!("webhook rejected: bad or missing secret");
                return errors::json_error(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "invalid webhook secret",
                );
            }
        }
    }

    match state.reconciler.handle(&envelope.event).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "canonical_id": outcome.canonical_id,
                "event_type": outcome.event_type.as_str(),
            })),
        )
            .into_response(),
        Err(e @ ReconcileError::MissingSubject) => {
            errors::json_error(StatusCode::BAD_REQUEST, "missing_subject", e.to_string())
        }
        Err(e) => {
            // The provider retries on 500; reconciliation is idempotent, so
            // redelivery is the recovery path.
            tracing::error!(error = %e, "reconciliation failed");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "reconciliation_failure",
                e.to_string(),
            )
        }
    }
}
