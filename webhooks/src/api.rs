use crate::auth::{AuthError, SharedSecret};
use crate::config::Listener as ListenerConfig;
use crate::dispatcher::{Dispatcher, TriggerError};
use crate::store::{WebhookError, WebhookStore};
use crate::types::{Document, ID_FIELD, LogEntry, RecordError, RequestInfo};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum ApiServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Everything a request handler needs. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: WebhookStore,
    pub dispatcher: Dispatcher,
    pub secret: SharedSecret,
}

impl AppState {
    /// Writes an audit entry. Failures are logged and otherwise ignored.
    async fn audit(&self, entry: LogEntry) {
        if let Err(e) = self.store.append_log(&entry).await {
            tracing::error!(
                request_type = %entry.request_type,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(visit))
        .route("/health", get(health))
        .route("/webhook/add", post(add_webhook))
        .route(
            "/webhook/{id}",
            post(trigger_webhook)
                .put(update_webhook)
                .delete(delete_webhook),
        )
        .route("/webhook/{id}/details", post(webhook_details))
        .with_state(state)
}

pub async fn serve(listener: ListenerConfig, state: AppState) -> Result<(), ApiServerError> {
    let app = router(state);

    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("webhook not found")]
    NotFound,

    #[error("invalid action type")]
    InvalidType,

    #[error("invalid webhook: {0}")]
    InvalidWebhook(RecordError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::NotFound => ApiError::NotFound,
            WebhookError::Invalid(e) => ApiError::InvalidWebhook(e),
            WebhookError::Storage(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<TriggerError> for ApiError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::NotFound => ApiError::NotFound,
            TriggerError::InvalidType(_) => ApiError::InvalidType,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Webhook not found").into_response(),
            ApiError::InvalidType => {
                (StatusCode::BAD_REQUEST, "Invalid action type").into_response()
            }
            ApiError::InvalidWebhook(e) => {
                (StatusCode::BAD_REQUEST, format!("Invalid webhook: {e}")).into_response()
            }
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error.").into_response()
            }
        }
    }
}

/// Parses a JSON object body. Anything else, including an empty body, reads
/// as an empty object so that authentication fails with 401 rather than a
/// parse error.
fn parse_body(body: &Bytes) -> Document {
    match serde_json::from_slice(body) {
        Ok(Value::Object(document)) => document,
        _ => Document::new(),
    }
}

/// Host name the request was addressed to, without the port.
fn hostname(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if host.starts_with('[') {
        // IPv6 literal
        return match host.find(']') {
            Some(end) => host[..=end].to_string(),
            None => host.to_string(),
        };
    }
    host.split(':').next().unwrap_or_default().to_string()
}

fn request_info(headers: &HeaderMap, uri: &Uri, body: Document) -> RequestInfo {
    RequestInfo {
        hostname: hostname(headers),
        path: uri.path().to_string(),
        body,
    }
}

async fn visit(State(state): State<AppState>, headers: HeaderMap, uri: Uri) -> &'static str {
    let request = request_info(&headers, &uri, Document::new());
    state.audit(LogEntry::new(request, "visit")).await;
    "Hello World!"
}

async fn health() -> &'static str {
    "ok"
}

async fn add_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Json<Document>, ApiError> {
    let mut payload = parse_body(&body);
    state.secret.authorize(&mut payload)?;

    let created = state.store.create(payload.clone()).await?;

    let id = created.get(ID_FIELD).cloned().unwrap_or(Value::Null);
    let entry = LogEntry::new(request_info(&headers, &uri, payload), "add webhook")
        .with_field(ID_FIELD, id);
    state.audit(entry).await;

    Ok(Json(created))
}

async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let mut patch = parse_body(&body);
    state.secret.authorize(&mut patch)?;

    state.store.update(&id, patch.clone()).await?;

    let entry = LogEntry::new(request_info(&headers, &uri, patch), "update webhook")
        .with_field(ID_FIELD, id.as_str());
    state.audit(entry).await;

    Ok("Webhook updated successfully.")
}

async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let mut body = parse_body(&body);
    state.secret.authorize(&mut body)?;

    state.store.delete(&id).await?;

    let entry = LogEntry::new(request_info(&headers, &uri, body), "delete webhook")
        .with_field(ID_FIELD, id.as_str());
    state.audit(entry).await;

    Ok("Webhook deleted successfully.")
}

async fn webhook_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Document>, ApiError> {
    let mut body = parse_body(&body);
    state.secret.authorize(&mut body)?;

    Ok(Json(state.store.read(&id).await?))
}

// Triggering does not require the shared secret.
async fn trigger_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request = request_info(&headers, &uri, parse_body(&body));
    let result = state.dispatcher.trigger(&id, request).await?;
    Ok(Json(result))
}
