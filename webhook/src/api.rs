use crate::config::Listener as ListenerConfig;
use crate::metrics_defs::{WEBHOOK_FAILED, WEBHOOK_PERSISTED, WEBHOOK_RECEIVED};
use crate::pipeline::{WebhookError, WebhookHandler};
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;

pub const WEBHOOK_PATH: &str = "/sonar-collector";

#[derive(thiserror::Error, Debug)]
pub enum WebhookApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub fn router(handler: WebhookHandler) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(receive))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(handler)
}

pub async fn serve(listener: ListenerConfig, handler: WebhookHandler) -> Result<(), WebhookApiError> {
    let app = router(handler);

    let addr = format!("{}:{}", listener.host, listener.port);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, path = WEBHOOK_PATH, "Listening for Sonar webhooks");
    axum::serve(listener, app).await?;
    Ok(())
}

// The body is taken as raw bytes so that malformed JSON goes through the
// same 500 path as every other failure instead of axum's 4xx rejections.
async fn receive(State(handler): State<WebhookHandler>, body: Bytes) -> Result<StatusCode, WebhookError> {
    metrics::counter!(WEBHOOK_RECEIVED.name).increment(1);

    match handler.handle(&body).await {
        Ok(rows) => {
            metrics::counter!(WEBHOOK_PERSISTED.name).increment(1);
            tracing::debug!(rows, "Stored measures for delivery");
            Ok(StatusCode::OK)
        }
        Err(e) => {
            metrics::counter!(WEBHOOK_FAILED.name).increment(1);
            tracing::error!(error = &e as &dyn std::error::Error, "Webhook delivery failed");
            Err(e)
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn ready(State(handler): State<WebhookHandler>) -> Response {
    match handler.store().is_ready().await {
        true => (StatusCode::OK, "ok").into_response(),
        false => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // Sonar only looks at the status, and the cause stays in our logs
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}
