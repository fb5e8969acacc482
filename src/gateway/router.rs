//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};
use tracing::{error, warn};

use crate::Error;
use crate::interpreter::Interpreter;

/// Shared application state
pub struct AppState {
    /// Request pipeline
    pub interpreter: Arc<Interpreter>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let server = &state.interpreter.config().server;
    let cors = server.cors;
    let max_body_size = server.max_body_size;

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/interpret", post(interpret_handler))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http());

    let router = if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": state.interpreter.backend_count(),
        "model_configured": state.interpreter.model_configured(),
    }))
}

/// POST /interpret handler
///
/// Body: `{"message": "..."}`. Replies with the response envelope, or a
/// `{"detail": ...}` error body.
async fn interpret_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected request body");
            return detail(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let message = body.get("message").and_then(Value::as_str).unwrap_or_default();

    match state.interpreter.interpret(message).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => e.into_response(),
    }
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.is_client_error() {
            detail(StatusCode::BAD_REQUEST, self.to_string())
        } else {
            error!(error = %self, "Interpretation failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
        }
    }
}
