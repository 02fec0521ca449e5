//! Single-request JSON-RPC over HTTP: `POST /` with one message per body.
//!
//! There is no server-to-client channel here, so client sampling is not
//! available on this transport.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::mcp::{
    connection::ConnectionError,
    dispatch,
    jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcResponse},
    ToolHandler,
};

pub fn router(handler: Arc<dyn ToolHandler>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handle_message))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

pub async fn serve(addr: SocketAddr, handler: Arc<dyn ToolHandler>) -> Result<(), ConnectionError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP MCP server listening on {}", addr);
    axum::serve(listener, router(handler)).await?;
    Ok(())
}

async fn handle_message(
    State(handler): State<Arc<dyn ToolHandler>>,
    Json(message): Json<Value>,
) -> Response {
    match respond(handler.as_ref(), message).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Answers one HTTP-borne message; notifications and stray responses get no body.
pub async fn respond(handler: &dyn ToolHandler, message: Value) -> Option<JsonRpcResponse> {
    match JsonRpcMessage::classify(message) {
        JsonRpcMessage::Request(request) => dispatch(handler, request).await,
        JsonRpcMessage::Response(_) => None,
        JsonRpcMessage::Invalid { id, reason } => {
            Some(JsonRpcResponse::failure(id, JsonRpcError::invalid_request(reason)))
        }
    }
}
