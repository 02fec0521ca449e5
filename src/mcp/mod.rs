//! Model Context Protocol host: tool registration, JSON-RPC dispatch and the
//! stdio/HTTP transports. The pattern engine only meets this layer through
//! [`ToolHandler`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub mod connection;
pub mod http;
pub mod jsonrpc;
pub mod tools;

pub use connection::{Connection, ConnectionError, Peer, PeerError};
pub use jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
pub use tools::PatternTools;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "dialectic";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("failed to encode tool output: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ToolCallError> for JsonRpcError {
    fn from(error: ToolCallError) -> Self {
        match error {
            ToolCallError::UnknownTool(_) => JsonRpcError::invalid_params(error.to_string()),
            ToolCallError::Serialization(_) => JsonRpcError::internal(error.to_string()),
        }
    }
}

/// The capability the protocol host forwards tool traffic to.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn list_tools(&self) -> Vec<ToolDescriptor>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolCallError>;
}

/// Answers one client request. Notifications yield `None`.
pub async fn dispatch(handler: &dyn ToolHandler, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    debug!(method = %request.method, "received request");

    let Some(id) = request.id.clone() else {
        debug!(method = %request.method, "ignoring notification");
        return None;
    };

    let outcome = match request.method.as_str() {
        "initialize" => Ok(initialize_result()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": handler.list_tools() })),
        "tools/call" => call_tool(handler, request.params).await,
        method => {
            warn!(method, "unknown method");
            Err(JsonRpcError::method_not_found(method))
        }
    };

    Some(match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    })
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": SERVER_VERSION
        }
    })
}

async fn call_tool(handler: &dyn ToolHandler, params: Option<Value>) -> Result<Value, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_params("Missing tool name"))?;
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let output = handler.call_tool(name, arguments).await?;
    serde_json::to_value(output).map_err(|err| JsonRpcError::internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTools;

    #[async_trait]
    impl ToolHandler for EchoTools {
        fn list_tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "echo".to_string(),
                description: "Echo arguments".to_string(),
                input_schema: json!({ "type": "object" }),
            }]
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolCallError> {
            match name {
                "echo" => Ok(ToolOutput::text(arguments.to_string())),
                other => Err(ToolCallError::UnknownTool(other.to_string())),
            }
        }
    }

    fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(id, method, params)
    }

    #[tokio::test]
    async fn initialize_advertises_tools_capability() {
        let response = dispatch(&EchoTools, request(1, "initialize", json!({}))).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "dialectic");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    }

    #[tokio::test]
    async fn lists_tools_with_camel_case_schema_key() {
        let response = dispatch(&EchoTools, request(2, "tools/list", json!({}))).await.unwrap();
        let tools = response.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "echo");
        assert_eq!(tools[0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_protocol_error() {
        let response = dispatch(
            &EchoTools,
            request(3, "tools/call", json!({ "name": "nope", "arguments": {} })),
        )
        .await
        .unwrap();

        let error = response.error.unwrap();
        assert_eq!(error.code, jsonrpc::INVALID_PARAMS);
        assert_eq!(error.message, "Unknown tool: nope");
        assert!(response.result.is_none());
    }

    #[tokio::test]
    async fn unknown_method_and_notifications() {
        let response = dispatch(&EchoTools, request(4, "resources/list", json!({}))).await.unwrap();
        assert_eq!(response.error.unwrap().code, jsonrpc::METHOD_NOT_FOUND);

        let notification = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: None,
        };
        assert!(dispatch(&EchoTools, notification).await.is_none());
    }

    #[tokio::test]
    async fn missing_arguments_default_to_empty_object() {
        let response = dispatch(&EchoTools, request(5, "tools/call", json!({ "name": "echo" })))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["content"][0]["text"], "{}");
        assert!(result.get("isError").is_none());
    }
}
