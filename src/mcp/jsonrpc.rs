//! JSON-RPC 2.0 framing for the MCP transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    /// Absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

/// Anything that can arrive on an MCP stream.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Invalid { id: Value, reason: String },
}

impl JsonRpcMessage {
    pub fn classify(value: Value) -> Self {
        let id = value.get("id").cloned().unwrap_or(Value::Null);

        if value.get("method").is_some() {
            return match serde_json::from_value::<JsonRpcRequest>(value) {
                Ok(request) => Self::Request(request),
                Err(err) => Self::Invalid {
                    id,
                    reason: err.to_string(),
                },
            };
        }

        if value.get("result").is_some() || value.get("error").is_some() {
            return match serde_json::from_value::<JsonRpcResponse>(value) {
                Ok(response) => Self::Response(response),
                Err(err) => Self::Invalid {
                    id,
                    reason: err.to_string(),
                },
            };
        }

        Self::Invalid {
            id,
            reason: "message is neither a request nor a response".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_requests_notifications_and_responses() {
        let request = JsonRpcMessage::classify(json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/list"
        }));
        assert!(matches!(request, JsonRpcMessage::Request(ref r) if !r.is_notification()));

        let notification = JsonRpcMessage::classify(json!({
            "jsonrpc": "2.0", "method": "notifications/initialized"
        }));
        assert!(matches!(notification, JsonRpcMessage::Request(ref r) if r.is_notification()));

        let response = JsonRpcMessage::classify(json!({
            "jsonrpc": "2.0", "id": 7, "result": {"ok": true}
        }));
        assert!(matches!(response, JsonRpcMessage::Response(ref r) if r.id == json!(7)));

        let invalid = JsonRpcMessage::classify(json!({ "id": 3 }));
        assert!(matches!(invalid, JsonRpcMessage::Invalid { ref id, .. } if *id == json!(3)));
    }

    #[test]
    fn responses_omit_absent_members() {
        let value = serde_json::to_value(JsonRpcResponse::failure(
            json!(2),
            JsonRpcError::method_not_found("nope"),
        ))
        .unwrap();

        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(value["error"]["message"], "Method not found: nope");
    }
}
