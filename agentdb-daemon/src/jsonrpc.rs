//! JSON-RPC 2.0 envelope types for the newline-delimited socket protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC parse error.
pub const PARSE_ERROR: i32 = -32700;
/// Malformed request envelope.
pub const INVALID_REQUEST: i32 = -32600;
/// Unknown method.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Parameters failed validation.
pub const INVALID_PARAMS: i32 = -32602;
/// Any other failure, wrapped with a typed `data.code`.
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC request structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// Successful response carrying a result.
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    #[must_use]
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Error response with a typed code in `data.code`.
    #[must_use]
    pub fn typed_error(
        id: Option<Value>,
        code: i32,
        message: impl Into<String>,
        typed: &str,
    ) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: Some(serde_json::json!({ "code": typed })),
            }),
        }
    }
}

impl JsonRpcRequest {
    /// Validate the envelope; `jsonrpc` must be absent or exactly "2.0".
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.jsonrpc.as_deref().is_none_or(|v| v == "2.0") && !self.method.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let raw = r#"{"jsonrpc":"2.0","method":"ping","params":{},"id":7}"#;
        let request: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(request.is_valid());
        assert_eq!(request.method, "ping");
        assert_eq!(request.id, Some(Value::from(7)));
    }

    #[test]
    fn wrong_version_is_invalid() {
        let raw = r#"{"jsonrpc":"1.0","method":"ping","id":1}"#;
        let request: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(!request.is_valid());
    }

    #[test]
    fn error_payload_shape() {
        let response = JsonRpcResponse::typed_error(
            Some(Value::from(1)),
            INTERNAL_ERROR,
            "boom",
            "TIMEOUT",
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], INTERNAL_ERROR);
        assert_eq!(json["error"]["data"]["code"], "TIMEOUT");
        assert!(json.get("result").is_none());
    }
}
