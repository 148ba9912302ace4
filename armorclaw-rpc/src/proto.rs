//! JSON-RPC 2.0 wire types and error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use armorclaw_types::BridgeError;

/// Parse error: malformed JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Invalid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Bad parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal failure.
pub const INTERNAL_ERROR: i64 = -32603;
/// Private: caller not authorized (wrong lifecycle state, rate limit).
pub const UNAUTHORIZED: i64 = -32000;
/// Private: resource not found.
pub const NOT_FOUND: i64 = -32001;

/// An incoming request or notification.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// Must be exactly `"2.0"`.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Method name.
    pub method: String,
    /// Parameters; absent means `{}`.
    #[serde(default)]
    pub params: Value,
    /// Request ID. Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Whether this is a notification (no response expected).
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Whether the envelope is a valid JSON-RPC 2.0 request.
    pub fn is_valid(&self) -> bool {
        self.jsonrpc.as_deref() == Some("2.0") && !self.method.is_empty()
    }
}

/// A response error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message. Never carries stack traces.
    pub message: String,
}

/// An outgoing response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    /// Echo of the request ID (null for undecodable requests).
    pub id: Value,
}

impl RpcResponse {
    /// A success response.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    /// An error response.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// Map a [`BridgeError`] onto a JSON-RPC code. Messages pass through;
/// internals never leak stack traces because the error display strings
/// carry none.
pub fn error_code(err: &BridgeError) -> i64 {
    match err {
        BridgeError::InvalidInput(_)
        | BridgeError::InvalidProvider(_)
        | BridgeError::PathTraversal(_) => INVALID_PARAMS,
        BridgeError::Unauthorized(_)
        | BridgeError::SenderNotTrusted(_)
        | BridgeError::RoomNotTrusted(_) => UNAUTHORIZED,
        BridgeError::KeyNotFound(_) | BridgeError::SessionNotFound(_) => NOT_FOUND,
        _ => INTERNAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_with_and_without_id() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"status","id":1}"#).unwrap();
        assert!(req.is_valid());
        assert!(!req.is_notification());

        let note: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"status"}"#).unwrap();
        assert!(note.is_notification());
    }

    #[test]
    fn missing_version_is_invalid() {
        let req: RpcRequest = serde_json::from_str(r#"{"method":"status","id":1}"#).unwrap();
        assert!(!req.is_valid());
    }

    #[test]
    fn responses_serialize_one_of_result_or_error() {
        let ok = RpcResponse::success(Value::from(1), serde_json::json!({"ok":true}));
        let text = serde_json::to_string(&ok).unwrap();
        assert!(text.contains("result"));
        assert!(!text.contains("error"));

        let bad = RpcResponse::error(Value::from(2), METHOD_NOT_FOUND, "no such method");
        let text = serde_json::to_string(&bad).unwrap();
        assert!(text.contains("-32601"));
        assert!(!text.contains("result"));
    }

    #[test]
    fn bridge_errors_map_to_documented_codes() {
        assert_eq!(
            error_code(&BridgeError::PathTraversal("../x".into())),
            INVALID_PARAMS
        );
        assert_eq!(
            error_code(&BridgeError::KeyNotFound("k".into())),
            NOT_FOUND
        );
        assert_eq!(
            error_code(&BridgeError::Unauthorized("state".into())),
            UNAUTHORIZED
        );
        assert_eq!(
            error_code(&BridgeError::AuditAppendFailed("x".into())),
            INTERNAL_ERROR
        );
    }
}
