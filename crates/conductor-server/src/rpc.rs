use serde::{Deserialize, Serialize};

use conductor_core::ConductorError;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response envelope: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Error object; `code` is a stable upper-case string.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// Standard JSON-RPC error codes (used internally for routing)
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const RUN_NOT_FOUND: i32 = -32004;

pub fn error_code_to_string(code: i32) -> &'static str {
    match code {
        PARSE_ERROR => "PARSE_ERROR",
        INVALID_REQUEST => "INVALID_REQUEST",
        METHOD_NOT_FOUND => "METHOD_NOT_FOUND",
        INVALID_PARAMS => "INVALID_PARAMS",
        INTERNAL_ERROR => "INTERNAL_ERROR",
        RUN_NOT_FOUND => "RUN_NOT_FOUND",
        _ => "UNKNOWN_ERROR",
    }
}

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self::with_code(id, error_code_to_string(code), message, None)
    }

    fn with_code(
        id: Option<serde_json::Value>,
        code: &str,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.to_string(),
                message: message.into(),
                data,
            }),
        }
    }

    /// Orchestration errors keep their own code, e.g. `UNKNOWN_MACRO`.
    pub fn from_conductor_error(id: Option<serde_json::Value>, err: &ConductorError) -> Self {
        let data = match err {
            ConductorError::UnresolvedParameter {
                step_index,
                source_name,
            } => Some(serde_json::json!({"step_index": step_index, "source": source_name})),
            ConductorError::InvalidParameter { name, .. } => {
                Some(serde_json::json!({"name": name}))
            }
            _ => None,
        };
        let code = err.error_kind().to_ascii_uppercase();
        Self::with_code(id, &code, err.to_string(), data)
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn internal_error(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, msg)
    }

    pub fn run_not_found(id: Option<serde_json::Value>, run_id: &str) -> Self {
        Self::error(id, RUN_NOT_FOUND, format!("Run not found: {run_id}"))
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_REQUEST, msg)
    }
}

/// Extract a required string param from the RPC params object.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}
