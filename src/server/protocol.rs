//! Control protocol request/response types
//!
//! One request per connection. The request body is a JSON object
//! `{"method": "...", "params": {...}, "id"?: "..."}`; every response
//! carries `success`, `result`, `error`, `error_code` and an RFC-3339 UTC
//! timestamp.
//!
//! Error codes follow JSON-RPC for protocol-level failures (reserved range
//! -32768..-32000) and use small positive integers for application errors.

use chrono::Utc;
use serde_json::{json, Value};

use crate::util::format_utc;

/// Protocol and application error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const LLM_NOT_LOADED: i32 = 100;
    pub const LLM_BUSY: i32 = 101;
    pub const RATE_LIMITED: i32 = 102;
    pub const ALERT_NOT_FOUND: i32 = 103;
    pub const CONFIG_ERROR: i32 = 104;
}

/// A parsed control request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub params: Value,
    pub id: Option<String>,
}

impl Request {
    /// Parse a raw request body.
    ///
    /// Malformed JSON maps to `PARSE_ERROR`; syntactically valid JSON that
    /// is not an object with a string `method` maps to `INVALID_REQUEST`.
    /// The error side carries the ready-to-send response.
    pub fn parse(raw: &[u8]) -> Result<Request, Response> {
        let value: Value = serde_json::from_slice(raw).map_err(|_| {
            Response::err("Invalid request format", error_codes::PARSE_ERROR)
        })?;

        let Some(object) = value.as_object() else {
            return Err(Response::err(
                "Request must be a JSON object",
                error_codes::INVALID_REQUEST,
            ));
        };

        let method = match object.get("method").and_then(Value::as_str) {
            Some(method) if !method.is_empty() => method.to_string(),
            _ => {
                return Err(Response::err(
                    "Request is missing a method",
                    error_codes::INVALID_REQUEST,
                ))
            }
        };

        Ok(Request {
            method,
            params: object.get("params").cloned().unwrap_or_else(|| json!({})),
            id: object
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// A control response.
#[derive(Debug, Clone)]
pub struct Response {
    pub success: bool,
    pub result: Value,
    pub error: String,
    pub error_code: i32,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: String::new(),
            error_code: 0,
        }
    }

    pub fn err(message: impl Into<String>, code: i32) -> Self {
        Self {
            success: false,
            result: json!({}),
            error: message.into(),
            error_code: code,
        }
    }

    /// Wire form, stamped with the current UTC time.
    pub fn to_json(&self) -> Value {
        json!({
            "success": self.success,
            "result": self.result,
            "error": self.error,
            "error_code": self.error_code,
            "timestamp": format_utc(Utc::now()),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_json()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::parse_utc;

    #[test]
    fn parses_well_formed_request() {
        let raw = br#"{"method":"ping","params":{"x":1},"id":"req-7"}"#;
        let request = Request::parse(raw).unwrap();
        assert_eq!(request.method, "ping");
        assert_eq!(request.params["x"], 1);
        assert_eq!(request.id.as_deref(), Some("req-7"));
    }

    #[test]
    fn params_and_id_are_optional() {
        let request = Request::parse(br#"{"method":"ping"}"#).unwrap();
        assert!(request.params.is_object());
        assert!(request.id.is_none());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let response = Request::parse(b"{not json").unwrap_err();
        assert_eq!(response.error_code, error_codes::PARSE_ERROR);
        assert!(!response.success);
    }

    #[test]
    fn non_object_and_missing_method_are_invalid_requests() {
        let response = Request::parse(b"[1,2,3]").unwrap_err();
        assert_eq!(response.error_code, error_codes::INVALID_REQUEST);

        let response = Request::parse(br#"{"params":{}}"#).unwrap_err();
        assert_eq!(response.error_code, error_codes::INVALID_REQUEST);

        let response = Request::parse(br#"{"method":""}"#).unwrap_err();
        assert_eq!(response.error_code, error_codes::INVALID_REQUEST);
    }

    #[test]
    fn response_wire_shape() {
        let j = Response::ok(json!({"pong": true})).to_json();
        assert_eq!(j["success"], true);
        assert_eq!(j["result"]["pong"], true);
        assert_eq!(j["error"], "");
        assert_eq!(j["error_code"], 0);
        assert!(parse_utc(j["timestamp"].as_str().unwrap()).is_some());

        let j = Response::err("nope", error_codes::ALERT_NOT_FOUND).to_json();
        assert_eq!(j["success"], false);
        assert_eq!(j["error"], "nope");
        assert_eq!(j["error_code"], 103);
    }
}
