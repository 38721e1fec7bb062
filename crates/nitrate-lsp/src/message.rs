//! JSON-RPC 2.0 message model.
//!
//! The client treats payloads opaquely; only `jsonrpc`, `id`, `method`,
//! `result` and `error` are inspected for routing.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LspError;

/// Version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC and LSP error codes used by the client.
pub mod codes {
    /// The requested method does not exist.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
    /// The request was cancelled by the client.
    pub const REQUEST_CANCELLED: i64 = -32800;
}

/// A request identifier: integer or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id. Every id the client allocates is of this kind.
    Number(i64),
    /// String id, only ever produced by the remote side.
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// An error object in a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// The error code.
    pub code: i64,
    /// The error message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    /// Create an error object without data.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// The error the client answers with when no handler is registered.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }
}

impl From<ResponseError> for LspError {
    fn from(err: ResponseError) -> Self {
        LspError::Rpc {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// A JSON-RPC message (request, response, or notification).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A request (has id and method).
    Request {
        /// The request ID.
        id: RequestId,
        /// The method name.
        method: String,
        /// The params; `Null` when absent.
        params: Value,
    },
    /// A response: either a result or an error object.
    Response {
        /// The request ID this responds to.
        id: RequestId,
        /// The result payload or the remote's error.
        result: Result<Value, ResponseError>,
    },
    /// A notification (has method, no id).
    Notification {
        /// The method name.
        method: String,
        /// The params; `Null` when absent.
        params: Value,
    },
}

impl Message {
    /// Build a request.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Message::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Message::Notification {
            method: method.into(),
            params,
        }
    }

    /// Build a successful response.
    pub fn response(id: impl Into<RequestId>, result: Value) -> Self {
        Message::Response {
            id: id.into(),
            result: Ok(result),
        }
    }

    /// Build an error response.
    pub fn error_response(id: impl Into<RequestId>, error: ResponseError) -> Self {
        Message::Response {
            id: id.into(),
            result: Err(error),
        }
    }

    /// The method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notification { method, .. } => Some(method),
            Message::Response { .. } => None,
        }
    }

    /// Convert to the JSON wire shape.
    pub fn to_value(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match self {
            Message::Request { id, method, params } => {
                obj.insert("id".into(), id_value(id));
                obj.insert("method".into(), Value::from(method.as_str()));
                if !params.is_null() {
                    obj.insert("params".into(), params.clone());
                }
            }
            Message::Response { id, result } => {
                obj.insert("id".into(), id_value(id));
                match result {
                    Ok(value) => {
                        obj.insert("result".into(), value.clone());
                    }
                    Err(error) => {
                        let error = serde_json::to_value(error).unwrap_or(Value::Null);
                        obj.insert("error".into(), error);
                    }
                }
            }
            Message::Notification { method, params } => {
                obj.insert("method".into(), Value::from(method.as_str()));
                if !params.is_null() {
                    obj.insert("params".into(), params.clone());
                }
            }
        }
        Value::Object(obj)
    }

    /// Classify a decoded JSON body.
    ///
    /// Shape problems are reported as [`LspError::ProtocolViolation`]; the
    /// caller logs them and moves on to the next frame.
    pub fn from_value(value: Value) -> Result<Self, LspError> {
        let Value::Object(mut obj) = value else {
            return Err(violation("message is not a JSON object"));
        };

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(violation(format!("unsupported jsonrpc version: {other}")));
            }
            None => return Err(violation("message is missing jsonrpc")),
        }

        let id = obj.remove("id").map(parse_id).transpose()?;
        let method = match obj.remove("method") {
            Some(Value::String(m)) => Some(m),
            Some(_) => return Err(violation("method must be a string")),
            None => None,
        };
        let params = obj.remove("params").unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), Some(method)) => Ok(Message::Request { id, method, params }),
            (None, Some(method)) => Ok(Message::Notification { method, params }),
            (Some(id), None) => {
                if let Some(error) = obj.remove("error") {
                    let error: ResponseError = serde_json::from_value(error)
                        .map_err(|e| violation(format!("malformed error object: {e}")))?;
                    Ok(Message::Response {
                        id,
                        result: Err(error),
                    })
                } else if let Some(result) = obj.remove("result") {
                    Ok(Message::Response {
                        id,
                        result: Ok(result),
                    })
                } else {
                    Err(violation(format!(
                        "response {id} has neither result nor error"
                    )))
                }
            }
            (None, None) => Err(violation("message has neither id nor method")),
        }
    }
}

fn id_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => Value::from(*n),
        RequestId::String(s) => Value::from(s.as_str()),
    }
}

fn parse_id(value: Value) -> Result<RequestId, LspError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| violation(format!("id is not an integer: {n}"))),
        Value::String(s) => Ok(RequestId::String(s)),
        other => Err(violation(format!("id must be integer or string, got {other}"))),
    }
}

fn violation(msg: impl Into<String>) -> LspError {
    LspError::ProtocolViolation(msg.into())
}
