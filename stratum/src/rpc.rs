//! JSON-RPC envelope types and error codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ERROR_PARSE: i32 = -32700;
pub const ERROR_INVALID_REQUEST: i32 = -32600;
pub const ERROR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERROR_INVALID_PARAMS: i32 = -32602;
pub const ERROR_INTERNAL: i32 = -32603;

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// A server reply to a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    pub result: Value,
    pub error: Option<RpcError>,
}

impl Response {
    pub fn ok(id: i64, result: Value) -> Self {
        Response {
            id,
            result,
            error: None,
        }
    }

    pub fn fail(id: i64, code: i32, message: &str) -> Self {
        Response {
            id,
            result: Value::Null,
            error: Some(RpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound line before we know whether it is a request or a response.
/// Objects with a non-empty method are requests; the rest are responses
/// to server-initiated calls like `client.get_version`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnknownRpc {
    pub id: Option<i64>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

impl UnknownRpc {
    pub fn is_request(&self) -> bool {
        !self.method.is_empty()
    }

    pub fn into_request(self) -> Request {
        Request {
            id: self.id.unwrap_or(0),
            method: self.method,
            params: self.params,
        }
    }
}
