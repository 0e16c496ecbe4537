//! JSON-RPC 2.0 content layer: requests, responses, errors, batches.
//!
//! The error codes below are contractual; peers produce and accept them
//! bit-exactly.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const SERVER_ERROR: i64 = -32000;
    pub const NOT_SIGNED_IN: i64 = -32090;
    pub const DUPLICATE_NAME: i64 = -32091;
    pub const NODE_UNKNOWN: i64 = -32092;
    pub const RECEIVER_UNKNOWN: i64 = -32093;
}

/// Request identifier: number or string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// A request (with `id`) or notification (without).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    pub fn new(id: i64, method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.to_owned(),
            params: None,
            id: Some(id.into()),
        }
    }

    pub fn with_params(id: i64, method: &str, params: Value) -> Self {
        Self {
            params: Some(params),
            ..Self::new(id, method)
        }
    }

    pub fn notification(method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.to_owned(),
            params: None,
            id: None,
        }
    }

    pub fn notification_with_params(method: &str, params: Value) -> Self {
        Self {
            params: Some(params),
            ..Self::notification(method)
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A response carrying either a result or an error.
///
/// A `null` result is present on the wire and distinct from an absent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Keep `"result": null` distinguishable from a missing `result`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Response {
    pub fn result(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: &str) -> Self {
        Self {
            code,
            message: message.to_owned(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(codes::INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found() -> Self {
        Self::new(codes::METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params() -> Self {
        Self::new(codes::INVALID_PARAMS, "Invalid params")
    }

    pub fn internal_error() -> Self {
        Self::new(codes::INTERNAL_ERROR, "Internal error")
    }

    pub fn server_error() -> Self {
        Self::new(codes::SERVER_ERROR, "Server error")
    }

    pub fn not_signed_in() -> Self {
        Self::new(codes::NOT_SIGNED_IN, "You did not sign in!")
    }

    pub fn duplicate_name() -> Self {
        Self::new(codes::DUPLICATE_NAME, "The name is already taken.")
    }

    pub fn node_unknown() -> Self {
        Self::new(codes::NODE_UNKNOWN, "Node is not known.")
    }

    pub fn receiver_unknown() -> Self {
        Self::new(codes::RECEIVER_UNKNOWN, "Receiver is not in addresses list.")
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// A single request or response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcItem {
    Request(Request),
    Response(Response),
}

impl RpcItem {
    fn validate(&self) -> Result<(), RpcError> {
        match self {
            RpcItem::Request(req) => {
                if req.jsonrpc != JSONRPC_VERSION || req.method.is_empty() {
                    return Err(RpcError::invalid_request());
                }
            }
            RpcItem::Response(resp) => {
                if resp.jsonrpc != JSONRPC_VERSION
                    || (resp.result.is_some() == resp.error.is_some())
                {
                    return Err(RpcError::invalid_request());
                }
            }
        }
        Ok(())
    }
}

/// A single object or a batch array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcEnvelope {
    Single(RpcItem),
    Batch(Vec<RpcItem>),
}

impl RpcEnvelope {
    pub fn single_request(request: Request) -> Self {
        Self::Single(RpcItem::Request(request))
    }

    pub fn single_response(response: Response) -> Self {
        Self::Single(RpcItem::Response(response))
    }

    /// Parse and validate raw JSON content.
    ///
    /// Invalid JSON is a parse error; valid JSON that is not a request,
    /// response, or batch thereof is an invalid request.
    pub fn parse(raw: &[u8]) -> Result<Self, RpcError> {
        let value: Value = serde_json::from_slice(raw).map_err(|_| RpcError::parse_error())?;
        let envelope: Self =
            serde_json::from_value(value).map_err(|_| RpcError::invalid_request())?;
        match &envelope {
            Self::Single(item) => item.validate()?,
            Self::Batch(items) => {
                if items.is_empty() {
                    return Err(RpcError::invalid_request());
                }
                for item in items {
                    item.validate()?;
                }
            }
        }
        Ok(envelope)
    }

    /// Extract the single response, if this envelope is one.
    pub fn into_single_response(self) -> Option<Response> {
        match self {
            Self::Single(RpcItem::Response(resp)) => Some(resp),
            _ => None,
        }
    }

    /// Whether any contained item is a request (as opposed to a response).
    pub fn contains_request(&self) -> bool {
        let is_request = |item: &RpcItem| matches!(item, RpcItem::Request(_));
        match self {
            Self::Single(item) => is_request(item),
            Self::Batch(items) => items.iter().any(is_request),
        }
    }

    /// Method name of the single request, if this envelope is one.
    pub fn single_method(&self) -> Option<&str> {
        match self {
            Self::Single(RpcItem::Request(req)) => Some(&req.method),
            _ => None,
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JSON-RPC content serializes")
    }
}
