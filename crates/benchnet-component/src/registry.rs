//! Local RPC method registry.
//!
//! Written only during setup, read during dispatch. Every registered method
//! runs to completion on the owner task; long-running work belongs on a
//! worker with a follow-up message.

use std::collections::HashMap;

use serde_json::Value;

use benchnet_protocol::rpc::{Request, Response, RpcEnvelope, RpcError, RpcItem};

pub type RpcHandler = Box<dyn Fn(Option<Value>) -> Result<Value, RpcError> + Send + Sync>;

#[derive(Default)]
pub struct RpcRegistry {
    methods: HashMap<String, RpcHandler>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, method: &str, handler: F)
    where
        F: Fn(Option<Value>) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.methods.insert(method.to_owned(), Box::new(handler));
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Run a single request; notifications yield no response.
    pub fn dispatch(&self, request: &Request) -> Option<Response> {
        let outcome = match self.methods.get(&request.method) {
            None => Err(RpcError::method_not_found()),
            Some(handler) => handler(request.params.clone()),
        };
        if request.is_notification() {
            return None;
        }
        Some(match outcome {
            Ok(value) => Response::result(request.id.clone(), value),
            Err(error) => Response::error(request.id.clone(), error),
        })
    }

    /// Dispatch a parsed envelope. Batches keep their order; responses inside
    /// the content are ignored here (they belong to the correlation layer).
    pub fn handle_envelope(&self, envelope: &RpcEnvelope) -> Option<RpcEnvelope> {
        match envelope {
            RpcEnvelope::Single(RpcItem::Request(request)) => {
                self.dispatch(request).map(RpcEnvelope::single_response)
            }
            RpcEnvelope::Single(RpcItem::Response(_)) => None,
            RpcEnvelope::Batch(items) => {
                let responses: Vec<RpcItem> = items
                    .iter()
                    .filter_map(|item| match item {
                        RpcItem::Request(request) => {
                            self.dispatch(request).map(RpcItem::Response)
                        }
                        RpcItem::Response(_) => None,
                    })
                    .collect();
                if responses.is_empty() {
                    None
                } else {
                    Some(RpcEnvelope::Batch(responses))
                }
            }
        }
    }

    /// Parse and dispatch raw JSON-RPC content.
    pub fn handle(&self, raw: &[u8]) -> Option<RpcEnvelope> {
        match RpcEnvelope::parse(raw) {
            Err(error) => Some(RpcEnvelope::single_response(Response::error(None, error))),
            Ok(envelope) => self.handle_envelope(&envelope),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchnet_protocol::rpc::codes;
    use serde_json::json;

    fn adder_registry() -> RpcRegistry {
        let mut registry = RpcRegistry::new();
        registry.register("add", |params| {
            let params = params.ok_or_else(RpcError::invalid_params)?;
            let a = params["a"].as_i64().ok_or_else(RpcError::invalid_params)?;
            let b = params["b"].as_i64().ok_or_else(RpcError::invalid_params)?;
            Ok(json!(a + b))
        });
        registry.register("pong", |_| Ok(Value::Null));
        registry
    }

    fn single_response(envelope: RpcEnvelope) -> Response {
        envelope.into_single_response().expect("single response")
    }

    #[test]
    fn test_dispatch_result() {
        let registry = adder_registry();
        let reply = registry
            .handle(br#"{"jsonrpc":"2.0","method":"add","params":{"a":2,"b":3},"id":1}"#)
            .unwrap();
        assert_eq!(single_response(reply).into_result().unwrap(), json!(5));
    }

    #[test]
    fn test_method_not_found() {
        let registry = adder_registry();
        let reply = registry
            .handle(br#"{"jsonrpc":"2.0","method":"missing","id":2}"#)
            .unwrap();
        let error = single_response(reply).into_result().unwrap_err();
        assert_eq!(error.code, codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_handler_error_is_returned() {
        let registry = adder_registry();
        let reply = registry
            .handle(br#"{"jsonrpc":"2.0","method":"add","params":{"a":"x"},"id":3}"#)
            .unwrap();
        let error = single_response(reply).into_result().unwrap_err();
        assert_eq!(error.code, codes::INVALID_PARAMS);
    }

    #[test]
    fn test_parse_error_reply() {
        let registry = adder_registry();
        let reply = registry.handle(b"{garbage").unwrap();
        let response = single_response(reply);
        assert_eq!(response.id, None);
        assert_eq!(response.error.unwrap().code, codes::PARSE_ERROR);
    }

    #[test]
    fn test_notification_produces_no_reply() {
        let registry = adder_registry();
        assert!(registry
            .handle(br#"{"jsonrpc":"2.0","method":"pong"}"#)
            .is_none());
    }

    #[test]
    fn test_batch_keeps_order_and_skips_notifications() {
        let registry = adder_registry();
        let raw = br#"[
            {"jsonrpc":"2.0","method":"add","params":{"a":1,"b":1},"id":10},
            {"jsonrpc":"2.0","method":"pong"},
            {"jsonrpc":"2.0","method":"add","params":{"a":2,"b":2},"id":11}
        ]"#;
        match registry.handle(raw).unwrap() {
            RpcEnvelope::Batch(items) => {
                assert_eq!(items.len(), 2);
                match (&items[0], &items[1]) {
                    (RpcItem::Response(first), RpcItem::Response(second)) => {
                        assert_eq!(first.id, Some(10.into()));
                        assert_eq!(second.id, Some(11.into()));
                    }
                    other => panic!("expected responses, got {other:?}"),
                }
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn test_all_notification_batch_is_silent() {
        let registry = adder_registry();
        let raw = br#"[{"jsonrpc":"2.0","method":"pong"},{"jsonrpc":"2.0","method":"pong"}]"#;
        assert!(registry.handle(raw).is_none());
    }
}
