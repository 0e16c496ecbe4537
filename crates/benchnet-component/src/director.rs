//! Directors -- client-side helpers issuing RPC to remote Components.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Map, Value};

use benchnet_protocol::name::COORDINATOR_LOCAL_NAME;
use benchnet_protocol::DEFAULT_TIMING;

use crate::runtime::ComponentHandle;
use crate::ComponentError;

/// Controls a remote Actor through `get_parameters` / `set_parameters` /
/// `call_action`. Parameter names may contain periods for channel traversal
/// (`ch_A.par1`); they pass through opaquely.
pub struct Director {
    handle: ComponentHandle,
    actor: String,
    timeout: Duration,
}

impl Director {
    pub fn new(handle: ComponentHandle, actor: &str) -> Self {
        Self {
            handle,
            actor: actor.to_owned(),
            timeout: DEFAULT_TIMING.ask_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn ask_rpc(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ComponentError> {
        self.handle
            .ask_rpc(&self.actor, method, params, self.timeout)
            .await
    }

    pub async fn get_parameters(
        &self,
        parameters: &[&str],
    ) -> Result<Map<String, Value>, ComponentError> {
        let result = self
            .ask_rpc("get_parameters", Some(json!({ "parameters": parameters })))
            .await?;
        match result {
            Value::Object(map) => Ok(map),
            other => Err(ComponentError::UnexpectedReply(format!(
                "get_parameters returned {other}"
            ))),
        }
    }

    pub async fn get_parameter(&self, parameter: &str) -> Result<Value, ComponentError> {
        let mut map = self.get_parameters(&[parameter]).await?;
        map.remove(parameter).ok_or_else(|| {
            ComponentError::UnexpectedReply(format!("parameter {parameter} missing in reply"))
        })
    }

    pub async fn set_parameters(
        &self,
        parameters: Map<String, Value>,
    ) -> Result<(), ComponentError> {
        self.ask_rpc("set_parameters", Some(json!({ "parameters": parameters })))
            .await?;
        Ok(())
    }

    pub async fn set_parameter(&self, parameter: &str, value: Value) -> Result<(), ComponentError> {
        let mut map = Map::new();
        map.insert(parameter.to_owned(), value);
        self.set_parameters(map).await
    }

    pub async fn call_action(
        &self,
        action: &str,
        args: &[Value],
        kwargs: Map<String, Value>,
    ) -> Result<Value, ComponentError> {
        let mut params = Map::new();
        params.insert("action".into(), json!(action));
        if !args.is_empty() {
            params.insert("args".into(), Value::Array(args.to_vec()));
        }
        if !kwargs.is_empty() {
            params.insert("kwargs".into(), Value::Object(kwargs));
        }
        self.ask_rpc("call_action", Some(Value::Object(params))).await
    }
}

/// Administers a Coordinator: directory introspection and peer management.
pub struct CoordinatorDirector {
    handle: ComponentHandle,
    coordinator: String,
    timeout: Duration,
}

impl CoordinatorDirector {
    /// Talk to the own namespace's Coordinator.
    pub fn new(handle: ComponentHandle) -> Self {
        Self {
            handle,
            coordinator: COORDINATOR_LOCAL_NAME.to_owned(),
            timeout: DEFAULT_TIMING.ask_timeout(),
        }
    }

    /// Talk to the Coordinator of another namespace.
    pub fn for_namespace(handle: ComponentHandle, namespace: &str) -> Self {
        Self {
            handle,
            coordinator: format!("{namespace}.{COORDINATOR_LOCAL_NAME}"),
            timeout: DEFAULT_TIMING.ask_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn ask_rpc(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ComponentError> {
        self.handle
            .ask_rpc(&self.coordinator, method, params, self.timeout)
            .await
    }

    /// Names of the Components signed in locally at the Coordinator.
    pub async fn send_local_components(&self) -> Result<Vec<String>, ComponentError> {
        let value = self.ask_rpc("send_local_components", None).await?;
        serde_json::from_value(value)
            .map_err(|e| ComponentError::UnexpectedReply(e.to_string()))
    }

    /// Known peer Coordinators as `namespace -> address`.
    pub async fn send_nodes(&self) -> Result<HashMap<String, String>, ComponentError> {
        let value = self.ask_rpc("send_nodes", None).await?;
        serde_json::from_value(value)
            .map_err(|e| ComponentError::UnexpectedReply(e.to_string()))
    }

    /// All known Components per namespace.
    pub async fn send_global_components(
        &self,
    ) -> Result<HashMap<String, Vec<String>>, ComponentError> {
        let value = self.ask_rpc("send_global_components", None).await?;
        serde_json::from_value(value)
            .map_err(|e| ComponentError::UnexpectedReply(e.to_string()))
    }

    /// Tell the Coordinator to sign in at the given peers.
    pub async fn add_nodes(
        &self,
        nodes: HashMap<String, String>,
    ) -> Result<(), ComponentError> {
        self.ask_rpc("add_nodes", Some(json!({ "nodes": nodes })))
            .await?;
        Ok(())
    }
}
