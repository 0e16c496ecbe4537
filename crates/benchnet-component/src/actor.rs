//! Actor contract -- exposing a controlled device over RPC.
//!
//! An explicit registry maps parameter paths to getters/setters and action
//! names to callables. Dotted paths (`ch_A.par1`) are ordinary registry keys,
//! so channel traversal needs no reflection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use benchnet_protocol::rpc::RpcError;

use crate::runtime::Component;

type Getter<D> = Box<dyn Fn(&D) -> Result<Value, RpcError> + Send + Sync>;
type Setter<D> = Box<dyn Fn(&mut D, Value) -> Result<(), RpcError> + Send + Sync>;
type Action<D> =
    Box<dyn Fn(&mut D, &[Value], &Map<String, Value>) -> Result<Value, RpcError> + Send + Sync>;

/// Exposed surface of a device of type `D`.
pub struct ActorRegistry<D> {
    getters: HashMap<String, Getter<D>>,
    setters: HashMap<String, Setter<D>>,
    actions: HashMap<String, Action<D>>,
}

impl<D> Default for ActorRegistry<D> {
    fn default() -> Self {
        Self {
            getters: HashMap::new(),
            setters: HashMap::new(),
            actions: HashMap::new(),
        }
    }
}

impl<D> ActorRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a readable and writable parameter under `path`.
    pub fn expose_parameter<G, S>(&mut self, path: &str, get: G, set: S)
    where
        G: Fn(&D) -> Result<Value, RpcError> + Send + Sync + 'static,
        S: Fn(&mut D, Value) -> Result<(), RpcError> + Send + Sync + 'static,
    {
        self.getters.insert(path.to_owned(), Box::new(get));
        self.setters.insert(path.to_owned(), Box::new(set));
    }

    /// Expose a read-only parameter under `path`.
    pub fn expose_readonly<G>(&mut self, path: &str, get: G)
    where
        G: Fn(&D) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.getters.insert(path.to_owned(), Box::new(get));
    }

    /// Expose a callable action under `name`.
    pub fn expose_action<F>(&mut self, name: &str, action: F)
    where
        F: Fn(&mut D, &[Value], &Map<String, Value>) -> Result<Value, RpcError>
            + Send
            + Sync
            + 'static,
    {
        self.actions.insert(name.to_owned(), Box::new(action));
    }

    fn get(&self, device: &D, path: &str) -> Result<Value, RpcError> {
        match self.getters.get(path) {
            Some(getter) => getter(device),
            None => Err(RpcError::invalid_params().with_data(Value::String(format!(
                "unknown parameter: {path}"
            )))),
        }
    }

    fn set(&self, device: &mut D, path: &str, value: Value) -> Result<(), RpcError> {
        match self.setters.get(path) {
            Some(setter) => setter(device, value),
            None => Err(RpcError::invalid_params().with_data(Value::String(format!(
                "unknown or read-only parameter: {path}"
            )))),
        }
    }

    fn call(
        &self,
        device: &mut D,
        action: &str,
        args: &[Value],
        kwargs: &Map<String, Value>,
    ) -> Result<Value, RpcError> {
        match self.actions.get(action) {
            Some(callable) => callable(device, args, kwargs),
            None => Err(RpcError::invalid_params()
                .with_data(Value::String(format!("unknown action: {action}")))),
        }
    }
}

fn parameter_list(params: &Option<Value>) -> Result<Vec<String>, RpcError> {
    let names = params
        .as_ref()
        .and_then(|p| p.get("parameters"))
        .and_then(Value::as_array)
        .ok_or_else(RpcError::invalid_params)?;
    names
        .iter()
        .map(|n| {
            n.as_str()
                .map(str::to_owned)
                .ok_or_else(RpcError::invalid_params)
        })
        .collect()
}

/// Install the Actor RPC surface (`get_parameters`, `set_parameters`,
/// `call_action`) for `device` into a Component's registry.
pub fn serve<D: Send + 'static>(component: &mut Component, device: D, registry: ActorRegistry<D>) {
    let state = Arc::new((Mutex::new(device), registry));

    let get_state = state.clone();
    component.registry_mut().register("get_parameters", move |params| {
        let names = parameter_list(&params)?;
        let (device, registry) = (&get_state.0, &get_state.1);
        let device = device.lock().expect("device lock");
        let mut result = Map::new();
        for name in names {
            result.insert(name.clone(), registry.get(&device, &name)?);
        }
        Ok(Value::Object(result))
    });

    let set_state = state.clone();
    component.registry_mut().register("set_parameters", move |params| {
        let values = params
            .as_ref()
            .and_then(|p| p.get("parameters"))
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(RpcError::invalid_params)?;
        let (device, registry) = (&set_state.0, &set_state.1);
        let mut device = device.lock().expect("device lock");
        for (name, value) in values {
            registry.set(&mut device, &name, value)?;
        }
        Ok(Value::Null)
    });

    let call_state = state;
    component.registry_mut().register("call_action", move |params| {
        let params = params.ok_or_else(RpcError::invalid_params)?;
        let action = params
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(RpcError::invalid_params)?
            .to_owned();
        let args = params
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let kwargs = params
            .get("kwargs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let (device, registry) = (&call_state.0, &call_state.1);
        let mut device = device.lock().expect("device lock");
        registry.call(&mut device, &action, &args, &kwargs)
    });
}
