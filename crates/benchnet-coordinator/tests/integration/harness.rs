//! Test harness -- in-process coordinators and components on ephemeral
//! ports, with short timings so expiry paths are reachable in tests.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use benchnet_component::{Component, ComponentError, ComponentHandle, CoordinatorDirector};
use benchnet_coordinator::config::{CoordinatorConfig, PeerEntry};
use benchnet_coordinator::CoordinatorServer;
use benchnet_protocol::ProtocolTiming;

/// Sped-up cadence for tests.
pub fn fast_timing() -> ProtocolTiming {
    ProtocolTiming {
        heartbeat_interval_secs: 1,
        heartbeat_timeout_secs: 3,
        directory_sweep_interval_secs: 1,
        component_expiration_secs: 2,
        peer_stale_secs: 6,
        ask_timeout_ms: 1000,
        reconnect_delay_secs: 1,
        max_datagram_bytes: benchnet_protocol::codec::MAX_DATAGRAM_SIZE,
    }
}

pub struct TestCoordinator {
    pub namespace: String,
    pub port: u16,
    shutdown_tx: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<Result<(), benchnet_coordinator::CoordinatorError>>,
}

impl TestCoordinator {
    pub async fn start(namespace: &str) -> Self {
        Self::start_with_peers(namespace, &[]).await
    }

    pub async fn start_with_peers(namespace: &str, peers: &[(&str, &str)]) -> Self {
        let config = CoordinatorConfig {
            namespace: namespace.to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 0,
            peers: peers
                .iter()
                .map(|(ns, addr)| PeerEntry {
                    namespace: (*ns).to_owned(),
                    address: (*addr).to_owned(),
                })
                .collect(),
            timing: fast_timing(),
        };
        let server = CoordinatorServer::bind(config).await.expect("bind");
        let port = server.local_addr().expect("local addr").port();
        let (shutdown_tx, _) = broadcast::channel(1);
        let task = {
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(server.run(shutdown))
        };
        Self {
            namespace: namespace.to_owned(),
            port,
            shutdown_tx,
            task,
        }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
    }
}

pub struct TestComponent {
    pub handle: ComponentHandle,
    shutdown_tx: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<Result<(), ComponentError>>,
}

impl TestComponent {
    /// Connect, sign in, and run the dispatch loop in the background.
    pub async fn join(name: &str, port: u16) -> Result<Self, ComponentError> {
        Self::build(name, port, |_| {}).await
    }

    /// Like `join`, with a hook to register methods before sign-in.
    pub async fn build<F>(name: &str, port: u16, customize: F) -> Result<Self, ComponentError>
    where
        F: FnOnce(&mut Component),
    {
        let mut component = Component::connect(name, "127.0.0.1", port)
            .await?
            .with_timing(fast_timing());
        customize(&mut component);
        component.sign_in().await?;
        let handle = component.handle();
        let (shutdown_tx, _) = broadcast::channel(1);
        let task = {
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(component.run(shutdown))
        };
        Ok(Self {
            handle,
            shutdown_tx,
            task,
        })
    }

    /// Names signed in at the own Coordinator.
    pub async fn local_components(&self) -> Vec<String> {
        CoordinatorDirector::new(self.handle.clone())
            .send_local_components()
            .await
            .unwrap_or_default()
    }

    /// Poll until the local directory matches `expected`, or panic.
    pub async fn wait_local_components(&self, expected: &[&str], timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let mut names = self.local_components().await;
            names.sort();
            let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
            want.sort();
            if names == want {
                return;
            }
            if Instant::now() > deadline {
                panic!("directory is {names:?}, expected {want:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop the dispatch loop; the component signs out on the way.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
    }
}

/// Register a two-summand `add` method, the work-horse of the scenarios.
pub fn register_add(component: &mut Component) {
    component.registry_mut().register("add", |params| {
        let params = params.ok_or_else(benchnet_protocol::rpc::RpcError::invalid_params)?;
        let a = params["a"]
            .as_i64()
            .ok_or_else(benchnet_protocol::rpc::RpcError::invalid_params)?;
        let b = params["b"]
            .as_i64()
            .ok_or_else(benchnet_protocol::rpc::RpcError::invalid_params)?;
        Ok(serde_json::json!(a + b))
    });
}
