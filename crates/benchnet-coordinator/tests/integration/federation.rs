//! Multi-coordinator federation: peer sign-in, directory replication,
//! cross-namespace routing.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use benchnet_component::{ComponentError, CoordinatorDirector};
use benchnet_protocol::rpc::codes;

use crate::harness::{register_add, TestComponent, TestCoordinator};

const ASK: Duration = Duration::from_secs(1);

/// Keep trying an ask until it succeeds or the deadline passes; the mesh
/// needs a moment for the dial-back.
async fn ask_until_ok(
    component: &TestComponent,
    receiver: &str,
    method: &str,
    params: serde_json::Value,
    deadline: Duration,
) -> Result<serde_json::Value, ComponentError> {
    let stop = Instant::now() + deadline;
    loop {
        match component
            .handle
            .ask_rpc(receiver, method, Some(params.clone()), ASK)
            .await
        {
            Ok(value) => return Ok(value),
            Err(error) => {
                if Instant::now() > stop {
                    return Err(error);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[tokio::test]
async fn test_directory_replication_after_add_nodes() {
    let n1 = TestCoordinator::start("N1").await;
    let n2 = TestCoordinator::start("N2").await;

    let admin = TestComponent::join("admin", n1.port).await.unwrap();
    let director = CoordinatorDirector::new(admin.handle.clone());
    director
        .add_nodes(HashMap::from([("N2".to_owned(), n2.address())]))
        .await
        .unwrap();

    // within a second, N2 must know N1
    let probe = TestComponent::join("probe", n2.port).await.unwrap();
    let probe_director = CoordinatorDirector::new(probe.handle.clone());
    let stop = Instant::now() + Duration::from_secs(1);
    loop {
        let nodes = probe_director.send_nodes().await.unwrap();
        if nodes.contains_key("N1") && nodes.contains_key("N2") {
            break;
        }
        if Instant::now() > stop {
            panic!("N2 never learned of N1: {nodes:?}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    admin.stop().await;
    probe.stop().await;
    n1.shutdown().await;
    n2.shutdown().await;
}

#[tokio::test]
async fn test_cross_namespace_ask() {
    let n1 = TestCoordinator::start("N1").await;
    let n2 = TestCoordinator::start("N2").await;

    let c1 = TestComponent::join("c1", n1.port).await.unwrap();
    let c2 = TestComponent::build("c2", n2.port, register_add)
        .await
        .unwrap();

    CoordinatorDirector::new(c1.handle.clone())
        .add_nodes(HashMap::from([("N2".to_owned(), n2.address())]))
        .await
        .unwrap();

    let result = ask_until_ok(
        &c1,
        "N2.c2",
        "add",
        json!({"a": 1, "b": 1}),
        Duration::from_secs(3),
    )
    .await
    .unwrap();
    assert_eq!(result, json!(2));

    c1.stop().await;
    c2.stop().await;
    n1.shutdown().await;
    n2.shutdown().await;
}

#[tokio::test]
async fn test_startup_peers_federate() {
    let n1 = TestCoordinator::start("N1").await;
    // N2 is told about N1 on the command line
    let n2 = TestCoordinator::start_with_peers("N2", &[("N1", &n1.address())]).await;

    let c1 = TestComponent::build("calc", n1.port, register_add)
        .await
        .unwrap();
    let c2 = TestComponent::join("user", n2.port).await.unwrap();

    let result = ask_until_ok(
        &c2,
        "N1.calc",
        "add",
        json!({"a": 40, "b": 2}),
        Duration::from_secs(3),
    )
    .await
    .unwrap();
    assert_eq!(result, json!(42));

    c1.stop().await;
    c2.stop().await;
    n1.shutdown().await;
    n2.shutdown().await;
}

#[tokio::test]
async fn test_unknown_node() {
    let n1 = TestCoordinator::start("N1").await;
    let c1 = TestComponent::join("c1", n1.port).await.unwrap();

    let error = c1
        .handle
        .ask_rpc("N9.anyone", "x", None, ASK)
        .await
        .unwrap_err();
    match error {
        ComponentError::Rpc(rpc) => assert_eq!(rpc.code, codes::NODE_UNKNOWN),
        other => panic!("expected RPC error, got {other:?}"),
    }

    c1.stop().await;
    n1.shutdown().await;
}

#[tokio::test]
async fn test_remote_unknown_receiver_is_answered_by_remote() {
    let n1 = TestCoordinator::start("N1").await;
    let n2 = TestCoordinator::start("N2").await;
    let c1 = TestComponent::join("c1", n1.port).await.unwrap();

    CoordinatorDirector::new(c1.handle.clone())
        .add_nodes(HashMap::from([("N2".to_owned(), n2.address())]))
        .await
        .unwrap();

    // namespace isolation: N2 consults only its own directory and answers
    // with receiver-unknown, never with a hit from N1's directory
    let stop = Instant::now() + Duration::from_secs(3);
    loop {
        match c1.handle.ask_rpc("N2.c1", "x", None, ASK).await {
            Err(ComponentError::Rpc(rpc)) if rpc.code == codes::RECEIVER_UNKNOWN => break,
            Err(ComponentError::Rpc(rpc)) if rpc.code == codes::NODE_UNKNOWN => {
                // link still coming up
                if Instant::now() > stop {
                    panic!("mesh never came up");
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(ComponentError::Timeout) => {
                // reply path not yet dialled back
                if Instant::now() > stop {
                    panic!("reply path never came up");
                }
            }
            other => panic!("expected receiver-unknown, got {other:?}"),
        }
    }

    c1.stop().await;
    n1.shutdown().await;
    n2.shutdown().await;
}

#[tokio::test]
async fn test_global_components_are_replicated() {
    let n1 = TestCoordinator::start("N1").await;
    let n2 = TestCoordinator::start("N2").await;

    let c1 = TestComponent::join("c1", n1.port).await.unwrap();
    let c2 = TestComponent::join("c2", n2.port).await.unwrap();

    CoordinatorDirector::new(c1.handle.clone())
        .add_nodes(HashMap::from([("N2".to_owned(), n2.address())]))
        .await
        .unwrap();

    let director = CoordinatorDirector::new(c1.handle.clone());
    let stop = Instant::now() + Duration::from_secs(3);
    loop {
        let global = director.send_global_components().await.unwrap();
        let n2_names = global.get("N2").cloned().unwrap_or_default();
        if n2_names == vec!["c2".to_string()] {
            break;
        }
        if Instant::now() > stop {
            panic!("N2 components never replicated to N1: {global:?}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    c1.stop().await;
    c2.stop().await;
    n1.shutdown().await;
    n2.shutdown().await;
}
