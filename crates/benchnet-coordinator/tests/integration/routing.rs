//! Single-coordinator routing scenarios.

use std::time::Duration;

use serde_json::json;

use benchnet_component::{ComponentError, Session};
use benchnet_protocol::rpc::{codes, Request, RpcEnvelope};
use benchnet_protocol::{ControlMessage, FullName};

use crate::harness::{register_add, TestComponent, TestCoordinator};

const ASK: Duration = Duration::from_secs(1);

#[tokio::test]
async fn test_local_ask() {
    let coordinator = TestCoordinator::start("N1").await;
    let c1 = TestComponent::join("c1", coordinator.port).await.unwrap();
    let c2 = TestComponent::build("c2", coordinator.port, register_add)
        .await
        .unwrap();

    let result = c1
        .handle
        .ask_rpc("N1.c2", "add", Some(json!({"a": 2, "b": 3})), ASK)
        .await
        .unwrap();
    assert_eq!(result, json!(5));

    c1.stop().await;
    c2.stop().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_ask_without_namespace_uses_local_default() {
    let coordinator = TestCoordinator::start("N1").await;
    let c1 = TestComponent::join("c1", coordinator.port).await.unwrap();
    let c2 = TestComponent::build("c2", coordinator.port, register_add)
        .await
        .unwrap();

    // empty receiver namespace is filled with the coordinator's own
    let result = c1
        .handle
        .ask_rpc("c2", "add", Some(json!({"a": 20, "b": 1})), ASK)
        .await
        .unwrap();
    assert_eq!(result, json!(21));

    c1.stop().await;
    c2.stop().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_unknown_receiver() {
    let coordinator = TestCoordinator::start("N1").await;
    let c1 = TestComponent::join("c1", coordinator.port).await.unwrap();

    let error = c1
        .handle
        .ask_rpc("N1.ghost", "x", None, Duration::from_millis(500))
        .await
        .unwrap_err();
    match error {
        ComponentError::Rpc(rpc) => assert_eq!(rpc.code, codes::RECEIVER_UNKNOWN),
        other => panic!("expected RPC error, got {other:?}"),
    }

    c1.stop().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_method_not_found_on_component() {
    let coordinator = TestCoordinator::start("N1").await;
    let c1 = TestComponent::join("c1", coordinator.port).await.unwrap();
    let c2 = TestComponent::join("c2", coordinator.port).await.unwrap();

    let error = c1
        .handle
        .ask_rpc("N1.c2", "does_not_exist", None, ASK)
        .await
        .unwrap_err();
    match error {
        ComponentError::Rpc(rpc) => assert_eq!(rpc.code, codes::METHOD_NOT_FOUND),
        other => panic!("expected RPC error, got {other:?}"),
    }

    c1.stop().await;
    c2.stop().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_sign_in_is_rejected() {
    let coordinator = TestCoordinator::start("N1").await;
    let c1 = TestComponent::join("c1", coordinator.port).await.unwrap();

    // a second session under the same name is turned away
    let error = TestComponent::join("c1", coordinator.port)
        .await
        .err()
        .expect("second sign-in must fail");
    match error {
        ComponentError::SignInRejected(rpc) => {
            assert_eq!(rpc.code, codes::DUPLICATE_NAME);
        }
        other => panic!("expected sign-in rejection, got {other:?}"),
    }

    // the first stays signed in
    c1.wait_local_components(&["c1"], ASK).await;

    c1.stop().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_directory_follows_sign_ins_and_outs() {
    let coordinator = TestCoordinator::start("N1").await;
    let a = TestComponent::join("a", coordinator.port).await.unwrap();
    let b = TestComponent::join("b", coordinator.port).await.unwrap();
    let c = TestComponent::join("c", coordinator.port).await.unwrap();

    a.wait_local_components(&["a", "b", "c"], ASK).await;

    b.stop().await; // signs out
    a.wait_local_components(&["a", "c"], ASK).await;

    c.stop().await;
    a.wait_local_components(&["a"], ASK).await;

    a.stop().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_request_before_sign_in_is_refused() {
    let coordinator = TestCoordinator::start("N1").await;
    let c2 = TestComponent::build("c2", coordinator.port, register_add)
        .await
        .unwrap();

    // a bare session that never signs in
    let mut session = Session::connect("127.0.0.1", coordinator.port).await.unwrap();
    let request = Request::with_params(1, "add", json!({"a": 1, "b": 1}));
    let message = ControlMessage::rpc(
        FullName::parse("N1.c2").unwrap(),
        FullName::parse("intruder").unwrap(),
        &RpcEnvelope::single_request(request),
    )
    .unwrap();
    session.send(message).await.unwrap();

    let reply = session
        .poll(ASK)
        .await
        .unwrap()
        .expect("expected an error reply");
    let response = reply
        .rpc_content()
        .unwrap()
        .into_single_response()
        .unwrap();
    assert_eq!(response.error.unwrap().code, codes::NOT_SIGNED_IN);

    c2.stop().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_connection_loss_signs_component_out() {
    let coordinator = TestCoordinator::start("N1").await;
    let watcher = TestComponent::join("watcher", coordinator.port).await.unwrap();

    {
        // sign in and drop the connection without signing out
        let mut doomed = benchnet_component::Component::connect("doomed", "127.0.0.1", coordinator.port)
            .await
            .unwrap()
            .with_timing(crate::harness::fast_timing());
        doomed.sign_in().await.unwrap();
        watcher
            .wait_local_components(&["doomed", "watcher"], ASK)
            .await;
    } // dropped here

    watcher.wait_local_components(&["watcher"], ASK).await;

    watcher.stop().await;
    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_batch_request_to_coordinator() {
    let coordinator = TestCoordinator::start("N1").await;
    let c1 = TestComponent::join("c1", coordinator.port).await.unwrap();

    let batch = RpcEnvelope::Batch(vec![
        benchnet_protocol::rpc::RpcItem::Request(Request::new(1, "send_local_components")),
        benchnet_protocol::rpc::RpcItem::Request(Request::notification("pong")),
        benchnet_protocol::rpc::RpcItem::Request(Request::new(2, "send_nodes")),
    ]);
    let message = ControlMessage::rpc(
        FullName::parse("COORDINATOR").unwrap(),
        c1.handle.full_name(),
        &batch,
    )
    .unwrap();
    let reply = c1.handle.ask(message, ASK).await.unwrap();

    match reply.rpc_content().unwrap() {
        RpcEnvelope::Batch(items) => {
            // notification produced no entry, order is preserved
            assert_eq!(items.len(), 2);
            match &items[0] {
                benchnet_protocol::rpc::RpcItem::Response(first) => {
                    assert_eq!(first.id, Some(1.into()));
                    assert_eq!(
                        first.clone().into_result().unwrap(),
                        json!(["c1"])
                    );
                }
                other => panic!("expected response, got {other:?}"),
            }
            match &items[1] {
                benchnet_protocol::rpc::RpcItem::Response(second) => {
                    assert_eq!(second.id, Some(2.into()));
                }
                other => panic!("expected response, got {other:?}"),
            }
        }
        other => panic!("expected batch reply, got {other:?}"),
    }

    c1.stop().await;
    coordinator.shutdown().await;
}
