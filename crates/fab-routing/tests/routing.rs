use std::time::Duration;

use bytes::Bytes;
use fab_routing::{ReceiveOutcome, RouteResult};
use fab_test_utils::Fabric;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn request_is_answered_with_handled_response() {
    let fabric = Fabric::new();
    let client_route = fabric.route_endpoint("client:1", "caller").await.unwrap();
    let server_route = fabric.route_endpoint("server:1", "responder").await.unwrap();

    let server_task = tokio::spawn(async move {
        match server_route.receive(CancellationToken::new()).await {
            ReceiveOutcome::Request(req) => {
                assert_eq!(req.payload, Bytes::from_static(b"ping"));
                req.reply()
                    .send_result(true, Bytes::from_static(b"pong"))
                    .await
                    .unwrap();
            }
            _ => panic!("expected a request"),
        }
    });

    let result = client_route
        .send(Bytes::from_static(b"ping"), &"responder".into(), CancellationToken::new())
        .await;

    server_task.await.unwrap();
    assert_eq!(result, RouteResult::Handled(Bytes::from_static(b"pong")));
}

#[tokio::test]
async fn send_to_unmapped_endpoint_is_cancellable() {
    let fabric = Fabric::new();
    let client_route = fabric.route_endpoint("client:2", "caller").await.unwrap();

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_clone.cancel();
    });

    let result = client_route
        .send(Bytes::from_static(b"hello"), &"nobody".into(), cancel)
        .await;
    assert_eq!(result, RouteResult::Cancelled);
}

#[tokio::test]
async fn misrouted_request_does_not_reach_the_application() {
    let fabric = Fabric::new();
    let sender_route = fabric.route_endpoint("sender:3", "sender-ep").await.unwrap();
    let receiver_route = fabric.route_endpoint("receiver:3", "receiver-ep").await.unwrap();

    // Send directly to the receiver's physical address but address a
    // logical endpoint name the receiver does not own. The receiver
    // replies Misrouted, which resolves the sender's own waiter with no
    // retry and no external cancel needed (spec.md §8 scenario 4).
    let result = sender_route
        .send_to(
            Bytes::from_static(b"x"),
            &"wrong-endpoint".into(),
            &"receiver:3".to_owned(),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(result, RouteResult::Misrouted);

    // The misdirected request must never have reached the application
    // queue.
    let drained = tokio::time::timeout(
        Duration::from_millis(50),
        receiver_route.receive(CancellationToken::new()),
    )
    .await;
    assert!(drained.is_err(), "no inbound request should have been queued");
}

#[tokio::test]
async fn closing_an_endpoint_resolves_pending_sends_as_disposed() {
    let fabric = Fabric::new();
    let client_route = fabric.route_endpoint("client:4", "caller").await.unwrap();

    // Registered on the network but nobody ever drains its inbox, so the
    // send below stays pending until the endpoint is closed.
    let _silent_peer = fabric.join_silent("ghost:1");

    let send_route = client_route.clone();
    let send_task = tokio::spawn(async move {
        send_route
            .send_to(
                Bytes::from_static(b"x"),
                &"nobody".into(),
                &"ghost:1".to_owned(),
                CancellationToken::new(),
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    client_route.close().await;

    let result = send_task.await.unwrap();
    assert_eq!(result, RouteResult::Disposed);
}
