use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fab_router::{MessageRouter, RegistryService, RemoteMessageRouter};
use fab_routing::{ReceiveOutcome, RouteEndpoint, RouteResult};
use fab_store::MemoryStore;
use fab_test_utils::{Address, Fabric};
use fab_types::{EndpointAddress, Route, RouteRegistrationOptions};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn publish_fans_out_to_every_eligible_target() {
    let fabric = Fabric::new();
    let (_caller_endpoint, router) = fabric.local_router("caller:1", "caller").await;
    let (target_a, _local_a) = fabric.local_router("target-a:1", "target-a").await;
    let (target_b, _local_b) = fabric.local_router("target-b:1", "target-b").await;

    router
        .register(&"target-a".into(), &Route::from("news"), RouteRegistrationOptions::DEFAULT)
        .await
        .unwrap();
    router
        .register(&"target-b".into(), &Route::from("news"), RouteRegistrationOptions::publish_only())
        .await
        .unwrap();

    let listener = |ep: Arc<RouteEndpoint<Address, MemoryStore>>| {
        tokio::spawn(async move {
            match ep.receive(CancellationToken::new()).await {
                ReceiveOutcome::Request(req) => {
                    req.reply().send_result(true, Bytes::from_static(b"seen")).await.unwrap();
                }
                _ => panic!("expected a request"),
            }
        })
    };
    let listener_a = listener(target_a);
    let listener_b = listener(target_b);

    let routes = vec![Route::from("news")];
    let outcomes = router
        .route(&routes, Bytes::from_static(b"bulletin"), true, CancellationToken::new())
        .await
        .unwrap();

    listener_a.await.unwrap();
    listener_b.await.unwrap();

    assert_eq!(outcomes.len(), 2);
    let mut endpoints: Vec<_> = outcomes.iter().filter_map(|o| o.endpoint.clone()).collect();
    endpoints.sort();
    assert_eq!(
        endpoints,
        vec![EndpointAddress::from("target-a"), EndpointAddress::from("target-b")]
    );
    assert!(outcomes.iter().all(|o| o.result == RouteResult::Handled(Bytes::from_static(b"seen"))));
}

#[tokio::test]
async fn non_publish_route_delivers_to_a_single_eligible_target_and_stops() {
    let fabric = Fabric::new();
    let (_caller_endpoint, router) = fabric.local_router("caller:2", "caller").await;
    let (worker_endpoint, _local_worker) = fabric.local_router("worker:2", "worker").await;

    router
        .register(&"publisher-only".into(), &Route::from("jobs"), RouteRegistrationOptions::publish_only())
        .await
        .unwrap();
    router
        .register(&"worker".into(), &Route::from("jobs"), RouteRegistrationOptions::DEFAULT)
        .await
        .unwrap();

    let listener = tokio::spawn(async move {
        match worker_endpoint.receive(CancellationToken::new()).await {
            ReceiveOutcome::Request(req) => {
                req.reply().send_result(true, Bytes::from_static(b"done")).await.unwrap();
            }
            _ => panic!("expected a request"),
        }
    });

    let routes = vec![Route::from("jobs")];
    let outcomes = router
        .route(&routes, Bytes::from_static(b"do-it"), false, CancellationToken::new())
        .await
        .unwrap();

    listener.await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].endpoint, Some(EndpointAddress::from("worker")));
    assert_eq!(outcomes[0].result, RouteResult::Handled(Bytes::from_static(b"done")));
}

#[tokio::test]
async fn route_to_bypasses_resolution_entirely() {
    let fabric = Fabric::new();
    let (_caller_endpoint, router) = fabric.local_router("caller:3", "caller").await;
    let (worker_endpoint, _local_worker) = fabric.local_router("worker:3", "worker").await;

    let listener = tokio::spawn(async move {
        match worker_endpoint.receive(CancellationToken::new()).await {
            ReceiveOutcome::Request(req) => {
                req.reply().send_result(true, Bytes::from_static(b"ack")).await.unwrap();
            }
            _ => panic!("expected a request"),
        }
    });

    // No registration was ever made for "worker"; route_to still reaches
    // it because it skips the route registry entirely.
    let result = router
        .route_to(
            &Route::from("unused"),
            Bytes::from_static(b"direct"),
            &"worker".into(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    listener.await.unwrap();
    assert_eq!(result, RouteResult::Handled(Bytes::from_static(b"ack")));
}

#[tokio::test]
async fn register_unregister_and_unregister_all_round_trip() {
    let fabric = Fabric::new();
    let (_caller_endpoint, router) = fabric.local_router("caller:4", "caller").await;

    let endpoint: EndpointAddress = "svc".into();
    let route = Route::from("payments");

    router.register(&endpoint, &route, RouteRegistrationOptions::DEFAULT).await.unwrap();
    router.unregister(&endpoint, &route).await.unwrap();

    router.register(&endpoint, &Route::from("orders"), RouteRegistrationOptions::DEFAULT).await.unwrap();
    router.register(&endpoint, &Route::from("refunds"), RouteRegistrationOptions::DEFAULT).await.unwrap();
    router.unregister_all(&endpoint, true).await.unwrap();
}

#[tokio::test]
async fn remote_router_round_trips_through_a_registry_service() {
    let fabric = Fabric::new();
    let (registry_endpoint, local) = fabric.local_router("registry:1", "registry").await;
    let local = Arc::new(local);
    let service = RegistryService::new(Arc::clone(&registry_endpoint), Arc::clone(&local));

    let service_cancel = CancellationToken::new();
    let service_handle = tokio::spawn({
        let cancel = service_cancel.clone();
        async move { service.run(cancel).await; }
    });

    let client_endpoint = fabric.route_endpoint("client:5", "client").await.unwrap();
    let remote = RemoteMessageRouter::new(Arc::clone(&client_endpoint), "registry".into());

    remote
        .register(&"client".into(), &Route::from("greetings"), RouteRegistrationOptions::DEFAULT)
        .await
        .unwrap();

    let listener = tokio::spawn({
        let client_endpoint = Arc::clone(&client_endpoint);
        async move {
            match client_endpoint.receive(CancellationToken::new()).await {
                ReceiveOutcome::Request(req) => {
                    req.reply().send_result(true, Bytes::from_static(b"ack")).await.unwrap();
                }
                _ => panic!("expected a request"),
            }
        }
    });

    let outcomes = remote
        .route(&[Route::from("greetings")], Bytes::from_static(b"hi"), true, CancellationToken::new())
        .await
        .unwrap();

    listener.await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].endpoint, None);
    assert_eq!(outcomes[0].result, RouteResult::Handled(Bytes::from_static(b"ack")));

    service_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_millis(200), service_handle).await;
}
