/// Integration tests for wiring a node end-to-end: config -> Node::start
/// -> registered routes reachable through its RoutingSystem.
use bytes::Bytes;
use fab_router::MessageRouter;
use fab_routing::{ReceiveOutcome, RouteResult};
use fab_store::MemoryCluster;
use fab_transport::InMemoryNetwork;
use fabricd::{config::load_config_from_str, Node};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn a_node_registers_its_configured_routes_on_startup() {
    let cluster = MemoryCluster::new();
    let network: InMemoryNetwork<String> = InMemoryNetwork::new();

    let toml = r#"
        schema_version = 1

        [node]
        local_address = "node-a:1"
        endpoint = "node-a"

        [[routes]]
        route = "jobs"
    "#;
    let cfg = load_config_from_str(toml).unwrap();
    let node = Node::start(&cfg, &cluster, &network).await.unwrap();

    let outcomes = node
        .router
        .route(
            &[fab_types::Route::from("jobs")],
            Bytes::from_static(b"payload"),
            true,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].endpoint, Some(fab_types::EndpointAddress::from("node-a")));

    node.shutdown().await;
}

#[tokio::test]
async fn two_nodes_sharing_a_cluster_reach_each_other_through_a_registry_node() {
    use fab_router::RemoteMessageRouter;

    let cluster = MemoryCluster::new();
    let network: InMemoryNetwork<String> = InMemoryNetwork::new();

    let registry_toml = r#"
        schema_version = 1
        [node]
        local_address = "registry:1"
        endpoint = "registry"
        [registry]
        enabled = true
    "#;
    let registry_cfg = load_config_from_str(registry_toml).unwrap();
    let registry_node = Node::start(&registry_cfg, &cluster, &network).await.unwrap();

    let worker_toml = r#"
        schema_version = 1
        [node]
        local_address = "worker:1"
        endpoint = "worker"
        [[routes]]
        route = "echo"
    "#;
    let worker_cfg = load_config_from_str(worker_toml).unwrap();
    let worker_node = Node::start(&worker_cfg, &cluster, &network).await.unwrap();

    let worker_endpoint = worker_node
        .routing_system
        .get_endpoint(&"worker".into())
        .await
        .unwrap();
    let listener = tokio::spawn(async move {
        match worker_endpoint.receive(CancellationToken::new()).await {
            ReceiveOutcome::Request(req) => {
                req.reply().send_result(true, Bytes::from_static(b"echoed")).await.unwrap();
            }
            _ => panic!("expected a request"),
        }
    });

    let client_system = fab_routing::RoutingSystem::new(
        "client:1".to_owned(),
        std::sync::Arc::new(cluster.connect(b"client:1".to_vec()).await),
        fab_store::SessionHandle::new(),
        std::sync::Arc::new(fab_scheduler::RandomScheduler),
    );
    let client_transport = std::sync::Arc::new(network.join("client:1".to_owned()));
    let client_endpoint = client_system.create_endpoint("client".into(), client_transport).await.unwrap();
    let remote = RemoteMessageRouter::new(client_endpoint, "registry".into());

    let outcomes = remote
        .route(
            &[fab_types::Route::from("echo")],
            Bytes::from_static(b"ping"),
            true,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    listener.await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].result, RouteResult::Handled(Bytes::from_static(b"echoed")));

    registry_node.shutdown().await;
    worker_node.shutdown().await;
}
