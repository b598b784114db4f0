//! Node runtime: wires a `RoutingSystem`, a `RouteRegistry`, a
//! `LocalMessageRouter`, and optionally a `RegistryService`, all bound to
//! the in-memory transport/store, from a loaded [`config::NodeConfig`].

pub mod config;

use std::sync::Arc;

use config::NodeConfig;
use fab_registry::RouteRegistry;
use fab_router::{LocalMessageRouter, MessageRouter, RegistryService};
use fab_routing::RoutingSystem;
use fab_scheduler::RandomScheduler;
use fab_store::{MemoryCluster, MemoryStore, SessionHandle};
use fab_transport::InMemoryNetwork;
use fab_types::{Route, RouteRegistrationOptions};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Routing(#[from] fab_routing::RoutingSystemError),
    #[error(transparent)]
    Router(#[from] fab_router::RouterError),
}

/// A running node: its Route Endpoint, the local message router built on
/// it, and (if configured) the background registry service task.
pub struct Node {
    pub routing_system: Arc<RoutingSystem<String, MemoryStore>>,
    pub router: Arc<LocalMessageRouter<String, MemoryStore>>,
    registry_task: Option<tokio::task::JoinHandle<()>>,
    registry_cancel: CancellationToken,
}

impl Node {
    /// Boots a node against a shared in-memory cluster/network, per
    /// `config`: creates its Route Endpoint, registers its configured
    /// routes, and starts a `RegistryService` if `config.registry.enabled`.
    pub async fn start(
        config: &NodeConfig,
        cluster: &MemoryCluster,
        network: &InMemoryNetwork<String>,
    ) -> Result<Self, NodeError> {
        let store = Arc::new(cluster.connect(config.local_address.as_bytes().to_vec()).await);
        let routing_system = Arc::new(RoutingSystem::new(
            config.local_address.clone(),
            store,
            SessionHandle::new(),
            Arc::new(RandomScheduler),
        ));

        let transport = Arc::new(network.join(config.local_address.clone()));
        let route_endpoint = routing_system
            .create_endpoint(config.endpoint.as_str().into(), transport)
            .await?;

        let registry_store = Arc::new(
            cluster
                .connect(format!("{}-routes", config.local_address).into_bytes())
                .await,
        );
        let registry = Arc::new(RouteRegistry::new(registry_store, SessionHandle::new()));
        let router = Arc::new(LocalMessageRouter::new(registry, Arc::clone(&route_endpoint)));

        for route in &config.routes {
            let options = RouteRegistrationOptions {
                transient: route.transient,
                publish_only: route.publish_only,
            };
            router
                .register(&config.endpoint.as_str().into(), &Route::from(route.route.clone()), options)
                .await?;
            info!(route = %route.route, endpoint = %config.endpoint, "route registered");
        }

        let registry_cancel = CancellationToken::new();
        let registry_task = if config.registry.enabled {
            let service = RegistryService::new(Arc::clone(&route_endpoint), Arc::clone(&router));
            let cancel = registry_cancel.clone();
            info!(endpoint = %config.endpoint, "registry service starting");
            Some(tokio::spawn(async move {
                service.run(cancel).await;
            }))
        } else {
            None
        };

        Ok(Self {
            routing_system,
            router,
            registry_task,
            registry_cancel,
        })
    }

    /// Stops the registry service (if running) and disposes every Route
    /// Endpoint this node owns.
    pub async fn shutdown(self) {
        self.registry_cancel.cancel();
        if let Some(task) = self.registry_task {
            let _ = task.await;
        }
        self.routing_system.dispose().await;
    }
}
