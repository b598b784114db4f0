//! Shared in-memory harness for the routing fabric's crate test suites,
//! grounded on the teacher's `rt-test-utils` (a dedicated dev-support
//! crate holding the mock WS server/client other crates' `tests/`
//! directories reuse instead of each reimplementing one).
//!
//! A single [`Fabric`] wraps one [`MemoryCluster`] and one
//! [`InMemoryNetwork`], the two pieces of shared state every node in a
//! test needs to resolve and reach each other, and hands out fully wired
//! `RoutingSystem`/`RouteEndpoint`/`LocalMessageRouter` instances from it.

use std::sync::Arc;

use fab_registry::RouteRegistry;
use fab_router::LocalMessageRouter;
use fab_routing::{RouteEndpoint, RoutingSystem, RoutingSystemError};
use fab_scheduler::RandomScheduler;
use fab_store::{MemoryCluster, MemoryStore, SessionHandle};
use fab_transport::InMemoryNetwork;

/// Address type used throughout this harness: plain strings, matching
/// `InMemoryNetwork`'s own key type.
pub type Address = String;

/// Shared cluster + network backing every node created through this
/// harness. Clone is cheap: both fields are reference-counted internally.
#[derive(Clone)]
pub struct Fabric {
    cluster: MemoryCluster,
    network: InMemoryNetwork<Address>,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cluster: MemoryCluster::new(),
            network: InMemoryNetwork::new(),
        }
    }

    /// A `RoutingSystem` bound to `address`, with a fresh coordination
    /// session and a uniform-random endpoint scheduler.
    pub async fn routing_system(&self, address: &str) -> Arc<RoutingSystem<Address, MemoryStore>> {
        let store = Arc::new(self.cluster.connect(address.as_bytes().to_vec()).await);
        Arc::new(RoutingSystem::new(
            address.to_owned(),
            store,
            SessionHandle::new(),
            Arc::new(RandomScheduler),
        ))
    }

    /// A Route Endpoint named `endpoint`, reachable at `address`, joined
    /// to the shared in-memory network.
    pub async fn route_endpoint(
        &self,
        address: &str,
        endpoint: &str,
    ) -> Result<Arc<RouteEndpoint<Address, MemoryStore>>, RoutingSystemError> {
        let system = self.routing_system(address).await;
        let transport = Arc::new(self.network.join(address.to_owned()));
        system.create_endpoint(endpoint.into(), transport).await
    }

    /// A `RouteRegistry` sharing this harness's coordination store,
    /// addressed under its own sub-session so its paths never collide
    /// with a node's own endpoint-map session.
    pub async fn route_registry(&self, address: &str) -> Arc<RouteRegistry<MemoryStore>> {
        let store = Arc::new(self.cluster.connect(format!("{address}-routes").into_bytes()).await);
        Arc::new(RouteRegistry::new(store, SessionHandle::new()))
    }

    /// Registers `address` on the shared network without creating a
    /// Route Endpoint to drain it, so a send addressed there stays
    /// genuinely pending until cancelled, timed out, or the sender
    /// endpoint is closed. The returned transport must be kept alive for
    /// the mailbox to stay registered.
    pub fn join_silent(&self, address: &str) -> Arc<dyn fab_transport::PhysicalTransport<Address> + Send + Sync> {
        Arc::new(self.network.join(address.to_owned()))
    }

    /// A `LocalMessageRouter` for `endpoint`, wired to its own Route
    /// Endpoint and a registry sharing this harness's cluster.
    pub async fn local_router(
        &self,
        address: &str,
        endpoint: &str,
    ) -> (Arc<RouteEndpoint<Address, MemoryStore>>, LocalMessageRouter<Address, MemoryStore>) {
        let route_endpoint = self.route_endpoint(address, endpoint).await.unwrap();
        let registry = self.route_registry(address).await;
        let local = LocalMessageRouter::new(registry, Arc::clone(&route_endpoint));
        (route_endpoint, local)
    }
}
