//! Routing System (spec.md §4.7): the process-wide map of locally-owned
//! Route Endpoints, grounded on the teacher's `AppState` single-lock
//! `HashMap` pattern.

use std::collections::HashMap;
use std::sync::Arc;

use fab_registry::AddressCodec;
use fab_scheduler::EndpointScheduler;
use fab_store::{CoordinationStore, SessionHandle};
use fab_transport::PhysicalTransport;
use fab_types::EndpointAddress;
use tokio::sync::RwLock;

use crate::route_endpoint::RoutingError;
use crate::RouteEndpoint;

#[derive(Debug, thiserror::Error)]
pub enum RoutingSystemError {
    #[error("endpoint {0} already exists on this node")]
    AlreadyExists(EndpointAddress),
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Owns every Route Endpoint created by this process and the local
/// physical address they are reachable at.
pub struct RoutingSystem<A, S> {
    local_address: A,
    store: Arc<S>,
    session: SessionHandle,
    scheduler: Arc<dyn EndpointScheduler<A> + Send + Sync>,
    endpoints: RwLock<HashMap<EndpointAddress, Arc<RouteEndpoint<A, S>>>>,
}

impl<A, S> RoutingSystem<A, S>
where
    A: AddressCodec + 'static,
    S: CoordinationStore + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        local_address: A,
        store: Arc<S>,
        session: SessionHandle,
        scheduler: Arc<dyn EndpointScheduler<A> + Send + Sync>,
    ) -> Self {
        Self {
            local_address,
            store,
            session,
            scheduler,
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn local_address(&self) -> &A {
        &self.local_address
    }

    /// Creates and maps a new Route Endpoint. Fails if an endpoint with
    /// this name already exists on this node.
    pub async fn create_endpoint(
        &self,
        endpoint: EndpointAddress,
        transport: Arc<dyn PhysicalTransport<A> + Send + Sync>,
    ) -> Result<Arc<RouteEndpoint<A, S>>, RoutingSystemError> {
        let mut endpoints = self.endpoints.write().await;
        if endpoints.contains_key(&endpoint) {
            return Err(RoutingSystemError::AlreadyExists(endpoint));
        }
        let route_endpoint = RouteEndpoint::create(
            endpoint.clone(),
            self.local_address.clone(),
            transport,
            self.store.clone(),
            self.session.clone(),
            self.scheduler.clone(),
        )
        .await?;
        endpoints.insert(endpoint, route_endpoint.clone());
        Ok(route_endpoint)
    }

    pub async fn get_endpoint(&self, endpoint: &EndpointAddress) -> Option<Arc<RouteEndpoint<A, S>>> {
        self.endpoints.read().await.get(endpoint).cloned()
    }

    pub async fn remove_endpoint(&self, endpoint: &EndpointAddress) {
        let removed = self.endpoints.write().await.remove(endpoint);
        if let Some(route_endpoint) = removed {
            route_endpoint.close().await;
        }
    }

    /// Closes every locally-owned endpoint and clears the map.
    pub async fn dispose(&self) {
        let endpoints: Vec<_> = self.endpoints.write().await.drain().map(|(_, v)| v).collect();
        for route_endpoint in endpoints {
            route_endpoint.close().await;
        }
    }
}
