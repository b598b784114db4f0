//! Local `MessageRouter`: resolves via the route registry (C4) in-process
//! and sends through the caller's own Route Endpoint (C6). The primary,
//! fully-tested implementation; `RemoteMessageRouter` only differs in how
//! it reaches the same registry.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fab_registry::{AddressCodec, RouteRegistry};
use fab_routing::RouteEndpoint;
use fab_store::CoordinationStore;
use fab_types::{EndpointAddress, Route, RouteRegistrationOptions};
use tokio_util::sync::CancellationToken;

use crate::{MessageRouter, RouteOutcome, RouterError};

pub struct LocalMessageRouter<A, S> {
    registry: Arc<RouteRegistry<S>>,
    endpoint: Arc<RouteEndpoint<A, S>>,
}

impl<A, S> LocalMessageRouter<A, S> {
    #[must_use]
    pub fn new(registry: Arc<RouteRegistry<S>>, endpoint: Arc<RouteEndpoint<A, S>>) -> Self {
        Self { registry, endpoint }
    }
}

#[async_trait]
impl<A, S> MessageRouter for LocalMessageRouter<A, S>
where
    A: AddressCodec + 'static,
    S: CoordinationStore + Send + Sync + 'static,
{
    async fn route(
        &self,
        routes: &[Route],
        payload: Bytes,
        publish: bool,
        cancel: CancellationToken,
    ) -> Result<Vec<RouteOutcome>, RouterError> {
        if routes.is_empty() {
            return Err(RouterError::EmptyRouteSet);
        }

        if publish {
            let mut outcomes = Vec::new();
            for route in routes {
                let mut targets: Vec<_> = self.registry.get_routes(route).await?.into_iter().collect();
                targets.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
                for target in targets {
                    let result = self
                        .endpoint
                        .send(payload.clone(), &target.endpoint, cancel.clone())
                        .await;
                    outcomes.push(RouteOutcome {
                        endpoint: Some(target.endpoint),
                        result,
                    });
                }
            }
            return Ok(outcomes);
        }

        let mut seen = HashSet::new();
        for route in routes {
            let mut targets: Vec<_> = self.registry.get_routes(route).await?.into_iter().collect();
            targets.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
            for target in targets {
                if target.options.publish_only {
                    continue;
                }
                if !seen.insert(target.endpoint.clone()) {
                    continue;
                }
                let result = self.endpoint.send(payload, &target.endpoint, cancel).await;
                return Ok(vec![RouteOutcome {
                    endpoint: Some(target.endpoint),
                    result,
                }]);
            }
        }
        Ok(Vec::new())
    }

    async fn route_to(
        &self,
        _route: &Route,
        payload: Bytes,
        endpoint: &EndpointAddress,
        cancel: CancellationToken,
    ) -> Result<fab_routing::RouteResult, RouterError> {
        Ok(self.endpoint.send(payload, endpoint, cancel).await)
    }

    async fn register(
        &self,
        endpoint: &EndpointAddress,
        route: &Route,
        options: RouteRegistrationOptions,
    ) -> Result<(), RouterError> {
        self.registry.add_route(endpoint, route, options).await?;
        Ok(())
    }

    async fn unregister(&self, endpoint: &EndpointAddress, route: &Route) -> Result<(), RouterError> {
        self.registry.remove_route(endpoint, route).await?;
        Ok(())
    }

    async fn unregister_all(&self, endpoint: &EndpointAddress, remove_persistent: bool) -> Result<(), RouterError> {
        self.registry.remove_routes(endpoint, remove_persistent).await?;
        Ok(())
    }
}
