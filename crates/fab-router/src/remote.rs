//! Remote `MessageRouter`: marshals calls as §6.5 wire frames and sends
//! them through the caller's own Route Endpoint (C6) to a well-known
//! registry endpoint, which runs a [`crate::RegistryService`].
//!
//! Registration calls carry no endpoint field on the wire; the server
//! infers the registering endpoint from the request's `txEndpoint`
//! header, i.e. whichever `RouteEndpoint` this router was built on. The
//! `endpoint` argument on `register`/`unregister`/`unregister_all` is
//! checked against that identity and a mismatch is logged, not rejected.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fab_proto::{RouteReply, RouterFrame};
use fab_registry::AddressCodec;
use fab_routing::{RouteEndpoint, RouteResult};
use fab_store::CoordinationStore;
use fab_types::{EndpointAddress, Route, RouteRegistrationOptions};
use tokio_util::sync::CancellationToken;

use crate::{MessageRouter, RouteOutcome, RouterError};

pub struct RemoteMessageRouter<A, S> {
    endpoint: Arc<RouteEndpoint<A, S>>,
    registry_endpoint: EndpointAddress,
}

impl<A, S> RemoteMessageRouter<A, S> {
    #[must_use]
    pub fn new(endpoint: Arc<RouteEndpoint<A, S>>, registry_endpoint: EndpointAddress) -> Self {
        Self {
            endpoint,
            registry_endpoint,
        }
    }

    fn check_identity(&self, endpoint: &EndpointAddress) {
        if endpoint != self.endpoint.endpoint() {
            tracing::warn!(
                requested = %endpoint,
                actual = %self.endpoint.endpoint(),
                "remote registration always registers the sending endpoint's own identity"
            );
        }
    }

    /// `RegistryService` acks registration calls with `SendAck`, which
    /// arrives here as `Unhandled` (empty payload, `handled=false`), not
    /// `Handled`. Only a result that never reached the registry endpoint
    /// at all counts as a failure.
    fn ack_result(result: RouteResult) -> Result<(), RouterError> {
        match result {
            RouteResult::Handled(_) | RouteResult::Unhandled(_) => Ok(()),
            RouteResult::Misrouted | RouteResult::Cancelled | RouteResult::Disposed | RouteResult::TransportFailed => {
                Err(RouterError::RemoteUnhandled)
            }
        }
    }
}

#[async_trait]
impl<A, S> MessageRouter for RemoteMessageRouter<A, S>
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
        let frame = RouterFrame::Route {
            routes: routes.iter().map(ToString::to_string).collect(),
            publish,
            payload,
        };
        let result = self
            .endpoint
            .send(frame.encode(), &self.registry_endpoint, cancel)
            .await;
        match result {
            RouteResult::Handled(reply_bytes) => {
                let reply = RouteReply::decode(&reply_bytes)?;
                Ok(reply
                    .results
                    .into_iter()
                    .map(|payload| RouteOutcome {
                        endpoint: None,
                        result: RouteResult::Handled(payload),
                    })
                    .collect())
            }
            other => Ok(vec![RouteOutcome { endpoint: None, result: other }]),
        }
    }

    async fn route_to(
        &self,
        _route: &Route,
        payload: Bytes,
        endpoint: &EndpointAddress,
        cancel: CancellationToken,
    ) -> Result<RouteResult, RouterError> {
        let frame = RouterFrame::RouteToEndPoint {
            endpoint: endpoint.to_string(),
            publish: false,
            payload,
        };
        Ok(self
            .endpoint
            .send(frame.encode(), &self.registry_endpoint, cancel)
            .await)
    }

    async fn register(
        &self,
        endpoint: &EndpointAddress,
        route: &Route,
        options: RouteRegistrationOptions,
    ) -> Result<(), RouterError> {
        self.check_identity(endpoint);
        let frame = RouterFrame::RegisterRoute {
            options: options.to_wire(),
            route: route.to_string(),
        };
        let result = self
            .endpoint
            .send(frame.encode(), &self.registry_endpoint, CancellationToken::new())
            .await;
        Self::ack_result(result)
    }

    async fn unregister(&self, endpoint: &EndpointAddress, route: &Route) -> Result<(), RouterError> {
        self.check_identity(endpoint);
        let frame = RouterFrame::UnregisterRoute { route: route.to_string() };
        let result = self
            .endpoint
            .send(frame.encode(), &self.registry_endpoint, CancellationToken::new())
            .await;
        Self::ack_result(result)
    }

    async fn unregister_all(&self, endpoint: &EndpointAddress, remove_persistent: bool) -> Result<(), RouterError> {
        self.check_identity(endpoint);
        let frame = RouterFrame::UnregisterRoutes { remove_persistent };
        let result = self
            .endpoint
            .send(frame.encode(), &self.registry_endpoint, CancellationToken::new())
            .await;
        Self::ack_result(result)
    }
}
