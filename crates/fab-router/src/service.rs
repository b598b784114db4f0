//! Registry service: the server side of a remote `MessageRouter`. Runs a
//! receive loop over a dedicated Route Endpoint, decoding each inbound
//! request as a [`RouterFrame`] and dispatching it against a wrapped
//! [`LocalMessageRouter`].

use std::sync::Arc;

use bytes::Bytes;
use fab_proto::{RouteReply, RouterFrame};
use fab_registry::AddressCodec;
use fab_routing::{ReceiveOutcome, RouteEndpoint, RouteResult};
use fab_store::CoordinationStore;
use fab_types::{Route, RouteRegistrationOptions};

use crate::{LocalMessageRouter, MessageRouter};

pub struct RegistryService<A, S> {
    endpoint: Arc<RouteEndpoint<A, S>>,
    local: Arc<LocalMessageRouter<A, S>>,
}

impl<A, S> RegistryService<A, S>
where
    A: AddressCodec + 'static,
    S: CoordinationStore + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(endpoint: Arc<RouteEndpoint<A, S>>, local: Arc<LocalMessageRouter<A, S>>) -> Self {
        Self { endpoint, local }
    }

    /// Runs until `cancel` fires or the owning endpoint is disposed.
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        loop {
            match self.endpoint.receive(cancel.clone()).await {
                ReceiveOutcome::Request(req) => {
                    let local = Arc::clone(&self.local);
                    tokio::spawn(async move {
                        Self::handle_one(local, req).await;
                    });
                }
                ReceiveOutcome::Cancelled | ReceiveOutcome::Disposed => break,
            }
        }
    }

    async fn handle_one(local: Arc<LocalMessageRouter<A, S>>, req: fab_routing::InboundRequest<A>) {
        let requester = req.remote_endpoint.clone();
        let frame = match RouterFrame::decode(&req.payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%err, from = %requester, "dropping unparsable router frame");
                return;
            }
        };

        let reply = req.reply();
        match frame {
            RouterFrame::Route { routes, publish, payload } => {
                let routes: Vec<Route> = routes.into_iter().map(Route::from).collect();
                let outcomes = local
                    .route(&routes, payload, publish, req.cancel_token.clone())
                    .await
                    .unwrap_or_default();
                let results = outcomes
                    .into_iter()
                    .filter_map(|o| match o.result {
                        RouteResult::Handled(payload) => Some(payload),
                        _ => None,
                    })
                    .collect();
                let reply_payload = RouteReply { results }.encode();
                if let Err(err) = reply.send_result(true, reply_payload).await {
                    tracing::warn!(%err, from = %requester, "failed to reply to route request");
                }
            }
            RouterFrame::RouteToEndPoint { endpoint, payload, .. } => {
                let target = fab_types::EndpointAddress::from(endpoint);
                let dummy_route = Route::from(String::new());
                let result = local
                    .route_to(&dummy_route, payload, &target, req.cancel_token.clone())
                    .await
                    .unwrap_or(RouteResult::Misrouted);
                let (handled, payload) = match result {
                    RouteResult::Handled(payload) => (true, payload),
                    RouteResult::Unhandled(payload) => (false, payload),
                    _ => (false, Bytes::new()),
                };
                if let Err(err) = reply.send_result(handled, payload).await {
                    tracing::warn!(%err, from = %requester, "failed to reply to routeTo request");
                }
            }
            RouterFrame::RegisterRoute { options, route } => {
                let outcome = local
                    .register(&requester, &Route::from(route), RouteRegistrationOptions::from_wire(options))
                    .await;
                if let Err(err) = outcome {
                    tracing::warn!(%err, from = %requester, "registration failed");
                }
                let _ = reply.send_ack().await;
            }
            RouterFrame::UnregisterRoute { route } => {
                let outcome = local.unregister(&requester, &Route::from(route)).await;
                if let Err(err) = outcome {
                    tracing::warn!(%err, from = %requester, "unregistration failed");
                }
                let _ = reply.send_ack().await;
            }
            RouterFrame::UnregisterRoutes { remove_persistent } => {
                let outcome = local.unregister_all(&requester, remove_persistent).await;
                if let Err(err) = outcome {
                    tracing::warn!(%err, from = %requester, "unregister_all failed");
                }
                let _ = reply.send_ack().await;
            }
            RouterFrame::Handle { .. } => {
                tracing::warn!(from = %requester, "registry service never expects a Handle frame, dropping");
                let _ = reply.send_ack().await;
            }
        }
    }
}
