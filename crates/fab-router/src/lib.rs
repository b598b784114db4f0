//! Message Router (spec.md §4.8): the application-facing fan-out over
//! `route`/`routeTo` plus registration mirroring C4's API.

mod local;
mod remote;
mod service;

pub use local::LocalMessageRouter;
pub use remote::RemoteMessageRouter;
pub use service::RegistryService;

use async_trait::async_trait;
use bytes::Bytes;
use fab_routing::RouteResult;
use fab_types::{EndpointAddress, Route, RouteRegistrationOptions};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("route set must not be empty")]
    EmptyRouteSet,
    #[error(transparent)]
    Registry(#[from] fab_registry::RegistryError),
    #[error(transparent)]
    Routing(#[from] fab_routing::RoutingError),
    #[error(transparent)]
    Frame(#[from] fab_proto::RouterFrameError),
    #[error("remote registry endpoint did not respond")]
    RemoteUnhandled,
}

/// One target's outcome from a [`MessageRouter::route`] call. `endpoint`
/// is `None` for a [`RemoteMessageRouter`](crate::RemoteMessageRouter),
/// whose wire reply (spec.md §6.5) carries only result payloads, not
/// which endpoint each came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub endpoint: Option<EndpointAddress>,
    pub result: RouteResult,
}

/// The application-facing fan-out (spec.md §4.8), implemented either
/// locally (direct `fab-registry` calls) or remotely (framed through a
/// `RouteEndpoint::Send` to a well-known registry endpoint).
#[async_trait]
pub trait MessageRouter: Send + Sync {
    /// Resolves every route in `routes` via the route registry and sends
    /// to the eligible targets. When `publish` is true, every eligible
    /// target (across every route, `PublishOnly` included) receives the
    /// message. When `publish` is false, the call behaves as single
    /// delivery: the first eligible, non-`PublishOnly` target across the
    /// whole route set (in route-set order, then endpoint byte order)
    /// receives it and the call stops there.
    async fn route(
        &self,
        routes: &[Route],
        payload: Bytes,
        publish: bool,
        cancel: CancellationToken,
    ) -> Result<Vec<RouteOutcome>, RouterError>;

    /// Skips resolution and the route registry entirely: sends directly
    /// to `endpoint` via C6.
    async fn route_to(
        &self,
        route: &Route,
        payload: Bytes,
        endpoint: &EndpointAddress,
        cancel: CancellationToken,
    ) -> Result<RouteResult, RouterError>;

    async fn register(
        &self,
        endpoint: &EndpointAddress,
        route: &Route,
        options: RouteRegistrationOptions,
    ) -> Result<(), RouterError>;

    async fn unregister(&self, endpoint: &EndpointAddress, route: &Route) -> Result<(), RouterError>;

    async fn unregister_all(&self, endpoint: &EndpointAddress, remove_persistent: bool) -> Result<(), RouterError>;
}
