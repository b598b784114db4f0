//! Route Endpoint (C6) and Routing System (C7): the per-endpoint
//! request/reply state machine and the process-wide registry of
//! locally-owned endpoints (spec.md §4.6-4.7).

mod result;
mod route_endpoint;
mod routing_system;

pub use result::RouteResult;
pub use route_endpoint::{InboundRequest, ReceiveOutcome, ReplyHandle, RouteEndpoint, RoutingError};
pub use routing_system::{RoutingSystem, RoutingSystemError};
