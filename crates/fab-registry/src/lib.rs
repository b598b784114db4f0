//! Endpoint Map (C3) and Route Registry (C4), both built over a
//! [`fab_store::CoordinationStore`]. Grounded on the async
//! `RwLock<HashMap<..>>`-guarded CRUD methods of the teacher's `AppState`
//! (`services/server/src/state.rs`), generalized from an in-process map
//! to an arbitrary coordination store.

mod endpoint_map;
mod route_registry;

pub use endpoint_map::{AddressCodec, EndpointMap};
pub use route_registry::RouteRegistry;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] fab_store::StoreError),
    #[error(transparent)]
    Path(#[from] fab_path::PathError),
}
