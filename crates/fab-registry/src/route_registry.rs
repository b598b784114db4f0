//! Route Registry (spec.md §4.4): route → set of `(endpoint, options)`,
//! with a reverse index per session used only to enumerate and delete a
//! session's own registrations without scanning the forward tree.

use std::collections::HashSet;
use std::sync::Arc;

use fab_store::{CoordinationStore, EntryMode, SessionHandle};
use fab_types::{layout, EndpointAddress, Route, RouteRegistrationOptions, RouteTarget};
use futures::future::join_all;

use crate::RegistryError;

fn encode_options(options: RouteRegistrationOptions) -> Vec<u8> {
    options.to_wire().to_be_bytes().to_vec()
}

fn decode_options(bytes: &[u8]) -> Option<RouteRegistrationOptions> {
    let arr: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
    Some(RouteRegistrationOptions::from_wire(i32::from_be_bytes(arr)))
}

fn encode_forward_value(options: RouteRegistrationOptions, endpoint: &EndpointAddress) -> Vec<u8> {
    let mut v = encode_options(options);
    v.extend_from_slice(endpoint.as_bytes());
    v
}

fn decode_forward_value(bytes: &[u8]) -> Option<RouteTarget> {
    let options = decode_options(bytes.get(0..4)?)?;
    let endpoint = EndpointAddress::from(std::str::from_utf8(bytes.get(4..)?).ok()?.to_owned());
    Some(RouteTarget { endpoint, options })
}

fn entry_mode(options: RouteRegistrationOptions) -> EntryMode {
    if options.transient {
        EntryMode::Ephemeral
    } else {
        EntryMode::Default
    }
}

pub struct RouteRegistry<S> {
    store: Arc<S>,
    session: SessionHandle,
}

impl<S: CoordinationStore> RouteRegistry<S> {
    #[must_use]
    pub fn new(store: Arc<S>, session: SessionHandle) -> Self {
        Self { store, session }
    }

    /// Creates the reverse entry first, then the forward entry, both
    /// content-addressed so the call is safe to retry. If a forward or
    /// reverse entry already exists with different options, the new
    /// options win (last-writer-wins via compare-and-set).
    pub async fn add_route(
        &self,
        endpoint: &EndpointAddress,
        route: &Route,
        options: RouteRegistrationOptions,
    ) -> Result<(), RegistryError> {
        let session = self.session.get(&*self.store).await?;
        let mode = entry_mode(options);

        let reverse_path = layout::route_reverse_entry(&session, endpoint, route);
        let reverse_value = encode_options(options);
        self.reconcile(&reverse_path, reverse_value, mode).await?;

        let forward_path = layout::route_forward_entry(route, endpoint, &session);
        let forward_value = encode_forward_value(options, endpoint);
        self.reconcile(&forward_path, forward_value, mode).await?;

        Ok(())
    }

    async fn reconcile(
        &self,
        path: &fab_path::CoordinationPath,
        value: Vec<u8>,
        mode: EntryMode,
    ) -> Result<(), RegistryError> {
        let entry = self.store.get_or_create(path, value.clone(), mode).await?;
        if entry.value != value {
            self.store.set_value(path, value, entry.version).await?;
        }
        Ok(())
    }

    /// Deletes both the forward and reverse entries. Missing entries are
    /// not errors.
    pub async fn remove_route(&self, endpoint: &EndpointAddress, route: &Route) -> Result<(), RegistryError> {
        let session = self.session.get(&*self.store).await?;
        let reverse_path = layout::route_reverse_entry(&session, endpoint, route);
        let forward_path = layout::route_forward_entry(route, endpoint, &session);
        delete_ignoring_missing(&*self.store, &reverse_path).await?;
        delete_ignoring_missing(&*self.store, &forward_path).await?;
        Ok(())
    }

    /// Enumerates this session's registrations for `endpoint` and deletes
    /// every one whose `Transient` flag equals `!remove_persistent`; if
    /// `remove_persistent` is true, also recursively deletes whatever
    /// remains of the reverse subtree. Deletions run concurrently; if any
    /// fail, the first error is returned after all have settled.
    pub async fn remove_routes(
        &self,
        endpoint: &EndpointAddress,
        remove_persistent: bool,
    ) -> Result<(), RegistryError> {
        let session = self.session.get(&*self.store).await?;
        let reverse_root = layout::route_reverse_endpoint_root(&session, endpoint);
        let children = self.store.children(&reverse_root).await?;

        let tasks = children.into_iter().map(|escaped_route| {
            let store = self.store.clone();
            let reverse_root = reverse_root.clone();
            let session = session.clone();
            let endpoint = endpoint.clone();
            async move {
                let route_name = fab_path::unescape(&escaped_route)?;
                let route = Route::from(route_name.clone());
                let reverse_path = reverse_root.child(&route_name);
                let Some(entry) = store.get(&reverse_path).await? else {
                    return Ok::<(), RegistryError>(());
                };
                let Some(options) = decode_options(&entry.value) else {
                    return Ok(());
                };
                if options.transient != !remove_persistent {
                    return Ok(());
                }
                let forward_path = layout::route_forward_entry(&route, &endpoint, &session);
                delete_ignoring_missing(&*store, &reverse_path).await?;
                delete_ignoring_missing(&*store, &forward_path).await?;
                Ok(())
            }
        });

        let mut first_err = None;
        for result in join_all(tasks).await {
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }

        if remove_persistent {
            if let Err(e) = self.store.delete(&reverse_root, None, true).await {
                if !matches!(e, fab_store::StoreError::NotFound(_)) {
                    first_err.get_or_insert(e.into());
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Enumerates `/routes/<route>/*`, deduplicating by endpoint with
    /// first-occurrence-wins over a deterministic (sorted-by-child-id)
    /// enumeration order.
    pub async fn get_routes(&self, route: &Route) -> Result<HashSet<RouteTarget>, RegistryError> {
        let root = layout::route_forward_root(route);
        let mut children = self.store.children(&root).await?;
        children.sort();

        let mut seen_endpoints = HashSet::new();
        let mut out = HashSet::new();
        for escaped_id in children {
            let id = fab_path::unescape(&escaped_id)?;
            let path = root.child(&id);
            let Some(entry) = self.store.get(&path).await? else {
                continue;
            };
            let Some(target) = decode_forward_value(&entry.value) else {
                continue;
            };
            if seen_endpoints.insert(target.endpoint.clone()) {
                out.insert(target);
            }
        }
        Ok(out)
    }
}

async fn delete_ignoring_missing<S: CoordinationStore + ?Sized>(
    store: &S,
    path: &fab_path::CoordinationPath,
) -> Result<(), RegistryError> {
    match store.delete(path, None, false).await {
        Ok(_) | Err(fab_store::StoreError::NotFound(_)) => Ok(()),
        Err(other) => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_store::MemoryStore;

    async fn setup() -> RouteRegistry<MemoryStore> {
        let store = Arc::new(MemoryStore::standalone(b"10.0.0.1:9".to_vec()).await);
        RouteRegistry::new(store, SessionHandle::new())
    }

    #[tokio::test]
    async fn add_then_get_routes_round_trips() {
        let reg = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        let route: Route = "r1".into();
        reg.add_route(&ep, &route, RouteRegistrationOptions::DEFAULT)
            .await
            .unwrap();
        let targets = reg.get_routes(&route).await.unwrap();
        assert!(targets.contains(&RouteTarget {
            endpoint: ep,
            options: RouteRegistrationOptions::DEFAULT,
        }));
    }

    #[tokio::test]
    async fn get_routes_dedups_by_endpoint() {
        let reg = setup().await;
        let route: Route = "r1".into();
        let ep: EndpointAddress = "svc-a".into();
        reg.add_route(&ep, &route, RouteRegistrationOptions::DEFAULT)
            .await
            .unwrap();
        reg.add_route(&ep, &route, RouteRegistrationOptions::transient())
            .await
            .unwrap();
        assert_eq!(reg.get_routes(&route).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_route_deletes_forward_and_reverse() {
        let reg = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        let route: Route = "r1".into();
        reg.add_route(&ep, &route, RouteRegistrationOptions::DEFAULT)
            .await
            .unwrap();
        reg.remove_route(&ep, &route).await.unwrap();
        assert!(reg.get_routes(&route).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_route_on_absent_registration_is_not_an_error() {
        let reg = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        let route: Route = "never-registered".into();
        reg.remove_route(&ep, &route).await.unwrap();
    }

    #[tokio::test]
    async fn remove_routes_without_persistent_flag_only_clears_transient() {
        let reg = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        let transient_route: Route = "t".into();
        let persistent_route: Route = "p".into();
        reg.add_route(&ep, &transient_route, RouteRegistrationOptions::transient())
            .await
            .unwrap();
        reg.add_route(&ep, &persistent_route, RouteRegistrationOptions::DEFAULT)
            .await
            .unwrap();

        reg.remove_routes(&ep, false).await.unwrap();

        assert!(reg.get_routes(&transient_route).await.unwrap().is_empty());
        assert!(!reg.get_routes(&persistent_route).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_routes_with_persistent_flag_clears_persistent_registrations() {
        let reg = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        let persistent_route: Route = "p".into();
        reg.add_route(&ep, &persistent_route, RouteRegistrationOptions::DEFAULT)
            .await
            .unwrap();

        reg.remove_routes(&ep, true).await.unwrap();

        assert!(reg.get_routes(&persistent_route).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_route_with_differing_options_overwrites_last_writer_wins() {
        let reg = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        let route: Route = "r1".into();
        reg.add_route(&ep, &route, RouteRegistrationOptions::DEFAULT)
            .await
            .unwrap();
        reg.add_route(&ep, &route, RouteRegistrationOptions::publish_only())
            .await
            .unwrap();
        let targets = reg.get_routes(&route).await.unwrap();
        let target = targets.iter().next().unwrap();
        assert!(target.options.publish_only);
    }
}
