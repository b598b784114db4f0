//! Endpoint Map (spec.md §4.3): `/maps/<endpoint>/<session>` → serialized
//! physical address, ephemeral, deleted automatically on session end.

use std::collections::HashSet;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use fab_store::{CoordinationStore, EntryMode, SessionHandle};
use fab_types::{layout, EndpointAddress};

use crate::RegistryError;

/// A physical address a transport understands, serializable for storage
/// in the coordination tree. `String` is provided as a convenience
/// implementation for tests and simple deployments.
pub trait AddressCodec: Sized + Clone + Eq + Hash + Send + Sync {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Option<Self>;
}

impl AddressCodec for String {
    fn encode(&self) -> Vec<u8> {
        self.clone().into_bytes()
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        String::from_utf8(bytes.to_vec()).ok()
    }
}

/// Maps a logical endpoint to the set of physical addresses announcing
/// it, scoped to the local session.
pub struct EndpointMap<S, A> {
    store: Arc<S>,
    session: SessionHandle,
    _address: PhantomData<fn() -> A>,
}

impl<S, A> EndpointMap<S, A>
where
    S: CoordinationStore,
    A: AddressCodec,
{
    #[must_use]
    pub fn new(store: Arc<S>, session: SessionHandle) -> Self {
        Self {
            store,
            session,
            _address: PhantomData,
        }
    }

    /// Idempotent after the first success: repeated `map` with the same
    /// `(endpoint, address)` under this session is a no-op.
    pub async fn map(&self, endpoint: &EndpointAddress, address: &A) -> Result<(), RegistryError> {
        let session = self.session.get(&*self.store).await?;
        let path = layout::endpoint_map_entry(endpoint, &session);
        match self.store.create(&path, address.encode(), EntryMode::Ephemeral).await {
            Ok(_) | Err(fab_store::StoreError::DuplicateEntry(_)) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Deletes this session's `/maps/<endpoint>/<session>` entry; the
    /// `address` argument documents intent but isn't independently
    /// checked since one session only ever announces one address per
    /// endpoint. Absence is not an error.
    pub async fn unmap(&self, endpoint: &EndpointAddress, _address: &A) -> Result<(), RegistryError> {
        let session = self.session.get(&*self.store).await?;
        let path = layout::endpoint_map_entry(endpoint, &session);
        match self.store.delete(&path, None, false).await {
            Ok(_) | Err(fab_store::StoreError::NotFound(_)) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    /// Administrative clearing: deletes every `/maps/<endpoint>/*` entry
    /// regardless of owning session.
    pub async fn unmap_all(&self, endpoint: &EndpointAddress) -> Result<(), RegistryError> {
        let path = layout::endpoint_map_root(endpoint);
        match self.store.delete(&path, None, true).await {
            Ok(_) | Err(fab_store::StoreError::NotFound(_)) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    pub async fn get_maps(&self, endpoint: &EndpointAddress) -> Result<HashSet<A>, RegistryError> {
        let root = layout::endpoint_map_root(endpoint);
        let children = self.store.children(&root).await?;
        let mut out = HashSet::with_capacity(children.len());
        for escaped_session in children {
            let session_token = fab_path::unescape(&escaped_session)?;
            let path = root.child(&session_token);
            if let Some(entry) = self.store.get(&path).await? {
                if let Some(addr) = A::decode(&entry.value) {
                    out.insert(addr);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_store::MemoryStore;

    async fn setup() -> (EndpointMap<MemoryStore, String>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::standalone(b"10.0.0.1:9".to_vec()).await);
        let map = EndpointMap::new(store.clone(), SessionHandle::new());
        (map, store)
    }

    #[tokio::test]
    async fn map_then_get_maps_round_trips() {
        let (map, _store) = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        map.map(&ep, &"10.0.0.2:7000".to_owned()).await.unwrap();
        let maps = map.get_maps(&ep).await.unwrap();
        assert!(maps.contains("10.0.0.2:7000"));
    }

    #[tokio::test]
    async fn repeated_map_is_idempotent() {
        let (map, _store) = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        map.map(&ep, &"10.0.0.2:7000".to_owned()).await.unwrap();
        map.map(&ep, &"10.0.0.2:7000".to_owned()).await.unwrap();
        assert_eq!(map.get_maps(&ep).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unmap_removes_the_entry() {
        let (map, _store) = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        map.map(&ep, &"10.0.0.2:7000".to_owned()).await.unwrap();
        map.unmap(&ep, &"10.0.0.2:7000".to_owned()).await.unwrap();
        assert!(map.get_maps(&ep).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmap_of_absent_entry_is_not_an_error() {
        let (map, _store) = setup().await;
        let ep: EndpointAddress = "svc-a".into();
        map.unmap(&ep, &"10.0.0.2:7000".to_owned()).await.unwrap();
    }

    #[tokio::test]
    async fn multiple_sessions_can_map_the_same_endpoint() {
        let store = Arc::new(MemoryStore::standalone(b"10.0.0.1:9".to_vec()).await);
        let map_a = EndpointMap::<MemoryStore, String>::new(store.clone(), SessionHandle::new());
        let map_b = EndpointMap::<MemoryStore, String>::new(store.clone(), SessionHandle::new());
        let ep: EndpointAddress = "svc-a".into();
        map_a.map(&ep, &"10.0.0.2:7000".to_owned()).await.unwrap();
        map_b.map(&ep, &"10.0.0.3:7000".to_owned()).await.unwrap();
        let maps = map_a.get_maps(&ep).await.unwrap();
        assert_eq!(maps.len(), 2);
    }

    #[tokio::test]
    async fn unmap_all_clears_every_sessions_entry() {
        let store = Arc::new(MemoryStore::standalone(b"10.0.0.1:9".to_vec()).await);
        let map_a = EndpointMap::<MemoryStore, String>::new(store.clone(), SessionHandle::new());
        let map_b = EndpointMap::<MemoryStore, String>::new(store.clone(), SessionHandle::new());
        let ep: EndpointAddress = "svc-a".into();
        map_a.map(&ep, &"10.0.0.2:7000".to_owned()).await.unwrap();
        map_b.map(&ep, &"10.0.0.3:7000".to_owned()).await.unwrap();
        map_a.unmap_all(&ep).await.unwrap();
        assert!(map_a.get_maps(&ep).await.unwrap().is_empty());
    }
}
