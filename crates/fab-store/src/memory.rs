//! In-memory reference [`CoordinationStore`], grounded on the
//! `Arc<RwLock<HashMap<..>>>` registry pattern in the teacher's
//! `AppState` (`services/server/src/state.rs`). Flat path-keyed map
//! rather than a real node tree; `children` is computed by prefix scan,
//! which is sufficient for every layout in use (spec.md §6.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use fab_path::CoordinationPath;
use fab_types::Session;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{CoordinationEntry, CoordinationStore, EntryMode, StoreError, StoreResult};

struct StoredEntry {
    value: Vec<u8>,
    version: i64,
    creation_time: SystemTime,
    last_write_time: SystemTime,
}

#[derive(Default)]
struct Shared {
    entries: HashMap<String, StoredEntry>,
    /// Canonical path -> owning session, tracked only for ephemeral entries.
    ephemeral_owners: HashMap<String, Session>,
}

/// The shared backing table for a set of [`MemoryStore`] connections,
/// modeling one coordination-service cluster reachable by many nodes.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    shared: Arc<RwLock<Shared>>,
}

impl MemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new session bound to `physical_address` and return a store
    /// handle for it, simulating a node connecting to the service.
    pub async fn connect(&self, physical_address: Vec<u8>) -> MemoryStore {
        let session = Session::new(Uuid::new_v4().as_bytes().to_vec(), physical_address);
        MemoryStore {
            session,
            shared: self.shared.clone(),
        }
    }
}

/// A single node's connection to a [`MemoryCluster`].
#[derive(Clone)]
pub struct MemoryStore {
    session: Session,
    shared: Arc<RwLock<Shared>>,
}

impl MemoryStore {
    /// A standalone store with its own private cluster and a freshly
    /// minted session; convenient for single-node tests.
    pub async fn standalone(physical_address: Vec<u8>) -> Self {
        MemoryCluster::new().connect(physical_address).await
    }
}

fn to_entry(path: &CoordinationPath, stored: &StoredEntry, children: Vec<String>) -> CoordinationEntry {
    CoordinationEntry {
        path: path.clone(),
        value: stored.value.clone(),
        version: stored.version,
        creation_time: stored.creation_time,
        last_write_time: stored.last_write_time,
        children,
    }
}

fn direct_children(entries: &HashMap<String, StoredEntry>, prefix: &str) -> Vec<String> {
    let scan_prefix = if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    };
    let mut out = Vec::new();
    for key in entries.keys() {
        if let Some(rest) = key.strip_prefix(scan_prefix.as_str()) {
            if rest.is_empty() || (prefix.is_empty() && key.is_empty()) {
                continue;
            }
            if !rest.contains('/') {
                out.push(rest.to_owned());
            }
        }
    }
    out
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create(
        &self,
        path: &CoordinationPath,
        value: Vec<u8>,
        mode: EntryMode,
    ) -> StoreResult<CoordinationEntry> {
        let key = path.to_string();
        let mut shared = self.shared.write().await;
        if shared.entries.contains_key(&key) {
            return Err(StoreError::DuplicateEntry(key));
        }
        let now = SystemTime::now();
        shared.entries.insert(
            key.clone(),
            StoredEntry {
                value: value.clone(),
                version: 0,
                creation_time: now,
                last_write_time: now,
            },
        );
        if mode == EntryMode::Ephemeral {
            shared.ephemeral_owners.insert(key.clone(), self.session.clone());
        }
        let stored = &shared.entries[&key];
        Ok(to_entry(path, stored, Vec::new()))
    }

    async fn get_or_create(
        &self,
        path: &CoordinationPath,
        value: Vec<u8>,
        mode: EntryMode,
    ) -> StoreResult<CoordinationEntry> {
        match self.create(path, value, mode).await {
            Ok(entry) => Ok(entry),
            Err(StoreError::DuplicateEntry(_)) => self
                .get(path)
                .await?
                .ok_or_else(|| StoreError::NotFound(path.to_string())),
            Err(other) => Err(other),
        }
    }

    async fn get(&self, path: &CoordinationPath) -> StoreResult<Option<CoordinationEntry>> {
        let key = path.to_string();
        let shared = self.shared.read().await;
        Ok(shared
            .entries
            .get(&key)
            .map(|stored| to_entry(path, stored, direct_children(&shared.entries, &key))))
    }

    async fn set_value(
        &self,
        path: &CoordinationPath,
        value: Vec<u8>,
        expected_version: i64,
    ) -> StoreResult<i64> {
        let key = path.to_string();
        let mut shared = self.shared.write().await;
        let Some(stored) = shared.entries.get_mut(&key) else {
            return Err(StoreError::NotFound(key));
        };
        if expected_version >= 0 && stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                path: key,
                expected: expected_version,
                found: stored.version,
            });
        }
        let prior = stored.version;
        stored.value = value;
        stored.version += 1;
        stored.last_write_time = SystemTime::now();
        Ok(prior)
    }

    async fn delete(
        &self,
        path: &CoordinationPath,
        expected_version: Option<i64>,
        recursive: bool,
    ) -> StoreResult<i64> {
        let key = path.to_string();
        let mut shared = self.shared.write().await;
        let prior = {
            let Some(stored) = shared.entries.get(&key) else {
                return Err(StoreError::NotFound(key));
            };
            if let Some(expected) = expected_version {
                if expected >= 0 && stored.version != expected {
                    return Err(StoreError::VersionConflict {
                        path: key.clone(),
                        expected,
                        found: stored.version,
                    });
                }
            }
            stored.version
        };
        if recursive {
            let child_prefix = format!("{key}/");
            let doomed: Vec<String> = shared
                .entries
                .keys()
                .filter(|k| k.starts_with(&child_prefix))
                .cloned()
                .collect();
            for k in doomed {
                shared.entries.remove(&k);
                shared.ephemeral_owners.remove(&k);
            }
        }
        shared.entries.remove(&key);
        shared.ephemeral_owners.remove(&key);
        Ok(prior)
    }

    async fn children(&self, path: &CoordinationPath) -> StoreResult<Vec<String>> {
        let key = path.to_string();
        let shared = self.shared.read().await;
        Ok(direct_children(&shared.entries, &key))
    }

    async fn session(&self) -> StoreResult<Session> {
        Ok(self.session.clone())
    }

    async fn expire_session(&self, session: &Session) -> StoreResult<()> {
        let mut shared = self.shared.write().await;
        let doomed: Vec<String> = shared
            .ephemeral_owners
            .iter()
            .filter(|(_, owner)| *owner == session)
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            shared.entries.remove(&path);
            shared.ephemeral_owners.remove(&path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segs: &[&str]) -> CoordinationPath {
        CoordinationPath::from_segments(segs.iter().map(|s| (*s).to_owned()))
    }

    #[tokio::test]
    async fn create_rejects_duplicate() {
        let store = MemoryStore::standalone(b"a".to_vec()).await;
        let p = path(&["maps", "ep"]);
        store.create(&p, vec![1], EntryMode::Default).await.unwrap();
        let err = store.create(&p, vec![2], EntryMode::Default).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEntry(_)));
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = MemoryStore::standalone(b"a".to_vec()).await;
        let p = path(&["maps", "ep"]);
        let e1 = store.get_or_create(&p, vec![1], EntryMode::Default).await.unwrap();
        let e2 = store.get_or_create(&p, vec![9], EntryMode::Default).await.unwrap();
        assert_eq!(e1.value, e2.value);
    }

    #[tokio::test]
    async fn children_lists_direct_descendants_only() {
        let store = MemoryStore::standalone(b"a".to_vec()).await;
        store
            .create(&path(&["maps", "ep", "s1"]), vec![], EntryMode::Default)
            .await
            .unwrap();
        store
            .create(&path(&["maps", "ep", "s2"]), vec![], EntryMode::Default)
            .await
            .unwrap();
        store
            .create(&path(&["maps", "other"]), vec![], EntryMode::Default)
            .await
            .unwrap();
        let mut kids = store.children(&path(&["maps", "ep"])).await.unwrap();
        kids.sort();
        assert_eq!(kids, vec!["s1".to_owned(), "s2".to_owned()]);
    }

    #[tokio::test]
    async fn set_value_enforces_expected_version() {
        let store = MemoryStore::standalone(b"a".to_vec()).await;
        let p = path(&["routes", "r", "1"]);
        store.create(&p, vec![1], EntryMode::Default).await.unwrap();
        let err = store.set_value(&p, vec![2], 5).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        let prior = store.set_value(&p, vec![2], 0).await.unwrap();
        assert_eq!(prior, 0);
    }

    #[tokio::test]
    async fn recursive_delete_removes_descendants() {
        let store = MemoryStore::standalone(b"a".to_vec()).await;
        store
            .create(&path(&["reverse-routes", "s1", "ep"]), vec![], EntryMode::Default)
            .await
            .unwrap();
        store
            .create(&path(&["reverse-routes", "s1", "ep", "r1"]), vec![], EntryMode::Default)
            .await
            .unwrap();
        store
            .delete(&path(&["reverse-routes", "s1", "ep"]), None, true)
            .await
            .unwrap();
        assert!(store
            .get(&path(&["reverse-routes", "s1", "ep", "r1"]))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expiring_a_session_drops_only_its_ephemeral_entries() {
        let cluster = MemoryCluster::new();
        let a = cluster.connect(b"a".to_vec()).await;
        let b = cluster.connect(b"b".to_vec()).await;

        a.create(&path(&["maps", "ep", "a"]), vec![], EntryMode::Ephemeral)
            .await
            .unwrap();
        b.create(&path(&["maps", "ep", "b"]), vec![], EntryMode::Ephemeral)
            .await
            .unwrap();
        a.create(&path(&["routes", "r"]), vec![], EntryMode::Default)
            .await
            .unwrap();

        let a_session = a.session().await.unwrap();
        a.expire_session(&a_session).await.unwrap();

        assert!(a.get(&path(&["maps", "ep", "a"])).await.unwrap().is_none());
        assert!(b.get(&path(&["maps", "ep", "b"])).await.unwrap().is_some());
        assert!(a.get(&path(&["routes", "r"])).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_of_missing_entry_is_not_found() {
        let store = MemoryStore::standalone(b"a".to_vec()).await;
        let err = store
            .delete(&path(&["maps", "missing"]), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
