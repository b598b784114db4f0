//! Coordination-service contract (spec.md §6.1): the trait every registry
//! crate builds on, an in-memory reference implementation, and the
//! process-wide session handle (spec.md §4.2).

mod memory;
pub mod session;

pub use memory::{MemoryCluster, MemoryStore};
pub use session::SessionHandle;

use async_trait::async_trait;
use fab_path::CoordinationPath;
use fab_types::Session;
use std::time::SystemTime;
use thiserror::Error;

/// Entry lifetime mode (spec.md §3, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    /// Survives until explicitly deleted.
    Default,
    /// Deleted automatically when the creating session ends.
    Ephemeral,
}

/// A coordination-tree entry as observed by a reader (spec.md §3
/// `CoordinationEntry`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationEntry {
    pub path: CoordinationPath,
    pub value: Vec<u8>,
    pub version: i64,
    pub creation_time: SystemTime,
    pub last_write_time: SystemTime,
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("entry already exists at {0}")]
    DuplicateEntry(String),
    #[error("no entry at {0}")]
    NotFound(String),
    #[error("version conflict at {path}: expected {expected}, found {found}")]
    VersionConflict { path: String, expected: i64, found: i64 },
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The coordination-service operations every registry is built on (spec.md
/// §6.1). A real implementation would back this with an external service
/// (ZooKeeper, etcd, ...); [`MemoryStore`] is the in-process reference used
/// by tests and single-node deployments.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Fails with `DuplicateEntry` if `path` already exists.
    async fn create(
        &self,
        path: &CoordinationPath,
        value: Vec<u8>,
        mode: EntryMode,
    ) -> StoreResult<CoordinationEntry>;

    /// Like `create`, but returns the existing entry instead of failing
    /// when `path` is already present.
    async fn get_or_create(
        &self,
        path: &CoordinationPath,
        value: Vec<u8>,
        mode: EntryMode,
    ) -> StoreResult<CoordinationEntry>;

    async fn get(&self, path: &CoordinationPath) -> StoreResult<Option<CoordinationEntry>>;

    /// `expected_version < 0` skips the version check (unconditional
    /// write). Returns the version that was replaced.
    async fn set_value(&self, path: &CoordinationPath, value: Vec<u8>, expected_version: i64) -> StoreResult<i64>;

    /// `expected_version = None` skips the version check. `recursive`
    /// deletes descendants first rather than failing if any exist.
    /// Returns the version the entry had before deletion.
    async fn delete(
        &self,
        path: &CoordinationPath,
        expected_version: Option<i64>,
        recursive: bool,
    ) -> StoreResult<i64>;

    /// Direct child segment names under `path`.
    async fn children(&self, path: &CoordinationPath) -> StoreResult<Vec<String>>;

    /// This connection's session identity.
    async fn session(&self) -> StoreResult<Session>;

    /// Drop every ephemeral entry owned by `session`, as if its
    /// connection had died. Exposed for tests and administrative tooling;
    /// a live connection's own session expires this way automatically
    /// when the underlying connection drops.
    async fn expire_session(&self, session: &Session) -> StoreResult<()>;
}
