//! Process-wide session handle (spec.md §4.2).
//!
//! The core never mints its own session; it asks the coordination store
//! for one the first time it's needed and caches it forever after. Use a
//! `tokio::sync::OnceCell` rather than the teacher's `volatile`-field CAS
//! since there's no direct stdlib analogue for a single-winner async
//! initializer.

use fab_types::Session;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::{CoordinationStore, StoreResult};

/// A cached-forever session identity, obtained from a [`CoordinationStore`]
/// on first use and shared by cloning.
#[derive(Clone)]
pub struct SessionHandle {
    cell: Arc<OnceCell<Session>>,
}

impl SessionHandle {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Returns the cached session, or obtains and caches one from `store`.
    /// Concurrent first callers race under the `OnceCell`'s own
    /// single-winner guarantee; only one ever calls into `store`.
    pub async fn get<S: CoordinationStore + ?Sized>(&self, store: &S) -> StoreResult<Session> {
        self.cell
            .get_or_try_init(|| async { store.session().await })
            .await
            .cloned()
    }

    #[must_use]
    pub fn peek(&self) -> Option<Session> {
        self.cell.get().cloned()
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}
