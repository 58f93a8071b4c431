//! Store trait definitions

use crate::{PersistedState, StoreResult};

/// Durable backend for the state document
pub trait StateStore: Send + Sync {
    /// Load the last saved document. `Ok(None)` means nothing was ever saved;
    /// a document that exists but cannot be read is an error.
    fn load(&self) -> StoreResult<Option<PersistedState>>;

    /// Persist the whole document, replacing the previous one atomically
    fn save(&self, state: &PersistedState) -> StoreResult<()>;

    /// Check if the backend is usable
    fn is_healthy(&self) -> bool;
}

impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    fn load(&self) -> StoreResult<Option<PersistedState>> {
        (**self).load()
    }

    fn save(&self, state: &PersistedState) -> StoreResult<()> {
        (**self).save(state)
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
