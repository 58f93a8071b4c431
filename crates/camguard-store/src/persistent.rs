//! Dirty tracking and flush policy around a `StateStore` backend

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{PersistedState, StateStore, StoreResult};

/// Owns the canonical state document.
///
/// Every mutable borrow marks the document dirty; `flush_if_dirty` writes it
/// through the backend. A failed write keeps the dirty flag so the next
/// flush retries.
pub struct PersistentStateStore {
    state: PersistedState,
    dirty: bool,
    backend: Box<dyn StateStore>,
}

impl PersistentStateStore {
    /// Load from `backend`, or start empty if nothing was saved yet.
    ///
    /// A malformed document is returned as an error and must abort startup.
    pub fn open(backend: Box<dyn StateStore>, now: DateTime<Utc>) -> StoreResult<Self> {
        let (state, dirty) = match backend.load()? {
            Some(state) => (state, false),
            None => (PersistedState::empty(now), true),
        };
        Ok(Self {
            state,
            dirty,
            backend,
        })
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    /// Mutable access; marks the document dirty
    pub fn state_mut(&mut self) -> &mut PersistedState {
        self.dirty = true;
        &mut self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_healthy(&self) -> bool {
        self.backend.is_healthy()
    }

    /// Write the document if it changed since the last successful write.
    ///
    /// Returns whether a write happened.
    pub fn flush_if_dirty(&mut self, now: DateTime<Utc>) -> StoreResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.flush(now)?;
        Ok(true)
    }

    /// Write the document unconditionally
    pub fn flush(&mut self, now: DateTime<Utc>) -> StoreResult<()> {
        let previous = self.state.saved_at.replace(now);
        match self.backend.save(&self.state) {
            Ok(()) => {
                self.dirty = false;
                debug!("State flushed");
                Ok(())
            }
            Err(e) => {
                self.state.saved_at = previous;
                self.dirty = true;
                warn!(error = %e, "State flush failed, will retry");
                Err(e)
            }
        }
    }
}
