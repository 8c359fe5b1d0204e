//! Session Registry
//!
//! Concurrency-safe mapping from session id to session object.
//!
//! ## Invariants
//! - Keys are unique; adding an existing id is a programming error
//! - An id is removed at most once; removal returns the owned session, so no
//!   later dispatch can reach it
//! - The map is the only structure touched from more than one thread, and
//!   every access goes through a single mutex

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{NetError, Result};
use crate::session::SessionId;

/// Mapping from session id to session, guarded by one mutex
///
/// The UI layer keeps ids only. A session's slot lives here until it is
/// removed, after which every id-based lookup reports "not found".
#[derive(Debug)]
pub struct SessionRegistry<T> {
    entries: Mutex<HashMap<SessionId, T>>,
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a session under a fresh id
    pub fn add(&self, id: SessionId, session: T) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(NetError::DuplicateSession(id));
        }
        entries.insert(id, session);
        Ok(())
    }

    /// Remove and return the session, if present
    pub fn remove(&self, id: SessionId) -> Option<T> {
        self.entries.lock().remove(&id)
    }

    /// Idempotent removal; returns whether an entry existed
    pub fn discard(&self, id: SessionId) -> bool {
        self.remove(id).is_some()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Run `f` against the session, or return None if the id is unknown
    pub fn lookup<R>(&self, id: SessionId, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries.lock().get(&id).map(f)
    }

    /// Run `f` against the session mutably, or return None if the id is unknown
    ///
    /// The registry lock is held while `f` runs; `f` must not call back into
    /// the same registry.
    pub fn with_mut<R>(&self, id: SessionId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.entries.lock().get_mut(&id).map(f)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of registered ids, in ascending order
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.entries.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Remove every entry, returning them in ascending id order
    pub fn drain(&self) -> Vec<(SessionId, T)> {
        let mut drained: Vec<(SessionId, T)> = self.entries.lock().drain().collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
