//! Thread-safe map of live sessions keyed by [`ClientId`].
//!
//! One reader/writer lock guards the whole map. Lookups, sends and the drain
//! pass's snapshot take the read side; add, remove and clear take the write
//! side. The lock is never held while calling out of the registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::codec::ClientId;
use crate::session::Session;

/// Errors returned by [`SessionRegistry::try_add`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A session with this id is already registered.
    #[error("session {0} is already registered")]
    Duplicate(ClientId),

    /// The registry holds its maximum number of sessions.
    #[error("session limit of {capacity} reached")]
    Full {
        /// Configured maximum.
        capacity: usize,
    },
}

/// Owner of every registered [`Session`].
pub struct SessionRegistry {
    inner: RwLock<HashMap<ClientId, Arc<Session>>>,
    capacity: usize,
}

impl SessionRegistry {
    /// Create a registry that admits at most `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ClientId, Arc<Session>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ClientId, Arc<Session>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of sessions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `session` under its id.
    ///
    /// Fails without touching the existing entry if the id is taken or the
    /// registry is full.
    pub fn try_add(&self, session: Session) -> Result<Arc<Session>, RegistryError> {
        let id = session.id();
        let mut map = self.write();
        if map.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        if map.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        let session = Arc::new(session);
        map.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Insert `session`, returning `false` if it could not be registered.
    pub fn add(&self, session: Session) -> bool {
        self.try_add(session).is_ok()
    }

    /// Look up a session.
    pub fn find(&self, id: &ClientId) -> Option<Arc<Session>> {
        self.read().get(id).cloned()
    }

    /// Run `f` on the session registered under `id` while holding the read
    /// lock, so the session cannot be removed underneath it.
    pub fn with_session<R>(&self, id: &ClientId, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.read().get(id).map(|session| f(session))
    }

    /// Drop the session registered under `id`. Returns whether it existed.
    pub fn remove(&self, id: &ClientId) -> bool {
        self.write().remove(id).is_some()
    }

    /// Remove every id in `ids` under a single write lock. Returns how many
    /// were present.
    pub fn remove_all(&self, ids: &[ClientId]) -> usize {
        let mut map = self.write();
        ids.iter().filter(|id| map.remove(id).is_some()).count()
    }

    /// Visit every session under the read lock.
    ///
    /// `f` must not call back into this registry's write operations.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Session>)) {
        for session in self.read().values() {
            f(session);
        }
    }

    /// Copy out the current set of sessions so callers can act on them
    /// without holding the lock.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.read().values().cloned().collect()
    }

    /// Remove every session, handing them back so the caller can close their
    /// connections.
    pub fn clear(&self) -> Vec<Arc<Session>> {
        self.write().drain().map(|(_, session)| session).collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
