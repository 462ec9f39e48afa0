use crate::error::BoxError;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Storage for session values keyed by session id.
pub trait SessionStore: Send + Sync {
    /// The stored value.
    type Value;

    /// Returns the value of `id`, or `None` if there is no such session.
    fn get_session(&self, id: &str) -> Result<Option<Self::Value>, BoxError>;

    /// Stores `value` under `id`, replacing any previous value.
    fn set_session(&self, id: &str, value: Self::Value) -> Result<(), BoxError>;

    /// Removes `id`. Removing a missing session is not an error.
    fn del_session(&self, id: &str) -> Result<(), BoxError>;
}

/// A [`SessionStore`] held in process memory.
#[derive(Debug)]
pub struct MemorySession<V> {
    store: RwLock<HashMap<String, V>>,
}

impl<V> MemorySession<V> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of sessions.
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Returns whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

impl<V> Default for MemorySession<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SessionStore for MemorySession<V>
where
    V: Clone + Send + Sync,
{
    type Value = V;

    fn get_session(&self, id: &str) -> Result<Option<V>, BoxError> {
        Ok(self.store.read().get(id).cloned())
    }

    fn set_session(&self, id: &str, value: V) -> Result<(), BoxError> {
        self.store.write().insert(id.to_owned(), value);
        Ok(())
    }

    fn del_session(&self, id: &str) -> Result<(), BoxError> {
        self.store.write().remove(id);
        Ok(())
    }
}
