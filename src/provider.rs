//! Shared provider state with scoped edit/read access
//!
//! The analysis thread mutates a provider while query threads read it.
//! Each provider sits behind a reader-writer lock: [`Provider::edit`] hands
//! out an exclusive [`EditScope`], [`Provider::read`] a shared
//! [`ReadScope`]. Releasing happens when the guard drops, so every exit
//! path (early return, `?`, panic unwind) gives the lock back.
//!
//! The analysis thread takes one edit scope per event and never holds it
//! across events or I/O.

use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader-writer wrapper around one provider's state
#[derive(Debug, Default)]
pub struct Provider<T> {
    state: RwLock<T>,
}

/// Providers are shared between the analysis thread and query threads
pub type SharedProvider<T> = Arc<Provider<T>>;

impl<T> Provider<T> {
    pub fn new(state: T) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn shared(state: T) -> SharedProvider<T> {
        Arc::new(Self::new(state))
    }

    /// Exclusive access; blocks until every read scope is released
    pub fn edit(&self) -> EditScope<'_, T> {
        EditScope(self.state.write())
    }

    /// Shared access; blocks while an edit scope is open
    pub fn read(&self) -> ReadScope<'_, T> {
        ReadScope(self.state.read())
    }

    /// Shared access without waiting; `None` while an edit scope is open
    pub fn try_read(&self) -> Option<ReadScope<'_, T>> {
        self.state.try_read().map(ReadScope)
    }

    pub fn into_inner(self) -> T {
        self.state.into_inner()
    }
}

/// Exclusive mutation window over a provider
pub struct EditScope<'a, T>(RwLockWriteGuard<'a, T>);

impl<T> Deref for EditScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for EditScope<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Shared read-only window over a provider
pub struct ReadScope<'a, T>(RwLockReadGuard<'a, T>);

impl<T> Deref for ReadScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Well-known keys under which a session publishes its providers
pub mod keys {
    pub const ALLOCATIONS: &str = "rastro.allocations";
    pub const COUNTERS: &str = "rastro.counters";
    pub const STATS: &str = "rastro.stats";
}

/// Name-keyed lookup of the providers a session created
///
/// # Example
/// ```
/// use rastro::provider::{Provider, ProviderRegistry};
///
/// let mut registry = ProviderRegistry::default();
/// registry.register("demo.numbers", Provider::shared(vec![1u32, 2, 3]));
///
/// let numbers = registry.get::<Provider<Vec<u32>>>("demo.numbers").unwrap();
/// assert_eq!(numbers.read().len(), 3);
/// assert!(registry.get::<Provider<String>>("demo.numbers").is_none());
/// ```
#[derive(Default)]
pub struct ProviderRegistry {
    entries: FnvHashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ProviderRegistry {
    /// Publish `provider` under `key`, replacing any previous entry
    pub fn register<T: Any + Send + Sync>(&mut self, key: &str, provider: Arc<T>) {
        if self.entries.insert(key.to_string(), provider).is_some() {
            tracing::debug!(key, "provider key re-registered");
        }
    }

    /// Look up a provider by key and concrete type
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries.get(key)?.clone().downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
