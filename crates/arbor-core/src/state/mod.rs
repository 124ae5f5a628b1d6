//! Session state store port.
//!
//! `StateStore` is the keyed persistence interface the engine consumes. The
//! concrete backend is chosen by the host (in-memory here, SQLite in
//! arbor-infra). `SessionStore` scopes every key by a session-derived prefix so
//! nested sessions never collide with their parents.

pub mod memory;
pub mod session;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arbor_types::error::StateError;
use serde_json::Value;

pub use memory::MemoryStateStore;
pub use session::SessionStore;

/// Keyed JSON persistence used by the walker.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// `set_many` and `remove_many` are one logical write each.
pub trait StateStore: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Value>, StateError>> + Send;

    /// Set a value for a key (upsert).
    fn set(&self, key: &str, value: &Value) -> impl Future<Output = Result<(), StateError>> + Send;

    /// Upsert several keys as one batch.
    fn set_many(
        &self,
        entries: &[(String, Value)],
    ) -> impl Future<Output = Result<(), StateError>> + Send;

    /// Delete several keys as one batch. Missing keys are ignored.
    fn remove_many(&self, keys: &[String]) -> impl Future<Output = Result<(), StateError>> + Send;

    /// All entries whose key starts with `prefix`, ordered by key.
    fn list_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<(String, Value)>, StateError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`StateStore`] with boxed futures.
pub trait StateStoreDyn: Send + Sync {
    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StateError>>;

    fn set_boxed<'a>(&'a self, key: &'a str, value: &'a Value)
    -> BoxFuture<'a, Result<(), StateError>>;

    fn set_many_boxed<'a>(
        &'a self,
        entries: &'a [(String, Value)],
    ) -> BoxFuture<'a, Result<(), StateError>>;

    fn remove_many_boxed<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<(), StateError>>;

    fn list_prefix_boxed<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(String, Value)>, StateError>>;
}

impl<T: StateStore> StateStoreDyn for T {
    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StateError>> {
        Box::pin(self.get(key))
    }

    fn set_boxed<'a>(
        &'a self,
        key: &'a str,
        value: &'a Value,
    ) -> BoxFuture<'a, Result<(), StateError>> {
        Box::pin(self.set(key, value))
    }

    fn set_many_boxed<'a>(
        &'a self,
        entries: &'a [(String, Value)],
    ) -> BoxFuture<'a, Result<(), StateError>> {
        Box::pin(self.set_many(entries))
    }

    fn remove_many_boxed<'a>(&'a self, keys: &'a [String]) -> BoxFuture<'a, Result<(), StateError>> {
        Box::pin(self.remove_many(keys))
    }

    fn list_prefix_boxed<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<Vec<(String, Value)>, StateError>> {
        Box::pin(self.list_prefix(prefix))
    }
}

/// Type-erased, cheaply cloneable state store handle.
///
/// Since `StateStore` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxStateStore` exposes the same methods over `StateStoreDyn`.
#[derive(Clone)]
pub struct BoxStateStore {
    inner: Arc<dyn StateStoreDyn>,
}

impl BoxStateStore {
    /// Wrap a concrete `StateStore` in a type-erased handle.
    pub fn new<T: StateStore + 'static>(store: T) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        self.inner.get_boxed(key).await
    }

    pub async fn set(&self, key: &str, value: &Value) -> Result<(), StateError> {
        self.inner.set_boxed(key, value).await
    }

    pub async fn set_many(&self, entries: &[(String, Value)]) -> Result<(), StateError> {
        self.inner.set_many_boxed(entries).await
    }

    pub async fn remove_many(&self, keys: &[String]) -> Result<(), StateError> {
        self.inner.remove_many_boxed(keys).await
    }

    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StateError> {
        self.inner.list_prefix_boxed(prefix).await
    }
}

impl std::fmt::Debug for BoxStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStateStore").finish_non_exhaustive()
    }
}
