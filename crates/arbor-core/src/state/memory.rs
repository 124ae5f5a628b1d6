//! In-memory state store.

use std::collections::BTreeMap;

use arbor_types::error::StateError;
use serde_json::Value;
use tokio::sync::RwLock;

use super::StateStore;

/// In-memory state store backed by a `BTreeMap` protected by `RwLock`.
///
/// Batched writes take the write lock once, so readers never observe half of a
/// `set_many`. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StateError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Value)]) -> Result<(), StateError> {
        let mut guard = self.entries.write().await;
        for (key, value) in entries {
            guard.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), StateError> {
        let mut guard = self.entries.write().await;
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StateError> {
        let guard = self.entries.read().await;
        Ok(guard
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryStateStore::new();
        store.set("s1/Counter", &json!(42)).await.unwrap();
        assert_eq!(store.get("s1/Counter").await.unwrap(), Some(json!(42)));
        assert_eq!(store.get("s1/Missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_many_then_remove_many() {
        let store = MemoryStateStore::new();
        store
            .set_many(&[
                ("s1/A".to_string(), json!(1)),
                ("s1/B".to_string(), json!(2)),
                ("s2/A".to_string(), json!(3)),
            ])
            .await
            .unwrap();

        store
            .remove_many(&["s1/A".to_string(), "s1/Nope".to_string()])
            .await
            .unwrap();

        assert_eq!(store.get("s1/A").await.unwrap(), None);
        assert_eq!(store.get("s1/B").await.unwrap(), Some(json!(2)));
        assert_eq!(store.get("s2/A").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_list_prefix_is_ordered_and_scoped() {
        let store = MemoryStateStore::new();
        store.set("s1/b", &json!("b")).await.unwrap();
        store.set("s1/a", &json!("a")).await.unwrap();
        store.set("s10/a", &json!("other")).await.unwrap();

        let entries = store.list_prefix("s1/").await.unwrap();
        assert_eq!(
            entries,
            vec![
                ("s1/a".to_string(), json!("a")),
                ("s1/b".to_string(), json!("b")),
            ]
        );
    }
}
