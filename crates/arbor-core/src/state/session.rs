//! Session-scoped view over a [`BoxStateStore`].

use arbor_types::constants::{
    KEY_ACTIONS, KEY_CURRENT_NODE, KEY_INTERMEDIATES, KEY_LAST_COMPLETED_ACTION,
    KEY_PREVIOUS_RESPONSE, KEY_RESPONSE, KEY_SEPARATOR, KEY_TREE_INPUT,
};
use arbor_types::error::StateError;
use arbor_types::session::ActionResponse;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::BoxStateStore;

/// A state store handle whose keys are transparently prefixed by a scope.
///
/// The scope of a root session is its session id. A nested session's scope is
/// `{parent scope}/{nested id}`, so a subroutine never shares keys with the
/// session that invoked it.
#[derive(Debug, Clone)]
pub struct SessionStore {
    backend: BoxStateStore,
    scope: String,
}

impl SessionStore {
    pub fn new(backend: BoxStateStore, session_id: &str) -> Self {
        Self {
            backend,
            scope: session_id.to_string(),
        }
    }

    /// Derive the store of a nested session running under this one.
    pub fn nested(&self, nested_id: &str) -> Self {
        Self {
            backend: self.backend.clone(),
            scope: format!("{}{KEY_SEPARATOR}{nested_id}", self.scope),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn backend(&self) -> &BoxStateStore {
        &self.backend
    }

    fn key(&self, relative: &str) -> String {
        format!("{}{KEY_SEPARATOR}{relative}", self.scope)
    }

    fn action_key(&self, action_key: &str, record: &str) -> String {
        self.key(&format!(
            "{KEY_ACTIONS}{KEY_SEPARATOR}{action_key}{KEY_SEPARATOR}{record}"
        ))
    }

    // -----------------------------------------------------------------------
    // Generic typed access
    // -----------------------------------------------------------------------

    async fn read<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>, StateError> {
        match self.backend.get(&key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StateError::Deserialization {
                    key,
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn encode<T: Serialize>(key: String, value: &T) -> Result<(String, Value), StateError> {
        let value = serde_json::to_value(value).map_err(|e| StateError::Serialization {
            key: key.clone(),
            message: e.to_string(),
        })?;
        Ok((key, value))
    }

    // -----------------------------------------------------------------------
    // Walk bookkeeping
    // -----------------------------------------------------------------------

    pub async fn current_node(&self) -> Result<Option<String>, StateError> {
        self.read(self.key(KEY_CURRENT_NODE)).await
    }

    pub async fn set_current_node(&self, node_key: &str) -> Result<(), StateError> {
        self.backend
            .set(&self.key(KEY_CURRENT_NODE), &Value::String(node_key.to_string()))
            .await
    }

    pub async fn last_completed_action(&self) -> Result<Option<String>, StateError> {
        self.read(self.key(KEY_LAST_COMPLETED_ACTION)).await
    }

    pub async fn tree_input(&self) -> Result<Option<Value>, StateError> {
        self.backend.get(&self.key(KEY_TREE_INPUT)).await
    }

    pub async fn set_tree_input(&self, input: &Value) -> Result<(), StateError> {
        self.backend.set(&self.key(KEY_TREE_INPUT), input).await
    }

    // -----------------------------------------------------------------------
    // Per-action records
    // -----------------------------------------------------------------------

    pub async fn response(&self, action_key: &str) -> Result<Option<ActionResponse>, StateError> {
        self.read(self.action_key(action_key, KEY_RESPONSE)).await
    }

    pub async fn previous_response(
        &self,
        action_key: &str,
    ) -> Result<Option<ActionResponse>, StateError> {
        self.read(self.action_key(action_key, KEY_PREVIOUS_RESPONSE))
            .await
    }

    pub async fn intermediates(&self, action_key: &str) -> Result<Option<Value>, StateError> {
        self.backend
            .get(&self.action_key(action_key, KEY_INTERMEDIATES))
            .await
    }

    pub async fn set_intermediates(&self, action_key: &str, value: &Value) -> Result<(), StateError> {
        self.backend
            .set(&self.action_key(action_key, KEY_INTERMEDIATES), value)
            .await
    }

    /// Persist an action's response and the last-completed marker as one batch.
    pub async fn commit_response(
        &self,
        action_key: &str,
        response: &ActionResponse,
    ) -> Result<(), StateError> {
        let entries = vec![
            Self::encode(self.action_key(action_key, KEY_RESPONSE), response)?,
            (
                self.key(KEY_LAST_COMPLETED_ACTION),
                Value::String(action_key.to_string()),
            ),
        ];
        self.backend.set_many(&entries).await
    }

    /// Move each action's response into its previous-response slot and clear
    /// the response and intermediates so the actions run again.
    pub async fn reset_for_revisit(&self, action_keys: &[String]) -> Result<(), StateError> {
        let mut carried = Vec::with_capacity(action_keys.len());
        let mut cleared = Vec::with_capacity(action_keys.len() * 2);
        for action_key in action_keys {
            let response_key = self.action_key(action_key, KEY_RESPONSE);
            if let Some(response) = self.backend.get(&response_key).await? {
                carried.push((self.action_key(action_key, KEY_PREVIOUS_RESPONSE), response));
            }
            cleared.push(response_key);
            cleared.push(self.action_key(action_key, KEY_INTERMEDIATES));
        }

        if !carried.is_empty() {
            self.backend.set_many(&carried).await?;
        }
        self.backend.remove_many(&cleared).await
    }

    /// Every persisted action response of this scope, keyed by action key.
    ///
    /// One prefix scan over the scope's `Actions/` namespace; intermediates,
    /// previous responses and nested scopes are skipped.
    pub async fn responses(&self) -> Result<Map<String, Value>, StateError> {
        let prefix = self.key(&format!("{KEY_ACTIONS}{KEY_SEPARATOR}"));
        let suffix = format!("{KEY_SEPARATOR}{KEY_RESPONSE}");
        let entries = self.backend.list_prefix(&prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| {
                let action_key = key[prefix.len()..].strip_suffix(suffix.as_str())?;
                (!action_key.contains(KEY_SEPARATOR)).then(|| (action_key.to_string(), value))
            })
            .collect())
    }

    /// Every persisted entry of this scope (nested scopes included), with the
    /// scope prefix stripped.
    pub async fn entries(&self) -> Result<Vec<(String, Value)>, StateError> {
        let prefix = format!("{}{KEY_SEPARATOR}", self.scope);
        let entries = self.backend.list_prefix(&prefix).await?;
        Ok(entries
            .into_iter()
            .map(|(k, v)| (k[prefix.len()..].to_string(), v))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use crate::state::memory::MemoryStateStore;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> SessionStore {
        SessionStore::new(BoxStateStore::new(MemoryStateStore::new()), "s1")
    }

    #[tokio::test]
    async fn commit_response_writes_response_and_marker() {
        let session = store();
        let response = ActionResponse::success(json!({"Count": 1}));
        session.commit_response("Probe", &response).await.unwrap();

        assert_eq!(session.response("Probe").await.unwrap(), Some(response));
        assert_eq!(
            session.last_completed_action().await.unwrap().as_deref(),
            Some("Probe")
        );
    }

    #[tokio::test]
    async fn reset_for_revisit_moves_response_to_previous() {
        let session = store();
        let response = ActionResponse::success(json!(7));
        session.commit_response("Probe", &response).await.unwrap();
        session
            .set_intermediates("Probe", &json!({"Attempts": 2}))
            .await
            .unwrap();

        session
            .reset_for_revisit(&["Probe".to_string()])
            .await
            .unwrap();

        assert_eq!(session.response("Probe").await.unwrap(), None);
        assert_eq!(session.intermediates("Probe").await.unwrap(), None);
        assert_eq!(
            session.previous_response("Probe").await.unwrap(),
            Some(response)
        );
    }

    /// Counts reads so tests can assert how a view hits the backend.
    #[derive(Default)]
    struct Reads {
        gets: AtomicUsize,
        scans: AtomicUsize,
    }

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStateStore,
        reads: Arc<Reads>,
    }

    impl StateStore for CountingStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, StateError> {
            self.reads.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &Value) -> Result<(), StateError> {
            self.inner.set(key, value).await
        }

        async fn set_many(&self, entries: &[(String, Value)]) -> Result<(), StateError> {
            self.inner.set_many(entries).await
        }

        async fn remove_many(&self, keys: &[String]) -> Result<(), StateError> {
            self.inner.remove_many(keys).await
        }

        async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StateError> {
            self.reads.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.list_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn responses_come_from_one_scan() {
        let counting = CountingStore::default();
        let reads = Arc::clone(&counting.reads);
        let session = SessionStore::new(BoxStateStore::new(counting), "s1");
        let first = ActionResponse::success(json!({"Count": 1}));
        let second = ActionResponse::new(3, "Failed", json!("boom"));
        session.commit_response("Lookup", &first).await.unwrap();
        session.commit_response("Restart", &second).await.unwrap();
        session
            .set_intermediates("Lookup", &json!({"Attempts": 2}))
            .await
            .unwrap();
        session
            .nested("n1")
            .commit_response("Inner", &first)
            .await
            .unwrap();
        let gets_before = reads.gets.load(Ordering::SeqCst);

        let responses = session.responses().await.unwrap();

        assert_eq!(reads.scans.load(Ordering::SeqCst), 1);
        assert_eq!(reads.gets.load(Ordering::SeqCst), gets_before);
        assert_eq!(
            responses.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["Lookup", "Restart"]
        );
        assert_eq!(responses["Lookup"], serde_json::to_value(&first).unwrap());
        assert_eq!(responses["Restart"], serde_json::to_value(&second).unwrap());
    }

    #[tokio::test]
    async fn nested_scope_does_not_collide_with_parent() {
        let parent = store();
        let child = parent.nested("n1");
        parent.set_current_node("Root").await.unwrap();
        child.set_current_node("Inner").await.unwrap();

        assert_eq!(parent.current_node().await.unwrap().as_deref(), Some("Root"));
        assert_eq!(child.current_node().await.unwrap().as_deref(), Some("Inner"));
        assert_eq!(child.scope(), "s1/n1");
    }

    #[tokio::test]
    async fn entries_strip_scope_prefix() {
        let session = store();
        session.set_tree_input(&json!({"Host": "a"})).await.unwrap();
        let entries = session.entries().await.unwrap();
        assert_eq!(entries, vec![("TreeInput".to_string(), json!({"Host": "a"}))]);
    }
}
