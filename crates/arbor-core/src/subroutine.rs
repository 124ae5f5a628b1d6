//! Subroutine composition: running a nested workflow session as one action.
//!
//! The walker obtains nested walkers from a [`SubroutineProvider`]. The
//! default provider is a [`WorkflowCatalog`] of named trees.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use arbor_types::workflow::WorkflowTree;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::services::EngineServices;
use crate::state::SessionStore;
use crate::walker::TreeWalker;

/// Everything needed to open a nested session.
pub struct SubroutineRequest {
    /// Catalog name of the nested workflow.
    pub workflow: String,
    /// Stable id of the nested session, persisted by the invoking action.
    pub nested_session_id: String,
    pub root_session_id: String,
    /// Store already rescoped to the nested session.
    pub store: SessionStore,
    pub services: EngineServices,
    pub user_context: Value,
    pub input: Value,
    /// Nesting depth of the session being opened (root is 0).
    pub depth: u32,
    pub cancellation: CancellationToken,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// External collaborator that hands out initialized nested walkers.
pub trait SubroutineProvider: Send + Sync {
    fn open(&self, request: SubroutineRequest) -> BoxFuture<'_, Result<TreeWalker, EngineError>>;
}

// ---------------------------------------------------------------------------
// WorkflowCatalog
// ---------------------------------------------------------------------------

/// Named workflow trees available to subroutine actions.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: HashMap<String, Arc<WorkflowTree>>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tree under its own name, replacing an existing entry.
    pub fn insert(&mut self, tree: WorkflowTree) {
        if let Some(previous) = self.workflows.insert(tree.name.clone(), Arc::new(tree)) {
            tracing::warn!(workflow = %previous.name, "replaced workflow in catalog");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowTree>> {
        self.workflows.get(name).cloned()
    }

    /// Catalog names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

impl SubroutineProvider for WorkflowCatalog {
    fn open(&self, request: SubroutineRequest) -> BoxFuture<'_, Result<TreeWalker, EngineError>> {
        Box::pin(async move {
            let tree = self
                .get(&request.workflow)
                .ok_or_else(|| EngineError::UnknownWorkflow(request.workflow.clone()))?;
            TreeWalker::open_nested(tree, request).await
        })
    }
}
