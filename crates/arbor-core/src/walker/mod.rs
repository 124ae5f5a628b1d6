//! Tree walker: the top-level state machine of a workflow session.
//!
//! A walk visits one node at a time:
//! 1. Commit the node as current, clearing its actions' records first when
//!    this is a genuine revisit.
//! 2. Stop with `CancelledBeforeExecution` if cancellation was requested.
//! 3. Evaluate node properties and run the before-visit hook.
//! 4. Dispatch on node type: run actions (Action, Subroutine, Leaf) or nothing
//!    (Selection).
//! 5. Select the next node from the child selectors (not for Leaf).
//! 6. Run the after-visit hook, even when 3–5 failed.
//!
//! The walk ends when a Leaf is reached, a node has no selectors, or an error
//! maps to a terminal status. The walk's cancellation token is always
//! cancelled when the walk concludes.

pub(crate) mod session;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arbor_types::session::{ActionResponse, WalkStatus};
use arbor_types::workflow::{Node, NodeType, WorkflowTree};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::execution::run_node_actions;
use crate::hooks::VisitContext;
use crate::services::EngineServices;
use crate::state::SessionStore;
use crate::subroutine::SubroutineRequest;

use self::session::SessionEnv;

// ---------------------------------------------------------------------------
// Options and outcome
// ---------------------------------------------------------------------------

/// Identity and inputs of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub session_id: String,
    /// Defaults to `session_id`.
    pub root_session_id: Option<String>,
    pub user_context: Value,
    /// Workflow input. Ignored when the store already echoes one (rehydration).
    pub input: Value,
    /// Treat the very first commit of this process as a potential revisit.
    pub force_rerun: bool,
}

impl SessionOptions {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            root_session_id: None,
            user_context: Value::Null,
            input: Value::Null,
            force_rerun: false,
        }
    }

    pub fn with_user_context(mut self, user_context: Value) -> Self {
        self.user_context = user_context;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_force_rerun(mut self, force_rerun: bool) -> Self {
        self.force_rerun = force_rerun;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new(uuid::Uuid::now_v7().to_string())
    }
}

/// How a walk ended.
#[derive(Debug)]
pub struct WalkOutcome {
    pub status: WalkStatus,
    /// Response of the last action that completed in this session.
    pub last_response: Option<ActionResponse>,
    /// The error that ended the walk. `None` for the two completion statuses.
    pub error: Option<EngineError>,
}

// ---------------------------------------------------------------------------
// TreeWalker
// ---------------------------------------------------------------------------

/// Walks one session of a workflow tree.
pub struct TreeWalker {
    env: Arc<SessionEnv>,
    cancellation: CancellationToken,
    status: Mutex<WalkStatus>,
    /// Set once the first node of this process instance has been committed.
    rehydrated: AtomicBool,
    force_rerun: bool,
}

impl TreeWalker {
    /// Open (or rehydrate) a root session.
    pub async fn open(
        tree: Arc<WorkflowTree>,
        services: EngineServices,
        options: SessionOptions,
    ) -> Result<Self, EngineError> {
        let store = SessionStore::new(services.backend.clone(), &options.session_id);
        let root_session_id = options
            .root_session_id
            .clone()
            .unwrap_or_else(|| options.session_id.clone());
        Self::assemble(
            tree,
            services,
            store,
            options.session_id,
            root_session_id,
            options.user_context,
            options.input,
            0,
            CancellationToken::new(),
            options.force_rerun,
        )
        .await
    }

    /// Open (or rehydrate) a nested session on behalf of a subroutine action.
    pub async fn open_nested(
        tree: Arc<WorkflowTree>,
        request: SubroutineRequest,
    ) -> Result<Self, EngineError> {
        Self::assemble(
            tree,
            request.services,
            request.store,
            request.nested_session_id,
            request.root_session_id,
            request.user_context,
            request.input,
            request.depth,
            request.cancellation,
            false,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn assemble(
        tree: Arc<WorkflowTree>,
        services: EngineServices,
        store: SessionStore,
        session_id: String,
        root_session_id: String,
        user_context: Value,
        input: Value,
        depth: u32,
        cancellation: CancellationToken,
        force_rerun: bool,
    ) -> Result<Self, EngineError> {
        let input = match store.tree_input().await? {
            Some(echoed) => {
                tracing::debug!(session_id = %session_id, "rehydrating session input");
                echoed
            }
            None => {
                store.set_tree_input(&input).await?;
                input
            }
        };

        Ok(Self {
            env: Arc::new(SessionEnv {
                tree,
                services,
                store,
                session_id,
                root_session_id,
                user_context,
                input,
                depth,
            }),
            cancellation,
            status: Mutex::new(WalkStatus::Initialized),
            rehydrated: AtomicBool::new(false),
            force_rerun,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.env.session_id
    }

    pub fn root_session_id(&self) -> &str {
        &self.env.root_session_id
    }

    pub fn store(&self) -> &SessionStore {
        &self.env.store
    }

    pub fn tree(&self) -> &WorkflowTree {
        &self.env.tree
    }

    pub fn status(&self) -> WalkStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: WalkStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Request cancellation of the walk and everything it spawned.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    // -----------------------------------------------------------------------
    // Walking
    // -----------------------------------------------------------------------

    /// Resume at the persisted current node, or start at the root.
    pub async fn resume(&self) -> WalkOutcome {
        match self.env.store.current_node().await {
            Ok(Some(node_key)) => self.walk_tree(&node_key).await,
            Ok(None) => self.walk_tree(&self.env.tree.root_node_key).await,
            Err(e) => self.conclude(Err(e.into())).await,
        }
    }

    /// Walk from `start` until the tree reaches a terminal outcome.
    pub async fn walk_tree(&self, start: &str) -> WalkOutcome {
        tracing::info!(
            session_id = %self.env.session_id,
            workflow = %self.env.tree.name,
            start,
            "starting walk"
        );
        self.set_status(WalkStatus::Running);

        let mut current = start.to_string();
        let result = loop {
            match self.visit_node(&current).await {
                Ok(Some(next)) => current = next,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.conclude(result).await
    }

    async fn conclude(&self, result: Result<(), EngineError>) -> WalkOutcome {
        let (status, error) = match result {
            Ok(()) => (WalkStatus::RanToCompletion, None),
            Err(EngineError::NoChildMatched(node_key)) => {
                tracing::debug!(node_key = %node_key, "no child matched, walk complete");
                (WalkStatus::RanToCompletionNoChildMatched, None)
            }
            Err(e) => (e.status(), Some(e)),
        };

        // Every descendant task observes shutdown once the walk is over.
        self.cancellation.cancel();
        self.set_status(status);

        let last_response = match self.last_response().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read last action response");
                None
            }
        };

        match &error {
            Some(e) => tracing::info!(
                session_id = %self.env.session_id,
                status = %status,
                error = %e,
                "walk finished"
            ),
            None => tracing::info!(
                session_id = %self.env.session_id,
                status = %status,
                "walk finished"
            ),
        }

        WalkOutcome {
            status,
            last_response,
            error,
        }
    }

    async fn last_response(&self) -> Result<Option<ActionResponse>, EngineError> {
        match self.env.store.last_completed_action().await? {
            Some(action_key) => Ok(self.env.store.response(&action_key).await?),
            None => Ok(None),
        }
    }

    /// Visit a single node and return the key of the next node, if any.
    pub async fn visit_node(&self, node_key: &str) -> Result<Option<String>, EngineError> {
        let node = self
            .env
            .tree
            .node(node_key)
            .ok_or_else(|| EngineError::NodeNotFound(node_key.to_string()))?;

        self.commit_current(node_key, node).await?;

        if self.cancellation.is_cancelled() {
            return Err(EngineError::CancelledBeforeExecution(node_key.to_string()));
        }

        let properties = match &node.properties {
            Some(raw) => {
                let scope = self.env.scope(&self.cancellation).await?;
                self.env
                    .services
                    .evaluator
                    .evaluate(raw, None, &scope)
                    .await
                    .map_err(|e| {
                        EngineError::evaluation(format!("properties of node '{node_key}'"), e)
                    })?
            }
            None => Value::Null,
        };

        let visit = VisitContext {
            session_id: self.env.session_id.clone(),
            root_session_id: self.env.root_session_id.clone(),
            workflow_name: self.env.tree.name.clone(),
            node_key: node_key.to_string(),
            properties,
            user_context: self.env.user_context.clone(),
            cancellation: self.cancellation.clone(),
        };

        let result = self.run_visit(node_key, node, &visit).await;
        let after = self
            .env
            .services
            .hooks
            .after_visit(&visit, result.as_ref().err())
            .await;

        match (result, after) {
            (Ok(next), Ok(())) => Ok(next),
            (Ok(_), Err(source)) => Err(EngineError::Hook {
                hook: "after-visit",
                node_key: node_key.to_string(),
                source,
            }),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(hook_error)) => {
                tracing::warn!(
                    node_key,
                    error = %hook_error,
                    "after-visit hook failed after the visit already failed"
                );
                Err(e)
            }
        }
    }

    async fn run_visit(
        &self,
        node_key: &str,
        node: &Node,
        visit: &VisitContext,
    ) -> Result<Option<String>, EngineError> {
        let directive = self
            .env
            .services
            .hooks
            .before_visit(visit)
            .await
            .map_err(|source| EngineError::Hook {
                hook: "before-visit",
                node_key: node_key.to_string(),
                source,
            })?;

        match node.node_type {
            NodeType::Leaf => {
                if node.actions.len() > 1 {
                    return Err(EngineError::invariant(
                        node_key,
                        "a Leaf node declares at most one action",
                    ));
                }
                self.run_actions(node_key, node, directive.skip_actions)
                    .await?;
                return Ok(None);
            }
            NodeType::Action => {
                if node.subroutine_action_count() > 0 {
                    return Err(EngineError::invariant(
                        node_key,
                        "an Action node cannot declare a subroutine action",
                    ));
                }
                self.run_actions(node_key, node, directive.skip_actions)
                    .await?;
            }
            NodeType::Subroutine => {
                if node.subroutine_action_count() == 0 {
                    return Err(EngineError::invariant(
                        node_key,
                        "a Subroutine node declares at least one subroutine action",
                    ));
                }
                self.run_actions(node_key, node, directive.skip_actions)
                    .await?;
            }
            NodeType::Selection => {
                if !node.actions.is_empty() {
                    tracing::debug!(node_key, "ignoring actions declared on a Selection node");
                }
            }
        }

        self.select_child(node_key, node).await
    }

    async fn run_actions(
        &self,
        node_key: &str,
        node: &Node,
        skip: bool,
    ) -> Result<(), EngineError> {
        if skip {
            tracing::debug!(node_key, "before-visit hook skipped the node's actions");
            return Ok(());
        }
        run_node_actions(&self.env, node_key, node, &self.cancellation).await
    }

    /// First selector whose condition holds wins.
    ///
    /// The session facade is only read once a selector has a condition.
    async fn select_child(&self, node_key: &str, node: &Node) -> Result<Option<String>, EngineError> {
        if node.child_selector.is_empty() {
            return Ok(None);
        }

        let mut cached = None;
        for (index, selector) in node.child_selector.iter().enumerate() {
            if !selector.is_unconditional() {
                let scope = match cached.take() {
                    Some(scope) => scope,
                    None => self.env.scope(&self.cancellation).await?,
                };
                let selected = self
                    .env
                    .services
                    .evaluator
                    .evaluate_condition(selector.should_select.as_ref(), &scope)
                    .await
                    .map_err(|e| {
                        EngineError::evaluation(
                            format!("child selector {index} of node '{node_key}'"),
                            e,
                        )
                    })?;
                cached = Some(scope);
                if !selected {
                    continue;
                }
            }
            if self.env.tree.node(&selector.child).is_none() {
                return Err(EngineError::NodeNotFound(selector.child.clone()));
            }
            tracing::debug!(
                node_key,
                child = %selector.child,
                label = selector.label.as_deref().unwrap_or(""),
                "child selected"
            );
            return Ok(Some(selector.child.clone()));
        }

        Err(EngineError::NoChildMatched(node_key.to_string()))
    }

    /// Persist `node_key` as current, resetting its actions on a genuine revisit.
    async fn commit_current(&self, node_key: &str, node: &Node) -> Result<(), EngineError> {
        let first_commit = !self.rehydrated.swap(true, Ordering::SeqCst);
        let revisit_possible = !first_commit || self.force_rerun;

        if revisit_possible && !node.actions.is_empty() {
            let action_keys: Vec<String> = node.actions.keys().map(str::to_string).collect();
            let mut all_responded = true;
            for action_key in &action_keys {
                if self.env.store.response(action_key).await?.is_none() {
                    all_responded = false;
                    break;
                }
            }
            if all_responded {
                tracing::debug!(node_key, "revisiting node, moving responses to previous");
                self.env.store.reset_for_revisit(&action_keys).await?;
            }
        }

        self.env.store.set_current_node(node_key).await?;
        tracing::debug!(
            session_id = %self.env.session_id,
            node_key,
            first_commit,
            "committed current node"
        );
        Ok(())
    }
}
