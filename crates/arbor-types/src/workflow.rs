//! Workflow schema types for Arbor.
//!
//! Defines the in-memory representation of a workflow document: a keyed tree of
//! nodes, each with optional dynamic properties, declared actions, and ordered
//! child selectors. The tree is loaded once per session and never mutated.
//!
//! Dynamic values (properties, inputs, timeouts, selector conditions) are kept as
//! raw `serde_json::Value` and resolved at walk time by the property evaluator.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use schemars::JsonSchema;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::constants::SUBROUTINE_ACTION_TYPE;

// ---------------------------------------------------------------------------
// Workflow Tree
// ---------------------------------------------------------------------------

/// A complete workflow document.
///
/// Node keys are unique (enforced by the map). The tree is immutable once a
/// session has been constructed around it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowTree {
    /// Workflow name, reported to lifecycle hooks and used as the catalog key.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Key of the node the walk starts from when no other start is given.
    pub root_node_key: String,
    /// All nodes in the tree, keyed by node key.
    pub nodes: HashMap<String, Node>,
}

impl WorkflowTree {
    /// Look up a node by key.
    pub fn node(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    /// Every action key declared anywhere in the tree.
    ///
    /// Used to build the session facade that expressions read prior outputs from.
    pub fn action_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .nodes
            .values()
            .flat_map(|node| node.actions.keys().map(str::to_string))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// The kind of node, which decides what happens when the walker visits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum NodeType {
    /// Pure routing: no actions, only child selection.
    Selection,
    /// Runs its actions concurrently, then selects a child.
    Action,
    /// Terminal node: runs an optional single summary action and stops.
    Leaf,
    /// Runs a nested workflow session through a subroutine action.
    Subroutine,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Selection => write!(f, "Selection"),
            NodeType::Action => write!(f, "Action"),
            NodeType::Leaf => write!(f, "Leaf"),
            NodeType::Subroutine => write!(f, "Subroutine"),
        }
    }
}

/// A single node of the workflow tree.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    #[serde(rename = "Type")]
    pub node_type: NodeType,
    /// Dynamic properties handed to the lifecycle hooks once evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    /// Ordered child selectors. First selector whose condition holds wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_selector: Vec<ChildSelector>,
    /// Declared actions in document order. They run concurrently.
    #[serde(default, skip_serializing_if = "ActionMap::is_empty")]
    #[schemars(with = "BTreeMap<String, ActionSpec>")]
    pub actions: ActionMap,
    /// Dynamic node-level deadline in milliseconds (absent = no deadline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Value>,
}

impl Node {
    /// Number of declared actions whose type is the subroutine composition action.
    pub fn subroutine_action_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|(_, spec)| spec.action_type == SUBROUTINE_ACTION_TYPE)
            .count()
    }
}

/// A conditionally-guarded edge to the next node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ChildSelector {
    /// Boolean condition. Empty or absent means "always".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_select: Option<Value>,
    /// Key of the child node to visit next.
    pub child: String,
    /// Optional human-readable label for logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ChildSelector {
    /// Whether this selector has no condition at all.
    pub fn is_unconditional(&self) -> bool {
        match &self.should_select {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// One declared unit of work inside a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct ActionSpec {
    /// Registered action implementation name.
    #[serde(rename = "Type")]
    pub action_type: String,
    /// Dynamic input, evaluated against the implementation's declared input type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Dynamic free-form properties passed through to the implementation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    /// Dynamic per-action deadline in milliseconds (absent = no deadline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Value>,
    /// Absorb a deadline hit as a synthetic `TimeoutOnAction` response.
    #[serde(default)]
    pub continuation_on_timeout: bool,
    /// Absorb retry exhaustion as a synthetic `RetryExhaustedOnAction` response.
    #[serde(default)]
    pub continuation_on_retry_exhaustion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

/// Insertion-ordered mapping of action key to action spec.
///
/// Keys are unique; a duplicate key in the document is a parse error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionMap(Vec<(String, ActionSpec)>);

impl ActionMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, spec: ActionSpec) {
        let key = key.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = spec;
        } else {
            self.0.push((key, spec));
        }
    }

    pub fn get(&self, key: &str) -> Option<&ActionSpec> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ActionSpec)> {
        self.0.iter().map(|(k, spec)| (k.as_str(), spec))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ActionSpec)> for ActionMap {
    fn from_iter<I: IntoIterator<Item = (String, ActionSpec)>>(iter: I) -> Self {
        let mut map = ActionMap::new();
        for (key, spec) in iter {
            map.insert(key, spec);
        }
        map
    }
}

impl Serialize for ActionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl<'de> Deserialize<'de> for ActionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ActionMapVisitor;

        impl<'de> Visitor<'de> for ActionMapVisitor {
            type Value = ActionMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of action key to action spec")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ActionMap, A::Error> {
                let mut entries: Vec<(String, ActionSpec)> = Vec::new();
                while let Some((key, spec)) = access.next_entry::<String, ActionSpec>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate action key '{key}'"
                        )));
                    }
                    entries.push((key, spec));
                }
                Ok(ActionMap(entries))
            }
        }

        deserializer.deserialize_map(ActionMapVisitor)
    }
}

// ---------------------------------------------------------------------------
// Retry Policy
// ---------------------------------------------------------------------------

/// Retry behaviour for a single action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct RetryPolicy {
    #[serde(rename = "Type", default)]
    pub policy_type: RetryPolicyType,
    #[serde(default)]
    pub min_backoff_ms: u64,
    #[serde(default)]
    pub max_backoff_ms: u64,
    /// Only meaningful for `FixedCount`.
    #[serde(default)]
    pub max_retry_count: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            policy_type: RetryPolicyType::None,
            min_backoff_ms: 0,
            max_backoff_ms: 0,
            max_retry_count: 0,
        }
    }
}

/// How retries are scheduled after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
pub enum RetryPolicyType {
    /// No retry: the first failure exhausts the action.
    #[default]
    None,
    /// Constant `MinBackoffMs` between attempts until the deadline.
    FixedInterval,
    /// Doubling wait capped at `MaxBackoffMs` until the deadline.
    ExponentialBackoff,
    /// Constant `MinBackoffMs` between attempts, at most `MaxRetryCount` retries.
    FixedCount,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
