//! Workflow document loading, structural validation, and schema export.
//!
//! Documents are YAML or JSON. Validation runs before a session is
//! constructed and reports every problem it finds rather than the first.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use arbor_types::constants::SUBROUTINE_ACTION_TYPE;
use arbor_types::workflow::{NodeType, RetryPolicyType, WorkflowTree};

use crate::action::ActionRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One structural problem in a workflow document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationIssue {
    /// Offending node, or `None` for document-level problems.
    pub node: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn document(message: impl Into<String>) -> Self {
        Self {
            node: None,
            message: message.into(),
        }
    }

    fn node(node: &str, message: impl Into<String>) -> Self {
        Self {
            node: Some(node.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "node '{node}': {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workflow document: {0}")]
    Parse(String),

    #[error("workflow '{name}' is invalid: {}", join_issues(.issues))]
    Invalid {
        name: String,
        issues: Vec<ValidationIssue>,
    },
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// Guess the format from a file extension, defaulting to YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }
}

/// Parse a workflow document without validating it.
pub fn parse_workflow(content: &str, format: DocumentFormat) -> Result<WorkflowTree, DocumentError> {
    match format {
        DocumentFormat::Yaml => {
            serde_yaml_ng::from_str(content).map_err(|e| DocumentError::Parse(e.to_string()))
        }
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|e| DocumentError::Parse(e.to_string()))
        }
    }
}

/// Read, parse, and validate a workflow file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowTree, DocumentError> {
    let content = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let tree = parse_workflow(&content, DocumentFormat::from_path(path))?;
    ensure_valid(&tree)?;
    Ok(tree)
}

/// Fail with every issue when the tree is structurally invalid.
pub fn ensure_valid(tree: &WorkflowTree) -> Result<(), DocumentError> {
    let issues = validate_workflow(tree);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(DocumentError::Invalid {
            name: tree.name.clone(),
            issues,
        })
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Structural checks that do not depend on any registry.
///
/// Issues are reported in node-key order for stable output.
pub fn validate_workflow(tree: &WorkflowTree) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if tree.name.trim().is_empty() {
        issues.push(ValidationIssue::document("workflow name cannot be empty"));
    }
    if tree.node(&tree.root_node_key).is_none() {
        issues.push(ValidationIssue::document(format!(
            "root node '{}' does not exist",
            tree.root_node_key
        )));
    }

    let mut keys: Vec<&String> = tree.nodes.keys().collect();
    keys.sort();

    for key in keys {
        let node = &tree.nodes[key];
        let subroutines = node.subroutine_action_count();

        match node.node_type {
            NodeType::Selection if !node.actions.is_empty() => {
                issues.push(ValidationIssue::node(key, "a Selection node cannot declare actions"));
            }
            NodeType::Action if subroutines > 0 => {
                issues.push(ValidationIssue::node(
                    key,
                    format!("an Action node cannot declare a '{SUBROUTINE_ACTION_TYPE}' action"),
                ));
            }
            NodeType::Subroutine if subroutines == 0 => {
                issues.push(ValidationIssue::node(
                    key,
                    format!("a Subroutine node must declare a '{SUBROUTINE_ACTION_TYPE}' action"),
                ));
            }
            NodeType::Leaf => {
                if node.actions.len() > 1 {
                    issues.push(ValidationIssue::node(key, "a Leaf node declares at most one action"));
                }
                if !node.child_selector.is_empty() {
                    issues.push(ValidationIssue::node(
                        key,
                        "a Leaf node is terminal and cannot declare child selectors",
                    ));
                }
            }
            _ => {}
        }

        for selector in &node.child_selector {
            if tree.node(&selector.child).is_none() {
                issues.push(ValidationIssue::node(
                    key,
                    format!("child selector targets unknown node '{}'", selector.child),
                ));
            }
        }

        for (action_key, spec) in node.actions.iter() {
            if spec.action_type.trim().is_empty() {
                issues.push(ValidationIssue::node(
                    key,
                    format!("action '{action_key}' has no type"),
                ));
            }
            if let Some(policy) = &spec.retry_policy {
                if policy.policy_type == RetryPolicyType::ExponentialBackoff
                    && policy.max_backoff_ms != 0
                    && policy.min_backoff_ms > policy.max_backoff_ms
                {
                    issues.push(ValidationIssue::node(
                        key,
                        format!("action '{action_key}' has MinBackoffMs greater than MaxBackoffMs"),
                    ));
                }
            }
        }
    }

    let mut seen = HashSet::new();
    for node in tree.nodes.values() {
        for action_key in node.actions.keys() {
            if !seen.insert(action_key) {
                issues.push(ValidationIssue::document(format!(
                    "action key '{action_key}' is declared by more than one node"
                )));
            }
        }
    }
    issues.sort_by(|a, b| a.node.cmp(&b.node).then_with(|| a.message.cmp(&b.message)));
    issues.dedup();

    issues
}

/// Action types the tree uses that `registry` cannot run.
pub fn unregistered_actions(tree: &WorkflowTree, registry: &ActionRegistry) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut keys: Vec<&String> = tree.nodes.keys().collect();
    keys.sort();
    for key in keys {
        for (action_key, spec) in tree.nodes[key].actions.iter() {
            if !registry.contains(&spec.action_type) {
                issues.push(ValidationIssue::node(
                    key,
                    format!(
                        "action '{action_key}' uses unregistered type '{}'",
                        spec.action_type
                    ),
                ));
            }
        }
    }
    issues
}

// ---------------------------------------------------------------------------
// Schema export
// ---------------------------------------------------------------------------

/// JSON Schema describing workflow documents.
pub fn workflow_json_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(WorkflowTree);
    serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
