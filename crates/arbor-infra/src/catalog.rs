//! Filesystem workflow catalog.
//!
//! Discovers workflow documents (`.yaml`, `.yml`, `.json`) under a directory
//! tree and loads the valid ones into a [`WorkflowCatalog`] for subroutine
//! lookup. Unreadable or invalid files are skipped with a warning.

use std::path::{Path, PathBuf};

use arbor_core::document::load_workflow_file;
use arbor_core::subroutine::WorkflowCatalog;

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

fn is_workflow_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Every workflow document path under `dir`, sorted.
pub fn discover_workflow_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect(dir, &mut found);
    found.sort();
    found
}

fn collect(dir: &Path, found: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(?dir, error = %e, "cannot read workflow directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(&path, found);
        } else if is_workflow_file(&path) {
            found.push(path);
        }
    }
}

/// Load every valid workflow under `dir` into a catalog keyed by name.
pub fn load_catalog(dir: &Path) -> WorkflowCatalog {
    let mut catalog = WorkflowCatalog::new();
    for path in discover_workflow_files(dir) {
        match load_workflow_file(&path) {
            Ok(tree) => {
                tracing::debug!(?path, workflow = %tree.name, "loaded workflow");
                catalog.insert(tree);
            }
            Err(e) => tracing::warn!(?path, error = %e, "skipping unloadable workflow file"),
        }
    }
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &str = r#"
Name: {name}
RootNodeKey: Done
Nodes:
  Done:
    Type: Leaf
"#;

    #[test]
    fn test_load_catalog_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.yaml"), LEAF.replace("{name}", "alpha")).unwrap();
        std::fs::write(
            dir.path().join("nested/b.yml"),
            LEAF.replace("{name}", "beta"),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("c.json"),
            r#"{"Name":"gamma","RootNodeKey":"Done","Nodes":{"Done":{"Type":"Leaf"}}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a workflow").unwrap();

        let catalog = load_catalog(dir.path());
        assert_eq!(catalog.names(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_invalid_documents_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.yaml"), LEAF.replace("{name}", "ok")).unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "Name: [unclosed").unwrap();
        std::fs::write(
            dir.path().join("invalid.yaml"),
            "Name: invalid\nRootNodeKey: Missing\nNodes: {}\n",
        )
        .unwrap();

        let catalog = load_catalog(dir.path());
        assert_eq!(catalog.names(), vec!["ok"]);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_catalog(&dir.path().join("absent")).is_empty());
    }
}
