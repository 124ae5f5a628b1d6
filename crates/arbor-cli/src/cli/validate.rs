//! `arbor validate`: structural checks on a workflow document.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use arbor_core::action::ActionRegistry;
use arbor_core::document::{
    DocumentFormat, ValidationIssue, parse_workflow, unregistered_actions, validate_workflow,
};

/// Parse `file` and report every structural issue plus unknown action types.
///
/// Fails when any issue was found so scripts can rely on the exit code.
pub fn validate(file: &Path, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let tree = parse_workflow(&content, DocumentFormat::from_path(file))
        .with_context(|| format!("failed to parse {}", file.display()))?;

    let issues = validate_workflow(&tree);
    let unknown = unregistered_actions(&tree, &ActionRegistry::with_builtins());

    if json {
        let out = serde_json::json!({
            "name": &tree.name,
            "valid": issues.is_empty(),
            "issues": &issues,
            "unregistered_actions": &unknown,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_report(&tree.name, &issues, &unknown);
    }

    if let Some(first) = issues.first() {
        bail!(
            "workflow '{}' is invalid ({} issue(s)): {first}",
            tree.name,
            issues.len()
        );
    }
    Ok(())
}

fn print_report(name: &str, issues: &[ValidationIssue], unknown: &[ValidationIssue]) {
    println!();
    if issues.is_empty() {
        println!(
            "  {} Workflow '{}' is valid",
            style("✓").green().bold(),
            style(name).cyan()
        );
    } else {
        println!(
            "  {} Workflow '{}' has {} issue(s)",
            style("✗").red().bold(),
            style(name).cyan(),
            issues.len()
        );
        println!();
        println!("{}", issue_table(issues));
    }

    if !unknown.is_empty() {
        println!();
        println!(
            "  {} Action types the builtin registry cannot run (host must register them):",
            style("!").yellow().bold()
        );
        for issue in unknown {
            println!("    {}", style(issue).dim());
        }
    }
    println!();
}

fn issue_table(issues: &[ValidationIssue]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Node").fg(Color::Cyan), Cell::new("Problem")]);
    for issue in issues {
        table.add_row(vec![
            Cell::new(issue.node.as_deref().unwrap_or("(document)")),
            Cell::new(&issue.message),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.yaml");
        std::fs::write(
            &path,
            "Name: ok\nRootNodeKey: Done\nNodes:\n  Done:\n    Type: Leaf\n",
        )
        .unwrap();
        assert!(validate(&path, true).is_ok());
    }

    #[test]
    fn test_validate_fails_on_issues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"Name":"bad","RootNodeKey":"Nope","Nodes":{}}"#).unwrap();
        let err = validate(&path, true).unwrap_err();
        assert!(err.to_string().contains("root node 'Nope'"));
    }
}
