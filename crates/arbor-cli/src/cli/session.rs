//! `arbor state`: dump the persisted engine keys of a session.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use arbor_core::state::SessionStore;

use crate::state::AppState;

/// Longest rendered value in the text table.
const MAX_VALUE_WIDTH: usize = 96;

/// Print every key stored under `session_id`, nested sessions included.
pub async fn dump_session(state: &AppState, session_id: &str, json: bool) -> Result<()> {
    let store = SessionStore::new(state.backend.clone(), session_id);
    let entries = store
        .entries()
        .await
        .with_context(|| format!("failed to read state of session '{session_id}'"))?;

    if json {
        let out: serde_json::Map<String, Value> = entries.into_iter().collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!("  No state recorded for session '{}'.", style(session_id).cyan());
        println!("  Data directory: {}", style(state.data_dir.display()).dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Key").fg(Color::Cyan), Cell::new("Value")]);
    for (key, value) in &entries {
        table.add_row(vec![Cell::new(key), Cell::new(truncate(&value.to_string()))]);
    }

    println!();
    println!(
        "  Session '{}' ({} keys)",
        style(session_id).cyan(),
        entries.len()
    );
    println!("{table}");
    println!();
    Ok(())
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_VALUE_WIDTH {
        return text.to_string();
    }
    let mut short: String = text.chars().take(MAX_VALUE_WIDTH - 1).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_values() {
        assert_eq!(truncate("short"), "short");
        let long = "x".repeat(200);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), MAX_VALUE_WIDTH);
        assert!(cut.ends_with('…'));
    }
}
