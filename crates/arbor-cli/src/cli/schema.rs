//! `arbor schema`: print the JSON Schema of workflow documents.

use anyhow::Result;

use arbor_core::document::workflow_json_schema;

pub fn schema() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&workflow_json_schema())?);
    Ok(())
}
