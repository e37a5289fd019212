//! `parley vars`: dump the variable store of a saved session.

use std::path::Path;

use anyhow::{Result, anyhow, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;

use parley_types::variable::{VariableBucket, VariableScope, VariableStore};

use super::session::load_session;

/// One printable row: scope, bucket id, name, value, source.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRow {
    pub scope: VariableScope,
    pub bucket: Option<String>,
    pub name: String,
    pub value: Value,
    pub source: String,
}

/// Flatten the store into rows, narrowest scope last.
pub fn collect_rows(store: &VariableStore, filter: Option<VariableScope>) -> Vec<VarRow> {
    fn push(rows: &mut Vec<VarRow>, scope: VariableScope, bucket: Option<&str>, vars: &VariableBucket) {
        rows.extend(vars.iter().map(|(name, v)| VarRow {
            scope,
            bucket: bucket.map(str::to_string),
            name: name.clone(),
            value: v.value.clone(),
            source: v.source.clone(),
        }));
    }

    let wanted = |scope: VariableScope| filter.is_none_or(|f| f == scope);
    let mut rows = Vec::new();
    if wanted(VariableScope::Global) {
        push(&mut rows, VariableScope::Global, None, &store.global);
    }
    if wanted(VariableScope::Session) {
        push(&mut rows, VariableScope::Session, None, &store.session);
    }
    if wanted(VariableScope::Phase) {
        for (id, bucket) in &store.phase {
            push(&mut rows, VariableScope::Phase, Some(id), bucket);
        }
    }
    if wanted(VariableScope::Topic) {
        for (id, bucket) in &store.topic {
            push(&mut rows, VariableScope::Topic, Some(id), bucket);
        }
    }
    rows
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub async fn show(session_path: &Path, scope: Option<&str>, json: bool) -> Result<()> {
    let filter = parse_scope(scope)?;
    let Some(saved) = load_session(session_path).await? else {
        bail!("no session file at {}", session_path.display());
    };
    let store = &saved.state.variable_store;

    if json {
        let out = match filter {
            None => serde_json::to_value(store)?,
            Some(_) => Value::Array(
                collect_rows(store, filter)
                    .into_iter()
                    .map(|r| {
                        serde_json::json!({
                            "scope": r.scope,
                            "bucket": r.bucket,
                            "name": r.name,
                            "value": r.value,
                            "source": r.source,
                        })
                    })
                    .collect(),
            ),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let rows = collect_rows(store, filter);
    if rows.is_empty() {
        println!();
        println!("  {} No variables stored.", style("○").dim());
        println!();
        return Ok(());
    }

    println!();
    println!(
        "  Session {} ({})",
        style(&saved.session_id).cyan(),
        saved.state.status
    );
    println!();
    println!("{}", render_table(&rows));
    println!();
    Ok(())
}

/// Parse an optional scope name as typed on the command line.
pub fn parse_scope(scope: Option<&str>) -> Result<Option<VariableScope>> {
    scope
        .map(|s| s.parse::<VariableScope>().map_err(|e| anyhow!(e)))
        .transpose()
}

pub fn render_table(rows: &[VarRow]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Scope").fg(Color::White),
        Cell::new("Bucket").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Value").fg(Color::White),
        Cell::new("Source").fg(Color::White),
    ]);
    for row in rows {
        table.add_row(vec![
            Cell::new(row.scope).fg(Color::Cyan),
            Cell::new(row.bucket.as_deref().unwrap_or("-")).fg(Color::DarkGrey),
            Cell::new(&row.name),
            Cell::new(display_value(&row.value)),
            Cell::new(&row.source).fg(Color::DarkGrey),
        ]);
    }
    table
}
