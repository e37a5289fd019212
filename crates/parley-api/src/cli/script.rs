//! `parley validate`: parse a script and print its outline.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use parley_core::script::load_script_file;
use parley_types::script::SessionDefinition;

/// Load and validate a script file.
pub fn load(path: &Path) -> Result<SessionDefinition> {
    load_script_file(path).with_context(|| format!("failed to load script {}", path.display()))
}

pub fn validate(path: &Path, json: bool) -> Result<()> {
    let session = load(path)?;

    if json {
        let summary = serde_json::json!({
            "valid": true,
            "session_id": session.session_id,
            "phases": session.phases.len(),
            "topics": session.phases.iter().map(|p| p.topics.len()).sum::<usize>(),
            "actions": session.action_count(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Phase").fg(Color::White),
        Cell::new("Topic").fg(Color::White),
        Cell::new("Action").fg(Color::White),
        Cell::new("Type").fg(Color::White),
    ]);

    for phase in &session.phases {
        for topic in &phase.topics {
            for action in &topic.actions {
                table.add_row(vec![
                    Cell::new(&phase.phase_id).fg(Color::Cyan),
                    Cell::new(&topic.topic_id),
                    Cell::new(&action.action_id),
                    Cell::new(&action.action_type).fg(Color::DarkGrey),
                ]);
            }
        }
    }

    println!();
    println!(
        "  {} Script '{}' is valid",
        style("✓").green().bold(),
        style(&session.session_id).cyan()
    );
    println!();
    println!("{table}");
    println!();
    println!(
        "  {} phase(s), {} action(s)",
        style(session.phases.len()).bold(),
        style(session.action_count()).bold()
    );
    println!();
    Ok(())
}
