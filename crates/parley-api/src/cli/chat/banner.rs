//! Welcome banner for chat sessions.

use console::style;

use parley_types::script::SessionDefinition;

/// Print the banner: script id, outline size, session id, and key hints.
pub fn print_welcome_banner(script: &SessionDefinition, session_id: &str, resumed: bool) {
    let short_id = &session_id[..8.min(session_id.len())];

    println!();
    println!("  {}", style(&script.session_id).cyan().bold());
    println!(
        "  {}",
        style(format!(
            "{} phase(s), {} action(s)",
            script.phases.len(),
            script.action_count()
        ))
        .dim()
    );
    println!();
    println!(
        "  {}  {}{}",
        style("Session:").bold(),
        style(short_id).dim(),
        if resumed { style(" (resumed)").yellow() } else { style("") }
    );
    println!();
    println!("  {}", style("Type /help for commands, Ctrl+D to exit").dim());
    println!("  {}", style("---").dim());
    println!();
}
