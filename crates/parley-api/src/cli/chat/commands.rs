//! Slash commands for the chat loop.
//!
//! Anything that does not start with `/` is user input for the script.

use console::style;

#[derive(Debug, PartialEq)]
pub enum ChatCommand {
    Help,
    Clear,
    Exit,
    /// Show stored variables, optionally for one scope.
    Vars(Option<String>),
    /// Show the current position and round.
    Status,
    Unknown(String),
}

/// Parse a slash command. `None` for ordinary input.
pub fn parse(input: &str) -> Option<ChatCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (cmd, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, Some(rest.trim()).filter(|s| !s.is_empty())),
        None => (trimmed, None),
    };

    let command = match cmd.to_lowercase().as_str() {
        "/help" | "/h" | "/?" => ChatCommand::Help,
        "/clear" | "/cls" => ChatCommand::Clear,
        "/exit" | "/quit" | "/q" => ChatCommand::Exit,
        "/vars" | "/v" => ChatCommand::Vars(arg.map(str::to_string)),
        "/status" => ChatCommand::Status,
        other => ChatCommand::Unknown(other.to_string()),
    };
    Some(command)
}

pub fn print_help() {
    println!();
    println!("  {}", style("Available commands:").bold());
    println!();
    println!("  {}           {}", style("/help").cyan(), "Show this help message");
    println!("  {}          {}", style("/clear").cyan(), "Clear the screen");
    println!("  {} {}", style("/vars [scope]").cyan(), "Show stored variables");
    println!("  {}         {}", style("/status").cyan(), "Show position and round");
    println!("  {}           {}", style("/exit").cyan(), "Leave the chat (progress is kept)");
    println!();
    println!("  {}", style("Ctrl+D to exit").dim());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exit_aliases() {
        assert_eq!(parse("/exit"), Some(ChatCommand::Exit));
        assert_eq!(parse("/quit"), Some(ChatCommand::Exit));
        assert_eq!(parse("/Q"), Some(ChatCommand::Exit));
    }

    #[test]
    fn test_parse_vars_with_scope() {
        assert_eq!(parse("/vars"), Some(ChatCommand::Vars(None)));
        assert_eq!(parse("/vars   "), Some(ChatCommand::Vars(None)));
        assert_eq!(
            parse("/vars topic"),
            Some(ChatCommand::Vars(Some("topic".to_string())))
        );
    }

    #[test]
    fn test_plain_input_is_not_a_command() {
        assert_eq!(parse("I feel fine"), None);
        assert_eq!(parse("  /status "), Some(ChatCommand::Status));
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(parse("/foo bar"), Some(ChatCommand::Unknown("/foo".to_string())));
    }
}
