//! Placeholder substitution.
//!
//! Two flavours:
//! - action content (`content`, `question_template`, ...) accepts
//!   `{{name}}`, `{name}` and `${name}`, resolved through the scope resolver;
//! - prompt templates accept only `{{name}}`, filled from system variables
//!   first and script variables second.
//!
//! Unknown placeholders are left untouched in both cases.

use serde_json::{Map, Value};

/// Variables the engine itself provides to prompt templates.
pub const SYSTEM_VARIABLES: [&str; 9] = [
    "time",
    "who",
    "user",
    "chat_history",
    "tone",
    "topic_content",
    "understanding_threshold",
    "current_round",
    "max_rounds",
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Syntax {
    /// `{{x}}`, `{x}` and `${x}`.
    Any,
    /// `{{x}}` only.
    DoubleBrace,
}

/// Render a JSON value the way it should appear inside prose.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// If `tail` starts with a placeholder, return its name and byte length.
fn placeholder_at(tail: &str, syntax: Syntax) -> Option<(&str, usize)> {
    let (open, close) = if tail.starts_with("{{") {
        ("{{", "}}")
    } else if syntax == Syntax::DoubleBrace {
        return None;
    } else if tail.starts_with("${") {
        ("${", "}")
    } else if tail.starts_with('{') {
        ("{", "}")
    } else {
        return None;
    };

    let body = &tail[open.len()..];
    let end = body.find(close)?;
    let name = body[..end].trim();
    if name.is_empty() || !name.chars().all(is_name_char) {
        return None;
    }
    Some((name, open.len() + end + close.len()))
}

fn substitute_with<F>(text: &str, syntax: Syntax, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(['{', '$']) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if let Some((name, consumed)) = placeholder_at(tail, syntax) {
            if let Some(value) = lookup(name) {
                out.push_str(&value);
                rest = &tail[consumed..];
                continue;
            }
        }
        // '{' and '$' are single-byte, so this never splits a char.
        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// Replace `{{x}}`, `{x}` and `${x}` using `lookup`.
pub fn substitute_placeholders<F>(text: &str, lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    substitute_with(text, Syntax::Any, lookup)
}

/// Fill a prompt template: system variables first, then script variables.
pub fn substitute_variables(
    template: &str,
    system_vars: &Map<String, Value>,
    script_vars: &Map<String, Value>,
) -> String {
    let pass = substitute_with(template, Syntax::DoubleBrace, |name| {
        system_vars.get(name).map(value_to_text)
    });
    substitute_with(&pass, Syntax::DoubleBrace, |name| {
        script_vars.get(name).map(value_to_text)
    })
}

/// List the `{{x}}` placeholders still present after substitution.
pub fn validate_substitution(text: &str) -> Vec<String> {
    let mut unreplaced = Vec::new();
    substitute_with(text, Syntax::DoubleBrace, |name| {
        unreplaced.push(format!("{{{{{name}}}}}"));
        None
    });
    unreplaced
}

/// Placeholder names in a template, split into system and script variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVariables {
    pub system_vars: Vec<String>,
    pub script_vars: Vec<String>,
}

pub fn extract_variables(template: &str) -> TemplateVariables {
    let mut vars = TemplateVariables::default();
    substitute_with(template, Syntax::DoubleBrace, |name| {
        let bucket = if SYSTEM_VARIABLES.contains(&name) {
            &mut vars.system_vars
        } else {
            &mut vars.script_vars
        };
        if !bucket.iter().any(|v| v == name) {
            bucket.push(name.to_string());
        }
        None
    });
    vars
}
