//! In-memory template source and the built-in default templates.

use std::collections::HashMap;

use super::source::{TemplateError, TemplateResolver, TemplateSource};

const AI_SAY_TEMPLATE: &str = r#"Current time: {{time}}
You are {{who}}, talking with {{user}}. Speak in a {{tone}} tone.

Recent conversation:
{{chat_history}}

This is round {{current_round}} of at most {{max_rounds}}. Deliver the following
material and check how well {{user}} has understood it:

{{topic_content}}

Consider the material understood once understanding reaches {{understanding_threshold}} out of 100.

Reply with a single JSON object and nothing else:
{
  "content": "what you say to the user",
  "assessment": {
    "understanding_level": 0,
    "has_questions": false,
    "expressed_understanding": false,
    "reasoning": "one sentence"
  },
  "should_exit": false,
  "exit_reason": "why the explanation can end, if it can",
  "metrics": {
    "information_completeness": "",
    "user_engagement": "",
    "emotional_intensity": "",
    "reply_relevance": "",
    "understanding_level": ""
  },
  "progress_suggestion": "continue_needed | completed | blocked | off_topic"
}
"#;

const AI_ASK_TEMPLATE: &str = r#"Current time: {{time}}
You are {{who}} acting as {{ai_role}}, talking with {{user}}. Speak in a {{tone}} tone.

Recent conversation:
{{chat}}

Your task:
{{task}}

Collect the following information:
{{output_list}}

Stop asking when: {{exit}}

Reply with a single JSON object and nothing else:
{
  "content": "your next question or reply",
  "EXIT": "false, or true once everything is collected or the stop condition holds",
  "BRIEF": "short summary of what you have learned",
  "metrics": {
    "information_completeness": "",
    "user_engagement": "",
    "emotional_intensity": "",
    "reply_relevance": "",
    "understanding_level": ""
  },
  "progress_suggestion": "continue_needed | completed | blocked | off_topic"
}
Add one top-level key per item to collect, holding the value you extracted (null if unknown).
"#;

/// Template source backed by a hash map, keyed by relative path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplateSource {
    templates: HashMap<String, String>,
}

impl InMemoryTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source holding the default-layer templates for every generative action.
    pub fn builtin() -> Self {
        Self::new()
            .with_template(TemplateResolver::default_path("ai_say"), AI_SAY_TEMPLATE)
            .with_template(TemplateResolver::default_path("ai_ask"), AI_ASK_TEMPLATE)
    }

    pub fn with_template(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.templates.insert(path.into(), content.into());
    }
}

impl TemplateSource for InMemoryTemplateSource {
    async fn read_template(&self, path: &str) -> Result<Option<String>, TemplateError> {
        Ok(self.templates.get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::substitute::{SYSTEM_VARIABLES, extract_variables};

    #[tokio::test]
    async fn test_builtin_covers_generative_actions() {
        let resolver = TemplateResolver::new(InMemoryTemplateSource::builtin());
        for key in ["ai_say", "ai_ask"] {
            let resolved = resolver.resolve(key, None).await.unwrap();
            assert!(resolved.content.contains("JSON"));
        }
    }

    #[test]
    fn test_say_template_uses_every_system_variable() {
        let vars = extract_variables(AI_SAY_TEMPLATE);
        for name in SYSTEM_VARIABLES {
            assert!(vars.system_vars.iter().any(|v| v == name), "missing {name}");
        }
        assert!(vars.script_vars.is_empty());
    }

    #[test]
    fn test_ask_template_script_variables() {
        let vars = extract_variables(AI_ASK_TEMPLATE);
        for name in ["chat", "ai_role", "output_list", "task", "exit"] {
            assert!(vars.script_vars.iter().any(|v| v == name), "missing {name}");
        }
    }
}
