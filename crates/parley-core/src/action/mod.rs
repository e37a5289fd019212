//! Script actions: the units of work the executor steps through.
//!
//! Actions form a closed set ([`Action`]) created by [`ActionFactory`] from
//! the script's `action_type`. Each `execute` call runs one round. A result
//! with `completed == false` asks the executor to freeze the action and
//! hand it the next user input.

pub mod ask;
pub mod config;
pub mod exit;
pub mod factory;
pub mod say;
pub mod think;

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use parley_types::action::{ActionMetadata, ActionResult, ActionStateSnapshot};
use parley_types::execution::{HistoryEntry, SessionConfig};
use parley_types::llm::{LlmError, MessageRole};
use parley_types::variable::ScopePosition;

use crate::llm::generation::GenerationService;
use crate::template::substitute::{substitute_placeholders, substitute_variables, value_to_text};
use crate::template::{ResolvedTemplate, TemplateError, TemplateResolver};
use crate::variable::ScopeResolver;

pub use ask::AiAskAction;
pub use config::ActionConfig;
pub use exit::{CriteriaOutcome, ExitEvaluator};
pub use factory::{ActionFactory, ActionKind};
pub use say::AiSayAction;
pub use think::AiThinkAction;

/// Base round ceiling when an action does not configure one.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

#[derive(Debug, Error)]
pub enum ActionError {
    /// The script names an action type no variant implements.
    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    /// The action's config cannot be interpreted.
    #[error("invalid config for action '{action_id}': {message}")]
    InvalidConfig { action_id: String, message: String },

    /// Anything else that went wrong inside a round.
    #[error("{0}")]
    Execution(String),

    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

/// Collaborators a generative action needs. Cheap to clone.
#[derive(Clone)]
pub struct ActionServices {
    pub generation: Arc<GenerationService>,
    pub templates: Arc<TemplateResolver>,
}

impl ActionServices {
    pub fn new(generation: Arc<GenerationService>, templates: Arc<TemplateResolver>) -> Self {
        Self {
            generation,
            templates,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything an action may read or write during one round.
pub struct ActionContext<'a, 'r> {
    pub session_id: &'a str,
    pub position: ScopePosition,
    pub resolver: &'a mut ScopeResolver<'r>,
    pub history: &'a [HistoryEntry],
    pub session_config: &'a SessionConfig,
}

impl ActionContext<'_, '_> {
    /// Resolve a variable relative to the current position.
    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.resolver.resolve_value(name, &self.position).cloned()
    }

    pub fn visible_variables(&self) -> Map<String, Value> {
        self.resolver.visible_variables(&self.position)
    }

    /// Fill `{{x}}`, `{x}` and `${x}` from the scope resolver.
    ///
    /// Unknown names render as empty text.
    pub fn substitute(&self, text: &str) -> String {
        substitute_placeholders(text, |name| {
            Some(self.resolve(name).as_ref().map(value_to_text).unwrap_or_default())
        })
    }

    pub fn template_scheme(&self) -> Option<&str> {
        self.session_config.template_scheme.as_deref()
    }

    /// Last `n` history entries as `"{user}: .."` / `"{ai}: .."` lines.
    pub fn recent_history(&self, n: usize, user: &str, ai: &str) -> Vec<String> {
        let start = self.history.len().saturating_sub(n);
        self.history[start..]
            .iter()
            .map(|entry| match entry.role {
                MessageRole::User => format!("{user}: {}", entry.content),
                _ => format!("{ai}: {}", entry.content),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Identity, config and round counters common to every variant.
#[derive(Debug, Clone)]
pub struct ActionBase {
    pub action_id: String,
    pub config: ActionConfig,
    pub current_round: u32,
    pub max_rounds: u32,
}

impl ActionBase {
    pub fn new(action_id: impl Into<String>, config: Map<String, Value>, default_max: u32) -> Self {
        let config = ActionConfig::new(config);
        let max_rounds = config.u32("max_rounds").filter(|m| *m > 0).unwrap_or(default_max);
        Self {
            action_id: action_id.into(),
            config,
            current_round: 0,
            max_rounds,
        }
    }
}

/// Resolve `key`, render it with both variable maps, and note where it came from.
pub(crate) async fn render_template(
    services: &ActionServices,
    key: &str,
    scheme: Option<&str>,
    system_vars: &Map<String, Value>,
    script_vars: &Map<String, Value>,
) -> Result<(String, ResolvedTemplate), ActionError> {
    let template = services.templates.resolve(key, scheme).await?;
    let prompt = substitute_variables(&template.content, system_vars, script_vars);
    tracing::debug!(
        template = key,
        path = %template.path,
        layer = %template.layer,
        prompt_chars = prompt.len(),
        "rendered prompt template"
    );
    Ok((prompt, template))
}

pub(crate) fn record_template(metadata: &mut ActionMetadata, template: &ResolvedTemplate) {
    metadata.template_path = Some(template.path.clone());
    metadata.template_layer = Some(template.layer.to_string());
    metadata.template_scheme = template.scheme.clone();
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One live action instance.
pub enum Action {
    Say(AiSayAction),
    Ask(AiAskAction),
    Think(AiThinkAction),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Say(_) => ActionKind::Say,
            Action::Ask(_) => ActionKind::Ask,
            Action::Think(_) => ActionKind::Think,
        }
    }

    fn base(&self) -> &ActionBase {
        match self {
            Action::Say(a) => &a.base,
            Action::Ask(a) => &a.base,
            Action::Think(a) => &a.base,
        }
    }

    fn base_mut(&mut self) -> &mut ActionBase {
        match self {
            Action::Say(a) => &mut a.base,
            Action::Ask(a) => &mut a.base,
            Action::Think(a) => &mut a.base,
        }
    }

    pub fn action_id(&self) -> &str {
        &self.base().action_id
    }

    pub fn current_round(&self) -> u32 {
        self.base().current_round
    }

    pub fn max_rounds(&self) -> u32 {
        self.base().max_rounds
    }

    /// Put the round counters back after a thaw.
    pub fn restore_rounds(&mut self, current_round: u32, max_rounds: u32) {
        let base = self.base_mut();
        base.current_round = current_round;
        base.max_rounds = max_rounds;
    }

    /// Run one round. Internal errors become a failed result.
    pub async fn execute(
        &mut self,
        ctx: &mut ActionContext<'_, '_>,
        user_input: Option<&str>,
    ) -> ActionResult {
        let kind = self.kind();
        let outcome = match self {
            Action::Say(a) => a.execute(ctx, user_input).await,
            Action::Ask(a) => a.execute(ctx, user_input).await,
            Action::Think(a) => Ok(a.execute(ctx)),
        };
        outcome.unwrap_or_else(|e| {
            tracing::warn!(
                action_id = %self.action_id(),
                action_type = %kind,
                error = %e,
                "action round failed"
            );
            ActionResult::failed(format!("{kind} execution error: {e}"))
        })
    }

    /// Serializable form stored while the action waits for input.
    pub fn freeze(&self) -> ActionStateSnapshot {
        let base = self.base();
        ActionStateSnapshot {
            action_id: base.action_id.clone(),
            action_type: self.kind().to_string(),
            config: base.config.raw().clone(),
            current_round: base.current_round,
            max_rounds: base.max_rounds,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Fixture, config, context};
    use super::*;
    use parley_types::variable::VariableScope;
    use serde_json::json;

    #[test]
    fn test_substitute_blanks_unknown_names() {
        let mut fx = Fixture::default();
        let mut resolver = ScopeResolver::new(&mut fx.store, &mut fx.definitions);
        let mut ctx = context(&mut resolver, &fx.history, &fx.session_config);
        let pos = ctx.position.clone();
        ctx.resolver
            .set_variable("name", json!("Ada"), VariableScope::Session, &pos, None)
            .unwrap();
        assert_eq!(
            ctx.substitute("Hi {{name}} / ${missing} / {\"k\": 1}"),
            "Hi Ada /  / {\"k\": 1}"
        );
    }

    #[test]
    fn test_recent_history_keeps_tail() {
        let mut fx = Fixture::default();
        fx.history = vec![
            HistoryEntry::user("one"),
            HistoryEntry::assistant("two", "a1", ActionMetadata::default()),
            HistoryEntry::user("three"),
        ];
        let mut resolver = ScopeResolver::new(&mut fx.store, &mut fx.definitions);
        let ctx = context(&mut resolver, &fx.history, &fx.session_config);
        assert_eq!(ctx.recent_history(2, "User", "AI"), vec!["AI: two", "User: three"]);
    }

    #[test]
    fn test_base_reads_max_rounds() {
        let base = ActionBase::new("a", config(json!({"maxRounds": 2})), DEFAULT_MAX_ROUNDS);
        assert_eq!(base.max_rounds, 2);
        let base = ActionBase::new("a", config(json!({"max_rounds": 0})), 3);
        assert_eq!(base.max_rounds, 3);
    }
}
