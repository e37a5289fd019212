//! `ai_think`: internal reasoning step with no user-facing output.
//!
//! Completes immediately, filling each of `output_variables` with a
//! placeholder so downstream actions see the names defined.

use serde_json::{Map, Value, json};

use parley_types::action::ActionResult;

use super::{ActionBase, ActionContext, DEFAULT_MAX_ROUNDS};

pub struct AiThinkAction {
    pub(crate) base: ActionBase,
}

impl AiThinkAction {
    pub const ACTION_TYPE: &'static str = "ai_think";

    pub fn new(action_id: impl Into<String>, config: Map<String, Value>) -> Self {
        Self {
            base: ActionBase::new(action_id, config, DEFAULT_MAX_ROUNDS),
        }
    }

    pub(crate) fn execute(&mut self, _ctx: &mut ActionContext<'_, '_>) -> ActionResult {
        let goal = self.base.config.str("think_goal").unwrap_or_default();
        let mut result = ActionResult::completed(None);
        for name in self
            .base
            .config
            .array("output_variables")
            .iter()
            .filter_map(Value::as_str)
        {
            result
                .extracted_variables
                .insert(name.to_string(), json!(format!("[AI thinking result: {name}]")));
        }
        if !goal.is_empty() {
            result.metadata.extra.insert("think_goal".into(), json!(goal));
        }
        tracing::debug!(
            action_id = %self.base.action_id,
            outputs = result.extracted_variables.len(),
            "ai_think produced placeholders"
        );
        result
    }
}
