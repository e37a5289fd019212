//! `ai_say`: deliver content to the user.
//!
//! Two modes:
//! - **template**: when `max_rounds` or `exit_criteria` is configured, each
//!   round renders the `ai_say` prompt template, lets the model explain the
//!   content and assess understanding, and stops on the exit decision;
//! - **legacy**: the configured text is substituted, optionally reworded by
//!   the model, and shown once.

use serde_json::{Map, Value, json};

use parley_types::action::{ActionMetadata, ActionResult, ExitReason, ProgressSuggestion};
use parley_types::exit::{DecisionSource, ExitCriteria, ExitDecision, ExitPolicy};
use parley_types::llm::GenerationOptions;

use super::{
    ActionBase, ActionContext, ActionError, ActionServices, DEFAULT_MAX_ROUNDS, ExitEvaluator,
    record_template, render_template,
};
use crate::llm::structured::{extract_metrics, extract_progress, first_string, parse_structured_output};

const TEMPLATE_KEY: &str = "ai_say";
const DEFAULT_TONE: &str = "professional, warm and calm";
const DEFAULT_UNDERSTANDING_THRESHOLD: f64 = 80.0;

pub struct AiSayAction {
    pub(crate) base: ActionBase,
    services: ActionServices,
    exit: ExitEvaluator,
    template_mode: bool,
}

impl AiSayAction {
    pub const ACTION_TYPE: &'static str = "ai_say";

    pub fn new(
        action_id: impl Into<String>,
        config: Map<String, Value>,
        services: ActionServices,
    ) -> Result<Self, ActionError> {
        let base = ActionBase::new(action_id, config, DEFAULT_MAX_ROUNDS);
        let criteria = match base.config.get("exit_criteria") {
            Some(raw) => Some(serde_json::from_value::<ExitCriteria>(raw.clone()).map_err(|e| {
                ActionError::InvalidConfig {
                    action_id: base.action_id.clone(),
                    message: format!("exit_criteria: {e}"),
                }
            })?),
            None => None,
        };
        let template_mode = base.config.has("max_rounds") || criteria.is_some();
        let policy = ExitPolicy::new(
            true,
            Some(vec![
                DecisionSource::MaxRounds,
                DecisionSource::ExitCriteria,
                DecisionSource::LlmSuggestion,
            ]),
        );

        Ok(Self {
            base,
            services,
            exit: ExitEvaluator::new(policy, criteria),
            template_mode,
        })
    }

    pub fn is_template_mode(&self) -> bool {
        self.template_mode
    }

    fn requires_acknowledgment(&self) -> bool {
        self.base
            .config
            .bool("require_acknowledgment")
            .unwrap_or(true)
    }

    fn topic_content(&self, ctx: &ActionContext<'_, '_>) -> String {
        let raw = self
            .base
            .config
            .first_str(&["content", "content_template"])
            .unwrap_or_default();
        ctx.substitute(raw)
    }

    pub(crate) async fn execute(
        &mut self,
        ctx: &mut ActionContext<'_, '_>,
        _user_input: Option<&str>,
    ) -> Result<ActionResult, ActionError> {
        if self.template_mode {
            self.execute_template(ctx).await
        } else {
            self.execute_legacy(ctx).await
        }
    }

    // -----------------------------------------------------------------------
    // Template mode
    // -----------------------------------------------------------------------

    fn system_variables(&self, ctx: &ActionContext<'_, '_>, topic_content: &str) -> Map<String, Value> {
        let text = |name: &str, default: &str| {
            ctx.resolve(name)
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let history = ctx.recent_history(self.services.generation.history_window(), "User", "AI");
        let chat_history = if history.is_empty() {
            "(no conversation yet)".to_string()
        } else {
            history.join("\n")
        };
        let threshold = self
            .exit
            .criteria()
            .and_then(|c| c.understanding_threshold)
            .unwrap_or(DEFAULT_UNDERSTANDING_THRESHOLD);

        let mut vars = Map::new();
        vars.insert("time".into(), json!(chrono::Utc::now().to_rfc3339()));
        vars.insert("who".into(), json!(text("ai_name", "AI assistant")));
        vars.insert("user".into(), json!(text("user_name", "user")));
        vars.insert("chat_history".into(), json!(chat_history));
        vars.insert(
            "tone".into(),
            json!(self.base.config.str("tone").unwrap_or(DEFAULT_TONE)),
        );
        vars.insert("topic_content".into(), json!(topic_content));
        vars.insert("understanding_threshold".into(), json!(threshold));
        vars.insert("current_round".into(), json!(self.base.current_round));
        vars.insert("max_rounds".into(), json!(self.base.max_rounds));
        vars
    }

    async fn execute_template(
        &mut self,
        ctx: &mut ActionContext<'_, '_>,
    ) -> Result<ActionResult, ActionError> {
        self.base.current_round += 1;
        let round = self.base.current_round;
        let max = self.base.max_rounds;

        if round > max {
            tracing::debug!(action_id = %self.base.action_id, round, max, "ai_say past ceiling, completing");
            let mut result = ActionResult::completed(None);
            result.metadata = ActionMetadata {
                current_round: Some(round.min(max)),
                max_rounds: Some(max),
                exit_decision: Some(ExitDecision::exit(
                    format!("reached max rounds ({max})"),
                    DecisionSource::MaxRounds,
                )),
                exit_reason: Some(ExitReason::MaxRoundsReached),
                ..Default::default()
            };
            return Ok(result);
        }

        let topic_content = self.topic_content(ctx);
        let system_vars = self.system_variables(ctx, &topic_content);
        let mut script_vars = ctx.visible_variables();
        script_vars.insert("topic_content".into(), json!(topic_content));

        let (prompt, template) = render_template(
            &self.services,
            TEMPLATE_KEY,
            ctx.template_scheme(),
            &system_vars,
            &script_vars,
        )
        .await?;

        let generated = self
            .services
            .generation
            .generate_text(&prompt, &GenerationOptions::new(0.7, 1000))
            .await?;
        let parsed = parse_structured_output(&generated.text);
        let output = &parsed.value;

        let metrics = extract_metrics(output);
        let progress = extract_progress(output);
        let decision = self.exit.evaluate(round, max, output, |name| ctx.resolve(name));

        let exit_reason = if round >= max {
            Some(ExitReason::MaxRoundsReached)
        } else if decision.should_exit {
            Some(ExitReason::ExitCriteriaMet)
        } else if progress == ProgressSuggestion::Blocked {
            Some(ExitReason::UserBlocked)
        } else {
            None
        };

        let ai_role = self.base.config.str("ai_role").unwrap_or("assistant");
        let message = first_string(output, &["content", ai_role]).unwrap_or_default();
        let is_last = round >= max;
        let wait_ack =
            self.requires_acknowledgment() && !message.is_empty() && round == 1 && !is_last;
        let completed = !wait_ack && (decision.should_exit || is_last);

        let exit_decision = if is_last {
            ExitDecision::exit(
                format!("reached max rounds ({round}/{max})"),
                DecisionSource::MaxRounds,
            )
        } else {
            decision
        };

        let mut metadata = ActionMetadata {
            current_round: Some(round),
            max_rounds: Some(max),
            exit_decision: Some(exit_decision),
            exit_reason,
            assessment: output.get("assessment").cloned(),
            llm_raw_output: Some(Value::Object(output.clone())),
            waiting_for: wait_ack.then(|| "acknowledgment".to_string()),
            parse_error: parsed.retry_count > 1,
            parse_retry_count: (parsed.retry_count > 1).then_some(parsed.retry_count),
            ..Default::default()
        };
        record_template(&mut metadata, &template);
        if let Some(failure) = &parsed.failure {
            metadata
                .extra
                .insert("parse_error_details".into(), json!(failure));
        }

        tracing::debug!(
            action_id = %self.base.action_id,
            round,
            max,
            completed,
            wait_ack,
            "ai_say round finished"
        );

        Ok(ActionResult {
            success: true,
            completed,
            ai_message: (!message.is_empty()).then_some(message),
            metrics,
            progress_suggestion: Some(progress),
            metadata,
            debug_info: Some(generated.debug_info),
            ..Default::default()
        })
    }

    // -----------------------------------------------------------------------
    // Legacy mode
    // -----------------------------------------------------------------------

    async fn execute_legacy(
        &mut self,
        ctx: &mut ActionContext<'_, '_>,
    ) -> Result<ActionResult, ActionError> {
        let acknowledge = self.requires_acknowledgment();

        if acknowledge && self.base.current_round > 0 {
            self.base.current_round = 0;
            let mut result = ActionResult::completed(None);
            result.metadata.exit_reason = Some(ExitReason::UserAcknowledged);
            return Ok(result);
        }

        let content = self.topic_content(ctx);
        if content.is_empty() {
            return Err(ActionError::InvalidConfig {
                action_id: self.base.action_id.clone(),
                message: "ai_say needs `content` or `content_template`".to_string(),
            });
        }

        let mut debug_info = None;
        let message = if self.base.config.bool("rewrite").unwrap_or(true) {
            let prompt = format!(
                "Rewrite the following text so it reads naturally when spoken to the user. \
                 Keep its meaning and language. Reply with the rewritten text only.\n\n{content}"
            );
            match self
                .services
                .generation
                .generate_text(&prompt, &GenerationOptions::new(0.7, 500))
                .await
            {
                Ok(generated) if !generated.text.trim().is_empty() => {
                    let text = generated.text.trim().to_string();
                    debug_info = Some(generated.debug_info);
                    text
                }
                Ok(_) => content,
                Err(e) => {
                    tracing::warn!(
                        action_id = %self.base.action_id,
                        error = %e,
                        "rewrite failed, using original content"
                    );
                    content
                }
            }
        } else {
            content
        };

        let mut result = if acknowledge {
            self.base.current_round += 1;
            let mut waiting = ActionResult::waiting(Some(message));
            waiting.metadata.waiting_for = Some("acknowledgment".to_string());
            waiting
        } else {
            ActionResult::completed(Some(message))
        };
        result.debug_info = debug_info;
        Ok(result)
    }
}
