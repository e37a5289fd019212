//! `ai_ask`: ask the user for information and capture the answer.
//!
//! **Multi-round** (when `output` or `exit` is configured): the model keeps
//! asking follow-up questions, reports extracted `output` fields as it goes,
//! and raises `EXIT` once it has what it needs. On exit every output
//! variable is filled from the latest model output, the conversation
//! history, a targeted extraction call, or the raw answer, in that order.
//!
//! **Simple**: one question, and the next non-empty answer is stored in
//! `target_variable`.

use serde_json::{Map, Value, json};

use parley_types::action::{ActionMetadata, ActionResult, ExitReason, ProgressSuggestion};
use parley_types::exit::{DecisionSource, ExitDecision, ExitPolicy};
use parley_types::execution::HistoryEntry;
use parley_types::llm::{GenerationDebugInfo, GenerationOptions, MessageRole};
use parley_types::variable::{VariableDefinition, VariableScope};

use super::{
    ActionBase, ActionContext, ActionError, ActionServices, ExitEvaluator, record_template,
    render_template,
};
use crate::llm::structured::{
    ParsedOutput, extract_metrics, extract_progress, first_string, parse_structured_output,
};
use crate::template::ResolvedTemplate;

const TEMPLATE_KEY: &str = "ai_ask";
const DEFAULT_MAX_ROUNDS: u32 = 3;
const DEFAULT_TONE: &str = "warm, empathetic and professional";
const DEFAULT_EXIT: &str = "the user has provided enough information";
const EMPTY_ANSWER_PROMPT: &str = "Please provide your answer.";
const CHAT_WINDOW: usize = 5;

/// One entry of the `output` list: `{get, define?}`.
#[derive(Debug, Clone, PartialEq)]
struct OutputSpec {
    name: String,
    define: Option<String>,
}

/// A generated question plus everything needed to report it.
struct Generated {
    message: String,
    parsed: ParsedOutput,
    template: ResolvedTemplate,
    debug_info: GenerationDebugInfo,
}

pub struct AiAskAction {
    pub(crate) base: ActionBase,
    services: ActionServices,
    exit: ExitEvaluator,
    multi_round: bool,
}

impl AiAskAction {
    pub const ACTION_TYPE: &'static str = "ai_ask";

    pub fn new(
        action_id: impl Into<String>,
        config: Map<String, Value>,
        services: ActionServices,
    ) -> Self {
        let base = ActionBase::new(action_id, config, DEFAULT_MAX_ROUNDS);
        let multi_round = !base.config.array("output").is_empty() || base.config.has("exit");
        let policy = ExitPolicy::new(
            multi_round,
            Some(vec![
                DecisionSource::MaxRounds,
                DecisionSource::ExitFlag,
                DecisionSource::LlmSuggestion,
            ]),
        );
        Self {
            base,
            services,
            exit: ExitEvaluator::new(policy, None),
            multi_round,
        }
    }

    pub fn is_multi_round(&self) -> bool {
        self.multi_round
    }

    fn outputs(&self) -> Vec<OutputSpec> {
        self.base
            .config
            .array("output")
            .iter()
            .filter_map(|entry| {
                let name = entry.get("get")?.as_str().filter(|s| !s.is_empty())?;
                let define = entry
                    .get("define")
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .map(str::to_string);
                Some(OutputSpec {
                    name: name.to_string(),
                    define,
                })
            })
            .collect()
    }

    fn target_variable(&self) -> Option<&str> {
        self.base
            .config
            .first_str(&["target_variable", "extract_to"])
    }

    /// Define every output variable in topic scope unless already defined.
    fn register_outputs(&self, ctx: &mut ActionContext<'_, '_>) {
        for field in self.outputs() {
            if ctx.resolver.get_variable_definition(&field.name).is_some() {
                tracing::trace!(variable = %field.name, "output variable already defined");
                continue;
            }
            let define = field
                .define
                .unwrap_or_else(|| format!("Auto-registered from ai_ask output: {}", field.name));
            ctx.resolver.set_variable_definition(VariableDefinition {
                name: field.name,
                scope: VariableScope::Topic,
                define: Some(define),
            });
        }
    }

    pub(crate) async fn execute(
        &mut self,
        ctx: &mut ActionContext<'_, '_>,
        user_input: Option<&str>,
    ) -> Result<ActionResult, ActionError> {
        if self.base.current_round == 0 {
            self.register_outputs(ctx);
        }
        if self.multi_round {
            self.execute_multi_round(ctx, user_input).await
        } else {
            self.execute_simple(ctx, user_input).await
        }
    }

    fn round_metadata(&self) -> ActionMetadata {
        ActionMetadata {
            current_round: Some(self.base.current_round),
            max_rounds: Some(self.base.max_rounds),
            ..Default::default()
        }
    }

    fn empty_answer(&self) -> ActionResult {
        let mut result = ActionResult::waiting(Some(EMPTY_ANSWER_PROMPT.to_string()));
        result.metadata = self.round_metadata();
        result.metadata.validation_failed = true;
        result.metadata.waiting_for = Some("answer".to_string());
        result
    }

    // -----------------------------------------------------------------------
    // Multi-round
    // -----------------------------------------------------------------------

    async fn execute_multi_round(
        &mut self,
        ctx: &mut ActionContext<'_, '_>,
        user_input: Option<&str>,
    ) -> Result<ActionResult, ActionError> {
        if self.base.current_round == 0 {
            self.base.current_round = 1;
            let generated = self.generate(ctx).await?;
            let mut result = self.round_result(generated, false);
            result.metadata.waiting_for = Some("answer".to_string());
            return Ok(result);
        }

        let Some(input) = user_input.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(self.empty_answer());
        };

        self.base.current_round += 1;
        let round = self.base.current_round;
        let max = self.base.max_rounds;

        if round > max {
            tracing::debug!(action_id = %self.base.action_id, round, max, "ai_ask past ceiling, finishing");
            let decision = ExitDecision::exit(
                format!("reached max rounds ({max})"),
                DecisionSource::MaxRounds,
            );
            let extracted = self.finish(ctx, input, None, true).await;
            self.base.current_round = 0;
            let mut result = ActionResult::completed(None);
            result.extracted_variables = extracted;
            result.metadata = ActionMetadata {
                current_round: Some(round.min(max)),
                max_rounds: Some(max),
                exit_decision: Some(decision),
                exit_reason: Some(ExitReason::MaxRoundsReached),
                ..Default::default()
            };
            return Ok(result);
        }

        let generated = self.generate(ctx).await?;
        let output = generated.parsed.value.clone();
        let progress = extract_progress(&output);
        let decision = self.exit.evaluate(round, max, &output, |name| ctx.resolve(name));

        let exit_reason = if round >= max {
            Some(ExitReason::MaxRoundsReached)
        } else if decision.should_exit && decision.decision_source == DecisionSource::ExitFlag {
            Some(ExitReason::ExitCriteriaMet)
        } else if progress == ProgressSuggestion::Blocked {
            Some(ExitReason::UserBlocked)
        } else if progress == ProgressSuggestion::OffTopic {
            Some(ExitReason::OffTopic)
        } else {
            None
        };

        if decision.should_exit {
            let forced = decision.decision_source == DecisionSource::MaxRounds;
            let extracted = self.finish(ctx, input, Some(&output), forced).await;
            tracing::debug!(
                action_id = %self.base.action_id,
                round,
                source = %decision.decision_source,
                extracted = extracted.len(),
                "ai_ask finished"
            );

            let mut result = self.round_result(generated, true);
            result.ai_message = None;
            result.extracted_variables = extracted;
            result.metadata.exit_decision = Some(decision);
            result.metadata.exit_reason = exit_reason;
            self.base.current_round = 0;
            return Ok(result);
        }

        let mut result = self.round_result(generated, false);
        result.metadata.waiting_for = Some("answer".to_string());
        result.metadata.exit_decision = Some(decision);
        result.metadata.exit_reason = exit_reason;
        Ok(result)
    }

    /// Build the result for a generated round.
    fn round_result(&self, generated: Generated, completed: bool) -> ActionResult {
        let output = &generated.parsed.value;
        let mut extracted = Map::new();
        for field in self.outputs() {
            if let Some(value) = output.get(&field.name).filter(|v| is_present(v)) {
                extracted.insert(field.name, value.clone());
            }
        }

        let mut metadata = self.round_metadata();
        metadata.llm_raw_output = Some(Value::Object(output.clone()));
        metadata.parse_error = generated.parsed.retry_count > 1;
        metadata.parse_retry_count =
            (generated.parsed.retry_count > 1).then_some(generated.parsed.retry_count);
        if let Some(brief) = first_string(output, &["BRIEF"]) {
            metadata.extra.insert("brief".into(), json!(brief));
        }
        if let Some(failure) = &generated.parsed.failure {
            metadata
                .extra
                .insert("parse_error_details".into(), json!(failure));
        }
        record_template(&mut metadata, &generated.template);

        ActionResult {
            success: true,
            completed,
            ai_message: (!generated.message.is_empty()).then_some(generated.message),
            extracted_variables: extracted,
            metrics: extract_metrics(output),
            progress_suggestion: Some(extract_progress(output)),
            metadata,
            debug_info: Some(generated.debug_info),
            ..Default::default()
        }
    }

    /// Collect the final value of every output variable.
    async fn finish(
        &self,
        ctx: &ActionContext<'_, '_>,
        input: &str,
        latest: Option<&Map<String, Value>>,
        forced: bool,
    ) -> Map<String, Value> {
        let mut extracted = Map::new();
        for field in self.outputs() {
            let mut value = latest
                .and_then(|o| o.get(&field.name))
                .filter(|v| is_present(v))
                .cloned()
                .or_else(|| find_in_history(ctx.history, &field.name));

            if value.is_none() && !forced {
                if let Some(define) = &field.define {
                    value = self.extract_with_model(ctx, &field.name, define).await;
                }
            }

            extracted.insert(field.name, value.unwrap_or_else(|| json!(input)));
        }

        if let Some(target) = self.target_variable() {
            if !extracted.contains_key(target) {
                extracted.insert(target.to_string(), json!(input));
            }
        }
        extracted
    }

    async fn extract_with_model(
        &self,
        ctx: &ActionContext<'_, '_>,
        name: &str,
        define: &str,
    ) -> Option<Value> {
        let start = ctx
            .history
            .len()
            .saturating_sub(self.services.generation.history_window());
        let transcript = ctx.history[start..]
            .iter()
            .map(|entry| format!("{}: {}", entry.role, entry.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Extract one piece of information from the conversation below.\n\n\
             Conversation:\n{transcript}\n\n\
             Variable: {name}\nWhat to extract: {define}\n\n\
             Reply with the extracted value only."
        );

        match self
            .services
            .generation
            .generate_text(&prompt, &GenerationOptions::new(0.3, 500))
            .await
        {
            Ok(generated) => {
                let text = generated.text.trim();
                (!text.is_empty()).then(|| json!(text))
            }
            Err(e) => {
                tracing::warn!(variable = name, error = %e, "variable extraction failed");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Simple
    // -----------------------------------------------------------------------

    async fn execute_simple(
        &mut self,
        ctx: &mut ActionContext<'_, '_>,
        user_input: Option<&str>,
    ) -> Result<ActionResult, ActionError> {
        let target = self.target_variable().map(str::to_string);

        if self.base.current_round == 0 {
            self.base.current_round = 1;
            let generated = self.generate(ctx).await?;
            let mut metadata = self.round_metadata();
            metadata.waiting_for = Some("answer".to_string());
            record_template(&mut metadata, &generated.template);
            if let Some(target) = &target {
                metadata.extra.insert("extract_to".into(), json!(target));
            }
            let mut result = ActionResult::waiting(Some(generated.message));
            result.metadata = metadata;
            result.debug_info = Some(generated.debug_info);
            return Ok(result);
        }

        let Some(input) = user_input.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(self.empty_answer());
        };

        let mut result = ActionResult::completed(None);
        if let Some(target) = target {
            result.extracted_variables.insert(target, json!(input));
        }
        result.metadata.extra.insert("answer_received".into(), json!(true));
        self.base.current_round = 0;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Prompting
    // -----------------------------------------------------------------------

    /// The question prompt shows a shorter tail than extraction reads.
    fn chat_window(&self) -> usize {
        CHAT_WINDOW.min(self.services.generation.history_window())
    }

    fn output_list(&self) -> String {
        self.outputs()
            .iter()
            .map(|field| match &field.define {
                Some(define) => format!("  \"{0}\": \"extracted {0}\"  // {define}", field.name),
                None => format!("  \"{0}\": \"extracted {0}\"", field.name),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn prompt_variables(&self, ctx: &ActionContext<'_, '_>) -> (Map<String, Value>, Map<String, Value>) {
        let text = |name: &str, default: &str| {
            ctx.resolve(name)
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let who = text("ai_name", "AI assistant");
        let user = text("user_name", "user");
        let chat = ctx.recent_history(self.chat_window(), &user, &who).join("\n");

        let mut system = Map::new();
        system.insert("time".into(), json!(chrono::Utc::now().to_rfc3339()));
        system.insert("who".into(), json!(who));
        system.insert("user".into(), json!(user));
        system.insert(
            "tone".into(),
            json!(self.base.config.str("tone").unwrap_or(DEFAULT_TONE)),
        );
        system.insert("chat".into(), json!(chat));
        system.insert(
            "ai_role".into(),
            json!(self.base.config.str("ai_role").unwrap_or("assistant")),
        );
        system.insert("output_list".into(), json!(self.output_list()));

        let mut script = ctx.visible_variables();
        let task = self
            .base
            .config
            .first_str(&["question_template", "prompt_template"])
            .unwrap_or_default();
        script.insert("task".into(), json!(ctx.substitute(task)));
        script.insert(
            "exit".into(),
            json!(self.base.config.str("exit").unwrap_or(DEFAULT_EXIT)),
        );
        (system, script)
    }

    async fn generate(&self, ctx: &ActionContext<'_, '_>) -> Result<Generated, ActionError> {
        let (system_vars, script_vars) = self.prompt_variables(ctx);
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
            .generate_text(&prompt, &GenerationOptions::new(0.7, 800))
            .await?;
        let parsed = parse_structured_output(&generated.text);
        let ai_role = self.base.config.str("ai_role").unwrap_or("assistant");
        let message = first_string(&parsed.value, &["content", ai_role, "response"])
            .unwrap_or_else(|| generated.text.trim().to_string());

        Ok(Generated {
            message,
            parsed,
            template,
            debug_info: generated.debug_info,
        })
    }
}

/// Non-null and, for strings, non-empty.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Most recent assistant output that carries `name`.
fn find_in_history(history: &[HistoryEntry], name: &str) -> Option<Value> {
    history
        .iter()
        .rev()
        .filter(|entry| entry.role == MessageRole::Assistant)
        .filter_map(|entry| entry.metadata.as_ref()?.llm_raw_output.as_ref())
        .find_map(|raw| raw.get(name).filter(|v| is_present(v)).cloned())
}
