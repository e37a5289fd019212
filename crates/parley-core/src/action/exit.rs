//! Exit-decision evaluation shared by every multi-round action.
//!
//! Sources are checked in a fixed order and the first one that fires wins:
//!
//! 1. `max_rounds`: hard round ceiling
//! 2. `exit_flag`: `EXIT` / `exit` field in the model output
//! 3. `exit_criteria`: declarative conditions configured on the action
//! 4. `llm_suggestion`: `should_exit` in the model output
//!
//! A source that is not in the action's [`ExitPolicy`] is skipped.

use serde_json::{Map, Value};

use parley_types::exit::{
    ConditionOperator, CustomCondition, DecisionSource, ExitCriteria, ExitDecision, ExitPolicy,
};

use crate::template::substitute::value_to_text;

/// Result of checking the declarative criteria alone.
#[derive(Debug, Clone, PartialEq)]
pub enum CriteriaOutcome {
    /// Every applicable condition holds.
    Met(String),
    /// A condition failed; evaluation stops here.
    Failed(String),
    /// No condition was applicable, so the criteria say nothing.
    Incomplete,
}

/// Policy plus optional criteria for one action instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExitEvaluator {
    policy: ExitPolicy,
    criteria: Option<ExitCriteria>,
}

impl ExitEvaluator {
    pub fn new(policy: ExitPolicy, criteria: Option<ExitCriteria>) -> Self {
        Self { policy, criteria }
    }

    /// Evaluator that always says "continue".
    pub fn unsupported() -> Self {
        Self::new(ExitPolicy::unsupported(), None)
    }

    pub fn policy(&self) -> &ExitPolicy {
        &self.policy
    }

    pub fn criteria(&self) -> Option<&ExitCriteria> {
        self.criteria.as_ref()
    }

    /// Decide whether the action should stop after this round.
    ///
    /// `lookup` resolves script variables for custom conditions.
    pub fn evaluate<F>(
        &self,
        current_round: u32,
        max_rounds: u32,
        output: &Map<String, Value>,
        lookup: F,
    ) -> ExitDecision
    where
        F: Fn(&str) -> Option<Value>,
    {
        if !self.policy.supports_exit {
            return ExitDecision::stay(
                "action does not support exit",
                DecisionSource::LlmSuggestion,
            );
        }

        if self.policy.is_enabled(DecisionSource::MaxRounds) && current_round >= max_rounds {
            return ExitDecision::exit(
                format!("reached max rounds ({current_round}/{max_rounds})"),
                DecisionSource::MaxRounds,
            );
        }

        if self.policy.is_enabled(DecisionSource::ExitFlag) && exit_flag_set(output) {
            let reason = string_field(output, &["exit_reason", "BRIEF"])
                .unwrap_or_else(|| "exit flag set by model".to_string());
            return ExitDecision::exit(reason, DecisionSource::ExitFlag);
        }

        if self.policy.is_enabled(DecisionSource::ExitCriteria) {
            if let Some(criteria) = &self.criteria {
                match evaluate_criteria(criteria, current_round, output, &lookup) {
                    CriteriaOutcome::Met(reason) => {
                        return ExitDecision::exit(reason, DecisionSource::ExitCriteria);
                    }
                    CriteriaOutcome::Failed(reason) => {
                        return ExitDecision::stay(reason, DecisionSource::ExitCriteria);
                    }
                    CriteriaOutcome::Incomplete => {}
                }
            }
        }

        if self.policy.is_enabled(DecisionSource::LlmSuggestion)
            && (is_true(output.get("should_exit")) || is_true(output.get("shouldExit")))
        {
            let reason = string_field(output, &["exit_reason", "exitReason"])
                .unwrap_or_else(|| "model suggested exit".to_string());
            return ExitDecision::exit(reason, DecisionSource::LlmSuggestion);
        }

        ExitDecision::stay("no exit condition satisfied", DecisionSource::LlmSuggestion)
    }
}

/// Check the declarative criteria in order: min rounds, understanding,
/// open questions, then custom conditions.
pub fn evaluate_criteria<F>(
    criteria: &ExitCriteria,
    current_round: u32,
    output: &Map<String, Value>,
    lookup: &F,
) -> CriteriaOutcome
where
    F: Fn(&str) -> Option<Value>,
{
    let mut met = Vec::new();

    if let Some(min) = criteria.min_rounds.filter(|m| *m > 0) {
        if current_round < min {
            return CriteriaOutcome::Failed(format!(
                "round {current_round} is below min_rounds {min}"
            ));
        }
    }

    let assessment = assessment(output);

    if let Some(threshold) = criteria.understanding_threshold {
        let understanding = assessment
            .and_then(|a| a.get("understanding_level"))
            .map(to_number)
            .filter(|n| !n.is_nan())
            .unwrap_or(0.0);
        if understanding < threshold {
            return CriteriaOutcome::Failed(format!(
                "understanding {understanding} is below threshold {threshold}"
            ));
        }
        met.push(format!("understanding {understanding} >= {threshold}"));
    }

    if criteria.has_questions.is_some() {
        if is_true(assessment.and_then(|a| a.get("has_questions"))) {
            return CriteriaOutcome::Failed("user still has open questions".to_string());
        }
        met.push("no open questions".to_string());
    }

    for condition in &criteria.custom_conditions {
        let actual = lookup(&condition.variable);
        if !evaluate_condition(condition, actual.as_ref()) {
            return CriteriaOutcome::Failed(format!(
                "condition not met: {} {} {}",
                condition.variable, condition.operator, condition.value
            ));
        }
        met.push(format!(
            "{} {} {}",
            condition.variable, condition.operator, condition.value
        ));
    }

    if met.is_empty() {
        CriteriaOutcome::Incomplete
    } else {
        CriteriaOutcome::Met(format!("exit criteria met: {}", met.join(", ")))
    }
}

/// The assessment block, either nested under `metadata` or top-level.
fn assessment(output: &Map<String, Value>) -> Option<&Map<String, Value>> {
    output
        .get("metadata")
        .and_then(|m| m.get("assessment"))
        .and_then(Value::as_object)
        .or_else(|| output.get("assessment").and_then(Value::as_object))
}

fn exit_flag_set(output: &Map<String, Value>) -> bool {
    is_true(output.get("EXIT")) || is_true(output.get("exit"))
}

/// `true` or a case-insensitive `"true"`.
fn is_true(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn string_field(output: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| output.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
}

// ---------------------------------------------------------------------------
// Condition operators
// ---------------------------------------------------------------------------

/// Numeric coercion in the loose style scripts expect: blank strings are 0,
/// booleans are 0/1, and anything unparseable is NaN.
fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Loose equality: numbers and numeric strings compare by value, booleans
/// compare as 0/1, and `null` only equals a missing value or `null`.
fn loose_eq(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return expected.is_null();
    };
    match (actual, expected) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(_), _) | (_, Value::Number(_)) | (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            let (a, b) = (to_number(actual), to_number(expected));
            !a.is_nan() && !b.is_nan() && a == b
        }
        (a, b) => a == b,
    }
}

fn compare(actual: Option<&Value>, expected: &Value, op: fn(f64, f64) -> bool) -> bool {
    let a = actual.map(to_number).unwrap_or(f64::NAN);
    let b = to_number(expected);
    !a.is_nan() && !b.is_nan() && op(a, b)
}

pub fn evaluate_condition(condition: &CustomCondition, actual: Option<&Value>) -> bool {
    let expected = &condition.value;
    match condition.operator {
        ConditionOperator::Eq => loose_eq(actual, expected),
        ConditionOperator::Ne => !loose_eq(actual, expected),
        ConditionOperator::Gt => compare(actual, expected, |a, b| a > b),
        ConditionOperator::Lt => compare(actual, expected, |a, b| a < b),
        ConditionOperator::Ge => compare(actual, expected, |a, b| a >= b),
        ConditionOperator::Le => compare(actual, expected, |a, b| a <= b),
        ConditionOperator::Contains => match actual {
            Some(Value::String(s)) => s.contains(&value_to_text(expected)),
            Some(Value::Array(items)) => items.contains(expected),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn no_vars(_: &str) -> Option<Value> {
        None
    }

    fn criteria(value: Value) -> ExitCriteria {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_unsupported_policy_always_continues() {
        let eval = ExitEvaluator::unsupported();
        let decision = eval.evaluate(9, 1, &output(json!({"EXIT": true})), no_vars);
        assert!(!decision.should_exit);
        assert_eq!(decision.decision_source, DecisionSource::LlmSuggestion);
    }

    #[test]
    fn test_max_rounds_is_checked_first() {
        let eval = ExitEvaluator::default();
        let decision = eval.evaluate(3, 3, &output(json!({"EXIT": "false"})), no_vars);
        assert!(decision.should_exit);
        assert_eq!(decision.decision_source, DecisionSource::MaxRounds);
    }

    #[test]
    fn test_exit_flag_beats_criteria() {
        let eval = ExitEvaluator::new(
            ExitPolicy::default(),
            Some(criteria(json!({"understanding_threshold": 90}))),
        );
        let decision = eval.evaluate(
            1,
            5,
            &output(json!({"EXIT": "TRUE", "BRIEF": "got it", "assessment": {"understanding_level": 10}})),
            no_vars,
        );
        assert!(decision.should_exit);
        assert_eq!(decision.decision_source, DecisionSource::ExitFlag);
        assert_eq!(decision.reason, "got it");
    }

    #[test]
    fn test_disabled_source_is_skipped() {
        let policy = ExitPolicy::new(
            true,
            Some(vec![DecisionSource::MaxRounds, DecisionSource::LlmSuggestion]),
        );
        let eval = ExitEvaluator::new(policy, None);
        let decision = eval.evaluate(1, 5, &output(json!({"EXIT": true})), no_vars);
        assert!(!decision.should_exit);
        assert_eq!(decision.reason, "no exit condition satisfied");
    }

    #[test]
    fn test_understanding_threshold_reads_nested_assessment() {
        let eval = ExitEvaluator::new(
            ExitPolicy::default(),
            Some(criteria(json!({"understanding_threshold": 80}))),
        );
        let low = eval.evaluate(
            1,
            5,
            &output(json!({"metadata": {"assessment": {"understanding_level": "60"}}, "should_exit": true})),
            no_vars,
        );
        assert!(!low.should_exit);
        assert_eq!(low.decision_source, DecisionSource::ExitCriteria);

        let high = eval.evaluate(
            1,
            5,
            &output(json!({"assessment": {"understanding_level": 85}})),
            no_vars,
        );
        assert!(high.should_exit);
        assert_eq!(high.decision_source, DecisionSource::ExitCriteria);
        assert!(high.reason.starts_with("exit criteria met"));
    }

    #[test]
    fn test_open_questions_block_exit() {
        let c = criteria(json!({"has_questions": false}));
        let blocked = evaluate_criteria(
            &c,
            2,
            &output(json!({"assessment": {"has_questions": true}})),
            &no_vars,
        );
        assert!(matches!(blocked, CriteriaOutcome::Failed(_)));
        let clear = evaluate_criteria(&c, 2, &output(json!({"assessment": {}})), &no_vars);
        assert!(matches!(clear, CriteriaOutcome::Met(_)));
    }

    #[test]
    fn test_has_questions_true_is_checked_too() {
        let c = criteria(json!({"has_questions": true}));
        let clear = evaluate_criteria(
            &c,
            1,
            &output(json!({"assessment": {"has_questions": false}})),
            &no_vars,
        );
        assert_eq!(
            clear,
            CriteriaOutcome::Met("exit criteria met: no open questions".to_string())
        );
        let blocked = evaluate_criteria(
            &c,
            1,
            &output(json!({"metadata": {"assessment": {"has_questions": "true"}}})),
            &no_vars,
        );
        assert!(matches!(blocked, CriteriaOutcome::Failed(_)));
    }

    #[test]
    fn test_min_rounds_alone_is_incomplete() {
        let c = criteria(json!({"min_rounds": 2}));
        assert!(matches!(
            evaluate_criteria(&c, 1, &Map::new(), &no_vars),
            CriteriaOutcome::Failed(_)
        ));
        assert_eq!(
            evaluate_criteria(&c, 2, &Map::new(), &no_vars),
            CriteriaOutcome::Incomplete
        );
    }

    #[test]
    fn test_incomplete_falls_through_to_suggestion() {
        let eval = ExitEvaluator::new(ExitPolicy::default(), Some(ExitCriteria::default()));
        let decision = eval.evaluate(
            1,
            5,
            &output(json!({"shouldExit": true, "exitReason": "done"})),
            no_vars,
        );
        assert!(decision.should_exit);
        assert_eq!(decision.decision_source, DecisionSource::LlmSuggestion);
        assert_eq!(decision.reason, "done");
    }

    #[test]
    fn test_custom_conditions_use_lookup() {
        let c = criteria(json!({"custom_conditions": [
            {"variable": "score", "operator": ">=", "value": 7},
            {"variable": "tags", "operator": "contains", "value": "sleep"}
        ]}));
        let lookup = |name: &str| match name {
            "score" => Some(json!("8")),
            "tags" => Some(json!(["sleep", "work"])),
            _ => None,
        };
        assert!(matches!(
            evaluate_criteria(&c, 1, &Map::new(), &lookup),
            CriteriaOutcome::Met(_)
        ));

        let failing = |name: &str| match name {
            "score" => Some(json!(3)),
            _ => None,
        };
        assert!(matches!(
            evaluate_criteria(&c, 1, &Map::new(), &failing),
            CriteriaOutcome::Failed(_)
        ));
    }

    #[test]
    fn test_operator_coercion() {
        let cond = |op: ConditionOperator, value: Value| CustomCondition {
            variable: "x".into(),
            operator: op,
            value,
        };
        assert!(evaluate_condition(&cond(ConditionOperator::Eq, json!(5)), Some(&json!("5"))));
        assert!(evaluate_condition(&cond(ConditionOperator::Eq, json!(1)), Some(&json!(true))));
        assert!(evaluate_condition(&cond(ConditionOperator::Ne, json!("a")), Some(&json!("b"))));
        assert!(evaluate_condition(&cond(ConditionOperator::Eq, json!(null)), None));
        assert!(!evaluate_condition(&cond(ConditionOperator::Gt, json!(1)), Some(&json!("abc"))));
        assert!(!evaluate_condition(&cond(ConditionOperator::Lt, json!(1)), None));
        assert!(evaluate_condition(&cond(ConditionOperator::Le, json!("2")), Some(&json!(2))));
        assert!(evaluate_condition(
            &cond(ConditionOperator::Contains, json!("tired")),
            Some(&json!("always tired lately"))
        ));
        assert!(!evaluate_condition(&cond(ConditionOperator::Contains, json!(1)), Some(&json!(5))));
    }
}
