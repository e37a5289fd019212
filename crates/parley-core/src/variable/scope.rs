//! Four-tier variable scope resolver.
//!
//! Every variable read and write in the engine goes through
//! [`ScopeResolver`]. Writes land in exactly one bucket, chosen from the
//! variable's declared definition (topic when undeclared). Reads search
//! topic, then phase, then session, then global.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;

use parley_types::variable::{
    ScopePosition, SOURCE_MIGRATED, VariableBucket, VariableDefinition, VariableOperation,
    VariableScope, VariableStore, VariableType, VariableValue,
};

/// A write that could not be placed in its bucket.
///
/// Never fatal: the executor logs it and drops the variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeWriteError {
    #[error("cannot write '{variable}' to phase scope: phase id is missing")]
    MissingPhaseId { variable: String },

    #[error("cannot write '{variable}' to topic scope: topic id is missing")]
    MissingTopicId { variable: String },
}

/// Outcome of [`ScopeResolver::validate_store_structure`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Read/write access to a variable store and its definitions.
///
/// Borrowed from an `ExecutionState` for the duration of one call.
pub struct ScopeResolver<'a> {
    store: &'a mut VariableStore,
    definitions: &'a mut BTreeMap<String, VariableDefinition>,
    operations: Vec<VariableOperation>,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(
        store: &'a mut VariableStore,
        definitions: &'a mut BTreeMap<String, VariableDefinition>,
    ) -> Self {
        Self {
            store,
            definitions,
            operations: Vec::new(),
        }
    }

    pub fn store(&self) -> &VariableStore {
        self.store
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Declared scope for `name`, or [`VariableScope::Topic`] when undeclared.
    pub fn determine_scope(&self, name: &str) -> VariableScope {
        match self.definitions.get(name) {
            Some(def) => def.scope,
            None => {
                tracing::trace!(variable = name, "undeclared variable, defaulting to topic scope");
                VariableScope::Topic
            }
        }
    }

    pub fn get_variable_definition(&self, name: &str) -> Option<&VariableDefinition> {
        self.definitions.get(name)
    }

    /// Add or replace a definition.
    pub fn set_variable_definition(&mut self, definition: VariableDefinition) {
        tracing::debug!(
            variable = %definition.name,
            scope = %definition.scope,
            "registered variable definition"
        );
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn set_variable_definitions(
        &mut self,
        definitions: impl IntoIterator<Item = VariableDefinition>,
    ) {
        for definition in definitions {
            self.set_variable_definition(definition);
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Look `name` up in topic, phase, session, then global order.
    pub fn resolve_variable(&self, name: &str, position: &ScopePosition) -> Option<&VariableValue> {
        let topic = position
            .topic_id
            .as_deref()
            .and_then(|id| self.store.topic.get(id))
            .and_then(|bucket| bucket.get(name));
        let phase = || {
            position
                .phase_id
                .as_deref()
                .and_then(|id| self.store.phase.get(id))
                .and_then(|bucket| bucket.get(name))
        };

        topic
            .or_else(phase)
            .or_else(|| self.store.session.get(name))
            .or_else(|| self.store.global.get(name))
    }

    /// Convenience: the raw value of [`Self::resolve_variable`].
    pub fn resolve_value(&self, name: &str, position: &ScopePosition) -> Option<&Value> {
        self.resolve_variable(name, position).map(|v| &v.value)
    }

    /// Every variable visible at `position`, shadowed by scope priority.
    pub fn visible_variables(&self, position: &ScopePosition) -> Map<String, Value> {
        let mut out = Map::new();
        let layers = [
            Some(&self.store.global),
            Some(&self.store.session),
            position
                .phase_id
                .as_deref()
                .and_then(|id| self.store.phase.get(id)),
            position
                .topic_id
                .as_deref()
                .and_then(|id| self.store.topic.get(id)),
        ];
        for bucket in layers.into_iter().flatten() {
            merge_bucket(&mut out, bucket);
        }
        out
    }

    /// Caller-facing flat view of the whole store.
    ///
    /// Variables in phase and topic buckets other than the current ones are
    /// included at the lowest priority; visible variables override them.
    pub fn flatten(&self, position: &ScopePosition) -> Map<String, Value> {
        let mut out = Map::new();
        for (id, bucket) in &self.store.phase {
            if position.phase_id.as_deref() != Some(id.as_str()) {
                merge_bucket(&mut out, bucket);
            }
        }
        for (id, bucket) in &self.store.topic {
            if position.topic_id.as_deref() != Some(id.as_str()) {
                merge_bucket(&mut out, bucket);
            }
        }
        for (name, value) in self.visible_variables(position) {
            out.insert(name, value);
        }
        out
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write `value` into the bucket for `scope`.
    ///
    /// The source defaults to the position's action id. Phase and topic
    /// writes need the matching id in `position`.
    pub fn set_variable(
        &mut self,
        name: &str,
        value: Value,
        scope: VariableScope,
        position: &ScopePosition,
        source: Option<&str>,
    ) -> Result<(), ScopeWriteError> {
        let source = source
            .or(position.action_id.as_deref())
            .unwrap_or("unknown")
            .to_string();
        let wrapped = VariableValue::new(value.clone(), scope, source.clone());

        let bucket = match scope {
            VariableScope::Global => &mut self.store.global,
            VariableScope::Session => &mut self.store.session,
            VariableScope::Phase => {
                let id = position.phase_id.as_ref().ok_or_else(|| {
                    ScopeWriteError::MissingPhaseId {
                        variable: name.to_string(),
                    }
                })?;
                self.store.phase.entry(id.clone()).or_default()
            }
            VariableScope::Topic => {
                let id = position.topic_id.as_ref().ok_or_else(|| {
                    ScopeWriteError::MissingTopicId {
                        variable: name.to_string(),
                    }
                })?;
                self.store.topic.entry(id.clone()).or_default()
            }
        };
        bucket.insert(name.to_string(), wrapped);

        tracing::debug!(variable = name, scope = %scope, source = %source, "set variable");
        self.operations.push(VariableOperation {
            operation: "extract".to_string(),
            variable_name: name.to_string(),
            scope,
            value,
            source,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Write using the scope from [`Self::determine_scope`].
    pub fn set_in_determined_scope(
        &mut self,
        name: &str,
        value: Value,
        position: &ScopePosition,
        source: Option<&str>,
    ) -> Result<VariableScope, ScopeWriteError> {
        let scope = self.determine_scope(name);
        self.set_variable(name, value, scope, position, source)?;
        Ok(scope)
    }

    /// Seed `name` only when no bucket on the lookup path has it.
    pub fn seed_if_absent(
        &mut self,
        name: &str,
        value: Value,
        scope: VariableScope,
        position: &ScopePosition,
        source: &str,
    ) -> Result<bool, ScopeWriteError> {
        let present = match scope {
            VariableScope::Global => self.store.global.contains_key(name),
            VariableScope::Session => self.store.session.contains_key(name),
            VariableScope::Phase => position
                .phase_id
                .as_deref()
                .and_then(|id| self.store.phase.get(id))
                .is_some_and(|b| b.contains_key(name)),
            VariableScope::Topic => position
                .topic_id
                .as_deref()
                .and_then(|id| self.store.topic.get(id))
                .is_some_and(|b| b.contains_key(name)),
        };
        if present {
            return Ok(false);
        }
        self.set_variable(name, value, scope, position, Some(source))?;
        Ok(true)
    }

    /// Move a legacy flat variable map into the session bucket.
    ///
    /// Names already present in the session bucket are left untouched.
    pub fn migrate_to_variable_store(&mut self, legacy: Map<String, Value>) -> usize {
        let mut migrated = 0;
        for (name, value) in legacy {
            if self.store.session.contains_key(&name) {
                continue;
            }
            self.store.session.insert(
                name,
                VariableValue::new(value, VariableScope::Session, SOURCE_MIGRATED),
            );
            migrated += 1;
        }
        if migrated > 0 {
            tracing::info!(count = migrated, "migrated legacy variables into session scope");
        }
        migrated
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Check that every stored value sits in the bucket its `scope` names and
    /// that its type tag matches its value.
    pub fn validate_store_structure(&self) -> StoreValidation {
        let mut errors = Vec::new();
        let mut check = |label: String, bucket: &VariableBucket, expected: VariableScope| {
            for (name, var) in bucket {
                if var.scope != expected {
                    errors.push(format!(
                        "{label}: variable '{name}' is tagged {} but stored in {expected}",
                        var.scope
                    ));
                }
                if var.value_type != VariableType::of(&var.value) {
                    errors.push(format!(
                        "{label}: variable '{name}' has type tag {} but holds {}",
                        var.value_type,
                        VariableType::of(&var.value)
                    ));
                }
            }
        };

        check("global".to_string(), &self.store.global, VariableScope::Global);
        check("session".to_string(), &self.store.session, VariableScope::Session);
        for (id, bucket) in &self.store.phase {
            check(format!("phase '{id}'"), bucket, VariableScope::Phase);
        }
        for (id, bucket) in &self.store.topic {
            check(format!("topic '{id}'"), bucket, VariableScope::Topic);
        }

        if !errors.is_empty() {
            tracing::warn!(errors = errors.len(), "variable store failed validation");
        }
        StoreValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Writes performed through this resolver, oldest first.
    pub fn variable_operations(&self) -> &[VariableOperation] {
        &self.operations
    }

    /// Hand the write log to the caller, leaving it empty.
    pub fn take_variable_operations(&mut self) -> Vec<VariableOperation> {
        std::mem::take(&mut self.operations)
    }
}

fn merge_bucket(out: &mut Map<String, Value>, bucket: &VariableBucket) {
    for (name, var) in bucket {
        out.insert(name.clone(), var.value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pos() -> ScopePosition {
        ScopePosition::new("p1", "t1", "a1")
    }

    fn def(name: &str, scope: VariableScope) -> VariableDefinition {
        VariableDefinition {
            name: name.to_string(),
            scope,
            define: None,
        }
    }

    #[test]
    fn test_undeclared_variables_default_to_topic() {
        let mut store = VariableStore::new();
        let mut defs = BTreeMap::new();
        let mut resolver = ScopeResolver::new(&mut store, &mut defs);

        let scope = resolver
            .set_in_determined_scope("mood", json!("calm"), &pos(), None)
            .unwrap();
        assert_eq!(scope, VariableScope::Topic);
        drop(resolver);

        let stored = &store.topic["t1"]["mood"];
        assert_eq!(stored.value, json!("calm"));
        assert_eq!(stored.source, "a1");
        assert_eq!(stored.scope, VariableScope::Topic);
    }

    #[test]
    fn test_declared_scope_wins() {
        let mut store = VariableStore::new();
        let mut defs = BTreeMap::new();
        let mut resolver = ScopeResolver::new(&mut store, &mut defs);
        resolver.set_variable_definition(def("user_name", VariableScope::Session));

        resolver
            .set_in_determined_scope("user_name", json!("Ada"), &pos(), None)
            .unwrap();
        drop(resolver);
        assert!(store.session.contains_key("user_name"));
        assert!(store.topic.is_empty());
    }

    #[test]
    fn test_resolve_prefers_narrowest_scope() {
        let mut store = VariableStore::new();
        let mut defs = BTreeMap::new();
        let mut resolver = ScopeResolver::new(&mut store, &mut defs);
        let p = pos();

        resolver.set_variable("x", json!("global"), VariableScope::Global, &p, None).unwrap();
        resolver.set_variable("x", json!("session"), VariableScope::Session, &p, None).unwrap();
        assert_eq!(resolver.resolve_value("x", &p), Some(&json!("session")));

        resolver.set_variable("x", json!("phase"), VariableScope::Phase, &p, None).unwrap();
        assert_eq!(resolver.resolve_value("x", &p), Some(&json!("phase")));

        resolver.set_variable("x", json!("topic"), VariableScope::Topic, &p, None).unwrap();
        assert_eq!(resolver.resolve_value("x", &p), Some(&json!("topic")));

        // A different topic in the same phase falls back to the phase value.
        let other = ScopePosition::new("p1", "t2", "a9");
        assert_eq!(resolver.resolve_value("x", &other), Some(&json!("phase")));
        assert!(resolver.resolve_variable("missing", &p).is_none());
    }

    #[test]
    fn test_topic_write_without_id_is_skipped() {
        let mut store = VariableStore::new();
        let mut defs = BTreeMap::new();
        let mut resolver = ScopeResolver::new(&mut store, &mut defs);
        let no_topic = ScopePosition {
            phase_id: Some("p1".into()),
            topic_id: None,
            action_id: Some("a1".into()),
        };

        let err = resolver
            .set_variable("x", json!(1), VariableScope::Topic, &no_topic, None)
            .unwrap_err();
        assert_eq!(
            err,
            ScopeWriteError::MissingTopicId {
                variable: "x".into()
            }
        );
        assert!(resolver.variable_operations().is_empty());
        drop(resolver);
        assert!(store.is_empty());
    }

    #[test]
    fn test_writes_are_logged() {
        let mut store = VariableStore::new();
        let mut defs = BTreeMap::new();
        let mut resolver = ScopeResolver::new(&mut store, &mut defs);

        resolver
            .set_variable("age", json!(30), VariableScope::Session, &pos(), Some("intake"))
            .unwrap();
        let ops = resolver.variable_operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation, "extract");
        assert_eq!(ops[0].source, "intake");

        let taken = resolver.take_variable_operations();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].variable_name, "age");
        assert!(resolver.variable_operations().is_empty());
    }

    #[test]
    fn test_seed_if_absent_does_not_overwrite() {
        let mut store = VariableStore::new();
        let mut defs = BTreeMap::new();
        let mut resolver = ScopeResolver::new(&mut store, &mut defs);
        let p = pos();

        assert!(resolver
            .seed_if_absent("tone", json!("warm"), VariableScope::Session, &p, "declaration")
            .unwrap());
        resolver.set_variable("tone", json!("formal"), VariableScope::Session, &p, None).unwrap();
        assert!(!resolver
            .seed_if_absent("tone", json!("warm"), VariableScope::Session, &p, "declaration")
            .unwrap());
        assert_eq!(resolver.resolve_value("tone", &p), Some(&json!("formal")));
    }

    #[test]
    fn test_migration_moves_flat_map_to_session() {
        let mut store = VariableStore::new();
        let mut defs = BTreeMap::new();
        let mut resolver = ScopeResolver::new(&mut store, &mut defs);

        let mut legacy = Map::new();
        legacy.insert("name".into(), json!("Ada"));
        legacy.insert("age".into(), json!(36));
        assert_eq!(resolver.migrate_to_variable_store(legacy), 2);
        drop(resolver);

        assert_eq!(store.session["name"].source, SOURCE_MIGRATED);
        assert_eq!(store.session["age"].value_type, VariableType::Number);
    }

    #[test]
    fn test_flatten_orders_by_priority() {
        let mut store = VariableStore::new();
        let mut defs = BTreeMap::new();
        let mut resolver = ScopeResolver::new(&mut store, &mut defs);
        let p = pos();
        let old_topic = ScopePosition::new("p1", "t0", "a0");

        resolver.set_variable("stale", json!("old"), VariableScope::Topic, &old_topic, None).unwrap();
        resolver.set_variable("name", json!("from_old_topic"), VariableScope::Topic, &old_topic, None).unwrap();
        resolver.set_variable("name", json!("session"), VariableScope::Session, &p, None).unwrap();
        resolver.set_variable("goal", json!("global"), VariableScope::Global, &p, None).unwrap();
        resolver.set_variable("goal", json!("topic"), VariableScope::Topic, &p, None).unwrap();

        let flat = resolver.flatten(&p);
        assert_eq!(flat["stale"], json!("old"));
        assert_eq!(flat["name"], json!("session"));
        assert_eq!(flat["goal"], json!("topic"));

        let visible = resolver.visible_variables(&p);
        assert!(!visible.contains_key("stale"));
    }

    #[test]
    fn test_validation_flags_misplaced_values() {
        let mut store = VariableStore::new();
        store.session.insert(
            "oops".into(),
            VariableValue::new(json!(1), VariableScope::Topic, "test"),
        );
        let mut defs = BTreeMap::new();
        let resolver = ScopeResolver::new(&mut store, &mut defs);

        let report = resolver.validate_store_structure();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("oops"));
    }
}
