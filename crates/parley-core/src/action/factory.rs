//! Action construction keyed by `action_type`, plus thawing of frozen actions.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use parley_types::action::ActionStateSnapshot;
use parley_types::script::ActionDefinition;

use super::{Action, ActionError, ActionServices, AiAskAction, AiSayAction, AiThinkAction};

/// The action types a script may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Say,
    Ask,
    Think,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Say, ActionKind::Ask, ActionKind::Think];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Say => AiSayAction::ACTION_TYPE,
            ActionKind::Ask => AiAskAction::ACTION_TYPE,
            ActionKind::Think => AiThinkAction::ACTION_TYPE,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ActionError::UnknownActionType(s.to_string()))
    }
}

/// Builds actions with their services injected.
#[derive(Clone)]
pub struct ActionFactory {
    services: ActionServices,
}

impl ActionFactory {
    pub fn new(services: ActionServices) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &ActionServices {
        &self.services
    }

    /// A fresh instance from its type name, id, and merged config.
    pub fn create_from(
        &self,
        action_type: &str,
        action_id: &str,
        config: Map<String, Value>,
    ) -> Result<Action, ActionError> {
        let action = match action_type.parse::<ActionKind>()? {
            ActionKind::Say => Action::Say(AiSayAction::new(
                action_id,
                config,
                self.services.clone(),
            )?),
            ActionKind::Ask => {
                Action::Ask(AiAskAction::new(action_id, config, self.services.clone()))
            }
            ActionKind::Think => Action::Think(AiThinkAction::new(action_id, config)),
        };
        tracing::debug!(action_id, action_type, "created action");
        Ok(action)
    }

    /// A fresh instance for a script slot.
    pub fn create(&self, definition: &ActionDefinition) -> Result<Action, ActionError> {
        self.create_from(
            &definition.action_type,
            &definition.action_id,
            definition.merged_config(),
        )
    }

    /// Rebuild a frozen action and restore its round counters.
    pub fn thaw(&self, snapshot: &ActionStateSnapshot) -> Result<Action, ActionError> {
        let mut action = self.create_from(
            &snapshot.action_type,
            &snapshot.action_id,
            snapshot.config.clone(),
        )?;
        action.restore_rounds(snapshot.current_round, snapshot.max_rounds);
        tracing::debug!(
            action_id = %snapshot.action_id,
            current_round = snapshot.current_round,
            max_rounds = snapshot.max_rounds,
            "thawed action"
        );
        Ok(action)
    }
}
