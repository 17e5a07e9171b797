//! Exchange rules: which instance events become reference copies.
//!
//! Two rule sets are kept apart on purpose. `should_save` governs events
//! pushed over the cohort channel; `should_learn` governs instances pulled in
//! by a direct query. Both also require the instance's type to be active
//! locally.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use cohort_instances::InstanceHeader;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::TypeActivity;

/// Policy predicates consumed by the dispatcher and the retrieval processor.
pub trait ExchangeRuleEngine: Send + Sync {
    /// Should an instance event from `source` be saved as a reference copy?
    fn should_save(&self, source: &str, header: &InstanceHeader) -> bool;

    /// Should an instance retrieved from `source` by query be cached?
    fn should_learn(&self, source: &str, header: &InstanceHeader) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeRuleKind {
    /// Membership traffic only; no instances.
    RegistrationOnly,
    /// Type definitions only; no instances.
    JustTypeDefs,
    /// Instances of the selected types.
    SelectedTypes,
    /// Selected types, plus types picked up from query results.
    LearnedTypes,
    #[default]
    All,
}

impl std::fmt::Display for ExchangeRuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeRuleKind::RegistrationOnly => write!(f, "registration_only"),
            ExchangeRuleKind::JustTypeDefs => write!(f, "just_type_defs"),
            ExchangeRuleKind::SelectedTypes => write!(f, "selected_types"),
            ExchangeRuleKind::LearnedTypes => write!(f, "learned_types"),
            ExchangeRuleKind::All => write!(f, "all"),
        }
    }
}

/// One rule set: a kind plus the types it selects (GUIDs or names).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSettings {
    #[serde(default)]
    pub kind: ExchangeRuleKind,
    #[serde(default)]
    pub selected_types: Vec<String>,
}

impl RuleSettings {
    pub fn new(kind: ExchangeRuleKind) -> Self {
        Self {
            kind,
            selected_types: Vec::new(),
        }
    }

    pub fn with_selected_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_types = types.into_iter().map(Into::into).collect();
        self
    }
}

/// Configurable exchange rule backed by a [`TypeActivity`] predicate.
pub struct ExchangeRule {
    save_kind: ExchangeRuleKind,
    save_selected: HashSet<String>,
    learn_kind: ExchangeRuleKind,
    learn_selected: HashSet<String>,
    learned: RwLock<HashSet<String>>,
    types: Arc<dyn TypeActivity>,
}

impl ExchangeRule {
    pub fn new(save: RuleSettings, learn: RuleSettings, types: Arc<dyn TypeActivity>) -> Self {
        Self {
            save_kind: save.kind,
            save_selected: save.selected_types.into_iter().collect(),
            learn_kind: learn.kind,
            learn_selected: learn.selected_types.into_iter().collect(),
            learned: RwLock::new(HashSet::new()),
            types,
        }
    }

    /// Save everything with an active type; learn nothing.
    pub fn save_all(types: Arc<dyn TypeActivity>) -> Self {
        Self::new(
            RuleSettings::new(ExchangeRuleKind::All),
            RuleSettings::new(ExchangeRuleKind::RegistrationOnly),
            types,
        )
    }

    /// Type GUIDs picked up through `should_learn`, sorted.
    pub fn learned_types(&self) -> Vec<String> {
        let mut learned: Vec<String> = self
            .learned
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        learned.sort();
        learned
    }

    fn process_instance(&self, type_guid: &str, type_name: &str) -> bool {
        match self.save_kind {
            ExchangeRuleKind::RegistrationOnly | ExchangeRuleKind::JustTypeDefs => false,
            ExchangeRuleKind::SelectedTypes => selects(&self.save_selected, type_guid, type_name),
            ExchangeRuleKind::LearnedTypes => {
                selects(&self.save_selected, type_guid, type_name)
                    || self
                        .learned
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .contains(type_guid)
            }
            ExchangeRuleKind::All => true,
        }
    }

    fn learn_instance(&self, type_guid: &str, type_name: &str) -> bool {
        match self.learn_kind {
            ExchangeRuleKind::RegistrationOnly | ExchangeRuleKind::JustTypeDefs => false,
            ExchangeRuleKind::SelectedTypes => selects(&self.learn_selected, type_guid, type_name),
            ExchangeRuleKind::LearnedTypes => {
                self.learn_selected.is_empty()
                    || selects(&self.learn_selected, type_guid, type_name)
            }
            ExchangeRuleKind::All => true,
        }
    }
}

impl ExchangeRuleEngine for ExchangeRule {
    fn should_save(&self, source: &str, header: &InstanceHeader) -> bool {
        let Some(instance_type) = header.instance_type.as_ref() else {
            return false;
        };
        let guid = instance_type.type_def_guid.as_str();
        let name = instance_type.type_def_name.as_str();

        let decision = self.process_instance(guid, name) && self.types.is_type_active(guid, name);
        if !decision {
            debug!(
                source,
                instance = %header.guid,
                type_name = name,
                rule = %self.save_kind,
                "Exchange rule declined to save instance"
            );
        }
        decision
    }

    fn should_learn(&self, source: &str, header: &InstanceHeader) -> bool {
        let Some(instance_type) = header.instance_type.as_ref() else {
            return false;
        };
        let guid = instance_type.type_def_guid.as_str();
        let name = instance_type.type_def_name.as_str();

        if !(self.learn_instance(guid, name) && self.types.is_type_active(guid, name)) {
            debug!(
                source,
                instance = %header.guid,
                type_name = name,
                rule = %self.learn_kind,
                "Exchange rule declined to learn instance"
            );
            return false;
        }

        if self.learn_kind == ExchangeRuleKind::LearnedTypes {
            let newly_learned = self
                .learned
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(guid.to_string());
            if newly_learned {
                debug!(source, type_name = name, "Learned instance type");
            }
        }
        true
    }
}

fn selects(selected: &HashSet<String>, type_guid: &str, type_name: &str) -> bool {
    selected.contains(type_guid) || selected.contains(type_name)
}
