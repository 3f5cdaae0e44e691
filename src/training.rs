//! Training-gate evaluation as performed by the policy service.
//!
//! The agent only consumes the resulting [`PolicyDecision`]; this module pins
//! down how a decision is derived so the local backend double answers the
//! same way the real service does.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::backend::{Module, PolicyDecision};

pub const TRAINING_GATE: &str = "training_gate";
pub const ACTIVE: &str = "active";

pub const NO_REQUIREMENTS: &str = "No training requirements for this action";
pub const REQUIREMENTS_MET: &str = "Training requirements met";
pub const TRAINING_REQUIRED: &str = "Complete required training modules to perform this operation";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GateRules {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub required_modules: Vec<String>,
}

/// A policy record as stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Policy {
    pub name: String,
    pub policy_type: String,
    pub status: String,
    #[serde(default)]
    pub rules: GateRules,
}

impl Policy {
    pub fn training_gate(name: &str, actions: &[&str], required_modules: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            policy_type: TRAINING_GATE.to_string(),
            status: ACTIVE.to_string(),
            rules: GateRules {
                actions: actions.iter().map(|a| a.to_string()).collect(),
                required_modules: required_modules.iter().map(|m| m.to_string()).collect(),
            },
        }
    }

    fn gates(&self, action: &str) -> bool {
        self.policy_type == TRAINING_GATE
            && self.status == ACTIVE
            && self.rules.actions.iter().any(|a| a == action)
    }
}

/// Decide whether a user who completed `completed` (module names) may perform `action`
///
/// Required modules are the union over every active training gate naming
/// the action. Names missing from `catalog` are ignored; the modules still
/// owed come back in catalog order, each once.
pub fn evaluate(
    completed: &BTreeSet<String>,
    action: &str,
    policies: &[Policy],
    catalog: &[Module],
) -> PolicyDecision {
    let required: BTreeSet<&str> = policies
        .iter()
        .filter(|policy| policy.gates(action))
        .flat_map(|policy| policy.rules.required_modules.iter().map(String::as_str))
        .collect();

    if required.is_empty() {
        return PolicyDecision::allow(NO_REQUIREMENTS);
    }

    let incomplete: Vec<Module> = catalog
        .iter()
        .filter(|module| required.contains(module.name.as_str()))
        .filter(|module| !completed.contains(&module.name))
        .cloned()
        .collect();

    if incomplete.is_empty() {
        PolicyDecision::allow(REQUIREMENTS_MET)
    } else {
        PolicyDecision::block(incomplete, TRAINING_REQUIRED)
    }
}
