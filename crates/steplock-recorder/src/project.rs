//! Project model
//!
//! A project is what gets saved: the step list, the variable table used for
//! parameterized runs, and a descriptor for finding the target window again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use steplock_core::TargetDescriptor;

use crate::step::StepList;

/// Current project file format
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    #[default]
    Text,
    Secret,
    Number,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub kind: VariableKind,
    #[serde(default)]
    pub direction: Direction,
    /// Host should ask for the value before each run
    #[serde(default)]
    pub prompt_on_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl Variable {
    pub fn input(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: VariableKind::Text,
            direction: Direction::Input,
            prompt_on_run: false,
            default_value: None,
        }
    }

    pub fn output(key: impl Into<String>) -> Self {
        Self {
            direction: Direction::Output,
            ..Self::input(key, "")
        }
    }

    /// Value used at replay: the current value, else the default
    pub fn effective_value(&self) -> &str {
        match (&self.value, &self.default_value) {
            (v, Some(d)) if v.is_empty() => d,
            (v, _) => v,
        }
    }

    /// Value safe to show in exports and logs
    pub fn display_value(&self) -> String {
        match self.kind {
            VariableKind::Secret if !self.effective_value().is_empty() => "********".to_string(),
            _ => self.effective_value().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default = "current_format")]
    pub format: u32,
    pub name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub target: Option<TargetDescriptor>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub steps: StepList,
}

fn current_format() -> u32 {
    FORMAT_VERSION
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            format: FORMAT_VERSION,
            name: name.into(),
            created_at: now,
            updated_at: now,
            target: None,
            variables: Vec::new(),
            steps: StepList::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn variable(&self, key: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.key == key)
    }

    pub fn set_variable(&mut self, variable: Variable) {
        match self.variables.iter_mut().find(|v| v.key == variable.key) {
            Some(existing) => *existing = variable,
            None => self.variables.push(variable),
        }
    }

    /// Store a value captured during replay, declaring the output if needed
    pub fn set_output(&mut self, key: &str, value: &str) {
        match self.variables.iter_mut().find(|v| v.key == key) {
            Some(v) => v.value = value.to_string(),
            None => {
                let mut v = Variable::output(key);
                v.value = value.to_string();
                self.variables.push(v);
            }
        }
    }

    /// Values of all input variables, keyed by name
    pub fn inputs(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .filter(|v| v.direction == Direction::Input)
            .map(|v| (v.key.clone(), v.effective_value().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fills_empty_values() {
        let mut v = Variable::input("user", "");
        v.default_value = Some("guest".into());
        assert_eq!(v.effective_value(), "guest");
        v.value = "alice".into();
        assert_eq!(v.effective_value(), "alice");
    }

    #[test]
    fn secrets_are_masked() {
        let mut v = Variable::input("password", "hunter2");
        v.kind = VariableKind::Secret;
        assert_eq!(v.display_value(), "********");
    }

    #[test]
    fn outputs_are_declared_on_first_capture() {
        let mut p = Project::new("invoices");
        p.variables.push(Variable::input("user", "alice"));
        p.set_output("total", "42.00");
        p.set_output("total", "43.00");

        assert_eq!(p.variables.len(), 2);
        assert_eq!(p.variable("total").unwrap().value, "43.00");
        assert_eq!(p.variable("total").unwrap().direction, Direction::Output);
        assert_eq!(p.inputs().get("user").map(String::as_str), Some("alice"));
        assert!(!p.inputs().contains_key("total"));
    }
}
