use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Parameter values keyed by name. Ordered so that serialized bindings are
/// stable across runs.
pub type ParamMap = BTreeMap<String, serde_json::Value>;

/// Binds a command keyword argument (`local`) to a macro parameter (`source`).
///
/// Written in configuration as `"local=source"`; a bare `"name"` binds a
/// parameter to a keyword of the same name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgBinding {
    pub local: String,
    pub source: String,
}

impl ArgBinding {
    pub fn new(local: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            source: source.into(),
        }
    }
}

impl FromStr for ArgBinding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (local, source) = match text.split_once('=') {
            Some((local, source)) => (local.trim(), source.trim()),
            None => (text, text),
        };
        if local.is_empty() || source.is_empty() {
            return Err(format!("binding '{s}' must be 'local=source'"));
        }
        if source.contains('=') {
            return Err(format!("binding '{s}' has more than one '='"));
        }
        Ok(Self::new(local, source))
    }
}

impl fmt::Display for ArgBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.local, self.source)
    }
}

/// One command of a macro: which module, which verb, which arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStep {
    /// Identifier from the configuration document. Documentation only; never
    /// used for ordering.
    pub step_id: String,
    pub target_module: String,
    pub command: String,
    pub bindings: Vec<ArgBinding>,
}

impl CommandStep {
    pub fn new(
        step_id: impl Into<String>,
        target_module: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            target_module: target_module.into(),
            command: command.into(),
            bindings: Vec::new(),
        }
    }

    pub fn bind(mut self, local: impl Into<String>, source: impl Into<String>) -> Self {
        self.bindings.push(ArgBinding::new(local, source));
        self
    }
}

/// A named, ordered sequence of commands with default parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MacroDef {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub default_params: ParamMap,
    pub steps: Vec<CommandStep>,
}

impl MacroDef {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            default_params: ParamMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, display_name: &str, description: &str) -> Self {
        self.display_name = display_name.to_string();
        self.description = description.to_string();
        self
    }

    pub fn default_param(mut self, name: &str, value: serde_json::Value) -> Self {
        let _ = self.default_params.insert(name.to_string(), value);
        self
    }

    pub fn step(mut self, step: CommandStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Names of every module the macro addresses, in first-use order.
    pub fn target_modules(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !seen.contains(&step.target_module.as_str()) {
                seen.push(&step.target_module);
            }
        }
        seen
    }
}
