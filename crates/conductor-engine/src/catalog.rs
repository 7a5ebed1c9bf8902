use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use conductor_core::{ArgBinding, CommandStep, ConductorError, MacroDef, ParamMap, Result};
use conductor_settings::setup::toml_to_json;
use conductor_settings::{RawMacro, SetupDocument};

use crate::registry::ModuleRegistry;

/// Listing entry for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MacroSummary {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub steps: usize,
}

/// A step whose target module is not in the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedTarget {
    pub macro_name: String,
    pub step_index: usize,
    pub module: String,
}

/// Catalog of macro definitions, immutable after load.
#[derive(Debug, Default)]
pub struct MacroCatalog {
    macros: HashMap<String, Arc<MacroDef>>,
}

impl MacroCatalog {
    /// Build from typed definitions, applying the same checks as config
    /// loading.
    pub fn from_macros(macros: impl IntoIterator<Item = MacroDef>) -> Result<Self> {
        let mut map = HashMap::new();
        for def in macros {
            validate(&def)?;
            if map.contains_key(&def.name) {
                return Err(ConductorError::invalid_config(format!(
                    "duplicate macro '{}'",
                    def.name
                )));
            }
            let _ = map.insert(def.name.clone(), Arc::new(def));
        }
        Ok(Self { macros: map })
    }

    /// Validate the `[macros]` tables of a setup document.
    pub fn load_from_config(doc: &SetupDocument) -> Result<Self> {
        let defs = doc
            .macros
            .iter()
            .map(|(name, raw)| parse_macro(name, raw))
            .collect::<Result<Vec<_>>>()?;
        Self::from_macros(defs)
    }

    /// Definition of a macro, or `UnknownMacro`.
    pub fn get(&self, name: &str) -> Result<Arc<MacroDef>> {
        self.macros
            .get(name)
            .cloned()
            .ok_or_else(|| ConductorError::UnknownMacro(name.to_string()))
    }

    /// All macros sorted by name.
    pub fn list(&self) -> Vec<MacroSummary> {
        let mut out: Vec<MacroSummary> = self
            .macros
            .values()
            .map(|m| MacroSummary {
                name: m.name.clone(),
                display_name: m.display_name.clone(),
                description: m.description.clone(),
                steps: m.steps.len(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Steps that would halt with `UnknownModule` against `registry`.
    pub fn unresolved_targets(&self, registry: &ModuleRegistry) -> Vec<UnresolvedTarget> {
        let mut out: Vec<UnresolvedTarget> = self
            .macros
            .values()
            .flat_map(|m| {
                m.steps
                    .iter()
                    .enumerate()
                    .filter(|(_, step)| !registry.contains(&step.target_module))
                    .map(|(step_index, step)| UnresolvedTarget {
                        macro_name: m.name.clone(),
                        step_index,
                        module: step.target_module.clone(),
                    })
            })
            .collect();
        out.sort_by(|a, b| (&a.macro_name, a.step_index).cmp(&(&b.macro_name, b.step_index)));
        out
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}

fn validate(def: &MacroDef) -> Result<()> {
    let invalid =
        |what: String| ConductorError::invalid_config(format!("macro '{}': {what}", def.name));

    if def.steps.is_empty() {
        return Err(invalid("has no steps".into()));
    }
    for (index, step) in def.steps.iter().enumerate() {
        if step.target_module.trim().is_empty() {
            return Err(invalid(format!("step {index} has an empty target module")));
        }
        if step.command.trim().is_empty() {
            return Err(invalid(format!("step {index} has an empty command")));
        }
        let mut locals = HashSet::new();
        for binding in &step.bindings {
            if !locals.insert(binding.local.as_str()) {
                return Err(invalid(format!(
                    "step {index} binds '{}' more than once",
                    binding.local
                )));
            }
        }
    }
    Ok(())
}

fn parse_macro(name: &str, raw: &RawMacro) -> Result<MacroDef> {
    let steps = raw
        .cmds
        .iter()
        .map(|(step_id, entry)| parse_step(name, step_id, entry))
        .collect::<Result<Vec<_>>>()?;

    let default_params: ParamMap = raw
        .default_json
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), toml_to_json(v)))
        .collect();

    Ok(MacroDef {
        name: name.to_string(),
        display_name: raw.name.clone().unwrap_or_else(|| name.to_string()),
        description: raw.description.clone().unwrap_or_default(),
        default_params,
        steps,
    })
}

/// `['module', 'COMMAND', 'local=source', ...]` → [`CommandStep`].
fn parse_step(macro_name: &str, step_id: &str, entry: &toml::Value) -> Result<CommandStep> {
    let invalid = |what: String| {
        ConductorError::invalid_config(format!("macro '{macro_name}' step '{step_id}': {what}"))
    };

    let items = entry
        .as_array()
        .ok_or_else(|| invalid(format!("expected an array, got {}", entry.type_str())))?;
    let parts = items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid(format!("expected strings, got {}", item.type_str())))
        })
        .collect::<Result<Vec<String>>>()?;

    let [target_module, command, bindings @ ..] = parts.as_slice() else {
        return Err(invalid("needs at least a target module and a command".into()));
    };

    let bindings = bindings
        .iter()
        .map(|raw| raw.parse::<ArgBinding>().map_err(&invalid))
        .collect::<Result<Vec<_>>>()?;

    Ok(CommandStep {
        step_id: step_id.to_string(),
        target_module: target_module.clone(),
        command: command.clone(),
        bindings,
    })
}
