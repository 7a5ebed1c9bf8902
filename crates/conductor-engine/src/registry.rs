use std::collections::HashMap;

use serde::Serialize;

use conductor_core::{ConductorError, Module, ModuleAddress, ModuleRole, Result};
use conductor_settings::{RawModule, SetupDocument};

/// Listing entry for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub name: String,
    pub role: ModuleRole,
    pub address: String,
}

/// Registry of controlled modules, immutable after load.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Module>,
}

impl ModuleRegistry {
    /// Build from already-typed modules. Duplicate names are rejected.
    pub fn from_modules(modules: impl IntoIterator<Item = Module>) -> Result<Self> {
        let mut map = HashMap::new();
        for module in modules {
            if map.contains_key(&module.name) {
                return Err(ConductorError::invalid_config(format!(
                    "duplicate module '{}'",
                    module.name
                )));
            }
            let _ = map.insert(module.name.clone(), module);
        }
        Ok(Self { modules: map })
    }

    /// Validate the module tables of a setup document.
    pub fn load_from_config(doc: &SetupDocument) -> Result<Self> {
        let modules = doc
            .module_entries()
            .map(|(name, raw)| parse_module(name, raw))
            .collect::<Result<Vec<_>>>()?;
        Self::from_modules(modules)
    }

    /// Address of a module, or `UnknownModule`.
    pub fn resolve(&self, name: &str) -> Result<&ModuleAddress> {
        self.get(name)
            .map(|m| &m.address)
            .ok_or_else(|| ConductorError::UnknownModule(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// All modules sorted by name.
    pub fn list(&self) -> Vec<ModuleSummary> {
        let mut out: Vec<ModuleSummary> = self
            .modules
            .values()
            .map(|m| ModuleSummary {
                name: m.name.clone(),
                role: m.role,
                address: m.address.to_string(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

fn parse_module(name: &str, raw: &RawModule) -> Result<Module> {
    let invalid = |what: &str| ConductorError::invalid_config(format!("module '{name}': {what}"));

    if name.trim().is_empty() {
        return Err(ConductorError::invalid_config("module with empty name"));
    }

    let host = match &raw.ip {
        None => return Err(invalid("missing 'ip'")),
        Some(toml::Value::String(s)) if is_host(s) => s.clone(),
        Some(toml::Value::String(_)) => return Err(invalid("'ip' must be a non-empty host")),
        Some(other) => {
            return Err(invalid(&format!("'ip' must be a string, got {}", other.type_str())));
        }
    };

    let port = match &raw.port {
        None => return Err(invalid("missing 'port'")),
        Some(toml::Value::Integer(p)) => u16::try_from(*p)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| invalid(&format!("port {p} out of range")))?,
        Some(other) => {
            return Err(invalid(&format!("'port' must be an integer, got {}", other.type_str())));
        }
    };

    let role = match &raw.kind {
        None => ModuleRole::Other,
        Some(toml::Value::String(label)) => ModuleRole::from_label(label),
        Some(other) => {
            return Err(invalid(&format!("'type' must be a string, got {}", other.type_str())));
        }
    };

    Ok(Module {
        name: name.to_string(),
        address: ModuleAddress::new(host, port),
        role,
    })
}

fn is_host(s: &str) -> bool {
    !s.trim().is_empty() && !s.contains(char::is_whitespace)
}
