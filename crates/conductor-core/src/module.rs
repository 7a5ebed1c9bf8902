use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared role of a controlled module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleRole {
    Paradigm,
    Recording,
    Other,
}

impl ModuleRole {
    /// Map the free-form `type` label of a module entry onto a role.
    ///
    /// Labels other than `paradigm` and `recording` (e.g. `decoder`,
    /// `control`) are kept as [`ModuleRole::Other`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "paradigm" => Self::Paradigm,
            "recording" => Self::Recording,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paradigm => "paradigm",
            Self::Recording => "recording",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ModuleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network address of a module's control endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleAddress {
    pub host: String,
    pub port: u16,
}

impl ModuleAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An independently running, network-addressable process under control.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub address: ModuleAddress,
    pub role: ModuleRole,
}
