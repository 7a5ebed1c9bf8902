//! Control-room setup documents.
//!
//! The setup document is the TOML file bootstrap tooling writes for a
//! session. Modules live under `[python.modules.<name>]` (or a top-level
//! `[modules.<name>]` table) and macros under `[macros.<name>]`:
//!
//! ```toml
//! [python.modules.dp-lsl-recording]
//!     type = 'recording'
//!     port = 8082
//!     ip = '127.0.0.1'
//!
//! [macros.stop_recording]
//!     name = 'STOP LSL RECORDING'
//! [macros.stop_recording.cmds]
//!     com1 = ['dp-lsl-recording', 'STOPRECORD']
//! ```
//!
//! Values are kept as raw [`toml::Value`]s so that the registry and catalog
//! loaders can report field-level problems instead of a generic parse error.
//! Table order is the document order.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use crate::errors::Result;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SetupDocument {
    #[serde(default)]
    pub python: PythonSection,
    #[serde(default)]
    pub modules: IndexMap<String, RawModule>,
    #[serde(default)]
    pub macros: IndexMap<String, RawMacro>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PythonSection {
    #[serde(default)]
    pub modules_root: Option<String>,
    #[serde(default)]
    pub modules: IndexMap<String, RawModule>,
}

/// One `[modules.<name>]` entry, unvalidated.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawModule {
    #[serde(rename = "type", default)]
    pub kind: Option<toml::Value>,
    #[serde(default)]
    pub ip: Option<toml::Value>,
    #[serde(default)]
    pub port: Option<toml::Value>,
}

/// One `[macros.<name>]` entry, unvalidated.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawMacro {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_json: Option<toml::Table>,
    /// Step id → `[module, command, "local=source", ...]`.
    #[serde(default)]
    pub cmds: IndexMap<String, toml::Value>,
}

impl SetupDocument {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(?path, "loading setup document");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Every module entry, `[python.modules]` first, then `[modules]`.
    /// Names may repeat across the two tables; callers reject duplicates.
    pub fn module_entries(&self) -> impl Iterator<Item = (&str, &RawModule)> {
        self.python
            .modules
            .iter()
            .chain(self.modules.iter())
            .map(|(name, module)| (name.as_str(), module))
    }
}

/// Convert a TOML value into the JSON value handed to modules.
///
/// Datetimes become their RFC 3339 string; non-finite floats become null.
pub fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        toml::Value::String(s) => Json::String(s.clone()),
        toml::Value::Integer(i) => Json::from(*i),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        toml::Value::Boolean(b) => Json::Bool(*b),
        toml::Value::Datetime(dt) => Json::String(dt.to_string()),
        toml::Value::Array(items) => Json::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Json::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    const CONTROL_ROOM: &str = r#"
[python]
modules_root = '../'

[python.modules.dp-brainvision-control]
    type = 'recording'
    port = 8084
    ip = '127.0.0.1'

[python.modules.dp-lsl-recording]
    type = 'recording'
    port = 8082
    ip = '127.0.0.1'

[macros]

[macros.run_6d]
    name = 'RUN TRAINING'
    description = 'Start the recording of training data'
[macros.run_6d.default_json]
    fname = 'sub-P001_ses-S001_run-001_task-training'
    data_root = '/data'
    delay_s = 0.5                  # settle time for the recorder
[macros.run_6d.cmds]
    com1 = ['dp-lsl-recording', 'UPDATE']
    com2 = ['dp-lsl-recording', 'SELECT_ALL']
    com3 = ['dp-lsl-recording', 'SET_SAVE_PATH', 'fname=fname', 'data_root=data_root']
"#;

    #[test]
    fn parses_control_room_layout() {
        let doc = SetupDocument::from_toml_str(CONTROL_ROOM).unwrap();
        assert_eq!(doc.python.modules_root.as_deref(), Some("../"));
        let names: Vec<&str> = doc.module_entries().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["dp-brainvision-control", "dp-lsl-recording"]);

        let run = &doc.macros["run_6d"];
        assert_eq!(run.name.as_deref(), Some("RUN TRAINING"));
        let defaults = run.default_json.as_ref().unwrap();
        assert_eq!(defaults["delay_s"].as_float(), Some(0.5));
    }

    #[test]
    fn cmds_keep_document_order() {
        let doc = SetupDocument::from_toml_str(
            r"
[macros.m.cmds]
zeta = ['a', 'FIRST']
alpha = ['a', 'SECOND']
mid = ['a', 'THIRD']
",
        )
        .unwrap();
        let ids: Vec<&String> = doc.macros["m"].cmds.keys().collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn top_level_modules_table_is_read() {
        let doc = SetupDocument::from_toml_str(
            r"
[modules.dp-paradigm]
type = 'paradigm'
ip = 'localhost'
port = 8083
",
        )
        .unwrap();
        let (name, raw) = doc.module_entries().next().unwrap();
        assert_eq!(name, "dp-paradigm");
        assert_eq!(
            raw.port.as_ref().and_then(toml::Value::as_integer),
            Some(8083)
        );
    }

    #[test]
    fn duplicate_keys_are_parse_errors() {
        let err = SetupDocument::from_toml_str(
            r"
[python.modules.dp-lsl-recording]
port = 1
[python.modules.dp-lsl-recording]
port = 2
",
        )
        .unwrap_err();
        assert_matches!(err, SettingsError::Toml(_));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SetupDocument::load(&dir.path().join("absent.toml")).unwrap_err();
        assert_matches!(err, SettingsError::Io(_));
    }

    #[test]
    fn toml_to_json_converts_nested_values() {
        let table: toml::Table = toml::from_str(
            r"
fname = 'sub-001'
delay_s = 0.5
channels = [1, 2]
[nested]
on = true
",
        )
        .unwrap();
        let json = toml_to_json(&toml::Value::Table(table));
        assert_eq!(
            json,
            serde_json::json!({
                "fname": "sub-001",
                "delay_s": 0.5,
                "channels": [1, 2],
                "nested": {"on": true}
            })
        );
    }
}
