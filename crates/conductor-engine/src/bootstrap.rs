//! Wiring from settings to a ready [`Orchestrator`].

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use conductor_core::{ConductorError, Result};
use conductor_settings::{ConductorSettings, SetupDocument};

use crate::catalog::MacroCatalog;
use crate::dispatch::{self, Dispatcher};
use crate::executor::{ExecutorConfig, MacroExecutor};
use crate::orchestrator::Orchestrator;
use crate::registry::ModuleRegistry;

/// Read a setup document. Any read or parse failure is `InvalidConfig`.
pub fn load_setup(path: &Path) -> Result<SetupDocument> {
    SetupDocument::load(path)
        .map_err(|e| ConductorError::invalid_config(format!("{}: {e}", path.display())))
}

/// Validate a setup document into registry and catalog.
pub fn load_components(doc: &SetupDocument) -> Result<(ModuleRegistry, MacroCatalog)> {
    let registry = ModuleRegistry::load_from_config(doc)?;
    let catalog = MacroCatalog::load_from_config(doc)?;

    for target in catalog.unresolved_targets(&registry) {
        warn!(
            macro_name = %target.macro_name,
            step_index = target.step_index,
            module = %target.module,
            "macro step targets an unregistered module"
        );
    }
    Ok((registry, catalog))
}

/// Build an orchestrator around an explicit dispatcher.
pub fn build_with_dispatcher(
    doc: &SetupDocument,
    settings: &ConductorSettings,
    dispatcher: Arc<dyn Dispatcher>,
) -> Result<Orchestrator> {
    let (registry, catalog) = load_components(doc)?;
    info!(
        modules = registry.len(),
        macros = catalog.len(),
        transport = dispatcher.name(),
        "setup loaded"
    );
    let executor = MacroExecutor::new(
        Arc::new(registry),
        Arc::new(catalog),
        dispatcher,
        ExecutorConfig::from(&settings.dispatch),
    );
    Ok(Orchestrator::new(executor, settings.runs.history_limit))
}

/// Load `settings.setup_cfg_path` and build an orchestrator with the
/// configured transport.
pub fn build_orchestrator(settings: &ConductorSettings) -> Result<Orchestrator> {
    let doc = load_setup(Path::new(&settings.setup_cfg_path))?;
    build_with_dispatcher(&doc, settings, dispatch::from_settings(&settings.dispatch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::dispatch::ScriptedDispatcher;
    use assert_matches::assert_matches;
    use conductor_core::{ParamMap, RunState};
    use conductor_settings::TransportKind;

    const SETUP: &str = r"
[python]
modules_root = '../'
[python.modules.dp-lsl-recording]
    type = 'recording'
    port = 8082
    ip = '127.0.0.1'
[python.modules.dp-brainvision-control]
    type = 'recording'
    port = 8084
    ip = '127.0.0.1'

[macros.stop_recording]
    name = 'STOP LSL RECORDING'
[macros.stop_recording.cmds]
    com1 = ['dp-lsl-recording', 'STOPRECORD']
    com2 = ['dp-brainvision-control', 'STOP_SAVE']
";

    fn write_setup(dir: &tempfile::TempDir, content: &str) -> String {
        let path = dir.path().join("control_room.toml");
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn builds_from_settings_path() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ConductorSettings {
            setup_cfg_path: write_setup(&dir, SETUP),
            ..Default::default()
        };

        let orch = build_orchestrator(&settings).unwrap();
        assert_eq!(orch.list_modules().len(), 2);
        assert_eq!(orch.list_macros()[0].display_name, "STOP LSL RECORDING");
        assert_eq!(
            orch.executor().config().dispatch_timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn missing_file_is_invalid_config() {
        let settings = ConductorSettings {
            setup_cfg_path: "/nonexistent/control_room.toml".into(),
            ..Default::default()
        };
        assert_matches!(
            build_orchestrator(&settings).err(),
            Some(ConductorError::InvalidConfig(_))
        );
    }

    #[test]
    fn malformed_toml_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_setup(&dir, "[macros.m\n");
        assert_matches!(
            load_setup(Path::new(&path)),
            Err(ConductorError::InvalidConfig(_))
        );
    }

    #[test]
    fn http_transport_selected_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = ConductorSettings {
            setup_cfg_path: write_setup(&dir, SETUP),
            ..Default::default()
        };
        settings.dispatch.transport = TransportKind::Http;
        assert!(build_orchestrator(&settings).is_ok());
    }

    #[tokio::test]
    async fn built_orchestrator_runs_macros() {
        let doc = SetupDocument::from_toml_str(SETUP).unwrap();
        let mock = Arc::new(ScriptedDispatcher::new());
        let orch =
            build_with_dispatcher(&doc, &ConductorSettings::default(), mock.clone()).unwrap();

        let run = orch
            .run_macro("stop_recording", &ParamMap::new())
            .await
            .unwrap();
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(mock.commands(), vec!["STOPRECORD", "STOP_SAVE"]);
    }

    #[test]
    fn shipped_control_room_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/control_room.toml");
        let doc = load_setup(&path).unwrap();
        let (registry, catalog) = load_components(&doc).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(catalog.get("run_6d").unwrap().steps.len(), 6);
        assert!(catalog.unresolved_targets(&registry).is_empty());
    }
}
