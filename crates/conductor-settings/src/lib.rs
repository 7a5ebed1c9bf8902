//! # conductor-settings
//!
//! Two kinds of configuration live here:
//!
//! 1. **Process settings** ([`ConductorSettings`]) loaded in layers:
//!    compiled defaults, then `~/.conductor/settings.json` deep-merged over
//!    them, then `CONDUCTOR_*` environment overrides (highest priority).
//! 2. **Setup documents** ([`SetupDocument`]): the control-room TOML that
//!    declares modules and macros. It is parsed here into raw, order-preserving
//!    tables; validation into a registry and catalog happens in the engine.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod setup;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use setup::{RawMacro, RawModule, SetupDocument};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = ConductorSettings::default();
        let _path = settings_path();
        let _doc = SetupDocument::default();
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = ConductorSettings::default();
        assert_eq!(settings.dispatch.transport, TransportKind::Tcp);
        assert_eq!(settings.dispatch.timeout_ms, 5_000);
        assert_eq!(settings.dispatch.default_delay_ms, 0);
        assert!(!settings.dispatch.serialize_per_module);
        assert_eq!(settings.server.port, 8090);
        assert_eq!(settings.runs.history_limit, 256);
        assert_eq!(settings.logging.level, "info");
    }
}
