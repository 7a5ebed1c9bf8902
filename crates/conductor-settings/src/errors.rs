//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading settings or setup documents.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read a file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// Failed to parse JSON in the settings file.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to parse a TOML setup document.
    #[error("failed to parse setup TOML: {0}")]
    Toml(#[from] toml::de::Error),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = SettingsError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "not found"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn json_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err = SettingsError::Json(json_err);
        assert!(err.to_string().contains("parse settings JSON"));
    }

    #[test]
    fn toml_error_display() {
        let toml_err = toml::from_str::<toml::Table>("a = ").unwrap_err();
        let err = SettingsError::from(toml_err);
        assert!(err.to_string().starts_with("failed to parse setup TOML"));
    }

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("port out of range".to_string());
        assert_eq!(err.to_string(), "invalid settings value: port out of range");
    }
}
