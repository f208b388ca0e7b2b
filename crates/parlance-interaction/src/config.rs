//! Configuration file management for Parlance.
//!
//! Supports reading secrets from `~/.config/parlance/secret.json`.

use std::fs;
use std::path::{Path, PathBuf};

use parlance_core::{ParlanceError, Result};
use serde::Deserialize;

/// Root configuration structure for secret.json
#[derive(Debug, Clone, Deserialize)]
pub struct SecretConfig {
    #[serde(default)]
    pub chat: Option<ChatApiConfig>,
}

/// Chat API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChatApiConfig {
    pub api_key: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Loads the secret configuration file from ~/.config/parlance/secret.json
pub fn load_secret_config() -> Result<SecretConfig> {
    let config_path = get_config_path()?;
    load_secret_config_from(&config_path)
}

/// Loads a secret configuration file from an explicit path.
pub fn load_secret_config_from(config_path: &Path) -> Result<SecretConfig> {
    if !config_path.exists() {
        return Err(ParlanceError::config(format!(
            "Configuration file not found at: {}",
            config_path.display()
        )));
    }

    let content = fs::read_to_string(config_path).map_err(|e| {
        ParlanceError::config(format!(
            "Failed to read configuration file at {}: {}",
            config_path.display(),
            e
        ))
    })?;

    serde_json::from_str(&content).map_err(|e| {
        ParlanceError::config(format!(
            "Failed to parse configuration file at {}: {}",
            config_path.display(),
            e
        ))
    })
}

/// Returns the path to the configuration file: ~/.config/parlance/secret.json
fn get_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ParlanceError::config("Could not determine home directory"))?;
    Ok(home.join(".config").join("parlance").join("secret.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secret.json");

        let err = load_secret_config_from(&path).unwrap_err();
        assert!(matches!(err, ParlanceError::Config(_)));
    }

    #[test]
    fn test_load_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secret.json");
        fs::write(
            &path,
            r#"{"chat": {"api_key": "k", "model_name": "gemini-2.5-flash", "base_url": "https://example.test/v1"}}"#,
        )
        .unwrap();

        let config = load_secret_config_from(&path).unwrap();
        let chat = config.chat.unwrap();
        assert_eq!(chat.api_key, "k");
        assert_eq!(chat.model_name.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(chat.base_url.as_deref(), Some("https://example.test/v1"));
    }

    #[test]
    fn test_optional_fields_default() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("secret.json");
        fs::write(&path, r#"{"chat": {"api_key": "k"}}"#).unwrap();

        let config = load_secret_config_from(&path).unwrap();
        let chat = config.chat.unwrap();
        assert!(chat.model_name.is_none());
        assert!(chat.base_url.is_none());
    }
}
