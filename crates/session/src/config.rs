use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use kvitto_core::SessionSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Service-wide settings, read from a TOML file. Every section and
/// field may be omitted and falls back to its default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub recognizer: RecognizerConfig,
    pub blobs: BlobConfig,
    /// Defaults for sessions created without explicit settings.
    pub session: SessionSettings,
}

impl ServiceConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl RecognizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:7343/recognize".to_string(),
            timeout_ms: 10_000,
            attempts: 3,
            backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Root directory of the content-addressed blob tree.
    pub root: PathBuf,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data/blobs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = ServiceConfig::from_toml("").unwrap();
        assert_eq!(config.recognizer.endpoint, "http://127.0.0.1:7343/recognize");
        assert_eq!(config.recognizer.timeout(), Duration::from_secs(10));
        assert_eq!(config.blobs.root, PathBuf::from("./data/blobs"));
        assert_eq!(config.session.max_images, 10);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            [recognizer]
            endpoint = "http://ocr.internal:9000/v1/text"
            attempts = 5

            [session]
            max_images = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.recognizer.endpoint, "http://ocr.internal:9000/v1/text");
        assert_eq!(config.recognizer.attempts, 5);
        assert_eq!(config.recognizer.backoff_ms, 200);
        assert_eq!(config.session.max_images, 4);
        assert!(config.session.auto_detect_end);
    }

    #[test]
    fn blob_root_is_read() {
        let config = ServiceConfig::from_toml("[blobs]\nroot = \"/var/lib/kvitto\"").unwrap();
        assert_eq!(config.blobs.root, PathBuf::from("/var/lib/kvitto"));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            ServiceConfig::from_toml("recognizer = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
