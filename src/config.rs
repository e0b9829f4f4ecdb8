//! Configuration types for Tapedeck

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::recording::{SessionOptions, MAX_SESSIONS};
use crate::{Result, TapedeckError};

/// Which sessions keep their recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    /// Keep every recording
    RecordAll,
    /// Keep only recordings of failed tests
    RecordFailing,
    /// Never record
    Off,
}

impl Default for RecordingMode {
    fn default() -> Self {
        Self::RecordFailing
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default recording mode for new sessions
    #[serde(default)]
    pub mode: RecordingMode,
    /// Directory that receives retained recordings
    pub recording_dir: PathBuf,
    /// Capture settings
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Retention policy switches
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Output naming
    #[serde(default)]
    pub naming: NamingConfig,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Capture settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Upper bound on waiting for the encoder to finalize, in milliseconds
    pub finalize_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            finalize_timeout_ms: 10_000,
        }
    }
}

/// Retention policy switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Keep skipped tests when only failures are recorded
    #[serde(default)]
    pub retain_skipped_when_failing: bool,
    /// Move artifacts the encoder never confirmed as finalized
    #[serde(default = "default_true")]
    pub transfer_unfinalized: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            retain_skipped_when_failing: false,
            transfer_unfinalized: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Output naming
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    /// File extension of retained recordings
    pub extension: String,
    /// Maximum length of the sanitized test name inside a file name
    pub max_name_len: usize,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            extension: "flv".to_string(),
            max_name_len: 200,
        }
    }
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrently active sessions in one registry
    pub max_sessions: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_SESSIONS,
        }
    }
}

impl Config {
    /// Configuration with defaults for everything but the destination
    #[must_use]
    pub fn new(recording_dir: PathBuf) -> Self {
        Self {
            mode: RecordingMode::default(),
            recording_dir,
            capture: CaptureConfig::default(),
            policy: PolicyConfig::default(),
            naming: NamingConfig::default(),
            limits: LimitsConfig::default(),
        }
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TapedeckError::ConfigError(format!("Failed to read config file: {e}"))
        })?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TapedeckError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.recording_dir.as_os_str().is_empty() {
            return Err(TapedeckError::ConfigError(
                "recording_dir cannot be empty".to_string(),
            ));
        }

        // The destination is created on demand, but it must not be a file
        if self.recording_dir.is_file() {
            return Err(TapedeckError::ConfigError(format!(
                "recording_dir is a file: {}",
                self.recording_dir.display()
            )));
        }

        if self.capture.finalize_timeout_ms == 0 {
            return Err(TapedeckError::ConfigError(
                "capture.finalize_timeout_ms must be > 0".to_string(),
            ));
        }

        let extension = &self.naming.extension;
        if extension.is_empty()
            || !extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(TapedeckError::ConfigError(format!(
                "naming.extension must be non-empty and alphanumeric, got {extension:?}"
            )));
        }

        if self.naming.max_name_len == 0 {
            return Err(TapedeckError::ConfigError(
                "naming.max_name_len must be > 0".to_string(),
            ));
        }

        if self.limits.max_sessions == 0 {
            return Err(TapedeckError::ConfigError(
                "limits.max_sessions must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Finalization bound as a duration
    #[must_use]
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.capture.finalize_timeout_ms)
    }

    /// Per-session options derived from this configuration
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            finalize_timeout: self.finalize_timeout(),
            transfer_unfinalized: self.policy.transfer_unfinalized,
            retain_skipped_when_failing: self.policy.retain_skipped_when_failing,
            extension: self.naming.extension.clone(),
            max_name_len: self.naming.max_name_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            mode = "record_all"
            recording_dir = "/tmp/videos"

            [capture]
            finalize_timeout_ms = 2500

            [policy]
            retain_skipped_when_failing = true
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.mode, RecordingMode::RecordAll);
        assert_eq!(config.finalize_timeout(), Duration::from_millis(2500));
        assert!(config.policy.retain_skipped_when_failing);
        assert!(config.policy.transfer_unfinalized);
        assert_eq!(config.naming.extension, "flv");
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str(r#"recording_dir = "/tmp""#).unwrap();
        assert_eq!(config.mode, RecordingMode::RecordFailing);
        assert_eq!(config.limits.max_sessions, MAX_SESSIONS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r#"
            mode = "off"
            recording_dir = "/tmp"

            [naming]
            extension = "mp4"
            max_name_len = 64
        "#;
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.mode, RecordingMode::Off);

        let options = config.session_options();
        assert_eq!(options.extension, "mp4");
        assert_eq!(options.max_name_len, 64);
    }

    #[test]
    fn test_invalid_config_zero_timeout() {
        let config_toml = r#"
            recording_dir = "/tmp"

            [capture]
            finalize_timeout_ms = 0
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_config_extension() {
        let mut config = Config::new(PathBuf::from("/tmp"));
        config.naming.extension = "../flv".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_config_recording_dir_is_file() {
        let file = NamedTempFile::new().unwrap();
        let config = Config::new(file.path().to_path_buf());
        assert!(config.validate().is_err());
    }
}
