//! Engine configuration, read from TOML
//!
//! ```toml
//! [recorder]
//! inter_key_timeout_ms = 500
//!
//! [replay]
//! settle_ms = 150
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use steplock_core::ErrorCode;

use crate::capture::CaptureConfig;
use crate::recorder::RecorderConfig;
use crate::replay::ReplayConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl From<ConfigError> for steplock_core::Error {
    fn from(e: ConfigError) -> Self {
        let code = match &e {
            ConfigError::Io { .. } => ErrorCode::Io,
            ConfigError::Parse { .. } => ErrorCode::InvalidConfig,
        };
        steplock_core::Error::new(code, e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub recorder: RecorderConfig,
    pub replay: ReplayConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// `~/.steplock/config.toml` if present, defaults otherwise
    pub fn discover() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.is_file() => {
                debug!(path = %path.display(), "loading config");
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(".steplock").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config = EngineConfig::parse("[replay]\nsettle_ms = 150\n").unwrap();
        assert_eq!(config.replay.settle_ms, 150);
        assert_eq!(config.replay.focus_delay_ms, 50);
        assert_eq!(config.recorder, RecorderConfig::default());
        assert_eq!(config.capture.queue_capacity, 4096);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(EngineConfig::parse("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn bad_types_are_reported_with_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[recorder]\ndouble_click_ms = \"soon\"\n").unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        let core: steplock_core::Error = err.into();
        assert_eq!(core.code, ErrorCode::Io);
    }
}
