use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_json::Error>,
    },
}

/// Window, loop, and stage settings. Every field has a default so a partial
/// or absent config file still yields a runnable app.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageConfig {
    pub window_title: String,
    pub window_width: u32,
    pub window_height: u32,
    /// Update thread ceiling, ticks per second.
    pub target_ups: u32,
    /// Updates older than this are dropped instead of simulated.
    pub stale_frame_ms: u64,
    /// Override for the asset root; the startup search is used when absent.
    pub asset_root: Option<PathBuf>,
    /// Draw the picking id buffer in the corner of the frame.
    pub pick_debug_overlay: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            window_title: "Skylark".to_string(),
            window_width: 800,
            window_height: 600,
            target_ups: 50,
            stale_frame_ms: 64,
            asset_root: None,
            pick_debug_overlay: false,
        }
    }
}

impl StageConfig {
    /// Loads a config file, reporting the JSON path of any bad field. A
    /// missing file is not an error; defaults apply.
    pub fn load(path: &Path) -> Result<StageConfig, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StageConfig::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let mut deserializer = serde_json::Deserializer::from_str(&text);
        serde_path_to_error::deserialize(&mut deserializer).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StageConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.target_ups, 50);
        assert_eq!(config.stale_frame_ms, 64);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "window_title": "Demo", "target_ups": 30 }"#).unwrap();

        let config = StageConfig::load(&path).unwrap();
        assert_eq!(config.window_title, "Demo");
        assert_eq!(config.target_ups, 30);
        assert_eq!(config.window_width, 800);
    }

    #[test]
    fn unknown_field_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "window_titel": "oops" }"#).unwrap();

        let error = StageConfig::load(&path).unwrap_err();
        assert!(matches!(error, ConfigError::Parse { .. }));
    }

    #[test]
    fn type_mismatch_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "target_ups": "fast" }"#).unwrap();
        assert!(matches!(
            StageConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
