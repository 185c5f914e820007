use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;
use crate::merge::DEFAULT_MAX_DEPTH;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub merge: MergeSettings,
    pub runner: RunnerSettings,
}

impl Config {
    /// `$XDG_CONFIG_HOME/flowsync/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("flowsync").join("config.toml"))
    }

    /// Reads a TOML config; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MergeSettings {
    pub max_depth: usize,
    pub max_messages: usize,
    pub max_event_history: usize,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_messages: 1_000,
            max_event_history: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerSettings {
    /// Executable that runs a flow file.
    pub program: String,
    /// Arguments placed before the flow path.
    pub base_args: Vec<String>,
    /// Appended when a run starts in step mode.
    pub step_flag: String,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            base_args: vec![
                "-m".to_string(),
                "waldiez".to_string(),
                "run".to_string(),
                "--structured".to_string(),
                "--file".to_string(),
            ],
            step_flag: "--step".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(dir.path().join("absent.toml")).expect("load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn partial_file_keeps_unspecified_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[merge]\nmax_messages = 10\n\n[runner]\nprogram = \"py\"\n",
        )
        .expect("write config");

        let config = Config::load(&path).expect("load");
        assert_eq!(config.merge.max_messages, 10);
        assert_eq!(config.merge.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.runner.program, "py");
        assert_eq!(config.runner.step_flag, "--step");
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[merge\nmax_depth = ").expect("write config");

        let err = Config::load(&path).expect_err("parse error");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
