use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::artifact::TargetSpec;
use crate::supervisor::LaunchSpec;

/// Top-level configuration loaded from relaunch.toml.
#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RelaunchConfig {
    pub target: TargetConfig,
    pub shutdown: ShutdownConfig,
}

/// What to run after each successful build.
#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    /// Emitted artifact name, name fragment, or filesystem path.
    pub script: Option<String>,
    /// Arguments passed to the process.
    pub args: Vec<String>,
    /// Interpreter for the artifact (e.g. "node"). Unset runs it directly.
    pub runner: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds between SIGTERM and SIGKILL on restart. 0 disables SIGKILL.
    pub stop_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 10,
        }
    }
}

/// Values given on the command line; each one replaces its config counterpart.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub script: Option<String>,
    pub runner: Option<String>,
    pub stop_timeout_secs: Option<u64>,
    /// Replaces `target.args` when non-empty.
    pub args: Vec<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl RelaunchConfig {
    /// Load the config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(path, &contents)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply(&mut self, overrides: CliOverrides) {
        if overrides.script.is_some() {
            self.target.script = overrides.script;
        }
        if overrides.runner.is_some() {
            self.target.runner = overrides.runner;
        }
        if let Some(secs) = overrides.stop_timeout_secs {
            self.shutdown.stop_timeout_secs = secs;
        }
        if !overrides.args.is_empty() {
            self.target.args = overrides.args;
        }
    }

    pub fn target_spec(&self) -> TargetSpec {
        TargetSpec {
            specifier: self.target.script.clone(),
            args: self.target.args.clone(),
        }
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            runner: self.target.runner.clone(),
            stop_timeout: match self.shutdown.stop_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelaunchConfig::default();
        assert_eq!(config.target.script, None);
        assert!(config.target.args.is_empty());
        assert_eq!(config.shutdown.stop_timeout_secs, 10);
        assert_eq!(
            config.launch_spec().stop_timeout,
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[target]
script = "server.js"
args = ["--port", "3000"]
runner = "node"

[shutdown]
stop_timeout_secs = 3
"#;
        let config = RelaunchConfig::parse(Path::new("relaunch.toml"), toml).unwrap();
        assert_eq!(config.target.script.as_deref(), Some("server.js"));
        assert_eq!(config.target.args, vec!["--port", "3000"]);
        assert_eq!(
            config.launch_spec(),
            LaunchSpec {
                runner: Some("node".to_string()),
                stop_timeout: Some(Duration::from_secs(3)),
            }
        );
        assert_eq!(
            config.target_spec(),
            TargetSpec {
                specifier: Some("server.js".to_string()),
                args: vec!["--port".to_string(), "3000".to_string()],
            }
        );
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = RelaunchConfig::parse(
            Path::new("relaunch.toml"),
            "[target]\nscript = \"main.js\"\n",
        )
        .unwrap();
        assert_eq!(config.target.runner, None);
        assert_eq!(config.shutdown.stop_timeout_secs, 10);
    }

    #[test]
    fn test_zero_stop_timeout_disables_escalation() {
        let config = RelaunchConfig::parse(
            Path::new("relaunch.toml"),
            "[shutdown]\nstop_timeout_secs = 0\n",
        )
        .unwrap();
        assert_eq!(config.launch_spec().stop_timeout, None);
    }

    #[test]
    fn test_type_mismatch_is_parse_error() {
        let err = RelaunchConfig::parse(Path::new("bad.toml"), "[target]\nargs = \"oops\"\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("invalid config bad.toml"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelaunchConfig::load(&dir.path().join("relaunch.toml")).unwrap();
        assert_eq!(config, RelaunchConfig::default());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaunch.toml");
        std::fs::write(&path, "[target]\nrunner = \"deno\"\n").unwrap();
        let config = RelaunchConfig::load(&path).unwrap();
        assert_eq!(config.target.runner.as_deref(), Some("deno"));
    }

    #[test]
    fn test_cli_overrides_replace_config_values() {
        let mut config = RelaunchConfig::default();
        config.target.script = Some("old.js".to_string());
        config.target.args = vec!["--old".to_string()];
        config.target.runner = Some("node".to_string());

        config.apply(CliOverrides {
            script: Some("new.js".to_string()),
            runner: None,
            stop_timeout_secs: Some(0),
            args: vec!["--new".to_string()],
        });

        assert_eq!(config.target.script.as_deref(), Some("new.js"));
        assert_eq!(config.target.runner.as_deref(), Some("node"));
        assert_eq!(config.target.args, vec!["--new"]);
        assert_eq!(config.launch_spec().stop_timeout, None);
    }

    #[test]
    fn test_empty_cli_args_keep_config_args() {
        let mut config = RelaunchConfig::default();
        config.target.args = vec!["--port".to_string(), "80".to_string()];
        config.apply(CliOverrides::default());
        assert_eq!(config.target.args, vec!["--port", "80"]);
    }
}
