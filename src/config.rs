//! TOML configuration for the bddrunner daemon and CLI.
//!
//! Layered: an explicit `--config` path, then `$BDDRUNNER_CONFIG`, then
//! `/etc/bddrunner/bddrunner.toml`, then compiled-in defaults. Every section
//! is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::Project;

pub const CONFIG_ENV: &str = "BDDRUNNER_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/bddrunner/bddrunner.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logs: LogBufferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Projects upserted into the store when the daemon starts.
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// An explicit path must load; the fallbacks only warn.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn load_or_default() -> Self {
        // 1. Environment variable override.
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "BDDRUNNER_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        // 2. Standard system location.
        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        // 3. Defaults.
        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Allow any origin (the dashboard is usually served from another port).
    pub permissive_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            permissive_cors: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/bddrunner.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Parent of the per-run `<run_id>` workspaces.
    pub workspace_root: PathBuf,
    pub git_path: String,
    /// Expansion for bare `owner/name` repository identifiers.
    pub repo_url_template: String,
    pub default_branch: String,
    pub clone_timeout_sec: u64,
    /// `make`-compatible build tool.
    pub build_tool: String,
    /// Any of these at the repository root counts as a build manifest.
    pub manifest_names: Vec<String>,
    pub dry_run_flag: String,
    pub dry_run_timeout_sec: u64,
    pub execution_timeout_sec: u64,
}

impl ExecutorConfig {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_sec)
    }

    pub fn dry_run_timeout(&self) -> Duration {
        Duration::from_secs(self.dry_run_timeout_sec)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_sec)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("bddrunner"),
            git_path: "git".to_string(),
            repo_url_template: "https://github.com/{repo}.git".to_string(),
            default_branch: "main".to_string(),
            clone_timeout_sec: 300,
            build_tool: "make".to_string(),
            manifest_names: vec![
                "Makefile".to_string(),
                "makefile".to_string(),
                "GNUmakefile".to_string(),
            ],
            dry_run_flag: "-n".to_string(),
            dry_run_timeout_sec: 60,
            execution_timeout_sec: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// Log buffer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogBufferConfig {
    /// Lines kept per run; older lines are dropped.
    pub max_lines_per_run: usize,
    /// How long a finished run's lines stay pollable.
    pub retention_sec: u64,
}

impl LogBufferConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_sec)
    }
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            max_lines_per_run: 5000,
            retention_sec: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();

        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.storage.database_path, PathBuf::from("data/bddrunner.db"));

        assert_eq!(cfg.executor.build_tool, "make");
        assert_eq!(cfg.executor.default_branch, "main");
        assert_eq!(cfg.executor.clone_timeout_sec, 300);
        assert_eq!(cfg.executor.execution_timeout(), Duration::from_secs(3600));
        assert!(cfg.executor.manifest_names.contains(&"Makefile".to_string()));

        assert_eq!(cfg.logs.max_lines_per_run, 5000);
        assert_eq!(cfg.logs.retention(), Duration::from_secs(3600));

        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert!(cfg.projects.is_empty());
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r##"
[server]
bind = "127.0.0.1:9000"

[executor]
workspace_root = "/srv/bddrunner/work"
execution_timeout_sec = 120
repo_url_template = "https://git.example.com/{repo}.git"

[logging]
format = "json"

[[projects]]
id = "checkout"
name = "Checkout"
color = "#ff8800"
repository = "acme/checkout-tests"
default_target = "acceptance"
tags = ["@smoke", "@regression"]
"##;
        let cfg: Config = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.server.bind, "127.0.0.1:9000");
        assert_eq!(cfg.executor.workspace_root, PathBuf::from("/srv/bddrunner/work"));
        assert_eq!(cfg.executor.execution_timeout_sec, 120);
        // Untouched fields in a present section keep their defaults.
        assert_eq!(cfg.executor.clone_timeout_sec, 300);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logs.max_lines_per_run, 5000);

        assert_eq!(cfg.projects.len(), 1);
        let p = &cfg.projects[0];
        assert_eq!(p.default_target, "acceptance");
        assert_eq!(p.description, "");
        assert_eq!(p.tags.len(), 2);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logs]\nmax_lines_per_run = 10").unwrap();

        let cfg = Config::resolve(Some(file.path())).unwrap();
        assert_eq!(cfg.logs.max_lines_per_run, 10);

        assert!(Config::resolve(Some(Path::new("/nonexistent/bddrunner.toml"))).is_err());
    }
}
