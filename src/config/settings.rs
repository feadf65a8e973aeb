//! User configuration settings
//!
//! Layered configuration: defaults → config file → environment variables (`CM_*`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, Error, Result};
use crate::reconcile::ReconcilerSettings;
use crate::terminal::PtySettings;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the server binds to
    pub bind_address: String,

    /// Port the server listens on
    pub port: u16,

    /// Server the CLI client talks to
    pub server_url: String,

    /// Program to run in new sessions (falls back to the shell when missing)
    pub default_program: String,

    /// Shell program for the fallback
    pub shell_program: String,

    /// Branch name prefix for new sessions (empty string means no prefix)
    pub branch_prefix: String,

    /// Branch new worktrees fork from when the request names none
    pub default_base_branch: String,

    /// Put worktrees here instead of next to their repository
    pub worktrees_dir: Option<PathBuf>,

    /// Session listing poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Bound on a single listing fetch in milliseconds
    pub request_timeout_ms: u64,

    /// How long a kill waits for the process to exit, in milliseconds
    pub kill_timeout_ms: u64,

    /// Initial PTY size
    pub pty_cols: u16,
    pub pty_rows: u16,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            server_url: "http://127.0.0.1:8080".to_string(),
            default_program: "claude".to_string(),
            shell_program: std::env::var("SHELL").unwrap_or_else(|_| "bash".to_string()),
            branch_prefix: "feature".to_string(),
            default_base_branch: "main".to_string(),
            worktrees_dir: None,
            poll_interval_ms: 5000,
            request_timeout_ms: 3000,
            kill_timeout_ms: 5000,
            pty_cols: 120,
            pty_rows: 40,
            debug: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_from(&config_path)
    }

    /// Load with `path` as the config file layer
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Layer config file if it exists
            .merge(Toml::file(path))
            // Layer environment variables (CM_PORT, CM_DEFAULT_PROGRAM, etc.)
            .merge(Env::prefixed("CM_"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()
    }

    /// Reject unusable values and clamp the request timeout below the poll interval
    pub fn validate(mut self) -> Result<Self> {
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than zero"));
        }
        if self.kill_timeout_ms == 0 {
            return Err(invalid("kill_timeout_ms", "must be greater than zero"));
        }
        if self.pty_cols == 0 || self.pty_rows == 0 {
            return Err(invalid("pty_cols", "terminal size must be non-zero"));
        }
        if self.default_base_branch.trim().is_empty() {
            return Err(invalid("default_base_branch", "must not be empty"));
        }

        if self.request_timeout_ms == 0 || self.request_timeout_ms >= self.poll_interval_ms {
            let clamped = self.poll_interval_ms * 4 / 5;
            warn!(
                "request_timeout_ms {} must be below poll_interval_ms {}, using {}",
                self.request_timeout_ms, self.poll_interval_ms, clamped
            );
            self.request_timeout_ms = clamped.max(1);
        }

        Ok(self)
    }

    /// Socket address string for the server
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn reconciler_settings(&self) -> ReconcilerSettings {
        ReconcilerSettings::new(self.poll_interval(), self.request_timeout())
    }

    pub fn pty_settings(&self) -> PtySettings {
        PtySettings {
            program: self.default_program.clone(),
            shell: self.shell_program.clone(),
            cols: self.pty_cols,
            rows: self.pty_rows,
            kill_timeout: self.kill_timeout(),
        }
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Default log file for the raw-mode attach client
    pub fn default_log_file() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("claude-manager.log"))
    }

    /// Save current configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|_e| {
                Error::Config(ConfigError::DirectoryCreationFailed(parent.to_path_buf()))
            })?;
        }

        let toml =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "claude-manager", "claude-manager").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::Config(ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    })
}
