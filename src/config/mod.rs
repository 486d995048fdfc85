//! Session configuration.
//!
//! Loaded from JSON; every field is optional and falls back to its default.
//!
//! ```json
//! {
//!   "startup_timeout_ms": 5000,
//!   "elevated_retries": 1,
//!   "elevated_shell": { "program": "sudo", "args": ["-S", "sh"] }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::shell::sentinel::{DEFAULT_TOKEN, validate_token};
use crate::shell::{DEFAULT_CANARY, DEFAULT_DENIAL_PATTERNS, SessionKind, ShellError, ShellProgram};

/// Environment variable naming a config file to load instead of the default path.
pub const CONFIG_ENV: &str = "RUSTY_SHELL_CONFIG";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long the startup probe may take.
    pub startup_timeout_ms: u64,
    /// Extra construction attempts for elevated sessions.
    pub elevated_retries: u32,
    /// Batch delimiter in the merged output.
    pub token: String,
    /// Word echoed by the startup probe.
    pub canary: String,
    pub plain_shell: ShellProgram,
    pub elevated_shell: ShellProgram,
    pub custom_shell: Option<ShellProgram>,
    /// Case-insensitive fragments meaning escalation was refused.
    pub denial_patterns: Vec<String>,
}

fn default_plain_shell() -> ShellProgram {
    if cfg!(target_os = "android") {
        ShellProgram::new("/system/bin/sh")
    } else {
        ShellProgram::new("/bin/sh")
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 20_000,
            elevated_retries: 3,
            token: DEFAULT_TOKEN.to_string(),
            canary: DEFAULT_CANARY.to_string(),
            plain_shell: default_plain_shell(),
            elevated_shell: ShellProgram::new("su"),
            custom_shell: None,
            denial_patterns: DEFAULT_DENIAL_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn program_for(&self, kind: SessionKind) -> Option<&ShellProgram> {
        match kind {
            SessionKind::Plain => Some(&self.plain_shell),
            SessionKind::Elevated => Some(&self.elevated_shell),
            SessionKind::Custom => self.custom_shell.as_ref(),
        }
    }

    /// Token and canary must pass through the shell unchanged.
    pub fn validate(&self) -> Result<(), ShellError> {
        validate_token(&self.token)?;
        validate_token(&self.canary)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config JSON at {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config at {}", path.display()))?;
        Ok(config)
    }

    /// Loads `$RUSTY_SHELL_CONFIG`, else `~/.rusty-shell/config.json` if it exists,
    /// else the defaults.
    pub fn load_or_default() -> anyhow::Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }
        let path = default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }
}

pub fn default_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".rusty-shell").join("config.json")
}
