//! Host configuration file parsing.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Value and catch stack sizing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Initial value-stack capacity.
    pub reserve: usize,
    /// Initial catch-stack capacity.
    pub catch_reserve: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig {
            reserve: 128,
            catch_reserve: 32,
        }
    }
}

/// Which files the filesystem resolver tries for a specifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// Directory bare specifiers resolve against.
    pub lib_dir: String,
    /// Suffixes tried in order after the specifier itself.
    pub extensions: Vec<String>,
    /// Files tried in order when the specifier names a directory.
    pub index_files: Vec<String>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        ModulesConfig {
            lib_dir: "lib".to_string(),
            extensions: vec!["".to_string(), ".mjs".to_string(), ".js".to_string()],
            index_files: vec!["index.mjs".to_string(), "index.js".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DebuggerConfig {
    /// Sleep between transport polls in a blocking read.
    pub poll_interval_ms: u64,
    /// How long to wait for a client to attach.
    pub attach_timeout_secs: u64,
    pub break_on_uncaught: bool,
}

impl DebuggerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs)
    }
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        DebuggerConfig {
            poll_interval_ms: 50,
            attach_timeout_secs: 30,
            break_on_uncaught: true,
        }
    }
}

/// Complete host configuration.
///
/// Expected format, every section and key optional:
/// ```toml
/// [stack]
/// reserve = 128
/// catch_reserve = 32
///
/// [modules]
/// lib_dir = "lib"
/// extensions = ["", ".mjs", ".js"]
/// index_files = ["index.mjs", "index.js"]
///
/// [debugger]
/// poll_interval_ms = 50
/// attach_timeout_secs = 30
/// break_on_uncaught = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub stack: StackConfig,
    pub modules: ModulesConfig,
    pub debugger: DebuggerConfig,
}

impl HostConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
