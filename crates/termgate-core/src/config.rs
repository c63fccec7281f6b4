//! Configuration types for termgate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener and session lifecycle settings
    pub server: ServerSettings,
    /// Authentication settings
    pub auth: AuthSettings,
    /// Command dispatch settings
    pub dispatch: DispatchSettings,
    /// Terminal presentation settings
    pub terminal: TerminalSettings,
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(yaml).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.auth.max_attempts == 0 {
            return Err(crate::Error::Config(
                "auth.max_attempts must be > 0".to_string(),
            ));
        }
        if self.server.bind_addr.is_empty() {
            return Err(crate::Error::Config(
                "server.bind_addr must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listener and session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind the listener to
    pub bind_addr: String,

    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Maximum number of concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Seconds a connection may spend in the authentication phase
    pub auth_timeout_secs: u64,

    /// Seconds a session may sit idle at the prompt (0 = no limit)
    pub idle_timeout_secs: u64,

    /// Seconds an in-flight handler gets to finish once its session is
    /// cancelled, before it is forcibly dropped
    pub handler_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 8822,
            max_connections: 0,
            auth_timeout_secs: 60,
            idle_timeout_secs: 0,
            handler_grace_secs: 2,
        }
    }
}

impl ServerSettings {
    /// Authentication phase deadline.
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Idle-read deadline, if configured.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Grace given to an in-flight handler on cancellation.
    pub fn handler_grace(&self) -> Duration {
        Duration::from_secs(self.handler_grace_secs)
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Accept connections without credentials, binding them to the
    /// anonymous principal
    pub allow_anonymous: bool,

    /// Maximum failed attempts before the connection is rejected
    pub max_attempts: u32,

    /// Passwords file to load into the credential store at startup
    pub password_file: Option<PathBuf>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            allow_anonymous: true,
            max_attempts: 3,
            password_file: None,
        }
    }
}

/// Command dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Match command names case-insensitively
    pub case_insensitive: bool,

    /// Maximum edit distance for "did you mean" suggestions
    pub max_suggestion_distance: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            max_suggestion_distance: 2,
        }
    }
}

/// Terminal presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    /// Greeting written once a session is authenticated (markup allowed)
    pub intro: String,

    /// Prompt written before each read (markup allowed)
    pub prompt: String,

    /// Render markup to ANSI colors (false strips tags)
    pub color: bool,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            intro: "Type 'help' for available commands.".to_string(),
            prompt: "<green># </green>".to_string(),
            color: true,
        }
    }
}
