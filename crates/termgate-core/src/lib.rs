//! Core types for termgate.
//!
//! This crate holds the pieces shared by every layer of the workspace:
//! session and principal identifiers, the error taxonomy, server
//! configuration, and the credential store.

pub mod config;
pub mod credentials;
pub mod error;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use config::ServerConfig;
pub use credentials::{Credential, CredentialStore, Proof};
pub use error::{Error, Result};

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated identity bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(String);

impl Principal {
    /// Identity used when the server accepts unauthenticated connections.
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The anonymous principal.
    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}
