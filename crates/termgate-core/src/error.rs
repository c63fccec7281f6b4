//! Error types for termgate.

use thiserror::Error;

/// Main error type for termgate operations.
///
/// Dispatch-level variants (syntax, unknown command, argument binding,
/// handler failures, single authentication failures) are recoverable: they
/// are rendered to the offending session and the command loop continues.
/// Everything else terminates the affected session only, never the server
/// process. See [`Error::is_recoverable`].
#[derive(Debug, Error)]
pub enum Error {
    /// Input line failed to tokenize
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset of the offending character (the opening quote for
        /// unterminated quotes)
        offset: usize,
        /// What went wrong
        message: String,
    },

    /// First token resolved no registered command
    #[error("unknown command: {name}")]
    UnknownCommand {
        /// The token that failed to resolve
        name: String,
        /// Nearest registered name, if one is close enough
        suggestion: Option<String>,
    },

    /// A token could not be coerced to its parameter's declared type
    #[error("invalid value {value:?} for parameter '{parameter}': expected {expected}")]
    Argument {
        /// Parameter being bound
        parameter: String,
        /// Human name of the expected type
        expected: &'static str,
        /// The offending token
        value: String,
    },

    /// A required parameter was left unbound
    #[error("missing required parameter '{parameter}'")]
    MissingArgument {
        /// The unbound parameter
        parameter: String,
    },

    /// A flag not present in the command's schema, or an argument beyond it
    #[error("unexpected argument '{flag}'")]
    UnknownArgument {
        /// The argument as written, dashes included for flags
        flag: String,
    },

    /// Command name already registered in that scope (startup only)
    #[error("duplicate command name: {0}")]
    DuplicateCommand(String),

    /// A handler failed during execution; the cause is chained
    #[error("command failed: {0:#}")]
    Handler(#[source] anyhow::Error),

    /// Credential rejected
    #[error("authentication failed")]
    Authentication,

    /// Authentication attempt limit exhausted (fatal for the connection)
    #[error("too many failed authentication attempts")]
    TooManyAttempts,

    /// Connection dropped or low-level I/O failure (fatal for the session)
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An auth or idle deadline expired
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Operation on a session that is closing or closed
    #[error("session closed")]
    SessionClosed,

    /// Invalid configuration (startup only)
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is reported on the session and the loop continues.
    ///
    /// Non-recoverable errors move the session to CLOSING.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Syntax { .. }
                | Error::UnknownCommand { .. }
                | Error::Argument { .. }
                | Error::MissingArgument { .. }
                | Error::UnknownArgument { .. }
                | Error::Handler(_)
                | Error::Authentication
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Syntax {
            offset: 4,
            message: "unterminated double quote".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "syntax error at offset 4: unterminated double quote"
        );

        let err = Error::Argument {
            parameter: "y".to_string(),
            expected: "integer",
            value: "three".to_string(),
        };
        assert!(err.to_string().contains("'y'"));
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::UnknownCommand {
            name: "ad".to_string(),
            suggestion: Some("add".to_string()),
        }
        .is_recoverable());
        assert!(Error::Handler(anyhow::anyhow!("boom")).is_recoverable());
        assert!(Error::Authentication.is_recoverable());

        assert!(!Error::TooManyAttempts.is_recoverable());
        assert!(!Error::DuplicateCommand("add".to_string()).is_recoverable());
        assert!(!Error::SessionClosed.is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(!Error::Transport(io).is_recoverable());
    }
}
