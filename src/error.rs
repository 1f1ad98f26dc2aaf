//! Error kinds for session operations and their user-facing presentation.

use thiserror::Error;

/// Failure reported by the embedded SQL engine, message carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        EngineError {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Query execution failure; the engine's own text is preserved.
    #[error("query failed: {0}")]
    Query(#[from] EngineError),
    /// Computed-column expression rejected by the safety scanner before any SQL ran.
    #[error("invalid expression for column '{name}'")]
    InvalidExpression { name: String },
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
    /// A value or target type with no SQL form was supplied to a mutation.
    #[error("not representable in SQL: {0}")]
    Unrepresentable(String),
    /// The session was shut down. Intentional, not a failure.
    #[error("session shut down")]
    ShutDown,
    /// Result arrived for a superseded generation. Internal; discarded silently.
    #[error("stale result")]
    Stale,
}

impl SessionError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, SessionError::ShutDown)
    }
}

/// Maps an error to the text a UI collaborator should present. The shut-down
/// kind gets calm wording so surfaces can suppress error styling for operations
/// the user didn't initiate.
pub fn user_message(err: &SessionError) -> String {
    match err {
        SessionError::Query(e) => format!("Query failed: {}", e.message),
        SessionError::InvalidExpression { name } => format!(
            "The expression for '{name}' must be a single value expression. \
             Remove any ';' outside quotes and comments."
        ),
        SessionError::DuplicateColumn(name) => {
            format!("A column named '{name}' already exists.")
        }
        SessionError::UnknownColumn(name) => {
            format!("No column named '{name}' in this table.")
        }
        SessionError::Unrepresentable(what) => {
            format!("{what} cannot be written back to the table.")
        }
        SessionError::ShutDown => "This session is closed.".to_string(),
        SessionError::Stale => "Result superseded by a newer view.".to_string(),
    }
}
