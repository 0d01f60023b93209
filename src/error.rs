//! Error types for restsql.

use serde_json::Value;
use thiserror::Error;

/// A statement that the tokenizer or parser could not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Syntax error at position {position}: {message}")]
pub struct SyntaxError {
    /// Byte offset into the statement text.
    pub position: usize,
    pub message: String,
}

impl SyntaxError {
    /// Create a syntax error at the given position.
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Errors reported by a table-query service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// A single-row request matched nothing. Never surfaced to callers.
    #[error("No rows matched")]
    NoRowsMatched,

    /// The backend exposes no raw-SQL endpoint.
    #[error("Raw SQL endpoint not available")]
    RpcUnavailable,

    /// The backend answered with an error payload.
    #[error("Remote error {code}: {message}")]
    Remote { code: String, message: String },

    /// The request never produced a usable response.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ServiceError {
    /// Create a remote error.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The main error type for restsql operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The statement shape is not recognised.
    #[error("Unsupported statement: {source} (sql: {statement}, params: {params:?})")]
    Parse {
        statement: String,
        params: Vec<Value>,
        source: SyntaxError,
    },

    /// Both fallback tiers failed for an aggregate statement.
    #[error("Cannot process complex query: {statement} (params: {params:?})")]
    UnsupportedAggregate {
        statement: String,
        params: Vec<Value>,
    },

    /// The table-query service returned an error.
    #[error("Remote service error: {0}")]
    Remote(#[from] ServiceError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Attach the statement and its parameters to a syntax error.
    pub fn parse(statement: &str, params: &[Value], source: SyntaxError) -> Self {
        Self::Parse {
            statement: statement.to_string(),
            params: params.to_vec(),
            source,
        }
    }

    /// Create an unsupported-aggregate error.
    pub fn unsupported_aggregate(statement: &str, params: &[Value]) -> Self {
        Self::UnsupportedAggregate {
            statement: statement.to_string(),
            params: params.to_vec(),
        }
    }
}

/// Result type alias for restsql operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_syntax_error_display() {
        let err = SyntaxError::new(7, "expected FROM");
        assert_eq!(err.to_string(), "Syntax error at position 7: expected FROM");
    }

    #[test]
    fn test_parse_error_carries_statement() {
        let err = BridgeError::parse(
            "SELECT * FROM a JOIN b",
            &[json!(1)],
            SyntaxError::new(16, "unexpected JOIN"),
        );
        let text = err.to_string();
        assert!(text.contains("SELECT * FROM a JOIN b"));
        assert!(text.contains("unexpected JOIN"));
        assert!(text.contains("[Number(1)]"));
    }

    #[test]
    fn test_aggregate_error_display() {
        let err = BridgeError::unsupported_aggregate("SELECT SUM(x) FROM t", &[]);
        assert!(err.to_string().starts_with("Cannot process complex query"));
    }
}
