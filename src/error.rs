use std::{sync::Arc, time::Duration};

use crate::types::QueryError;

/// Error type returned by this crate.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TrinoError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(Arc<reqwest::Error>),
    /// Unexpected HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Query failure reported by the coordinator.
    #[error("query failed: {}", .0.message)]
    Query(Box<QueryError>),
    /// The query ran longer than the configured query timeout.
    #[error("query ran for {elapsed:?}, exceeding the timeout of {limit:?}")]
    Timeout { elapsed: Duration, limit: Duration },
    /// The query was cancelled by the caller.
    #[error("query cancelled")]
    Cancelled,
    /// Response decoding or protocol-shape validation error.
    #[error("decode error: {0}")]
    Decode(String),
    /// A cell value could not be converted to the requested representation.
    #[error("conversion error: {0}")]
    Conversion(String),
    /// The column type did not match any of the accepted wire types.
    #[error("column is type {actual} but a value of type {expected} was expected")]
    TypeMismatch { actual: String, expected: String },
    /// A null cell was read through a non-nullable accessor.
    #[error("value in column {column} of type `{column_type}` is null")]
    UnexpectedNull { column: usize, column_type: String },
    /// Numeric value does not fit the requested fixed-width type.
    #[error("overflow: {0}")]
    Overflow(String),
    /// Temporal value carries more precision than can be represented.
    #[error("unsupported precision: {0}")]
    UnsupportedPrecision(String),
    #[error("column index {index} out of range for {len} columns")]
    ColumnIndexOutOfBounds { index: usize, len: usize },
    /// The caller broke a usage contract of the iterators or protocol client.
    #[error("invalid operation: {0}")]
    Contract(String),
    /// Credential validation or token acquisition failed.
    #[error("authentication error: {0}")]
    Auth(String),
    /// Invalid client or session configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// More than one error was recorded while reading ahead.
    #[error("{} errors occurred: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<TrinoError>),
}

impl TrinoError {
    /// Returns `true` if this error, or any aggregated error, is a timeout.
    pub fn is_timeout(&self) -> bool {
        self.any(|err| matches!(err, TrinoError::Timeout { .. }))
    }

    /// Returns `true` if this error, or any aggregated error, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.any(|err| matches!(err, TrinoError::Cancelled))
    }

    /// Returns the first server-reported query error, looking through aggregates.
    pub fn query_error(&self) -> Option<&QueryError> {
        match self {
            TrinoError::Query(error) => Some(error),
            TrinoError::Aggregate(errors) => errors.iter().find_map(TrinoError::query_error),
            _ => None,
        }
    }

    fn any(&self, predicate: impl Fn(&TrinoError) -> bool + Copy) -> bool {
        match self {
            TrinoError::Aggregate(errors) => errors.iter().any(|err| err.any(predicate)),
            other => predicate(other),
        }
    }
}

impl From<reqwest::Error> for TrinoError {
    fn from(err: reqwest::Error) -> Self {
        TrinoError::Transport(Arc::new(err))
    }
}

fn join_messages(errors: &[TrinoError]) -> String {
    errors
        .iter()
        .map(|err| format!("({err})"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{types::QueryError, TrinoError};

    fn query_error(message: &str) -> TrinoError {
        TrinoError::Query(Box::new(QueryError {
            message: message.to_owned(),
            ..QueryError::default()
        }))
    }

    #[test]
    fn predicates_look_through_aggregates() {
        let err = TrinoError::Aggregate(vec![
            TrinoError::Cancelled,
            TrinoError::Timeout {
                elapsed: Duration::from_secs(3),
                limit: Duration::from_secs(2),
            },
        ]);
        assert!(err.is_timeout());
        assert!(err.is_cancelled());
        assert!(err.query_error().is_none());
    }

    #[test]
    fn aggregate_message_lists_each_error() {
        let err = TrinoError::Aggregate(vec![
            query_error("line 1:12: Cannot apply operator"),
            TrinoError::Cancelled,
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 errors occurred"));
        assert!(text.contains("(query failed: line 1:12: Cannot apply operator)"));
        assert_eq!(
            err.query_error().map(|e| e.message.as_str()),
            Some("line 1:12: Cannot apply operator")
        );
    }
}
