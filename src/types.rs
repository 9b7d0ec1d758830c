use serde::Deserialize;

/// One column of a result schema: its name and wire-type string.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

/// Progress counters reported with every response.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryStats {
    pub state: String,
    pub queued: bool,
    pub scheduled: bool,
    pub nodes: u64,
    pub total_splits: u64,
    pub queued_splits: u64,
    pub running_splits: u64,
    pub completed_splits: u64,
    pub cpu_time_millis: u64,
    pub wall_time_millis: u64,
    pub queued_time_millis: u64,
    pub elapsed_time_millis: u64,
    pub processed_rows: u64,
    pub processed_bytes: u64,
    pub physical_input_bytes: u64,
    pub peak_memory_bytes: u64,
    pub spilled_bytes: u64,
    pub progress_percentage: Option<f64>,
}

impl QueryStats {
    /// Completed splits over total splits, rounded to two decimals.
    pub fn progress_ratio(&self) -> f64 {
        if self.total_splits == 0 {
            return 0.0;
        }
        let ratio = self.completed_splits as f64 / self.total_splits as f64;
        (ratio * 100.0).round() / 100.0
    }
}

/// Position of an error inside the submitted SQL text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorLocation {
    pub line_number: u32,
    pub column_number: u32,
}

/// Server-side exception chain attached to a query error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FailureInfo {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub message: Option<String>,
    pub error_location: Option<ErrorLocation>,
    pub stack: Vec<String>,
    pub suppressed: Vec<FailureInfo>,
    pub cause: Option<Box<FailureInfo>>,
}

/// Structured query error reported by the coordinator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryError {
    pub message: String,
    pub sql_state: Option<String>,
    pub error_code: i64,
    pub error_name: Option<String>,
    pub error_type: Option<String>,
    pub error_location: Option<ErrorLocation>,
    pub failure_info: Option<FailureInfo>,
}

/// Non-fatal warning attached to a response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Warning {
    pub message: String,
}

/// Query metadata valid as of one server response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryStatus {
    pub id: String,
    pub info_uri: Option<String>,
    pub next_uri: Option<String>,
    pub partial_cancel_uri: Option<String>,
    pub stats: QueryStats,
    pub error: Option<QueryError>,
    pub warnings: Vec<Warning>,
    pub update_type: Option<String>,
    pub update_count: Option<u64>,
}

impl QueryStatus {
    /// A response without a next location is the last one of its query.
    pub fn is_last_page(&self) -> bool {
        self.next_uri.as_deref().map_or(true, str::is_empty)
    }
}

/// One decoded server response.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    pub status: QueryStatus,
    /// Column schema, if this response carried one.
    pub columns: Option<Vec<Column>>,
    /// Undecoded cell values in server row order.
    pub rows: Vec<Vec<serde_json::Value>>,
    /// Length of the serialized response, used for read-ahead accounting.
    pub size_bytes: usize,
}

impl Page {
    pub fn has_rows(&self) -> bool {
        !self.rows.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeVersion {
    pub version: String,
}

/// Response of the coordinator's `/v1/info` endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerInfo {
    pub node_version: NodeVersion,
    pub environment: String,
    pub coordinator: bool,
    pub starting: bool,
    pub uptime: Option<String>,
}

#[cfg(test)]
mod tests {
    use crate::types::{QueryError, QueryStats, QueryStatus};

    #[test]
    fn error_payload_decodes_location_and_cause() {
        let error: QueryError = serde_json::from_value(serde_json::json!({
            "message": "line 1:12: Cannot apply operator: varchar(1) = integer",
            "errorCode": 58,
            "errorName": "TYPE_MISMATCH",
            "errorType": "USER_ERROR",
            "errorLocation": { "lineNumber": 1, "columnNumber": 12 },
            "failureInfo": {
                "type": "io.trino.spi.TrinoException",
                "stack": ["a", "b"],
                "cause": { "message": "inner" }
            }
        }))
        .expect("must decode");

        assert_eq!(error.error_name.as_deref(), Some("TYPE_MISMATCH"));
        assert_eq!(error.error_location.map(|l| l.column_number), Some(12));
        let failure = error.failure_info.expect("failure info");
        assert_eq!(failure.stack.len(), 2);
        assert_eq!(
            failure.cause.and_then(|c| c.message).as_deref(),
            Some("inner")
        );
    }

    #[test]
    fn progress_ratio_rounds() {
        let stats = QueryStats {
            total_splits: 3,
            completed_splits: 1,
            ..QueryStats::default()
        };
        assert_eq!(stats.progress_ratio(), 0.33);
        assert_eq!(QueryStats::default().progress_ratio(), 0.0);
    }

    #[test]
    fn empty_next_uri_is_last_page() {
        let mut status = QueryStatus::default();
        assert!(status.is_last_page());
        status.next_uri = Some(String::new());
        assert!(status.is_last_page());
        status.next_uri = Some("http://localhost/v1/statement/executing/q/1".to_owned());
        assert!(!status.is_last_page());
    }
}
