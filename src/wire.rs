use serde::Deserialize;

use crate::{
    types::{Column, Page, QueryError, QueryStats, QueryStatus, Warning},
    TrinoError,
};

/// Body of every `/v1/statement` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    pub id: String,
    #[serde(default)]
    pub info_uri: Option<String>,
    #[serde(default)]
    pub partial_cancel_uri: Option<String>,
    #[serde(default)]
    pub next_uri: Option<String>,
    #[serde(default)]
    pub columns: Option<Vec<Column>>,
    #[serde(default)]
    pub data: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    pub stats: QueryStats,
    #[serde(default)]
    pub error: Option<QueryError>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub update_type: Option<String>,
    #[serde(default)]
    pub update_count: Option<u64>,
}

impl QueryResults {
    pub fn into_page(self, size_bytes: usize) -> Page {
        Page {
            status: QueryStatus {
                id: self.id,
                info_uri: self.info_uri,
                next_uri: self.next_uri,
                partial_cancel_uri: self.partial_cancel_uri,
                stats: self.stats,
                error: self.error,
                warnings: self.warnings,
                update_type: self.update_type,
                update_count: self.update_count,
            },
            columns: self.columns,
            rows: self.data.unwrap_or_default(),
            size_bytes,
        }
    }
}

/// Decodes a raw statement response; the page size is the body length.
pub fn decode_page(body: &str) -> Result<Page, TrinoError> {
    serde_json::from_str::<QueryResults>(body)
        .map(|results| results.into_page(body.len()))
        .map_err(|err| TrinoError::Decode(format!("invalid statement response JSON: {err}; body: {body}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{wire, TrinoError};

    #[test]
    fn decodes_first_page_with_schema() {
        let body = json!({
            "id": "20240101_000000_00001_abcde",
            "infoUri": "http://localhost/ui/query.html?20240101_000000_00001_abcde",
            "nextUri": "http://localhost/v1/statement/executing/20240101_000000_00001_abcde/y1/1",
            "columns": [{ "name": "_col0", "type": "integer", "typeSignature": { "rawType": "integer" } }],
            "data": [[1]],
            "stats": { "state": "RUNNING", "processedRows": 1 }
        })
        .to_string();

        let page = wire::decode_page(&body).expect("must decode");
        assert_eq!(page.size_bytes, body.len());
        assert_eq!(page.status.stats.state, "RUNNING");
        assert_eq!(page.columns.as_ref().map(Vec::len), Some(1));
        assert_eq!(page.rows, vec![vec![json!(1)]]);
        assert!(!page.status.is_last_page());
    }

    #[test]
    fn page_without_data_has_no_rows() {
        let page = wire::decode_page(r#"{"id":"q","stats":{"state":"QUEUED"}}"#).expect("must decode");
        assert!(!page.has_rows());
        assert!(page.status.is_last_page());
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let err = wire::decode_page("<html>bad gateway</html>").expect_err("must fail");
        assert!(matches!(err, TrinoError::Decode(message) if message.contains("bad gateway")));
    }
}
