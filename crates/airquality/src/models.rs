use serde::{Deserialize, Serialize};

/// Body of `POST /bigquery/v2/projects/{project}/queries`
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    pub timeout_ms: u64,
    pub max_results: u32,
}

/// Job reference returned with every query response
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Column description from the result schema
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

/// One cell: `{"v": "..."}` where `v` is a string or null
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TableCell {
    #[serde(default)]
    pub v: serde_json::Value,
}

/// One row: `{"f": [cell, ...]}`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TableRow {
    #[serde(default)]
    pub f: Vec<TableCell>,
}

/// Response of both `jobs.query` and `jobs.getQueryResults`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub job_complete: bool,
    pub schema: Option<TableSchema>,
    #[serde(default)]
    pub rows: Vec<TableRow>,
    pub page_token: Option<String>,
    pub total_rows: Option<String>,
}

/// Error envelope returned by Google APIs
#[derive(Deserialize, Debug, Clone)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Fully paged query result, cells kept as the service's string encoding
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub fields: Vec<TableFieldSchema>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append the rows of one response page. The schema is taken from the
    /// first page that carries one.
    pub fn extend_from_page(&mut self, page: QueryResponse) {
        if self.fields.is_empty() {
            if let Some(schema) = page.schema {
                self.fields = schema.fields;
            }
        }
        self.rows.extend(page.rows.into_iter().map(|row| {
            row.f
                .into_iter()
                .map(|cell| match cell.v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    other => Some(other.to_string()),
                })
                .collect()
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_uses_camel_case() {
        let request = QueryRequest {
            query: "SELECT 1".into(),
            use_legacy_sql: false,
            timeout_ms: 10_000,
            max_results: 500,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"query": "SELECT 1", "useLegacySql": false, "timeoutMs": 10000, "maxResults": 500})
        );
    }

    #[test]
    fn test_pages_accumulate_rows() {
        let first: QueryResponse = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "job_1", "location": "US"},
            "jobComplete": true,
            "schema": {"fields": [
                {"name": "Lat", "type": "FLOAT", "mode": "NULLABLE"},
                {"name": "Time", "type": "STRING"}
            ]},
            "rows": [{"f": [{"v": "40.1"}, {"v": "01:00"}]}],
            "pageToken": "next",
            "totalRows": "2"
        }))
        .unwrap();
        let second: QueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "rows": [{"f": [{"v": null}, {"v": "02:00"}]}]
        }))
        .unwrap();

        let mut result = QueryResult::default();
        result.extend_from_page(first);
        result.extend_from_page(second);

        assert_eq!(result.fields.len(), 2);
        assert_eq!(result.fields[0].field_type, "FLOAT");
        assert_eq!(result.num_rows(), 2);
        assert_eq!(result.rows[1][0], None);
        assert_eq!(result.rows[1][1].as_deref(), Some("02:00"));
    }

    #[test]
    fn test_incomplete_job_has_no_rows() {
        let page: QueryResponse = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "job_2"},
            "jobComplete": false
        }))
        .unwrap();
        assert!(!page.job_complete);
        assert!(page.rows.is_empty());
        assert!(page.schema.is_none());
    }
}
