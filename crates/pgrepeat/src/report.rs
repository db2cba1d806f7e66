//! Read-side view of a stored request.

use crate::error::{ProfError, ProfResult};
use crate::lifecycle::Headers;
use crate::sql_text;
use crate::store::{ProfileStore, QueryOrder, QueryRecord, RequestRecord};
use serde::Serialize;

/// A stored query as shown in a report.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    #[serde(flatten)]
    pub record: QueryRecord,
    /// Milliseconds between the request start and this query's start.
    pub start_offset_ms: f64,
}

impl QueryReport {
    pub fn num_joins(&self) -> usize {
        sql_text::num_joins(&self.record.query)
    }

    pub fn tables_involved(&self) -> Vec<String> {
        sql_text::tables_involved(&self.record.query)
    }
}

/// A request and its queries, newest query first.
#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub request: RequestRecord,
    pub queries: Vec<QueryReport>,
}

impl RequestReport {
    /// Sum of the stored query durations.
    pub fn time_spent_on_sql_queries_ms(&self) -> f64 {
        self.queries.iter().map(|q| q.record.duration_ms).sum()
    }

    /// Decoded request headers.
    pub fn headers(&self) -> ProfResult<Headers> {
        Headers::from_json(&self.request.encoded_headers)
    }

    pub fn content_type(&self) -> ProfResult<Option<String>> {
        Ok(self.headers()?.content_type().map(str::to_string))
    }
}

/// Load a stored request with its queries ordered by start time, newest first.
pub async fn load_report(store: &dyn ProfileStore, request_id: &str) -> ProfResult<RequestReport> {
    let request = store
        .get_request(request_id)
        .await?
        .ok_or_else(|| ProfError::not_found(format!("request {request_id}")))?;
    let queries = store
        .list_queries(request_id, QueryOrder::StartTimeDesc)
        .await?
        .into_iter()
        .map(|record| {
            let offset = record.start_time - request.start_time;
            let start_offset_ms = offset
                .num_microseconds()
                .map(|us| us as f64 / 1000.0)
                .unwrap_or_else(|| offset.num_milliseconds() as f64);
            QueryReport {
                record,
                start_offset_ms,
            }
        })
        .collect();
    Ok(RequestReport { request, queries })
}
