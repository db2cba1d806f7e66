//! Persistence for profiled requests and their queries.
//!
//! [`ProfileStore`] is the seam between the recorder and storage. Two
//! implementations ship with the crate: [`MemoryStore`] and, with the `pool`
//! feature, [`PgStore`]. Every implementation keeps
//! `RequestRecord::num_sql_queries` equal to the number of queries it owns.

mod memory;
#[cfg(feature = "pool")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "pool")]
pub use postgres::PgStore;

use crate::error::ProfResult;
use crate::intercept::QueryEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest `path` / `view_name` a store will write, in characters.
pub const MAX_PATH_CHARS: usize = 190;

/// Shorten `s` to exactly [`MAX_PATH_CHARS`] characters, keeping both ends.
///
/// Strings at or under the limit are returned unchanged.
pub fn shorten(s: &str) -> String {
    let len = s.chars().count();
    if len <= MAX_PATH_CHARS {
        return s.to_string();
    }
    let head: String = s.chars().take(94).collect();
    let tail: String = s.chars().skip(len - 93).collect();
    format!("{head}...{tail}")
}

/// One profiled request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub path: String,
    pub query_params: String,
    pub method: String,
    pub body: String,
    pub raw_body: String,
    pub view_name: Option<String>,
    /// Request headers as a JSON object.
    pub encoded_headers: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub time_taken_ms: Option<i64>,
    /// Maintained by the store; ignored by `update_request`.
    pub num_sql_queries: i64,
    pub meta_num_queries: Option<i64>,
    pub meta_time_spent_queries_ms: Option<f64>,
}

impl RequestRecord {
    /// A fresh record with a new id, started now.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.into(),
            query_params: String::new(),
            method: method.into(),
            body: String::new(),
            raw_body: String::new(),
            view_name: None,
            encoded_headers: "{}".to_string(),
            start_time: Utc::now(),
            end_time: None,
            time_taken_ms: None,
            num_sql_queries: 0,
            meta_num_queries: None,
            meta_time_spent_queries_ms: None,
        }
    }

    /// Apply the storage length limits to `path` and `view_name`.
    pub fn shortened(mut self) -> Self {
        self.path = shorten(&self.path);
        self.view_name = self.view_name.as_deref().map(shorten);
        self
    }
}

/// One persisted query, owned by a [`RequestRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Assigned by the store; `0` until created.
    pub id: i64,
    pub request_id: String,
    pub alias: String,
    /// SQL with parameters interpolated.
    pub query: String,
    pub raw_sql: String,
    pub params: String,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    pub duration_ms: f64,
    pub traceback: String,
    pub is_select: bool,
    pub transaction_id: Option<String>,
    pub similar_count: Option<i64>,
    pub duplicate_count: Option<i64>,
}

impl QueryRecord {
    /// Build an unsaved record from an annotated event.
    pub fn from_event(request_id: impl Into<String>, event: &QueryEvent) -> Self {
        Self {
            id: 0,
            request_id: request_id.into(),
            alias: event.alias.clone(),
            query: event.sql.clone(),
            raw_sql: event.raw_sql.clone(),
            params: event.params.clone(),
            start_time: event.start_time,
            stop_time: event.stop_time,
            duration_ms: event.duration_ms,
            traceback: event.stacktrace.clone(),
            is_select: event.is_select,
            transaction_id: event.transaction_id.clone(),
            similar_count: event.similar_count.map(count_to_i64),
            duplicate_count: event.duplicate_count.map(count_to_i64),
        }
    }
}

fn count_to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Ordering for [`ProfileStore::list_queries`]. Ties are broken by id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryOrder {
    #[default]
    StartTimeAsc,
    StartTimeDesc,
}

/// Storage for profiled requests and queries.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Insert a request. Returns the record as stored.
    async fn create_request(&self, record: RequestRecord) -> ProfResult<RequestRecord>;

    /// Overwrite every column except `num_sql_queries`.
    async fn update_request(&self, record: &RequestRecord) -> ProfResult<()>;

    async fn get_request(&self, id: &str) -> ProfResult<Option<RequestRecord>>;

    /// Delete a request and all of its queries. Returns `false` if it did not exist.
    async fn delete_request(&self, id: &str) -> ProfResult<bool>;

    /// Insert `queries` for `request_id` in order, incrementing the request's
    /// counter by the number inserted in the same atomic step.
    ///
    /// Returns the stored records with ids assigned. Unknown `request_id` is
    /// `NotFound`.
    async fn create_queries(
        &self,
        request_id: &str,
        queries: Vec<QueryRecord>,
    ) -> ProfResult<Vec<QueryRecord>>;

    /// Insert a single query for `query.request_id`.
    async fn create_query(&self, query: QueryRecord) -> ProfResult<QueryRecord> {
        let request_id = query.request_id.clone();
        self.create_queries(&request_id, vec![query])
            .await?
            .pop()
            .ok_or_else(|| crate::ProfError::Other("store created no query".into()))
    }

    /// Delete a query and decrement its request's counter atomically.
    /// Returns `false` if it did not exist.
    async fn delete_query(&self, id: i64) -> ProfResult<bool>;

    async fn list_queries(&self, request_id: &str, order: QueryOrder)
    -> ProfResult<Vec<QueryRecord>>;
}
