use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::sql_text::{main_statement, starts_with_keyword};

/// The type of SQL operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// SELECT query
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// Other SQL (e.g., DDL, transaction control, procedure calls)
    Other,
}

impl QueryType {
    /// Classify a statement by its leading keyword, looking through CTEs.
    pub fn from_sql(sql: &str) -> Self {
        const KINDS: [(&str, QueryType); 4] = [
            ("SELECT", QueryType::Select),
            ("INSERT", QueryType::Insert),
            ("UPDATE", QueryType::Update),
            ("DELETE", QueryType::Delete),
        ];
        let statement = main_statement(sql);
        KINDS
            .iter()
            .find(|(keyword, _)| starts_with_keyword(statement, keyword))
            .map_or(QueryType::Other, |&(_, kind)| kind)
    }
}

/// Maximum length for error messages in `QueryOutcome::Error`.
const MAX_ERROR_LEN: usize = 512;

/// What the wrapped call produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Query returned rows.
    Rows(usize),
    /// Statement affected rows.
    Affected(u64),
    /// The call failed; the message is truncated to 512 bytes.
    Error(String),
}

impl QueryOutcome {
    /// Create an error outcome, truncating the message to avoid event bloat.
    pub fn error(msg: String) -> Self {
        if msg.len() > MAX_ERROR_LEN {
            Self::Error(format!("{}...", super::truncate_sql_bytes(&msg, MAX_ERROR_LEN)))
        } else {
            Self::Error(msg)
        }
    }

    /// Whether the wrapped call failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutcome::Rows(n) => write!(f, "{n} rows"),
            QueryOutcome::Affected(n) => write!(f, "{n} affected"),
            QueryOutcome::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// One intercepted database call.
///
/// Created by the interceptor, owned by a single recorder, and annotated in
/// place by [`Recorder::generate_stats`](crate::recorder::Recorder::generate_stats).
#[derive(Debug, Clone, Serialize)]
pub struct QueryEvent {
    /// Connection alias the call ran on.
    pub alias: String,
    /// SQL with parameters interpolated, for display.
    pub sql: String,
    /// SQL exactly as issued; the similarity key.
    pub raw_sql: String,
    /// Bound parameters rendered to printable strings.
    pub raw_params: Vec<String>,
    /// Stable JSON encoding of `raw_params`; half of the duplicate key.
    pub params: String,
    /// Wall time of the call in milliseconds.
    pub duration_ms: f64,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    /// Call stack at invocation time (empty when capture is disabled).
    pub stacktrace: String,
    pub query_type: QueryType,
    pub is_select: bool,
    pub is_slow: bool,
    pub outcome: QueryOutcome,
    /// Transaction the call ran in, if any.
    pub transaction_id: Option<String>,

    /// Size of this event's similarity group, when it repeats.
    pub similar_count: Option<usize>,
    /// Size of this event's duplicate group, when it repeats.
    pub duplicate_count: Option<usize>,
    pub starts_trans: bool,
    pub ends_trans: bool,
    pub in_trans: bool,
}

impl QueryEvent {
    /// The key similar queries share.
    pub fn similarity_key(&self) -> &str {
        &self.raw_sql
    }

    /// The key duplicate queries share.
    pub fn duplicate_key(&self) -> (&str, &str) {
        (&self.raw_sql, &self.params)
    }
}

/// Sink for intercepted query events.
///
/// Any component implementing this can receive events from an
/// [`InstrumentedClient`](super::InstrumentedClient).
pub trait QueryLogger: Send + Sync {
    /// Receive one event for the connection named `alias`.
    fn record(&self, alias: &str, event: QueryEvent);

    /// Whether events are currently wanted.
    ///
    /// The interceptor skips stack capture and event construction when this
    /// returns `false`. Default is `true`.
    fn is_recording(&self) -> bool {
        true
    }
}

/// How an instrumented connection treats calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CursorMode {
    /// Execute and record.
    #[default]
    Normal,
    /// Refuse every call with [`ProfError::QueryForbidden`](crate::ProfError::QueryForbidden).
    Forbid,
}
