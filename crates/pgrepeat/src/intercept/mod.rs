//! Query interception for profiled connections.
//!
//! [`InstrumentedClient`] decorates any [`GenericClient`](crate::GenericClient),
//! times every call and hands a [`QueryEvent`] to its [`QueryLogger`]. The wrapper
//! never alters results: errors from the underlying client propagate unchanged
//! after the event is recorded.
//!
//! # Example
//!
//! ```rust,ignore
//! use pgrepeat::intercept::{InstrumentedClient, TracingLogger};
//!
//! let client = InstrumentedClient::new(db_client)
//!     .with_alias("replica")
//!     .with_logger(TracingLogger::new());
//!
//! // Every call is logged on the `pgrepeat.sql` target.
//! let rows = client.query("SELECT * FROM posts WHERE author_id = $1", &[&7i64]).await?;
//! ```

mod config;
mod instrumented;
mod loggers;
mod params;
pub(crate) mod stacktrace;
mod types;

#[cfg(test)]
mod tests;

pub use config::{DEFAULT_SLOW_QUERY_THRESHOLD_MS, InterceptConfig};
pub use instrumented::{DEFAULT_ALIAS, InstrumentedClient};
pub use loggers::{CollectingLogger, CompositeLogger, NoopLogger, TracingLogger};
pub use params::{UNRENDERABLE, interpolate, params_key, render_param, render_params};
pub use stacktrace::DEFAULT_HIDDEN_PREFIXES;
pub use types::{CursorMode, QueryEvent, QueryLogger, QueryOutcome, QueryType};

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
