use super::truncate_sql_bytes;
use super::types::{QueryEvent, QueryLogger};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::Level;

/// A logger that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl QueryLogger for NoopLogger {
    fn record(&self, _alias: &str, _event: QueryEvent) {}

    fn is_recording(&self) -> bool {
        false
    }
}

/// A `tracing`-based logger that emits one event per intercepted call on the
/// `pgrepeat.sql` target.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    /// Tracing event level to emit at.
    pub level: Level,
    /// Truncate long SQL strings (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(200),
        }
    }
}

impl TracingLogger {
    /// Create a new logger with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the tracing event level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set maximum SQL length to display.
    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Disable SQL truncation.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    pub(crate) fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }
}

impl QueryLogger for TracingLogger {
    fn record(&self, alias: &str, event: QueryEvent) {
        /// Dispatch a tracing event at a runtime-determined level.
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let sql = self.truncate_sql(&event.sql);
        let transaction_id = event.transaction_id.as_deref().unwrap_or("-");
        emit_at_level!(
            self.level,
            target: "pgrepeat.sql",
            alias,
            query_type = ?event.query_type,
            duration_ms = event.duration_ms,
            param_count = event.raw_params.len(),
            transaction_id,
            outcome = %event.outcome,
            sql = %sql,
        );
    }
}

/// A logger that keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingLogger {
    events: Mutex<Vec<QueryEvent>>,
}

impl CollectingLogger {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events collected so far.
    pub fn events(&self) -> Vec<QueryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return the collected events.
    pub fn take(&self) -> Vec<QueryEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl QueryLogger for CollectingLogger {
    fn record(&self, _alias: &str, event: QueryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// A composite logger that delegates to multiple loggers.
///
/// Each event is cloned for every logger except the last one.
pub struct CompositeLogger {
    loggers: Vec<Arc<dyn QueryLogger>>,
}

impl CompositeLogger {
    /// Create an empty composite logger.
    pub fn new() -> Self {
        Self {
            loggers: Vec::new(),
        }
    }

    /// Add a logger.
    #[allow(clippy::should_implement_trait)]
    pub fn add<L: QueryLogger + 'static>(mut self, logger: L) -> Self {
        self.loggers.push(Arc::new(logger));
        self
    }

    /// Add an Arc-wrapped logger.
    pub fn add_arc(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.loggers.push(logger);
        self
    }
}

impl Default for CompositeLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryLogger for CompositeLogger {
    fn record(&self, alias: &str, event: QueryEvent) {
        let active: Vec<&Arc<dyn QueryLogger>> =
            self.loggers.iter().filter(|l| l.is_recording()).collect();
        let Some((last, rest)) = active.split_last() else {
            return;
        };
        for logger in rest {
            logger.record(alias, event.clone());
        }
        last.record(alias, event);
    }

    fn is_recording(&self) -> bool {
        self.loggers.iter().any(|l| l.is_recording())
    }
}
