use super::config::InterceptConfig;
use super::loggers::CompositeLogger;
use super::params::{interpolate, params_key, render_param_sets, render_params};
use super::stacktrace;
use super::types::{CursorMode, QueryEvent, QueryLogger, QueryOutcome, QueryType};
use crate::client::GenericClient;
use crate::error::{ProfError, ProfResult};
use crate::sql_text::{TransactionControl, is_select};
use chrono::Utc;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Alias used when none is given.
pub const DEFAULT_ALIAS: &str = "default";

/// Tracks which transaction the wrapped connection is in.
#[derive(Debug, Default)]
pub(super) struct TransactionTracker {
    current: Mutex<Option<String>>,
}

/// The transaction a statement runs in, and what to restore if it fails.
#[derive(Debug)]
pub(super) struct TransactionStep {
    id: Option<String>,
    /// Set when the statement opened a transaction: the id it replaced.
    replaced: Option<Option<String>>,
}

impl TransactionTracker {
    /// Transaction step for a statement about to run.
    ///
    /// `BEGIN` opens a fresh id, `COMMIT`/`ROLLBACK` closes the current one
    /// (the closing statement still belongs to it), and a connection that is
    /// always inside a transaction keeps one id for its lifetime.
    pub(super) fn observe(&self, sql: &str, in_transaction: bool) -> TransactionStep {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match TransactionControl::from_sql(sql) {
            Some(TransactionControl::Begin) => {
                let id = new_transaction_id();
                let replaced = current.replace(id.clone());
                TransactionStep {
                    id: Some(id),
                    replaced: Some(replaced),
                }
            }
            Some(TransactionControl::End) if !in_transaction => TransactionStep {
                id: current.take(),
                replaced: None,
            },
            _ if in_transaction => TransactionStep {
                id: Some(current.get_or_insert_with(new_transaction_id).clone()),
                replaced: None,
            },
            _ => TransactionStep {
                id: current.clone(),
                replaced: None,
            },
        }
    }

    /// Settle a step once its statement finished.
    ///
    /// A failed `BEGIN` opened nothing: the previous id is restored and the
    /// statement itself is reported under it. Returns the statement's id.
    pub(super) fn settle(&self, step: TransactionStep, failed: bool) -> Option<String> {
        match step.replaced {
            Some(previous) if failed => {
                let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
                if *current == step.id {
                    *current = previous.clone();
                }
                previous
            }
            _ => step.id,
        }
    }
}

fn new_transaction_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// What a single wrapped call looks like before it runs.
struct CallSite<'a> {
    raw_sql: &'a str,
    display_sql: Option<String>,
    raw_params: Vec<String>,
}

/// A database client that records every call to a [`QueryLogger`].
///
/// Without a logger the wrapper is a pass-through. The logger is installed and
/// removed by [`Connections`](crate::controller::Connections) or set directly
/// when a handler acquires a connection.
pub struct InstrumentedClient<C> {
    pub(super) client: C,
    pub(super) alias: String,
    pub(super) logger: Option<Arc<dyn QueryLogger>>,
    pub(super) config: InterceptConfig,
    pub(super) mode: CursorMode,
    pub(super) transaction: TransactionTracker,
}

impl<C: GenericClient> InstrumentedClient<C> {
    /// Wrap a client under the default alias, with no logger.
    pub fn new(client: C) -> Self {
        Self {
            client,
            alias: DEFAULT_ALIAS.to_string(),
            logger: None,
            config: InterceptConfig::default(),
            mode: CursorMode::Normal,
            transaction: TransactionTracker::default(),
        }
    }

    /// Set the connection alias reported with every event.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Set the interception configuration.
    pub fn with_config(mut self, config: InterceptConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the logger.
    pub fn with_logger<L: QueryLogger + 'static>(mut self, logger: L) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Set the logger from an Arc.
    pub fn with_logger_arc(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Add a logger.
    ///
    /// If a logger is already set, this composes it with the new one (existing first).
    pub fn add_logger_arc(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.logger = Some(match self.logger.take() {
            None => logger,
            Some(existing) => Arc::new(CompositeLogger::new().add_arc(existing).add_arc(logger)),
        });
        self
    }

    /// Set the cursor mode.
    pub fn with_mode(mut self, mode: CursorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Install a logger unless one is already installed.
    ///
    /// Returns `true` if the logger was installed.
    pub fn install_logger(&mut self, logger: Arc<dyn QueryLogger>) -> bool {
        if self.logger.is_some() {
            return false;
        }
        self.logger = Some(logger);
        true
    }

    /// Remove the installed logger.
    ///
    /// Returns `true` if a logger was removed.
    pub fn remove_logger(&mut self) -> bool {
        self.logger.take().is_some()
    }

    /// Whether a logger is installed.
    pub fn is_instrumented(&self) -> bool {
        self.logger.is_some()
    }

    /// Change the cursor mode.
    pub fn set_mode(&mut self, mode: CursorMode) {
        self.mode = mode;
    }

    /// Current cursor mode.
    pub fn mode(&self) -> CursorMode {
        self.mode
    }

    /// The connection alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Get the current configuration.
    pub fn config(&self) -> &InterceptConfig {
        &self.config
    }

    /// Get a reference to the inner client.
    pub fn inner(&self) -> &C {
        &self.client
    }

    /// Get the inner client, consuming this wrapper.
    pub fn into_inner(self) -> C {
        self.client
    }

    fn forbid(&self, sql: &str) -> ProfError {
        tracing::warn!(
            target: "pgrepeat.sql",
            alias = %self.alias,
            sql,
            "query issued on a connection in forbid mode"
        );
        ProfError::QueryForbidden {
            alias: self.alias.clone(),
            sql: sql.to_string(),
        }
    }

    /// Time `call`, then hand the event to the logger.
    ///
    /// The call's result is returned untouched, success or failure.
    async fn record_call<T, F>(
        &self,
        site: CallSite<'_>,
        call: F,
        outcome: impl FnOnce(&T) -> QueryOutcome,
    ) -> ProfResult<T>
    where
        F: Future<Output = ProfResult<T>>,
    {
        let step = self
            .transaction
            .observe(site.raw_sql, self.client.in_transaction());

        let logger = match &self.logger {
            Some(logger) if logger.is_recording() => Arc::clone(logger),
            _ => {
                let result = call.await;
                self.transaction.settle(step, result.is_err());
                return result;
            }
        };

        let stacktrace = if self.config.capture_stacktrace {
            stacktrace::capture(&self.config.hidden_frame_prefixes)
        } else {
            String::new()
        };

        let start_time = Utc::now();
        let start = Instant::now();
        let result = call.await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let stop_time = Utc::now();
        let transaction_id = self.transaction.settle(step, result.is_err());

        let outcome = match &result {
            Ok(value) => outcome(value),
            Err(e) => QueryOutcome::error(e.to_string()),
        };
        let is_slow = duration_ms > self.config.slow_query_threshold_ms;
        if is_slow {
            tracing::warn!(
                target: "pgrepeat.sql",
                alias = %self.alias,
                duration_ms,
                sql = site.raw_sql,
                "slow query"
            );
        }

        let query_type = QueryType::from_sql(site.raw_sql);
        let event = QueryEvent {
            alias: self.alias.clone(),
            sql: site
                .display_sql
                .unwrap_or_else(|| interpolate(site.raw_sql, &site.raw_params)),
            raw_sql: site.raw_sql.to_string(),
            params: params_key(&site.raw_params),
            raw_params: site.raw_params,
            duration_ms,
            start_time,
            stop_time,
            stacktrace,
            query_type,
            is_select: is_select(site.raw_sql),
            is_slow,
            outcome,
            transaction_id,
            similar_count: None,
            duplicate_count: None,
            starts_trans: false,
            ends_trans: false,
            in_trans: false,
        };
        logger.record(&self.alias, event);

        result
    }
}

impl<C: GenericClient> GenericClient for InstrumentedClient<C> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        if self.mode == CursorMode::Forbid {
            return Err(self.forbid(sql));
        }
        let site = CallSite {
            raw_sql: sql,
            display_sql: None,
            raw_params: render_params(params),
        };
        self.record_call(site, self.client.query(sql, params), |rows| {
            QueryOutcome::Rows(rows.len())
        })
        .await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        if self.mode == CursorMode::Forbid {
            return Err(self.forbid(sql));
        }
        let site = CallSite {
            raw_sql: sql,
            display_sql: None,
            raw_params: render_params(params),
        };
        self.record_call(site, self.client.execute(sql, params), |n| {
            QueryOutcome::Affected(*n)
        })
        .await
    }

    async fn execute_many(
        &self,
        sql: &str,
        param_sets: &[&[&(dyn ToSql + Sync)]],
    ) -> ProfResult<u64> {
        if self.mode == CursorMode::Forbid {
            return Err(self.forbid(sql));
        }
        let site = CallSite {
            raw_sql: sql,
            display_sql: Some(sql.to_string()),
            raw_params: render_param_sets(param_sets),
        };
        self.record_call(site, self.client.execute_many(sql, param_sets), |n| {
            QueryOutcome::Affected(*n)
        })
        .await
    }

    async fn call_proc(&self, name: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        if self.mode == CursorMode::Forbid {
            return Err(self.forbid(name));
        }
        let raw_params = render_params(params);
        let site = CallSite {
            raw_sql: name,
            display_sql: Some(format!("{name}({})", raw_params.join(", "))),
            raw_params,
        };
        self.record_call(site, self.client.call_proc(name, params), |n| {
            QueryOutcome::Affected(*n)
        })
        .await
    }

    fn in_transaction(&self) -> bool {
        self.client.in_transaction()
    }
}
