//! Per-request query recording and repeat detection.
//!
//! A [`Recorder`] lives for exactly one request. It is installed as the
//! [`QueryLogger`] of the request's connections, accumulates every
//! [`QueryEvent`] while recording, and on [`generate_stats`](Recorder::generate_stats)
//! groups the events into similar (same SQL) and duplicate (same SQL and
//! parameters) sets, marks transaction runs, and persists the result.
//!
//! ```text
//! Idle --record_request / enable_instrumentation--> Recording --generate_stats--> Finalized
//! ```

mod stats;


pub use stats::{DatabaseAliasStats, MIN_GROUP_SIZE, RequestStats};

use stats::annotate;

use crate::client::GenericClient;
use crate::controller::Connections;
use crate::error::{ProfError, ProfResult};
use crate::intercept::{QueryEvent, QueryLogger};
use crate::lifecycle::{self, RequestInfo};
use crate::store::{ProfileStore, QueryRecord, RequestRecord};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Where a recorder is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Recording,
    Finalized,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    request: Option<RequestRecord>,
    request_pending: bool,
    queries: Vec<QueryEvent>,
    databases: BTreeMap<String, DatabaseAliasStats>,
    sql_time_ms: f64,
    num_queries: usize,
}

/// Collects the queries of one request.
pub struct Recorder {
    store: Arc<dyn ProfileStore>,
    state: Mutex<State>,
}

impl Recorder {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self {
            store,
            state: Mutex::new(State {
                phase: Phase::Idle,
                request: None,
                request_pending: false,
                queries: Vec::new(),
                databases: BTreeMap::new(),
                sql_time_ms: 0.0,
                num_queries: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Id of the stored request, once [`record_request`](Self::record_request) succeeded.
    pub fn request_id(&self) -> Option<String> {
        self.lock().request.as_ref().map(|r| r.id.clone())
    }

    /// The stored request, as last written by this recorder.
    pub fn request(&self) -> Option<RequestRecord> {
        self.lock().request.clone()
    }

    pub fn num_queries(&self) -> usize {
        self.lock().num_queries
    }

    pub fn sql_time_ms(&self) -> f64 {
        self.lock().sql_time_ms
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    fn start_recording(&self) {
        let mut state = self.lock();
        if state.phase == Phase::Idle {
            state.phase = Phase::Recording;
            tracing::debug!(target: "pgrepeat.recorder", "recording started");
        }
    }

    /// Install this recorder on every handle in `connections` and start recording.
    ///
    /// Returns how many handles were instrumented.
    pub fn enable_instrumentation<C: GenericClient>(
        self: &Arc<Self>,
        connections: &mut Connections<C>,
    ) -> usize {
        self.start_recording();
        connections.enable(Arc::clone(self) as Arc<dyn QueryLogger>)
    }

    /// Remove the logger from every handle in `connections`.
    pub fn disable_instrumentation<C: GenericClient>(&self, connections: &mut Connections<C>) -> usize {
        connections.disable()
    }

    /// Store a record for the request and start recording.
    ///
    /// Fails with `InvalidState` if a request was already recorded or the
    /// recorder is finalized.
    pub async fn record_request(&self, info: RequestInfo) -> ProfResult<()> {
        {
            let mut state = self.lock();
            if state.phase == Phase::Finalized {
                return Err(ProfError::invalid_state("recorder is finalized"));
            }
            if state.request.is_some() || state.request_pending {
                return Err(ProfError::invalid_state("request already recorded"));
            }
            state.request_pending = true;
        }

        let created = lifecycle::start_request(self.store.as_ref(), info).await;

        let mut state = self.lock();
        state.request_pending = false;
        let record = created?;
        tracing::debug!(
            target: "pgrepeat.recorder",
            request_id = %record.id,
            method = %record.method,
            path = %record.path,
            "request recorded"
        );
        state.request = Some(record);
        if state.phase == Phase::Idle {
            state.phase = Phase::Recording;
        }
        Ok(())
    }

    /// Finalize: annotate repeats and transaction runs, then persist.
    ///
    /// A recorder that never started yields empty stats. Calling this twice
    /// is an `InvalidState` error.
    pub async fn generate_stats(&self) -> ProfResult<RequestStats> {
        let mut stats = {
            let mut state = self.lock();
            match state.phase {
                Phase::Finalized => {
                    return Err(ProfError::invalid_state("stats already generated"));
                }
                Phase::Idle => {
                    state.phase = Phase::Finalized;
                    return Ok(RequestStats::default());
                }
                Phase::Recording => state.phase = Phase::Finalized,
            }
            RequestStats {
                request_id: state.request.as_ref().map(|r| r.id.clone()),
                sql_time_ms: state.sql_time_ms,
                num_queries: state.num_queries,
                databases: std::mem::take(&mut state.databases),
                queries: std::mem::take(&mut state.queries),
            }
        };

        annotate(&mut stats.queries, &mut stats.databases);
        tracing::debug!(
            target: "pgrepeat.recorder",
            num_queries = stats.num_queries,
            sql_time_ms = stats.sql_time_ms,
            similar = stats.similar_queries().count(),
            duplicates = stats.duplicate_queries().count(),
            "stats generated"
        );

        let Some(mut request) = self.request() else {
            return Ok(stats);
        };

        let records: Vec<QueryRecord> = stats
            .queries
            .iter()
            .map(|q| QueryRecord::from_event(request.id.clone(), q))
            .collect();
        let created = self.store.create_queries(&request.id, records).await?;

        request.num_sql_queries += created.len() as i64;
        request.meta_num_queries = Some(stats.num_queries as i64);
        request.meta_time_spent_queries_ms = Some(stats.sql_time_ms);
        self.store.update_request(&request).await?;
        self.lock().request = Some(request);

        Ok(stats)
    }

    /// Stamp the end of the request and persist it.
    ///
    /// Returns `Ok(None)` when no request was recorded.
    pub async fn record_request_end(&self) -> ProfResult<Option<RequestRecord>> {
        let Some(request) = self.request() else {
            return Ok(None);
        };
        let finished = lifecycle::finish_request(self.store.as_ref(), request).await?;
        tracing::debug!(
            target: "pgrepeat.recorder",
            request_id = %finished.id,
            time_taken_ms = ?finished.time_taken_ms,
            "request finished"
        );
        self.lock().request = Some(finished.clone());
        Ok(Some(finished))
    }
}

impl QueryLogger for Recorder {
    fn record(&self, alias: &str, event: QueryEvent) {
        let mut state = self.lock();
        if state.phase != Phase::Recording {
            tracing::trace!(
                target: "pgrepeat.recorder",
                alias,
                phase = ?state.phase,
                "dropping query event outside recording"
            );
            return;
        }

        let database = state.databases.entry(alias.to_string()).or_default();
        database.time_spent_ms += event.duration_ms;
        database.num_queries += 1;
        state.sql_time_ms += event.duration_ms;
        state.num_queries += 1;
        state.queries.push(event);
    }

    fn is_recording(&self) -> bool {
        self.lock().phase == Phase::Recording
    }
}
