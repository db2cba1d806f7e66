//! Deciding which requests to record, and the request/response hooks.

use crate::client::GenericClient;
use crate::config::ProfilerConfig;
use crate::controller::Connections;
use crate::error::ProfResult;
use crate::lifecycle::RequestInfo;
use crate::recorder::{Recorder, RequestStats};
use crate::store::ProfileStore;
use std::sync::Arc;

/// How the response was produced. Both kinds are finished the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseKind {
    #[default]
    Normal,
    TemplateRender,
}

/// A request being recorded.
pub struct ActiveRequest {
    recorder: Arc<Recorder>,
}

impl ActiveRequest {
    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }
}

/// Decides which requests are recorded and drives their recorders.
#[derive(Clone)]
pub struct DispatchFilter {
    store: Arc<dyn ProfileStore>,
    config: Arc<ProfilerConfig>,
}

impl DispatchFilter {
    pub fn new(store: Arc<dyn ProfileStore>, config: ProfilerConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    /// Whether requests to `path` are recorded.
    pub fn should_record(&self, path: &str) -> bool {
        let skipped = self
            .config
            .skip_segments
            .iter()
            .find(|segment| path.contains(segment.as_str()));
        if let Some(segment) = skipped {
            tracing::trace!(target: "pgrepeat.filter", path, segment = %segment, "skipping request");
            return false;
        }
        true
    }

    /// Start a recorder for `info`, unless the path is skipped.
    ///
    /// The recorder is recording when returned; connections acquired later
    /// are instrumented with it.
    pub async fn begin(&self, info: RequestInfo) -> ProfResult<Option<Arc<Recorder>>> {
        if !self.should_record(&info.path) {
            return Ok(None);
        }
        let recorder = Arc::new(Recorder::new(Arc::clone(&self.store)));
        recorder.record_request(info).await?;
        Ok(Some(recorder))
    }

    /// Finalize a recorder started by [`begin`](Self::begin).
    pub async fn finish(&self, recorder: &Recorder, kind: ResponseKind) -> ProfResult<RequestStats> {
        tracing::trace!(target: "pgrepeat.filter", ?kind, "finishing request");
        let stats = recorder.generate_stats().await?;
        recorder.record_request_end().await?;
        Ok(stats)
    }

    /// Request hook: start recording and instrument `connections`.
    pub async fn on_request<C: GenericClient>(
        &self,
        info: RequestInfo,
        connections: &mut Connections<C>,
    ) -> ProfResult<Option<ActiveRequest>> {
        if !self.should_record(&info.path) {
            return Ok(None);
        }
        let recorder = Arc::new(Recorder::new(Arc::clone(&self.store)));
        recorder.enable_instrumentation(connections);
        if let Err(e) = recorder.record_request(info).await {
            recorder.disable_instrumentation(connections);
            return Err(e);
        }
        Ok(Some(ActiveRequest { recorder }))
    }

    /// Response hook: stop instrumenting, finalize and persist.
    ///
    /// Returns `Ok(None)` when the request was not recorded.
    pub async fn on_response<C: GenericClient>(
        &self,
        active: Option<ActiveRequest>,
        connections: &mut Connections<C>,
        kind: ResponseKind,
    ) -> ProfResult<Option<RequestStats>> {
        let Some(active) = active else {
            return Ok(None);
        };
        active.recorder.disable_instrumentation(connections);
        self.finish(&active.recorder, kind).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::InterceptConfig;
    use crate::store::MemoryStore;
    use crate::testing::FakeClient;

    fn filter(store: Arc<MemoryStore>) -> DispatchFilter {
        DispatchFilter::new(store, ProfilerConfig::default())
    }

    #[test]
    fn skips_configured_segments() {
        let filter = filter(Arc::new(MemoryStore::new()));
        assert!(filter.should_record("/orders/42"));
        assert!(!filter.should_record("/admin/users"));
        assert!(!filter.should_record("/api/pgrepeat/requests"));

        let custom = DispatchFilter::new(
            Arc::new(MemoryStore::new()),
            ProfilerConfig::new().with_skip_segments(["/health"]),
        );
        assert!(custom.should_record("/admin"));
        assert!(!custom.should_record("/health/live"));
    }

    #[tokio::test]
    async fn records_between_request_and_response() {
        let store = Arc::new(MemoryStore::new());
        let filter = filter(store.clone());
        let mut conns = Connections::new()
            .with_config(InterceptConfig::new().with_stacktrace(false))
            .with("default", FakeClient::default());

        let active = filter
            .on_request(RequestInfo::new("GET", "/orders/42"), &mut conns)
            .await
            .unwrap();
        assert!(active.is_some());
        assert!(conns.get("default").unwrap().is_instrumented());

        conns
            .get("default")
            .unwrap()
            .query("SELECT 1", &[])
            .await
            .unwrap();

        let stats = filter
            .on_response(active, &mut conns, ResponseKind::TemplateRender)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.num_queries, 1);
        assert!(!conns.get("default").unwrap().is_instrumented());

        let stored = store
            .get_request(&stats.request_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.num_sql_queries, 1);
        assert!(stored.end_time.is_some());
    }

    #[tokio::test]
    async fn skipped_requests_pass_through() {
        let store = Arc::new(MemoryStore::new());
        let filter = filter(store.clone());
        let mut conns = Connections::new().with("default", FakeClient::default());

        let active = filter
            .on_request(RequestInfo::new("GET", "/admin/requests"), &mut conns)
            .await
            .unwrap();
        assert!(active.is_none());
        assert!(!conns.get("default").unwrap().is_instrumented());

        let stats = filter
            .on_response(active, &mut conns, ResponseKind::Normal)
            .await
            .unwrap();
        assert!(stats.is_none());
        assert_eq!(store.request_count(), 0);
    }

    #[tokio::test]
    async fn begin_and_finish_without_connections() {
        let store = Arc::new(MemoryStore::new());
        let filter = filter(store.clone());

        assert!(filter.begin(RequestInfo::new("GET", "/admin")).await.unwrap().is_none());

        let recorder = filter
            .begin(RequestInfo::new("GET", "/posts"))
            .await
            .unwrap()
            .unwrap();
        let stats = filter.finish(&recorder, ResponseKind::Normal).await.unwrap();
        assert_eq!(stats.num_queries, 0);
        assert!(recorder.request().unwrap().end_time.is_some());
        assert_eq!(store.request_count(), 1);
    }
}
