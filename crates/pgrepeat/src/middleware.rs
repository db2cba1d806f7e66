//! Axum integration.
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use pgrepeat::middleware::{Profiler, profile_requests};
//!
//! let profiler = Profiler::new(store, ProfilerConfig::default());
//! let app = Router::new()
//!     .route("/posts", get(list_posts))
//!     .layer(middleware::from_fn_with_state(profiler, profile_requests));
//! ```
//!
//! Handlers wrap the connections they acquire with
//! [`RequestProfile::instrument`], found in the request extensions.

use crate::client::GenericClient;
use crate::config::ProfilerConfig;
use crate::filter::{DispatchFilter, ResponseKind};
use crate::intercept::{InstrumentedClient, InterceptConfig};
use crate::lifecycle::{Headers, RequestInfo};
use crate::recorder::Recorder;
use crate::store::ProfileStore;
use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::HeaderValue;
use axum::http::header::CONTENT_LENGTH;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Response header naming the stored request of a profiled response.
pub const REQUEST_ID_HEADER: &str = "x-pgrepeat-request";

/// Middleware state.
#[derive(Clone)]
pub struct Profiler {
    filter: DispatchFilter,
    intercept: Arc<InterceptConfig>,
}

impl Profiler {
    pub fn new(store: Arc<dyn ProfileStore>, config: ProfilerConfig) -> Self {
        Self::from_filter(DispatchFilter::new(store, config))
    }

    pub fn from_filter(filter: DispatchFilter) -> Self {
        let intercept = Arc::new(filter.config().intercept_config());
        Self { filter, intercept }
    }

    pub fn filter(&self) -> &DispatchFilter {
        &self.filter
    }
}

/// The recording context of a profiled request, stored in its extensions.
#[derive(Clone)]
pub struct RequestProfile {
    recorder: Arc<Recorder>,
    intercept: Arc<InterceptConfig>,
    default_alias: String,
}

impl RequestProfile {
    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    /// Wrap `client` so its queries are recorded under `alias`.
    pub fn instrument<C: GenericClient>(&self, alias: &str, client: C) -> InstrumentedClient<C> {
        InstrumentedClient::new(client)
            .with_alias(alias)
            .with_config(InterceptConfig::clone(&self.intercept))
            .with_logger_arc(self.recorder.clone())
    }

    /// Wrap `client` under the configured default alias.
    pub fn instrument_default<C: GenericClient>(&self, client: C) -> InstrumentedClient<C> {
        self.instrument(&self.default_alias, client)
    }
}

/// Wrap `client` for the current request, or pass it through when the
/// request is not profiled.
pub fn instrument<C: GenericClient>(
    profile: Option<&RequestProfile>,
    alias: &str,
    client: C,
) -> InstrumentedClient<C> {
    match profile {
        Some(profile) => profile.instrument(alias, client),
        None => InstrumentedClient::new(client).with_alias(alias),
    }
}

fn request_info(parts: &Parts, raw_body: Vec<u8>) -> RequestInfo {
    let headers: Headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect();
    let mut info = RequestInfo::new(parts.method.as_str(), parts.uri.path())
        .with_query(parts.uri.query().unwrap_or_default())
        .with_headers(headers)
        .with_body(raw_body);
    if let Some(matched) = parts.extensions.get::<MatchedPath>() {
        info = info.with_view_name(matched.as_str());
    }
    info
}

/// A body that fails the way the original one did.
fn failed_body(error: axum::Error) -> Body {
    let chunk: Result<axum::body::Bytes, axum::Error> = Err(error);
    Body::from_stream(futures_util::stream::once(std::future::ready(chunk)))
}

/// Buffer the body when its declared length is within `max_bytes`.
///
/// A body that fails while buffering is not captured; the handler receives a
/// body yielding the same error.
async fn buffer_body(parts: &Parts, body: Body, max_bytes: usize) -> (Body, Vec<u8>) {
    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    match declared {
        Some(len) if len <= max_bytes => match axum::body::to_bytes(body, max_bytes).await {
            Ok(bytes) => {
                let raw = bytes.to_vec();
                (Body::from(bytes), raw)
            }
            Err(e) => {
                tracing::warn!(target: "pgrepeat.filter", error = %e, "failed to buffer request body");
                (failed_body(e), Vec::new())
            }
        },
        _ => (body, Vec::new()),
    }
}

/// Record every request not excluded by the profiler's skip list.
///
/// Profiling failures are logged and never change the response. Recorded
/// responses carry the stored request id in [`REQUEST_ID_HEADER`].
pub async fn profile_requests(
    State(profiler): State<Profiler>,
    request: Request,
    next: Next,
) -> Response {
    if !profiler.filter.should_record(request.uri().path()) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let (body, raw_body) = buffer_body(&parts, body, profiler.filter.config().max_body_bytes).await;
    let info = request_info(&parts, raw_body);
    let mut request = Request::from_parts(parts, body);

    let recorder = match profiler.filter.begin(info).await {
        Ok(Some(recorder)) => recorder,
        Ok(None) => return next.run(request).await,
        Err(e) => {
            tracing::warn!(target: "pgrepeat.filter", error = %e, "failed to start recording");
            return next.run(request).await;
        }
    };

    request.extensions_mut().insert(RequestProfile {
        recorder: Arc::clone(&recorder),
        intercept: Arc::clone(&profiler.intercept),
        default_alias: profiler.filter.config().default_alias.clone(),
    });

    let mut response = next.run(request).await;

    if let Err(e) = profiler.filter.finish(&recorder, ResponseKind::Normal).await {
        tracing::warn!(
            target: "pgrepeat.filter",
            request_id = ?recorder.request_id(),
            error = %e,
            "failed to finish recording"
        );
    }
    if let Some(id) = recorder.request_id()
        && let Ok(value) = HeaderValue::from_str(&id)
    {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
