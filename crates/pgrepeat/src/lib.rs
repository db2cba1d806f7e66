//! # pgrepeat
//!
//! A request-scoped SQL profiler for PostgreSQL-backed services.
//!
//! ## Features
//!
//! - **Transparent interception**: [`InstrumentedClient`] wraps any [`GenericClient`]
//!   and records timing, parameters and call sites without changing results
//! - **Repeat detection**: similar (same SQL) and duplicate (same SQL and parameters)
//!   queries are grouped per connection alias to surface N+1 patterns
//! - **Transaction runs**: queries are marked as starting, ending or inside a transaction
//! - **Pluggable storage**: [`MemoryStore`] for tests, [`PgStore`] for PostgreSQL
//! - **Axum middleware**: profile every request with one layer
//!
//! ## Example
//!
//! ```ignore
//! use pgrepeat::{Connections, DispatchFilter, MemoryStore, ProfilerConfig, RequestInfo, ResponseKind};
//! use std::sync::Arc;
//!
//! let filter = DispatchFilter::new(Arc::new(MemoryStore::new()), ProfilerConfig::default());
//! let mut conns = Connections::new().with("default", client);
//!
//! let active = filter.on_request(RequestInfo::new("GET", "/orders/42"), &mut conns).await?;
//! let db = conns.get("default").unwrap();
//! db.query("SELECT * FROM orders WHERE id = $1", &[&42i32]).await?;
//! db.query("SELECT * FROM orders WHERE id = $1", &[&42i32]).await?;
//!
//! let stats = filter.on_response(active, &mut conns, ResponseKind::Normal).await?;
//! ```

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod intercept;
pub mod lifecycle;
pub mod recorder;
pub mod report;
pub mod sql_text;
pub mod store;

#[cfg(test)]
mod testing;

pub use client::GenericClient;
pub use config::ProfilerConfig;
pub use controller::{Connections, ForbidGuard, InstrumentationGuard};
pub use error::{ProfError, ProfResult};
pub use filter::{ActiveRequest, DispatchFilter, ResponseKind};
pub use intercept::{
    CollectingLogger, CompositeLogger, CursorMode, InstrumentedClient, InterceptConfig,
    NoopLogger, QueryEvent, QueryLogger, QueryOutcome, QueryType, TracingLogger,
};
pub use lifecycle::{Headers, RequestInfo};
pub use recorder::{DatabaseAliasStats, Phase, Recorder, RequestStats};
pub use report::{QueryReport, RequestReport, load_report};
pub use store::{MemoryStore, ProfileStore, QueryOrder, QueryRecord, RequestRecord};

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_config};

#[cfg(feature = "pool")]
pub use store::PgStore;

#[cfg(feature = "migrate")]
pub mod migrate;

#[cfg(feature = "axum")]
pub mod middleware;

#[cfg(feature = "axum")]
pub use middleware::{Profiler, RequestProfile, profile_requests};
