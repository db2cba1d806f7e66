//! The per-request set of instrumented connection handles.

use crate::client::GenericClient;
use crate::intercept::{CursorMode, InstrumentedClient, InterceptConfig, QueryLogger};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Aliased connection handles owned by one request.
///
/// Each handle is an [`InstrumentedClient`]. Enabling installs a logger on
/// every handle that has none; disabling removes it again. Both are
/// idempotent, so a handle is never instrumented twice.
pub struct Connections<C> {
    handles: Vec<InstrumentedClient<C>>,
    config: InterceptConfig,
}

impl<C: GenericClient> Connections<C> {
    /// An empty set using the default interception settings.
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            config: InterceptConfig::default(),
        }
    }

    /// Settings applied to clients added with [`add`](Self::add).
    pub fn with_config(mut self, config: InterceptConfig) -> Self {
        self.config = config;
        self
    }

    /// Wrap `client` under `alias` and add it.
    pub fn with(mut self, alias: impl Into<String>, client: C) -> Self {
        self.add(alias, client);
        self
    }

    /// Wrap `client` under `alias` and add it, replacing any handle with the same alias.
    pub fn add(&mut self, alias: impl Into<String>, client: C) -> Option<InstrumentedClient<C>> {
        let handle = InstrumentedClient::new(client)
            .with_alias(alias)
            .with_config(self.config.clone());
        self.insert(handle)
    }

    /// Add an already wrapped client, replacing any handle with the same alias.
    pub fn insert(&mut self, handle: InstrumentedClient<C>) -> Option<InstrumentedClient<C>> {
        match self.handles.iter().position(|h| h.alias() == handle.alias()) {
            Some(idx) => Some(std::mem::replace(&mut self.handles[idx], handle)),
            None => {
                self.handles.push(handle);
                None
            }
        }
    }

    /// Remove the handle for `alias`.
    pub fn remove(&mut self, alias: &str) -> Option<InstrumentedClient<C>> {
        let idx = self.handles.iter().position(|h| h.alias() == alias)?;
        Some(self.handles.remove(idx))
    }

    pub fn get(&self, alias: &str) -> Option<&InstrumentedClient<C>> {
        self.handles.iter().find(|h| h.alias() == alias)
    }

    pub fn get_mut(&mut self, alias: &str) -> Option<&mut InstrumentedClient<C>> {
        self.handles.iter_mut().find(|h| h.alias() == alias)
    }

    /// Aliases in insertion order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|h| h.alias())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Install `logger` on every handle without one.
    ///
    /// Returns how many handles changed.
    pub fn enable(&mut self, logger: Arc<dyn QueryLogger>) -> usize {
        self.handles
            .iter_mut()
            .map(|h| h.install_logger(Arc::clone(&logger)))
            .filter(|&installed| installed)
            .count()
    }

    /// Remove the logger from every instrumented handle.
    ///
    /// Returns how many handles changed.
    pub fn disable(&mut self) -> usize {
        self.handles
            .iter_mut()
            .map(|h| h.remove_logger())
            .filter(|&removed| removed)
            .count()
    }

    /// Enable `logger` until the returned guard is dropped.
    pub fn instrument(&mut self, logger: Arc<dyn QueryLogger>) -> InstrumentationGuard<'_, C> {
        self.enable(logger);
        InstrumentationGuard { connections: self }
    }

    /// Set the cursor mode of every handle.
    pub fn set_mode(&mut self, mode: CursorMode) {
        for handle in &mut self.handles {
            handle.set_mode(mode);
        }
    }

    /// Refuse every query until the returned guard is dropped.
    pub fn forbid_queries(&mut self) -> ForbidGuard<'_, C> {
        self.set_mode(CursorMode::Forbid);
        ForbidGuard { connections: self }
    }

    /// Unwrap every handle, returning `(alias, client)` pairs.
    pub fn into_inner(self) -> Vec<(String, C)> {
        self.handles
            .into_iter()
            .map(|h| (h.alias().to_string(), h.into_inner()))
            .collect()
    }
}

impl<C: GenericClient> Default for Connections<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Disables instrumentation on drop.
pub struct InstrumentationGuard<'a, C: GenericClient> {
    connections: &'a mut Connections<C>,
}

impl<C: GenericClient> Deref for InstrumentationGuard<'_, C> {
    type Target = Connections<C>;

    fn deref(&self) -> &Self::Target {
        self.connections
    }
}

impl<C: GenericClient> DerefMut for InstrumentationGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connections
    }
}

impl<C: GenericClient> Drop for InstrumentationGuard<'_, C> {
    fn drop(&mut self) {
        self.connections.disable();
    }
}

/// Restores [`CursorMode::Normal`] on drop.
pub struct ForbidGuard<'a, C: GenericClient> {
    connections: &'a mut Connections<C>,
}

impl<C: GenericClient> Deref for ForbidGuard<'_, C> {
    type Target = Connections<C>;

    fn deref(&self) -> &Self::Target {
        self.connections
    }
}

impl<C: GenericClient> DerefMut for ForbidGuard<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connections
    }
}

impl<C: GenericClient> Drop for ForbidGuard<'_, C> {
    fn drop(&mut self) {
        self.connections.set_mode(CursorMode::Normal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intercept::CollectingLogger;
    use crate::testing::FakeClient;

    fn connections() -> Connections<FakeClient> {
        Connections::new()
            .with_config(InterceptConfig::new().with_stacktrace(false))
            .with("default", FakeClient::default())
            .with("replica", FakeClient::default())
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let mut conns = connections();
        let logger: Arc<dyn QueryLogger> = Arc::new(CollectingLogger::new());

        assert_eq!(conns.enable(logger.clone()), 2);
        assert_eq!(conns.enable(logger), 0);
        assert!(conns.get("replica").unwrap().is_instrumented());

        assert_eq!(conns.disable(), 2);
        assert_eq!(conns.disable(), 0);
        assert!(!conns.get("default").unwrap().is_instrumented());
    }

    #[tokio::test]
    async fn guard_restores_on_drop() {
        let mut conns = connections();
        let logger = Arc::new(CollectingLogger::new());

        {
            let guard = conns.instrument(logger.clone());
            guard
                .get("replica")
                .unwrap()
                .query("SELECT 1", &[])
                .await
                .unwrap();
        }
        conns
            .get("replica")
            .unwrap()
            .query("SELECT 2", &[])
            .await
            .unwrap();

        let events = logger.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alias, "replica");
        assert!(conns.aliases().all(|a| !conns.get(a).unwrap().is_instrumented()));
    }

    #[tokio::test]
    async fn forbid_guard_restores_normal_mode() {
        let mut conns = connections();
        {
            let guard = conns.forbid_queries();
            let err = guard
                .get("default")
                .unwrap()
                .execute("DELETE FROM t", &[])
                .await
                .unwrap_err();
            assert!(err.is_forbidden());
        }
        assert_eq!(conns.get("default").unwrap().mode(), CursorMode::Normal);
        assert_eq!(conns.get("default").unwrap().execute("DELETE FROM t", &[]).await.unwrap(), 1);
    }

    #[test]
    fn add_replaces_same_alias() {
        let mut conns = connections();
        assert!(conns.add("replica", FakeClient::transaction()).is_some());
        assert_eq!(conns.len(), 2);
        assert!(conns.get("replica").unwrap().in_transaction());
        assert!(conns.remove("replica").is_some());
        assert_eq!(conns.aliases().collect::<Vec<_>>(), vec!["default"]);
        assert_eq!(conns.into_inner().len(), 1);
    }
}
