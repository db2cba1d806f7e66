//! Generic client trait: the cursor contract the interceptor wraps.

use crate::error::{ProfError, ProfResult};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// A trait that unifies database clients and transactions.
///
/// This is the surface [`InstrumentedClient`](crate::intercept::InstrumentedClient)
/// decorates: anything implementing it can be profiled, and an instrumented client
/// implements it again so application code does not change.
pub trait GenericClient: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = ProfResult<Vec<Row>>> + Send;

    /// Execute a query and return the first row, if any.
    fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = ProfResult<Option<Row>>> + Send {
        async move {
            let rows = self.query(sql, params).await?;
            Ok(rows.into_iter().next())
        }
    }

    /// Execute a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = ProfResult<u64>> + Send;

    /// Execute the same statement once per parameter set.
    ///
    /// Returns the total number of affected rows. Stops at the first error.
    fn execute_many(
        &self,
        sql: &str,
        param_sets: &[&[&(dyn ToSql + Sync)]],
    ) -> impl std::future::Future<Output = ProfResult<u64>> + Send {
        async move {
            let mut total = 0u64;
            for params in param_sets {
                total = total.saturating_add(self.execute(sql, params).await?);
            }
            Ok(total)
        }
    }

    /// Call a stored procedure (`CALL name($1, ...)`).
    fn call_proc(
        &self,
        name: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = ProfResult<u64>> + Send {
        async move {
            let sql = call_statement(name, params.len());
            self.execute(&sql, params).await
        }
    }

    /// Whether every statement on this client runs inside one open transaction.
    ///
    /// `tokio_postgres::Transaction` returns `true`; plain clients return `false`
    /// and rely on `BEGIN`/`COMMIT` detection instead.
    fn in_transaction(&self) -> bool {
        false
    }
}

/// Build the `CALL` statement used by [`GenericClient::call_proc`].
pub(crate) fn call_statement(name: &str, param_count: usize) -> String {
    let placeholders: Vec<String> = (1..=param_count).map(|i| format!("${i}")).collect();
    format!("CALL {name}({})", placeholders.join(", "))
}

impl GenericClient for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        tokio_postgres::Client::query(self, sql, params)
            .await
            .map_err(ProfError::from)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        tokio_postgres::Client::execute(self, sql, params)
            .await
            .map_err(ProfError::from)
    }
}

impl GenericClient for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        tokio_postgres::Transaction::query(self, sql, params)
            .await
            .map_err(ProfError::from)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        tokio_postgres::Transaction::execute(self, sql, params)
            .await
            .map_err(ProfError::from)
    }

    fn in_transaction(&self) -> bool {
        true
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        // Delegate to the deref target (ClientWrapper / tokio_postgres::Client).
        GenericClient::query(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        GenericClient::execute(&**self, sql, params).await
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::ClientWrapper {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        GenericClient::query(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        GenericClient::execute(&**self, sql, params).await
    }
}

#[cfg(feature = "pool")]
impl GenericClient for deadpool_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        GenericClient::query(&**self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        GenericClient::execute(&**self, sql, params).await
    }

    fn in_transaction(&self) -> bool {
        true
    }
}

impl<C: GenericClient> GenericClient for &C {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        (*self).query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        (*self).execute(sql, params).await
    }

    fn execute_many(
        &self,
        sql: &str,
        param_sets: &[&[&(dyn ToSql + Sync)]],
    ) -> impl std::future::Future<Output = ProfResult<u64>> + Send {
        (*self).execute_many(sql, param_sets)
    }

    fn call_proc(
        &self,
        name: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = ProfResult<u64>> + Send {
        (*self).call_proc(name, params)
    }

    fn in_transaction(&self) -> bool {
        (*self).in_transaction()
    }
}
