//! Fake clients shared by unit tests.

use crate::client::GenericClient;
use crate::error::{ProfError, ProfResult};
use std::sync::Mutex;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Returns no rows, reports one affected row per statement and remembers the
/// SQL it was given.
#[derive(Default)]
pub(crate) struct FakeClient {
    pub(crate) fail: bool,
    pub(crate) in_transaction: bool,
    pub(crate) seen: Mutex<Vec<String>>,
}

impl FakeClient {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn transaction() -> Self {
        Self {
            in_transaction: true,
            ..Self::default()
        }
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn run(&self, sql: &str) -> ProfResult<()> {
        self.seen.lock().unwrap().push(sql.to_string());
        if self.fail {
            return Err(ProfError::Connection("connection reset by peer".into()));
        }
        Ok(())
    }
}

impl GenericClient for FakeClient {
    async fn query(&self, sql: &str, _: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        self.run(sql)?;
        Ok(vec![])
    }

    async fn execute(&self, sql: &str, _: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        self.run(sql)?;
        Ok(1)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}
