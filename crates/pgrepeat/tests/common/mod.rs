#![allow(dead_code)]

use pgrepeat::{GenericClient, ProfError, ProfResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// A client that never touches a database: queries return no rows and
/// statements report one affected row.
#[derive(Default)]
pub struct FakeClient {
    pub calls: AtomicUsize,
    pub fail_on: Option<&'static str>,
    pub in_transaction: bool,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(sql: &'static str) -> Self {
        Self {
            fail_on: Some(sql),
            ..Self::default()
        }
    }

    pub fn transaction() -> Self {
        Self {
            in_transaction: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn run(&self, sql: &str) -> ProfResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(sql) {
            return Err(ProfError::Other(format!("relation does not exist: {sql}")));
        }
        Ok(())
    }
}

impl GenericClient for FakeClient {
    async fn query(&self, sql: &str, _: &[&(dyn ToSql + Sync)]) -> ProfResult<Vec<Row>> {
        self.run(sql)?;
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, _: &[&(dyn ToSql + Sync)]) -> ProfResult<u64> {
        self.run(sql)?;
        Ok(1)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}
