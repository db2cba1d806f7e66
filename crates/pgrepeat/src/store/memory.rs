use super::{ProfileStore, QueryOrder, QueryRecord, RequestRecord};
use crate::error::{ProfError, ProfResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Tables {
    requests: HashMap<String, RequestRecord>,
    queries: BTreeMap<i64, QueryRecord>,
    next_query_id: i64,
}

/// An in-process store. All operations hold one mutex, so counter updates
/// are atomic with the inserts and deletes that cause them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored requests.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Every stored request, oldest first.
    pub fn requests(&self) -> Vec<RequestRecord> {
        let mut requests: Vec<RequestRecord> = self.lock().requests.values().cloned().collect();
        requests.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        requests
    }

    /// Number of stored queries across all requests.
    pub fn query_count(&self) -> usize {
        self.lock().queries.len()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn create_request(&self, record: RequestRecord) -> ProfResult<RequestRecord> {
        let record = record.shortened();
        let mut tables = self.lock();
        if tables.requests.contains_key(&record.id) {
            return Err(ProfError::Other(format!(
                "request {} already exists",
                record.id
            )));
        }
        tables.requests.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_request(&self, record: &RequestRecord) -> ProfResult<()> {
        let mut tables = self.lock();
        let stored = tables
            .requests
            .get_mut(&record.id)
            .ok_or_else(|| ProfError::not_found(format!("request {}", record.id)))?;
        let num_sql_queries = stored.num_sql_queries;
        *stored = record.clone().shortened();
        stored.num_sql_queries = num_sql_queries;
        Ok(())
    }

    async fn get_request(&self, id: &str) -> ProfResult<Option<RequestRecord>> {
        Ok(self.lock().requests.get(id).cloned())
    }

    async fn delete_request(&self, id: &str) -> ProfResult<bool> {
        let mut tables = self.lock();
        if tables.requests.remove(id).is_none() {
            return Ok(false);
        }
        tables.queries.retain(|_, q| q.request_id != id);
        Ok(true)
    }

    async fn create_queries(
        &self,
        request_id: &str,
        queries: Vec<QueryRecord>,
    ) -> ProfResult<Vec<QueryRecord>> {
        let mut tables = self.lock();
        if !tables.requests.contains_key(request_id) {
            return Err(ProfError::not_found(format!("request {request_id}")));
        }

        let mut created = Vec::with_capacity(queries.len());
        for mut query in queries {
            tables.next_query_id += 1;
            query.id = tables.next_query_id;
            query.request_id = request_id.to_string();
            tables.queries.insert(query.id, query.clone());
            created.push(query);
        }
        if let Some(request) = tables.requests.get_mut(request_id) {
            request.num_sql_queries += created.len() as i64;
        }
        Ok(created)
    }

    async fn delete_query(&self, id: i64) -> ProfResult<bool> {
        let mut tables = self.lock();
        let Some(query) = tables.queries.remove(&id) else {
            return Ok(false);
        };
        if let Some(request) = tables.requests.get_mut(&query.request_id) {
            request.num_sql_queries -= 1;
        }
        Ok(true)
    }

    async fn list_queries(
        &self,
        request_id: &str,
        order: QueryOrder,
    ) -> ProfResult<Vec<QueryRecord>> {
        let tables = self.lock();
        let mut queries: Vec<QueryRecord> = tables
            .queries
            .values()
            .filter(|q| q.request_id == request_id)
            .cloned()
            .collect();
        match order {
            QueryOrder::StartTimeAsc => {
                queries.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)))
            }
            QueryOrder::StartTimeDesc => {
                queries.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)))
            }
        }
        Ok(queries)
    }
}
