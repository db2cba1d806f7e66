use super::{ProfileStore, QueryOrder, QueryRecord, RequestRecord};
use crate::error::{ProfError, ProfResult};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

const REQUEST_COLUMNS: &str = "id, path, query_params, method, body, raw_body, view_name, \
     encoded_headers, start_time, end_time, time_taken_ms, num_sql_queries, \
     meta_num_queries, meta_time_spent_queries_ms";

const QUERY_COLUMNS: &str = "id, request_id, alias, query, raw_sql, params, start_time, \
     stop_time, duration_ms, traceback, is_select, transaction_id, similar_count, \
     duplicate_count";

/// A store backed by PostgreSQL through a `deadpool_postgres` pool.
///
/// Counter updates run as single-row `UPDATE ... SET num_sql_queries =
/// num_sql_queries ± n` inside the transaction that inserts or deletes the
/// queries.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Connect with [`create_pool`](crate::create_pool).
    pub fn connect(database_url: &str) -> ProfResult<Self> {
        Ok(Self::new(crate::pool::create_pool(database_url)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Create or upgrade the profile tables.
    #[cfg(feature = "migrate")]
    pub async fn migrate(&self) -> ProfResult<refinery::Report> {
        crate::migrate::run_pool(&self.pool).await
    }
}

fn request_from_row(row: &Row) -> ProfResult<RequestRecord> {
    Ok(RequestRecord {
        id: row.try_get("id")?,
        path: row.try_get("path")?,
        query_params: row.try_get("query_params")?,
        method: row.try_get("method")?,
        body: row.try_get("body")?,
        raw_body: row.try_get("raw_body")?,
        view_name: row.try_get("view_name")?,
        encoded_headers: row.try_get("encoded_headers")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        time_taken_ms: row.try_get("time_taken_ms")?,
        num_sql_queries: row.try_get("num_sql_queries")?,
        meta_num_queries: row.try_get("meta_num_queries")?,
        meta_time_spent_queries_ms: row.try_get("meta_time_spent_queries_ms")?,
    })
}

fn query_from_row(row: &Row) -> ProfResult<QueryRecord> {
    Ok(QueryRecord {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        alias: row.try_get("alias")?,
        query: row.try_get("query")?,
        raw_sql: row.try_get("raw_sql")?,
        params: row.try_get("params")?,
        start_time: row.try_get("start_time")?,
        stop_time: row.try_get("stop_time")?,
        duration_ms: row.try_get("duration_ms")?,
        traceback: row.try_get("traceback")?,
        is_select: row.try_get("is_select")?,
        transaction_id: row.try_get("transaction_id")?,
        similar_count: row.try_get("similar_count")?,
        duplicate_count: row.try_get("duplicate_count")?,
    })
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn create_request(&self, record: RequestRecord) -> ProfResult<RequestRecord> {
        let record = record.shortened();
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO pgrepeat_request ({REQUEST_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {REQUEST_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &record.id,
                    &record.path,
                    &record.query_params,
                    &record.method,
                    &record.body,
                    &record.raw_body,
                    &record.view_name,
                    &record.encoded_headers,
                    &record.start_time,
                    &record.end_time,
                    &record.time_taken_ms,
                    &record.num_sql_queries,
                    &record.meta_num_queries,
                    &record.meta_time_spent_queries_ms,
                ],
            )
            .await?;
        request_from_row(&row)
    }

    async fn update_request(&self, record: &RequestRecord) -> ProfResult<()> {
        let record = record.clone().shortened();
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE pgrepeat_request SET path = $2, query_params = $3, method = $4, \
                 body = $5, raw_body = $6, view_name = $7, encoded_headers = $8, \
                 start_time = $9, end_time = $10, time_taken_ms = $11, \
                 meta_num_queries = $12, meta_time_spent_queries_ms = $13 \
                 WHERE id = $1",
                &[
                    &record.id,
                    &record.path,
                    &record.query_params,
                    &record.method,
                    &record.body,
                    &record.raw_body,
                    &record.view_name,
                    &record.encoded_headers,
                    &record.start_time,
                    &record.end_time,
                    &record.time_taken_ms,
                    &record.meta_num_queries,
                    &record.meta_time_spent_queries_ms,
                ],
            )
            .await?;
        if updated == 0 {
            return Err(ProfError::not_found(format!("request {}", record.id)));
        }
        Ok(())
    }

    async fn get_request(&self, id: &str) -> ProfResult<Option<RequestRecord>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {REQUEST_COLUMNS} FROM pgrepeat_request WHERE id = $1");
        client
            .query_opt(sql.as_str(), &[&id])
            .await?
            .as_ref()
            .map(request_from_row)
            .transpose()
    }

    async fn delete_request(&self, id: &str) -> ProfResult<bool> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM pgrepeat_request WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn create_queries(
        &self,
        request_id: &str,
        queries: Vec<QueryRecord>,
    ) -> ProfResult<Vec<QueryRecord>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let count = i64::try_from(queries.len())
            .map_err(|_| ProfError::Other("too many queries in one batch".into()))?;
        let updated = tx
            .execute(
                "UPDATE pgrepeat_request SET num_sql_queries = num_sql_queries + $1 WHERE id = $2",
                &[&count, &request_id],
            )
            .await?;
        if updated == 0 {
            return Err(ProfError::not_found(format!("request {request_id}")));
        }

        let insert = tx
            .prepare(&format!(
                "INSERT INTO pgrepeat_query (request_id, alias, query, raw_sql, params, \
                 start_time, stop_time, duration_ms, traceback, is_select, transaction_id, \
                 similar_count, duplicate_count) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
                 RETURNING {QUERY_COLUMNS}"
            ))
            .await?;

        let mut created = Vec::with_capacity(queries.len());
        for query in &queries {
            let row = tx
                .query_one(
                    &insert,
                    &[
                        &request_id,
                        &query.alias,
                        &query.query,
                        &query.raw_sql,
                        &query.params,
                        &query.start_time,
                        &query.stop_time,
                        &query.duration_ms,
                        &query.traceback,
                        &query.is_select,
                        &query.transaction_id,
                        &query.similar_count,
                        &query.duplicate_count,
                    ],
                )
                .await?;
            created.push(query_from_row(&row)?);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn delete_query(&self, id: i64) -> ProfResult<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let Some(row) = tx
            .query_opt(
                "DELETE FROM pgrepeat_query WHERE id = $1 RETURNING request_id",
                &[&id],
            )
            .await?
        else {
            return Ok(false);
        };
        let request_id: String = row.try_get(0)?;
        tx.execute(
            "UPDATE pgrepeat_request SET num_sql_queries = num_sql_queries - 1 WHERE id = $1",
            &[&request_id],
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_queries(
        &self,
        request_id: &str,
        order: QueryOrder,
    ) -> ProfResult<Vec<QueryRecord>> {
        let direction = match order {
            QueryOrder::StartTimeAsc => "ASC",
            QueryOrder::StartTimeDesc => "DESC",
        };
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {QUERY_COLUMNS} FROM pgrepeat_query WHERE request_id = $1 \
             ORDER BY start_time {direction}, id {direction}"
        );
        client
            .query(sql.as_str(), &[&request_id])
            .await?
            .iter()
            .map(query_from_row)
            .collect()
    }
}
