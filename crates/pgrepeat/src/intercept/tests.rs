use super::*;
use crate::client::GenericClient;
use crate::error::ProfError;
use crate::testing::FakeClient;
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::types::ToSql;

fn recorded(client: FakeClient) -> (InstrumentedClient<FakeClient>, Arc<CollectingLogger>) {
    let logger = Arc::new(CollectingLogger::new());
    let client = InstrumentedClient::new(client)
        .with_config(InterceptConfig::new().with_stacktrace(false))
        .with_logger_arc(logger.clone());
    (client, logger)
}

#[test]
fn test_query_type_detection() {
    assert_eq!(
        QueryType::from_sql("SELECT * FROM users"),
        QueryType::Select
    );
    assert_eq!(
        QueryType::from_sql("  select * FROM users"),
        QueryType::Select
    );
    assert_eq!(
        QueryType::from_sql("WITH cte AS (SELECT 1) SELECT * FROM cte"),
        QueryType::Select
    );
    assert_eq!(
        QueryType::from_sql("WITH moved AS (DELETE FROM a RETURNING *) INSERT INTO b SELECT * FROM moved"),
        QueryType::Insert
    );
    assert_eq!(
        QueryType::from_sql("UPDATE users SET name = $1"),
        QueryType::Update
    );
    assert_eq!(
        QueryType::from_sql("DELETE FROM users WHERE id = $1"),
        QueryType::Delete
    );
    assert_eq!(
        QueryType::from_sql("CREATE TABLE users (id INT)"),
        QueryType::Other
    );
}

#[test]
fn test_tracing_logger_truncation() {
    let logger = TracingLogger::new().max_sql_length(10);
    assert_eq!(logger.truncate_sql("SELECT * FROM users"), "SELECT * F...");
    assert_eq!(logger.truncate_sql("SELECT 1"), "SELECT 1");
    assert_eq!(
        TracingLogger::new().no_truncate().truncate_sql("SELECT * FROM users"),
        "SELECT * FROM users"
    );
}

#[test]
fn error_outcome_is_truncated() {
    let outcome = QueryOutcome::error("x".repeat(2000));
    match outcome {
        QueryOutcome::Error(msg) => assert_eq!(msg.len(), 512 + 3),
        other => panic!("expected error outcome, got {other:?}"),
    }
    assert!(QueryOutcome::error("boom".into()).is_error());
    assert!(!QueryOutcome::Rows(1).is_error());
}

#[test]
fn truncate_respects_char_boundaries() {
    assert_eq!(truncate_sql_bytes("héllo", 2), "h");
    assert_eq!(truncate_sql_bytes("abc", 10), "abc");
}

#[tokio::test]
async fn records_one_event_per_call() {
    let (client, logger) = recorded(FakeClient::default());

    client
        .query("SELECT * FROM orders WHERE id = $1", &[&42i32])
        .await
        .unwrap();
    client
        .execute("UPDATE orders SET paid = $1", &[&true])
        .await
        .unwrap();

    let events = logger.events();
    assert_eq!(events.len(), 2);

    let select = &events[0];
    assert_eq!(select.alias, DEFAULT_ALIAS);
    assert_eq!(select.raw_sql, "SELECT * FROM orders WHERE id = $1");
    assert_eq!(select.sql, "SELECT * FROM orders WHERE id = 42");
    assert_eq!(select.raw_params, vec!["42".to_string()]);
    assert_eq!(select.params, "[\"42\"]");
    assert!(select.is_select);
    assert_eq!(select.outcome, QueryOutcome::Rows(0));
    assert!(select.duration_ms >= 0.0);
    assert!(select.stop_time >= select.start_time);
    assert!(select.stacktrace.is_empty());
    assert!(select.transaction_id.is_none());

    let update = &events[1];
    assert!(!update.is_select);
    assert_eq!(update.query_type, QueryType::Update);
    assert_eq!(update.outcome, QueryOutcome::Affected(1));
}

#[tokio::test]
async fn failing_call_is_recorded_and_error_propagates() {
    let (client, logger) = recorded(FakeClient::failing());

    let err = client.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, ProfError::Connection(ref msg) if msg == "connection reset by peer"));

    let events = logger.events();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].outcome,
        QueryOutcome::Error("Connection error: connection reset by peer".into())
    );
}

#[tokio::test]
async fn without_logger_calls_pass_through() {
    let client = InstrumentedClient::new(FakeClient::default());
    assert!(!client.is_instrumented());
    assert_eq!(client.execute("DELETE FROM carts", &[]).await.unwrap(), 1);
    assert_eq!(client.inner().seen(), vec!["DELETE FROM carts".to_string()]);
}

#[tokio::test]
async fn noop_logger_skips_event_construction() {
    let client = InstrumentedClient::new(FakeClient::default()).with_logger(NoopLogger);
    assert!(client.is_instrumented());
    client.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(client.inner().seen().len(), 1);
}

#[tokio::test]
async fn forbid_mode_refuses_without_touching_the_database() {
    let (mut client, logger) = recorded(FakeClient::default());
    client.set_mode(CursorMode::Forbid);

    let err = client
        .query("SELECT * FROM users", &[])
        .await
        .unwrap_err();
    assert!(err.is_forbidden());
    match err {
        ProfError::QueryForbidden { alias, sql } => {
            assert_eq!(alias, "default");
            assert_eq!(sql, "SELECT * FROM users");
        }
        other => panic!("expected QueryForbidden, got {other:?}"),
    }
    assert!(client.inner().seen().is_empty());
    assert!(logger.events().is_empty());

    client.set_mode(CursorMode::Normal);
    client.query("SELECT * FROM users", &[]).await.unwrap();
    assert_eq!(logger.events().len(), 1);
}

#[tokio::test]
async fn execute_many_records_a_single_event() {
    let (client, logger) = recorded(FakeClient::default());

    let first: [&(dyn ToSql + Sync); 1] = [&1i32];
    let second: [&(dyn ToSql + Sync); 1] = [&2i32];
    let affected = client
        .execute_many("INSERT INTO tags (id) VALUES ($1)", &[&first, &second])
        .await
        .unwrap();
    assert_eq!(affected, 2);
    assert_eq!(client.inner().seen().len(), 2);

    let events = logger.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].raw_params, vec!["[1]".to_string(), "[2]".to_string()]);
    assert_eq!(events[0].outcome, QueryOutcome::Affected(2));
}

#[tokio::test]
async fn call_proc_records_procedure_name() {
    let (client, logger) = recorded(FakeClient::default());

    client.call_proc("refresh_totals", &[&7i64]).await.unwrap();

    assert_eq!(client.inner().seen(), vec!["CALL refresh_totals($1)".to_string()]);
    let events = logger.events();
    assert_eq!(events[0].raw_sql, "refresh_totals");
    assert_eq!(events[0].sql, "refresh_totals(7)");
}

#[tokio::test]
async fn begin_commit_share_one_transaction_id() {
    let (client, logger) = recorded(FakeClient::default());

    client.execute("BEGIN", &[]).await.unwrap();
    client.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
    client.execute("SAVEPOINT sp", &[]).await.unwrap();
    client.execute("COMMIT", &[]).await.unwrap();
    client.query("SELECT 1", &[]).await.unwrap();
    client.execute("START TRANSACTION", &[]).await.unwrap();

    let ids: Vec<Option<String>> = logger
        .events()
        .into_iter()
        .map(|e| e.transaction_id)
        .collect();
    let first = ids[0].clone().expect("BEGIN opens a transaction");
    assert_eq!(ids[1].as_deref(), Some(first.as_str()));
    assert_eq!(ids[2].as_deref(), Some(first.as_str()));
    assert_eq!(ids[3].as_deref(), Some(first.as_str()));
    assert_eq!(ids[4], None);
    let second = ids[5].clone().expect("START TRANSACTION opens a transaction");
    assert_ne!(first, second);
}

#[tokio::test]
async fn failed_begin_opens_no_transaction() {
    let (mut client, logger) = recorded(FakeClient::failing());

    assert!(client.execute("BEGIN", &[]).await.is_err());
    client.client.fail = false;
    client.query("SELECT 1", &[]).await.unwrap();
    client.execute("BEGIN", &[]).await.unwrap();
    client.execute("UPDATE t SET x = 1", &[]).await.unwrap();

    let ids: Vec<Option<String>> = logger
        .events()
        .into_iter()
        .map(|e| e.transaction_id)
        .collect();
    assert_eq!(ids[0], None);
    assert_eq!(ids[1], None);
    let opened = ids[2].clone().expect("second BEGIN succeeded");
    assert_eq!(ids[3].as_deref(), Some(opened.as_str()));
}

#[tokio::test]
async fn failed_begin_inside_a_transaction_keeps_the_open_id() {
    let (mut client, logger) = recorded(FakeClient::default());

    client.execute("BEGIN", &[]).await.unwrap();
    client.client.fail = true;
    assert!(client.execute("BEGIN", &[]).await.is_err());
    client.client.fail = false;
    client.execute("COMMIT", &[]).await.unwrap();
    client.query("SELECT 1", &[]).await.unwrap();

    let ids: Vec<Option<String>> = logger
        .events()
        .into_iter()
        .map(|e| e.transaction_id)
        .collect();
    let first = ids[0].clone().expect("BEGIN opens a transaction");
    assert_eq!(ids[1].as_deref(), Some(first.as_str()));
    assert_eq!(ids[2].as_deref(), Some(first.as_str()));
    assert_eq!(ids[3], None);
}

#[tokio::test]
async fn transaction_client_keeps_one_id() {
    let (client, logger) = recorded(FakeClient::transaction());

    client.query("SELECT 1", &[]).await.unwrap();
    client.execute("UPDATE t SET x = 1", &[]).await.unwrap();
    client.execute("COMMIT", &[]).await.unwrap();

    let events = logger.events();
    let id = events[0].transaction_id.clone().unwrap();
    assert!(events.iter().all(|e| e.transaction_id.as_deref() == Some(id.as_str())));
}

#[tokio::test]
async fn slow_queries_are_flagged() {
    struct SlowClient;
    impl GenericClient for SlowClient {
        async fn query(
            &self,
            _: &str,
            _: &[&(dyn ToSql + Sync)],
        ) -> crate::ProfResult<Vec<tokio_postgres::Row>> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(vec![])
        }
        async fn execute(&self, _: &str, _: &[&(dyn ToSql + Sync)]) -> crate::ProfResult<u64> {
            Ok(0)
        }
    }

    let logger = Arc::new(CollectingLogger::new());
    let client = InstrumentedClient::new(SlowClient)
        .with_config(
            InterceptConfig::new()
                .with_stacktrace(false)
                .with_slow_query_threshold_ms(5.0),
        )
        .with_logger_arc(logger.clone());

    client.query("SELECT pg_sleep(1)", &[]).await.unwrap();
    client.execute("SELECT 1", &[]).await.unwrap();

    let events = logger.events();
    assert!(events[0].is_slow);
    assert!(events[0].duration_ms >= 20.0);
    assert!(!events[1].is_slow);
}

#[tokio::test]
async fn stacktrace_is_captured_when_enabled() {
    let logger = Arc::new(CollectingLogger::new());
    let client = InstrumentedClient::new(FakeClient::default()).with_logger_arc(logger.clone());

    client.query("SELECT 1", &[]).await.unwrap();

    let trace = &logger.events()[0].stacktrace;
    assert!(
        trace
            .lines()
            .all(|frame| !frame.starts_with("pgrepeat::intercept::")),
        "interceptor frames should be hidden: {trace}"
    );
}

#[tokio::test]
async fn alias_is_reported() {
    let (client, logger) = recorded(FakeClient::default());
    let client = client.with_alias("replica");
    client.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(client.alias(), "replica");
    assert_eq!(logger.events()[0].alias, "replica");
}

#[test]
fn install_and_remove_logger_are_idempotent() {
    let mut client = InstrumentedClient::new(FakeClient::default());
    let logger: Arc<dyn QueryLogger> = Arc::new(CollectingLogger::new());

    assert!(client.install_logger(logger.clone()));
    assert!(!client.install_logger(logger));
    assert!(client.remove_logger());
    assert!(!client.remove_logger());
    assert!(!client.is_instrumented());
}

#[tokio::test]
async fn composite_logger_fans_out_to_recording_loggers() {
    let a = Arc::new(CollectingLogger::new());
    let b = Arc::new(CollectingLogger::new());
    let client = InstrumentedClient::new(FakeClient::default())
        .with_config(InterceptConfig::new().with_stacktrace(false))
        .with_logger_arc(a.clone())
        .add_logger_arc(b.clone())
        .add_logger_arc(Arc::new(NoopLogger));

    client.query("SELECT 1", &[]).await.unwrap();

    assert_eq!(a.events().len(), 1);
    assert_eq!(b.events().len(), 1);
    assert!(!CompositeLogger::new().add(NoopLogger).is_recording());
}
