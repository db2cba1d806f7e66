use pgrepeat::{
    Connections, DispatchFilter, GenericClient, InterceptConfig, PgStore, ProfResult,
    ProfileStore, ProfilerConfig, QueryOrder, RequestInfo, RequestRecord, ResponseKind,
    load_report,
};
use std::sync::Arc;

async fn store() -> ProfResult<Option<PgStore>> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("DATABASE_URL is not set; skipping");
            return Ok(None);
        }
    };
    let store = PgStore::connect(&database_url)?;
    store.migrate().await?;
    Ok(Some(store))
}

#[tokio::test]
async fn profiles_against_postgres() -> ProfResult<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };
    let store = Arc::new(store);
    let filter = DispatchFilter::new(store.clone(), ProfilerConfig::default());

    let client = store.pool().get().await?;
    let mut conns = Connections::new()
        .with_config(InterceptConfig::new().with_stacktrace(false))
        .with("default", client);

    let active = filter
        .on_request(RequestInfo::new("GET", "/posts/1"), &mut conns)
        .await?;
    let db = conns.get("default").expect("default alias");
    for id in [1i32, 1, 2] {
        db.query("SELECT $1::int AS id", &[&id]).await?;
    }
    let stats = filter
        .on_response(active, &mut conns, ResponseKind::Normal)
        .await?
        .expect("request was recorded");
    let request_id = stats.request_id.expect("request id");

    let report = load_report(store.as_ref(), &request_id).await?;
    assert_eq!(report.request.num_sql_queries, 3);
    assert_eq!(report.request.meta_num_queries, Some(3));
    assert!(report.request.end_time.is_some());
    assert!(report.queries.iter().all(|q| q.record.similar_count == Some(3)));
    assert_eq!(
        report
            .queries
            .iter()
            .filter(|q| q.record.duplicate_count == Some(2))
            .count(),
        2
    );

    assert!(store.delete_request(&request_id).await?);
    Ok(())
}

#[tokio::test]
async fn counter_follows_inserts_and_deletes() -> ProfResult<()> {
    let Some(store) = store().await? else {
        return Ok(());
    };

    let long_path = format!("/{}", "segment/".repeat(40));
    let request = store
        .create_request(RequestRecord::new("GET", long_path))
        .await?;
    assert_eq!(request.path.chars().count(), 190);

    let stored = store.get_request(&request.id).await?.expect("stored");
    assert_eq!(stored.path, request.path);

    let template = pgrepeat::QueryRecord {
        id: 0,
        request_id: request.id.clone(),
        alias: "default".into(),
        query: "SELECT 1".into(),
        raw_sql: "SELECT 1".into(),
        params: "[]".into(),
        start_time: request.start_time,
        stop_time: request.start_time,
        duration_ms: 0.25,
        traceback: String::new(),
        is_select: true,
        transaction_id: None,
        similar_count: None,
        duplicate_count: None,
    };
    let created = store
        .create_queries(&request.id, vec![template.clone(), template.clone()])
        .await?;
    store.create_query(template).await?;
    assert!(store.delete_query(created[0].id).await?);
    assert!(!store.delete_query(created[0].id).await?);

    let mut updated = store.get_request(&request.id).await?.expect("stored");
    assert_eq!(updated.num_sql_queries, 2);
    assert_eq!(
        store
            .list_queries(&request.id, QueryOrder::StartTimeAsc)
            .await?
            .len(),
        2
    );

    updated.num_sql_queries = 50;
    updated.view_name = Some("posts::show".into());
    store.update_request(&updated).await?;
    let reread = store.get_request(&request.id).await?.expect("stored");
    assert_eq!(reread.num_sql_queries, 2);
    assert_eq!(reread.view_name.as_deref(), Some("posts::show"));

    assert!(store.delete_request(&request.id).await?);
    assert!(store.get_request(&request.id).await?.is_none());
    Ok(())
}
