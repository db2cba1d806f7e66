//! Schema migrations for [`PgStore`](crate::store::PgStore), via [`refinery`].
//!
//! The SQL lives in `migrations/` and is embedded at compile time. Applied
//! versions are tracked in their own history table so they never collide
//! with the application's migrations.
//!
//! # Example
//!
//! ```ignore
//! let pool = pgrepeat::create_pool(&std::env::var("DATABASE_URL")?)?;
//! pgrepeat::migrate::run_pool(&pool).await?;
//! ```

use crate::error::ProfResult;

pub use refinery::Report;

/// History table used for this crate's migrations.
pub const MIGRATION_TABLE: &str = "pgrepeat_schema_history";

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Build the runner for the embedded migrations.
pub fn runner() -> refinery::Runner {
    let mut runner = embedded::migrations::runner();
    runner.set_migration_table_name(MIGRATION_TABLE);
    runner
}

/// Run migrations on a single PostgreSQL connection.
pub async fn run(client: &mut tokio_postgres::Client) -> ProfResult<Report> {
    let report = runner().run_async(client).await?;
    for migration in report.applied_migrations() {
        tracing::info!(
            target: "pgrepeat.store",
            version = migration.version(),
            name = migration.name(),
            "applied migration"
        );
    }
    Ok(report)
}

/// Pool variant of [`run`].
#[cfg(feature = "pool")]
pub async fn run_pool(pool: &deadpool_postgres::Pool) -> ProfResult<Report> {
    let mut client = pool.get().await?;
    run(&mut client).await
}
