//! # Schema Migrations
//!
//! The schema ships inside the binary: every file under
//! `migrations/sqlite/` at the workspace root is embedded at compile time and
//! applied in filename order, each in its own transaction, recorded in
//! `_sqlx_migrations`.
//!
//! New schema changes go in a new `NNN_description.sql` file. Applied files
//! are never edited; sqlx checks their checksums on startup.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies pending migrations. A no-op when the schema is current.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let (total, applied_before) = migration_status(pool).await?;
    debug!(total, applied = applied_before, "Checking schema");

    MIGRATOR.run(pool).await?;

    if applied_before < total {
        info!(applied = total - applied_before, "Schema migrated");
    }
    Ok(())
}

/// `(embedded, applied)` migration counts.
///
/// Before the first run the bookkeeping table does not exist yet; that reads
/// as zero applied. Any other failure is returned.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let applied = match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
    {
        Ok(count) => usize::try_from(count).unwrap_or(0),
        Err(sqlx::Error::Database(e)) if e.message().contains("no such table") => 0,
        Err(e) => return Err(e.into()),
    };
    Ok((MIGRATOR.migrations.len(), applied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_status_before_first_run() {
        let db = Database::new(DbConfig::in_memory().run_migrations(false))
            .await
            .unwrap();
        let (total, applied) = migration_status(db.pool()).await.unwrap();
        assert!(total >= 2);
        assert_eq!(applied, 0);

        run_migrations(db.pool()).await.unwrap();
        assert_eq!(migration_status(db.pool()).await.unwrap(), (total, total));
    }

    #[tokio::test]
    async fn test_status_reports_closed_pool() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.close().await;
        let err = migration_status(db.pool()).await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionFailed(_)));
    }
}
