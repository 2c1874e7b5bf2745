//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StoreError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            customer_name TEXT NOT NULL,
            description TEXT NOT NULL,
            address TEXT NOT NULL,
            lat REAL,
            lon REAL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending_admin_approval',
            created_at TEXT NOT NULL,
            completed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);
        CREATE INDEX IF NOT EXISTS idx_requests_customer ON requests(customer_id);
        CREATE INDEX IF NOT EXISTS idx_requests_end_date ON requests(end_date);

        CREATE TABLE IF NOT EXISTS request_requirements (
            request_id TEXT NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
            skill TEXT NOT NULL,
            required_count INTEGER NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (request_id, skill)
        );

        CREATE TABLE IF NOT EXISTS workers (
            id TEXT PRIMARY KEY,
            verified INTEGER NOT NULL DEFAULT 0,
            available INTEGER NOT NULL DEFAULT 1,
            blocked INTEGER NOT NULL DEFAULT 0,
            lat REAL,
            lon REAL,
            rating REAL
        );
        CREATE INDEX IF NOT EXISTS idx_workers_available ON workers(available, verified);

        CREATE TABLE IF NOT EXISTS worker_skills (
            worker_id TEXT NOT NULL REFERENCES workers(id) ON DELETE CASCADE,
            skill TEXT NOT NULL,
            PRIMARY KEY (worker_id, skill)
        );
        CREATE INDEX IF NOT EXISTS idx_worker_skills_skill ON worker_skills(skill);

        CREATE TABLE IF NOT EXISTS confirmed_workers (
            request_id TEXT NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
            worker_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (request_id, worker_id)
        );
        CREATE INDEX IF NOT EXISTS idx_confirmed_workers_worker ON confirmed_workers(worker_id);

        CREATE TABLE IF NOT EXISTS deployed_workers (
            request_id TEXT NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
            worker_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (request_id, worker_id)
        );
        CREATE INDEX IF NOT EXISTS idx_deployed_workers_worker ON deployed_workers(worker_id);
    "#,
}];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                StoreError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            conn.execute(
                "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
                libsql::params![migration.version, migration.name],
            )
            .await
            .map_err(|e| {
                StoreError::Migration(format!(
                    "Failed to record migration V{}: {e}",
                    migration.version
                ))
            })?;
        }
    }

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to query migration version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| StoreError::Migration(format!("Failed to read migration version: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(StoreError::Migration(format!(
            "Failed to read migration version: {e}"
        ))),
    }
}
