//! Database lifecycle: connection with bounded retry, schema and index
//! provisioning, health checks and collection statistics.
//!
//! The [`Database`] handle is built once by the process entry point and
//! cloned into each store; closing it is the entry point's job.

use crate::config::DatabaseConfig;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

/// Collections (tables) and their columns
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT NOT NULL,
        username TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    )",
    "CREATE TABLE IF NOT EXISTS patients (
        internal_id TEXT PRIMARY KEY NOT NULL,
        logical_id TEXT,
        name TEXT NOT NULL,
        age INTEGER NOT NULL,
        gender TEXT NOT NULL,
        dob TEXT,
        phone TEXT NOT NULL,
        email TEXT,
        address TEXT,
        chronic_conditions TEXT,
        allergies TEXT,
        notes TEXT,
        prescriptions TEXT NOT NULL DEFAULT '[]',
        appointments TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL
    )",
];

/// Unique indexes provisioned unconditionally: (name, table, column)
const UNIQUE_INDEXES: &[(&str, &str, &str)] = &[
    ("unique_email", "users", "email"),
    ("unique_username", "users", "username"),
    ("unique_patient_phone", "patients", "phone"),
    ("unique_patient_email", "patients", "email"),
];

const LOGICAL_ID_INDEX: &str = "unique_patient_id";

/// Outcome of [`Database::provision_indexes`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexReport {
    /// Patients whose logical id is still null
    pub missing_logical_ids: u64,
    /// Whether the unique logical-id index is in place
    pub logical_id_indexed: bool,
}

/// Document counts per collection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionStats {
    pub users: u64,
    pub patients: u64,
    pub patients_missing_logical_id: u64,
}

/// Shared handle to the backing store
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the store, retrying transient failures per `config`, then
    /// ensure the collections exist.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        if !config.url.starts_with("sqlite:") {
            return Err(Error::Config(format!(
                "Unsupported database url {:?}; expected sqlite://<path>",
                config.url
            )));
        }
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| Error::Config(format!("Invalid database url {:?}: {}", config.url, e)))?
            .create_if_missing(true);

        if !is_in_memory(&config.url) {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let delay = Duration::from_secs(config.retry_delay_secs);
        let pool = retry_with_backoff(config.connect_retries, delay, |attempt| {
            let options = options.clone();
            async move {
                tracing::info!(
                    "Attempting to connect to database (attempt {}/{})...",
                    attempt,
                    config.connect_retries
                );
                let pool = SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
                    .connect_with(options)
                    .await
                    .map_err(classify)?;
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .map_err(classify)?;
                Ok(pool)
            }
        })
        .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        tracing::info!("Database initialization completed successfully");
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Liveness probe against the store
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// Create the unique indexes the stores rely on for conflict detection.
    ///
    /// The logical-id index is only created once no patient lacks a
    /// logical id; until then the report says how many need backfilling.
    pub async fn provision_indexes(&self) -> Result<IndexReport> {
        for (name, table, column) in UNIQUE_INDEXES {
            let statement = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                name, table, column
            );
            sqlx::query(&statement).execute(&self.pool).await.map_err(|e| {
                tracing::error!("Error creating index {}: {}", name, e);
                Error::Database(e)
            })?;
            tracing::info!("Ensured index {} on {}.{}", name, table, column);
        }

        let missing_logical_ids = self.count_missing_logical_ids().await?;
        if missing_logical_ids > 0 {
            tracing::warn!(
                "Found {} patients with null IDs. Run `medrec backfill-ids` to fix this issue.",
                missing_logical_ids
            );
            return Ok(IndexReport {
                missing_logical_ids,
                logical_id_indexed: self.index_exists(LOGICAL_ID_INDEX).await?,
            });
        }

        let statement = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON patients (logical_id)",
            LOGICAL_ID_INDEX
        );
        sqlx::query(&statement).execute(&self.pool).await?;
        tracing::info!("Ensured patient ID index");

        Ok(IndexReport {
            missing_logical_ids: 0,
            logical_id_indexed: true,
        })
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>(0) > 0)
    }

    async fn count_missing_logical_ids(&self) -> Result<u64> {
        count(&self.pool, "SELECT COUNT(*) FROM patients WHERE logical_id IS NULL").await
    }

    /// Document counts for the inspection tool
    pub async fn collection_stats(&self) -> Result<CollectionStats> {
        Ok(CollectionStats {
            users: count(&self.pool, "SELECT COUNT(*) FROM users").await?,
            patients: count(&self.pool, "SELECT COUNT(*) FROM patients").await?,
            patients_missing_logical_id: self.count_missing_logical_ids().await?,
        })
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        tracing::info!("Closing database connection");
        self.pool.close().await;
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

pub(crate) async fn count(pool: &SqlitePool, sql: &str) -> Result<u64> {
    let row = sqlx::query(sql).fetch_one(pool).await?;
    let n: i64 = row.get(0);
    Ok(n.max(0) as u64)
}

/// Run `op` up to `attempts` times, sleeping between transient failures.
///
/// The delay doubles after each failed attempt. Non-transient errors are
/// returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    let mut wait = delay;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(Error::TransientStore(reason)) if attempt < attempts => {
                tracing::warn!(
                    "Connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    reason,
                    wait
                );
                tokio::time::sleep(wait).await;
                wait = wait.saturating_mul(2);
                attempt += 1;
            }
            Err(Error::TransientStore(reason)) => {
                tracing::error!("Max retries reached. Could not connect to the database.");
                return Err(Error::TransientStore(format!(
                    "gave up after {} attempt(s): {}",
                    attempts, reason
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sort a driver error into transient (worth retrying) or fatal
pub fn classify(err: sqlx::Error) -> Error {
    if is_transient(&err) {
        Error::TransientStore(err.to_string())
    } else {
        Error::Database(err)
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        // Primary result code of SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6 | 14)),
        _ => false,
    }
}

/// Translate a write error: unique violations become `Conflict` naming the
/// offending column, everything else stays a database error.
pub(crate) fn conflict_or_database(err: sqlx::Error, entity: &'static str) -> Error {
    let field = match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            unique_violation_column(db_err.message())
        }
        _ => return Error::Database(err),
    };
    tracing::warn!("Uniqueness violation on {}: {}", entity, err);
    Error::Conflict {
        entity,
        field: field.unwrap_or_else(|| "information".to_string()),
    }
}

/// Column from a message such as `UNIQUE constraint failed: patients.phone`
fn unique_violation_column(message: &str) -> Option<String> {
    let (_, columns) = message.rsplit_once(": ")?;
    let first = columns.split(',').next()?.trim();
    let column = first.rsplit('.').next()?.trim();
    if column.is_empty() {
        None
    } else {
        Some(column.to_string())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::DatabaseConfig;

    /// Fresh, provisioned database in a temp directory
    pub(crate) async fn open_temp_db() -> (tempfile::TempDir, Database) {
        crate::logging::init_test();
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::sqlite_file(&dir.path().join("medrec.db"));
        let db = Database::connect(&config).await.unwrap();
        db.provision_indexes().await.unwrap();
        (dir, db)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::open_temp_db;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_connect_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join("medrec.db");
        let db = Database::connect(&DatabaseConfig::sqlite_file(&path))
            .await
            .unwrap();

        assert!(path.exists());
        db.ping().await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_provision_indexes_on_empty_store() {
        let (_dir, db) = open_temp_db().await;

        let report = db.provision_indexes().await.unwrap();
        assert_eq!(
            report,
            IndexReport {
                missing_logical_ids: 0,
                logical_id_indexed: true
            }
        );
        for name in ["unique_email", "unique_username", "unique_patient_phone", LOGICAL_ID_INDEX] {
            assert!(db.index_exists(name).await.unwrap(), "missing index {}", name);
        }
    }

    #[tokio::test]
    async fn test_logical_id_index_deferred_while_ids_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::sqlite_file(&dir.path().join("medrec.db"));
        let db = Database::connect(&config).await.unwrap();

        sqlx::query(
            "INSERT INTO patients (internal_id, logical_id, name, age, gender, phone, created_at)
             VALUES ('legacy-1', NULL, 'Old Record', 60, 'M', '555-0999', '2024-01-01T10:00:00+05:30')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let report = db.provision_indexes().await.unwrap();
        assert_eq!(report.missing_logical_ids, 1);
        assert!(!report.logical_id_indexed);
        assert!(db.index_exists("unique_email").await.unwrap());
    }

    #[tokio::test]
    async fn test_collection_stats() {
        let (_dir, db) = open_temp_db().await;
        let stats = db.collection_stats().await.unwrap();
        assert_eq!(
            stats,
            CollectionStats {
                users: 0,
                patients: 0,
                patients_missing_logical_id: 0
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let config = DatabaseConfig {
            url: "postgres://nope".into(),
            ..DatabaseConfig::default()
        };
        assert!(matches!(
            Database::connect(&config).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(3, Duration::ZERO, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::TransientStore("connection refused".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::TransientStore(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let result = retry_with_backoff(3, Duration::ZERO, |attempt| async move {
            if attempt < 2 {
                Err(Error::TransientStore("busy".into()))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(3, Duration::ZERO, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Config("bad".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify(sqlx::Error::PoolTimedOut),
            Error::TransientStore(_)
        ));
        assert!(matches!(
            classify(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused"
            ))),
            Error::TransientStore(_)
        ));
        assert!(matches!(
            classify(sqlx::Error::RowNotFound),
            Error::Database(_)
        ));
    }

    #[test]
    fn test_unique_violation_column() {
        assert_eq!(
            unique_violation_column("UNIQUE constraint failed: patients.phone").as_deref(),
            Some("phone")
        );
        assert_eq!(
            unique_violation_column("UNIQUE constraint failed: users.email, users.username")
                .as_deref(),
            Some("email")
        );
        assert_eq!(unique_violation_column("constraint failed"), None);
    }
}
