//! SQLite ledger backend
//!
//! Each request is one row holding its JSON document. A save replaces every
//! row inside a single transaction, so readers see either the previous
//! snapshot or the new one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use super::store::{LedgerSnapshot, LedgerStore, QueueSnapshot, SNAPSHOT_VERSION};
use crate::error::{DatabaseError, Error, Result};
use crate::types::{Request, RequestId};

/// Ledger stored in a SQLite database
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    location: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let store = Self {
            pool,
            location: path.display().to_string(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Close the connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        Ok(())
    }

    /// Migration v1: requests, queue order and ledger metadata
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying ledger database migration v1");

        sqlx::query("BEGIN").execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let result = async {
            Self::create_requests_table(conn).await?;
            for statement in [
                r#"
                CREATE TABLE queue_order (
                    position INTEGER PRIMARY KEY,
                    request_id TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE ledger_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                )
                "#,
            ] {
                sqlx::query(statement)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to create ledger tables: {}",
                            e
                        )))
                    })?;
            }
            sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
                .bind(1_i64)
                .bind(Utc::now().timestamp())
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to record migration: {}",
                        e
                    )))
                })?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await.map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to commit migration v1: {}",
                        e
                    )))
                })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Ledger database migration v1 complete");
        Ok(())
    }

    async fn create_requests_table(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE requests (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create requests table: {}",
                e
            )))
        })?;
        Ok(())
    }

    fn corrupt(&self, reason: impl std::fmt::Display) -> Error {
        Error::CorruptState {
            location: format!("{}#requests", self.location),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>> {
        let updated_at: Option<String> =
            sqlx::query_scalar("SELECT value FROM ledger_meta WHERE key = 'updated_at'")
                .fetch_optional(&self.pool)
                .await?;
        let Some(updated_at) = updated_at else {
            return Ok(None);
        };
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| self.corrupt(e))?
            .with_timezone(&Utc);

        let bodies: Vec<String> = sqlx::query_scalar("SELECT body FROM requests ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;
        let requests = bodies
            .iter()
            .map(|body| serde_json::from_str::<Request>(body).map_err(|e| self.corrupt(e)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            updated_at,
            requests,
        }))
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM requests").execute(&mut *tx).await?;
        for request in &snapshot.requests {
            let body = serde_json::to_string(request)?;
            sqlx::query("INSERT INTO requests (id, seq, status, body) VALUES (?, ?, ?, ?)")
                .bind(request.id.as_str())
                .bind(request.seq as i64)
                .bind(request.status.as_str())
                .bind(body)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "INSERT INTO ledger_meta (key, value) VALUES ('updated_at', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(snapshot.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_queue(&self) -> Result<Option<QueueSnapshot>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT request_id FROM queue_order ORDER BY position")
                .fetch_all(&self.pool)
                .await?;
        if ids.is_empty() {
            return Ok(None);
        }
        Ok(Some(QueueSnapshot {
            pending: ids.into_iter().map(RequestId::from).collect(),
        }))
    }

    async fn save_queue(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM queue_order")
            .execute(&mut *tx)
            .await?;
        for (position, id) in snapshot.pending.iter().enumerate() {
            sqlx::query("INSERT INTO queue_order (position, request_id) VALUES (?, ?)")
                .bind(position as i64)
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn quarantine(&self, now: DateTime<Utc>) -> Result<Option<String>> {
        let table = format!("requests_corrupt_{}", now.format("%Y%m%d%H%M%S%3f"));
        let mut conn = self.pool.acquire().await?;

        sqlx::query("BEGIN").execute(&mut *conn).await?;
        let result = async {
            sqlx::query(&format!("ALTER TABLE requests RENAME TO {table}"))
                .execute(&mut *conn)
                .await?;
            Self::create_requests_table(&mut *conn).await?;
            sqlx::query("DELETE FROM ledger_meta WHERE key = 'updated_at'")
                .execute(&mut *conn)
                .await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                tracing::warn!(table = %table, "moved unreadable ledger rows aside");
                Ok(Some(format!("{}#{}", self.location, table)))
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        self.location.clone()
    }
}
