//! libSQL run-history store (local file mode).
//!
//! Every finalized pipeline run can be written here as one row holding its
//! identity, outcome, timestamps and the full serialized result. `abm history`
//! reads it back.
//!
//! **Access rules:**
//! - `abm run`: read-write via [`Storage::open`]
//! - `abm history`: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use abm_shared::{AbmError, Result};
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::{Deserialize, Serialize};

/// One persisted pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub email: String,
    pub company: String,
    pub status: String,
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The serialized pipeline result.
    pub result_json: String,
}

/// Row shape returned by [`Storage::list_runs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub email: String,
    pub company: String,
    pub status: String,
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
}

fn storage_err(e: impl std::fmt::Display) -> AbmError {
    AbmError::Storage(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AbmError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for reading.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AbmError::Storage(format!(
                "no run history at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        AbmError::Storage(format!("migration v{} failed: {e}", migration.version))
                    })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            // Table doesn't exist yet
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(AbmError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a finished run. Re-recording the same `run_id` replaces it.
    pub async fn record_run(&self, run: &RunRecord) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO runs (run_id, email, company, status, reason, started_at, finished_at, result_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(run_id) DO UPDATE SET
                   email = excluded.email,
                   company = excluded.company,
                   status = excluded.status,
                   reason = excluded.reason,
                   started_at = excluded.started_at,
                   finished_at = excluded.finished_at,
                   result_json = excluded.result_json",
                params![
                    run.run_id.as_str(),
                    run.email.as_str(),
                    run.company.as_str(),
                    run.status.as_str(),
                    run.reason.as_deref(),
                    run.started_at.to_rfc3339(),
                    run.finished_at.to_rfc3339(),
                    run.result_json.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        tracing::debug!(run_id = %run.run_id, status = %run.status, "run recorded");
        Ok(())
    }

    /// Fetch one run by id.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, email, company, status, reason, started_at, finished_at, result_json
                 FROM runs WHERE run_id = ?1",
                params![run_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(RunRecord {
                run_id: row.get::<String>(0).map_err(storage_err)?,
                email: row.get::<String>(1).map_err(storage_err)?,
                company: row.get::<String>(2).map_err(storage_err)?,
                status: row.get::<String>(3).map_err(storage_err)?,
                reason: row.get::<String>(4).ok(),
                started_at: parse_timestamp(&row.get::<String>(5).map_err(storage_err)?)?,
                finished_at: parse_timestamp(&row.get::<String>(6).map_err(storage_err)?)?,
                result_json: row.get::<String>(7).map_err(storage_err)?,
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Most recent runs first, at most `limit` of them.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, email, company, status, reason, started_at
                 FROM runs ORDER BY started_at DESC, run_id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RunSummary {
                run_id: row.get::<String>(0).map_err(storage_err)?,
                email: row.get::<String>(1).map_err(storage_err)?,
                company: row.get::<String>(2).map_err(storage_err)?,
                status: row.get::<String>(3).map_err(storage_err)?,
                reason: row.get::<String>(4).ok(),
                started_at: parse_timestamp(&row.get::<String>(5).map_err(storage_err)?)?,
            });
        }
        Ok(results)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AbmError::Storage(format!("invalid date '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("abm_test_{}.db", Uuid::now_v7()))
    }

    async fn test_storage() -> Storage {
        Storage::open(&temp_path()).await.expect("open test db")
    }

    fn record(email: &str, status: &str, started_at: DateTime<Utc>) -> RunRecord {
        RunRecord {
            run_id: Uuid::now_v7().to_string(),
            email: email.into(),
            company: "Acme".into(),
            status: status.into(),
            reason: (status != "targeted").then(|| "Revenue below threshold".to_string()),
            started_at,
            finished_at: started_at + Duration::seconds(2),
            result_json: r#"{"status":"skipped"}"#.into(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let path = temp_path();
        drop(Storage::open(&path).await.expect("first open"));
        let reopened = Storage::open(&path).await.expect("second open");
        assert_eq!(reopened.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn record_and_get_run() {
        let storage = test_storage().await;
        let run = record("jane@acme.com", "skipped", Utc::now());
        storage.record_run(&run).await.unwrap();

        let fetched = storage.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(fetched.email, "jane@acme.com");
        assert_eq!(fetched.reason.as_deref(), Some("Revenue below threshold"));
        assert_eq!(fetched.result_json, run.result_json);
        assert_eq!(fetched.started_at.timestamp(), run.started_at.timestamp());

        assert!(storage.get_run("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_runs_newest_first_with_limit() {
        let storage = test_storage().await;
        let now = Utc::now();
        for (i, email) in ["a@x.com", "b@x.com", "c@x.com"].iter().enumerate() {
            let run = record(email, "targeted", now + Duration::seconds(i as i64));
            storage.record_run(&run).await.unwrap();
        }

        let runs = storage.list_runs(2).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].email, "c@x.com");
        assert_eq!(runs[1].email, "b@x.com");
        assert!(runs[0].reason.is_none());
    }

    #[tokio::test]
    async fn rerecording_replaces_row() {
        let storage = test_storage().await;
        let mut run = record("jane@acme.com", "error", Utc::now());
        storage.record_run(&run).await.unwrap();
        run.status = "targeted".into();
        storage.record_run(&run).await.unwrap();

        let runs = storage.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "targeted");
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let path = temp_path();
        drop(Storage::open(&path).await.unwrap());

        let ro = Storage::open_readonly(&path).await.unwrap();
        let err = ro
            .record_run(&record("jane@acme.com", "skipped", Utc::now()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        assert!(Storage::open_readonly(&temp_path()).await.is_err());
    }
}
