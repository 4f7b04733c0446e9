use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};

use kvitto_core::{
    ImageCapture, MergedReceipt, Session, SessionError, SessionId, SessionSettings, SessionStatus,
    ValidationResult,
};
use kvitto_session::SessionStore;

pub type DbPool = Pool<Sqlite>;

/// SQLite-backed session store.
///
/// Sessions and captures live in two tables; the structured payloads
/// (settings, parsed fields, merge results) are JSON columns, read back
/// through serde. A single-connection pool serializes all statements,
/// which makes every fetch-check-update transition atomic; the
/// `UNIQUE (session_id, ord)` key backstops the append path anyway.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub async fn connect(path: &Path) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA busy_timeout = 5000")
            .execute(&pool)
            .await?;

        run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Rebuild the aggregate from its session row plus capture rows.
    async fn load(&self, id: SessionId) -> Result<Session, SessionError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                Option<String>,
                Option<String>,
                f64,
                Option<String>,
                String,
                String,
            ),
        >(
            "SELECT status, settings, merged_result, validation, confidence, error, \
             created_at, updated_at FROM sessions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?
        .ok_or(SessionError::NotFound(id))?;

        let capture_rows = sqlx::query_as::<
            _,
            (i64, String, String, Option<String>, Option<String>, f64, String),
        >(
            "SELECT ord, raw_text, parsed, overlap_previous, blob_key, \
             recognition_confidence, captured_at FROM captures \
             WHERE session_id = ? ORDER BY ord",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let images = capture_rows
            .into_iter()
            .map(
                |(ord, raw_text, parsed, overlap, blob_key, confidence, captured_at)| {
                    Ok(ImageCapture {
                        order: ord as usize,
                        raw_text,
                        parsed: serde_json::from_str(&parsed).map_err(storage_err)?,
                        overlap_with_previous: overlap
                            .as_deref()
                            .map(serde_json::from_str)
                            .transpose()
                            .map_err(storage_err)?,
                        blob_key,
                        recognition_confidence: confidence as f32,
                        captured_at: parse_timestamp(&captured_at)?,
                    })
                },
            )
            .collect::<Result<Vec<_>, SessionError>>()?;

        Ok(Session {
            id,
            status: row.0.parse().map_err(storage_err)?,
            images,
            merged_result: row
                .2
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(storage_err)?,
            confidence: row.4 as f32,
            validation: row
                .3
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(storage_err)?,
            settings: serde_json::from_str(&row.1).map_err(storage_err)?,
            error: row.5,
            created_at: parse_timestamp(&row.6)?,
            updated_at: parse_timestamp(&row.7)?,
        })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert(&self, session: Session) -> Result<(), SessionError> {
        let settings = serde_json::to_string(&session.settings).map_err(storage_err)?;
        let merged = session
            .merged_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage_err)?;
        let validation = session
            .validation
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage_err)?;

        let result = sqlx::query(
            "INSERT INTO sessions (id, status, settings, merged_result, validation, \
             confidence, error, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.status.to_string())
        .bind(settings)
        .bind(merged)
        .bind(validation)
        .bind(session.confidence as f64)
        .bind(&session.error)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                SessionError::Conflict(format!("session {} already exists", session.id)),
            ),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn fetch(&self, id: SessionId) -> Result<Session, SessionError> {
        self.load(id).await
    }

    async fn append_capture(
        &self,
        id: SessionId,
        mut capture: ImageCapture,
    ) -> Result<Session, SessionError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let head = sqlx::query_as::<_, (String, String)>(
            "SELECT status, settings FROM sessions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?
        .ok_or(SessionError::NotFound(id))?;

        let status: SessionStatus = head.0.parse().map_err(storage_err)?;
        if status != SessionStatus::Capturing {
            return Err(SessionError::InvalidStatus {
                expected: SessionStatus::Capturing,
                actual: status,
            });
        }
        let settings: SessionSettings = serde_json::from_str(&head.1).map_err(storage_err)?;

        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM captures WHERE session_id = ?")
                .bind(id.to_string())
                .fetch_one(&mut *tx)
                .await
                .map_err(storage_err)?;
        if count as usize >= settings.max_images {
            return Err(SessionError::CaptureLimitReached {
                limit: settings.max_images,
            });
        }
        capture.order = count as usize;

        let parsed = serde_json::to_string(&capture.parsed).map_err(storage_err)?;
        let overlap = capture
            .overlap_with_previous
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(storage_err)?;

        let insert = sqlx::query(
            "INSERT INTO captures (session_id, ord, raw_text, parsed, overlap_previous, \
             blob_key, recognition_confidence, captured_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(capture.order as i64)
        .bind(&capture.raw_text)
        .bind(parsed)
        .bind(overlap)
        .bind(&capture.blob_key)
        .bind(capture.recognition_confidence as f64)
        .bind(capture.captured_at.to_rfc3339())
        .execute(&mut *tx)
        .await;
        match insert {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(SessionError::Conflict(format!(
                    "capture {} already appended",
                    capture.order
                )));
            }
            Err(e) => return Err(storage_err(e)),
        }

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        self.load(id).await
    }

    async fn begin_processing(&self, id: SessionId) -> Result<Session, SessionError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'processing', updated_at = ? \
             WHERE id = ? AND status = 'capturing' \
             AND EXISTS (SELECT 1 FROM captures WHERE session_id = ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            let session = self.load(id).await?;
            if session.status != SessionStatus::Capturing {
                return Err(SessionError::InvalidStatus {
                    expected: SessionStatus::Capturing,
                    actual: session.status,
                });
            }
            if session.images.is_empty() {
                return Err(SessionError::EmptySession);
            }
            return Err(SessionError::Conflict(
                "processing claim lost".to_string(),
            ));
        }
        self.load(id).await
    }

    async fn finish_completed(
        &self,
        id: SessionId,
        merged: MergedReceipt,
        validation: ValidationResult,
    ) -> Result<Session, SessionError> {
        let merged_json = serde_json::to_string(&merged).map_err(storage_err)?;
        let validation_json = serde_json::to_string(&validation).map_err(storage_err)?;
        let result = sqlx::query(
            "UPDATE sessions SET status = 'completed', merged_result = ?, validation = ?, \
             confidence = ?, updated_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(merged_json)
        .bind(validation_json)
        .bind(merged.confidence as f64)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_refusal(id, SessionStatus::Processing).await);
        }
        self.load(id).await
    }

    async fn finish_failed(
        &self,
        id: SessionId,
        message: String,
    ) -> Result<Session, SessionError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'failed', error = ?, updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(&message)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_refusal(id, SessionStatus::Processing).await);
        }
        self.load(id).await
    }

    async fn cancel(&self, id: SessionId) -> Result<Session, SessionError> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'cancelled', updated_at = ? \
             WHERE id = ? AND status = 'capturing'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_refusal(id, SessionStatus::Capturing).await);
        }
        self.load(id).await
    }
}

impl SqliteStore {
    /// Explain why a guarded UPDATE matched no row.
    async fn transition_refusal(&self, id: SessionId, expected: SessionStatus) -> SessionError {
        match self.load(id).await {
            Ok(session) if session.status != expected => SessionError::InvalidStatus {
                expected,
                actual: session.status,
            },
            Ok(_) => SessionError::Conflict("transition claim lost".to_string()),
            Err(e) => e,
        }
    }
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            settings TEXT NOT NULL,
            merged_result TEXT,
            validation TEXT,
            confidence REAL NOT NULL DEFAULT 0,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS captures (
            session_id TEXT NOT NULL,
            ord INTEGER NOT NULL,
            raw_text TEXT NOT NULL,
            parsed TEXT NOT NULL,
            overlap_previous TEXT,
            blob_key TEXT,
            recognition_confidence REAL NOT NULL DEFAULT 0,
            captured_at TEXT NOT NULL,
            PRIMARY KEY (session_id, ord),
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn storage_err(e: impl std::fmt::Display) -> SessionError {
    SessionError::Storage(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SessionError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(storage_err)
}
