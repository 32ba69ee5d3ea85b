//! Metadata side-table operations backed by SQLite.
//!
//! One row per uploaded object; the bytes themselves live upstream. This
//! service owns the lifecycle transitions (pending → complete/failed) and the
//! paginated listing used by the operator API. It never touches the object
//! store or the cache.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{GatewayError, GatewayResult};
use crate::models::object::{ObjectRecord, ObjectStatus};

const MAX_FILENAME_LEN: usize = 128;

const RECORD_COLUMNS: &str =
    "id, object_key, filename, content_type, size_bytes, status, created_at, updated_at";

/// One page of a newest-first object listing.
#[derive(Debug)]
pub struct ListPage {
    pub objects: Vec<ObjectRecord>,
    pub next_token: Option<String>,
}

/// Metadata store over the shared SQLite pool.
#[derive(Clone)]
pub struct MetadataStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a new `pending` record for an initiated upload.
    ///
    /// The store key embeds the fresh record id as a prefix, so filenames
    /// that sanitize to the same string can never collide upstream.
    pub async fn create_pending(
        &self,
        filename: &str,
        content_type: Option<String>,
        size_bytes: i64,
    ) -> GatewayResult<ObjectRecord> {
        if filename.trim().is_empty() {
            return Err(GatewayError::Validation("filename is required".into()));
        }
        if size_bytes <= 0 {
            return Err(GatewayError::Validation(
                "size_bytes must be positive".into(),
            ));
        }

        let id = Uuid::new_v4();
        let filename = sanitize_filename(filename);
        let object_key = format!("{}/{}", id, filename);
        let content_type =
            content_type.unwrap_or_else(|| "application/octet-stream".to_string());
        let created_at = Utc::now();

        let record = sqlx::query_as::<_, ObjectRecord>(
            r#"
            INSERT INTO objects (
                id, object_key, filename, content_type, size_bytes, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
            RETURNING id, object_key, filename, content_type, size_bytes, status, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&object_key)
        .bind(&filename)
        .bind(&content_type)
        .bind(size_bytes)
        .bind(ObjectStatus::Pending)
        .bind(created_at)
        .fetch_one(&*self.db)
        .await?;

        Ok(record)
    }

    /// Fetch a record by id.
    pub async fn find(&self, id: Uuid) -> GatewayResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM objects WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Transition `pending → complete`. Returns false when the record is
    /// missing or not pending — completion is a one-way, one-time move.
    pub async fn mark_complete(&self, id: Uuid) -> GatewayResult<bool> {
        let result = sqlx::query(
            "UPDATE objects SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ObjectStatus::Complete)
        .bind(Utc::now())
        .bind(id)
        .bind(ObjectStatus::Pending)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Transition `pending → failed` after a definitive negative probe.
    pub async fn mark_failed(&self, id: Uuid) -> GatewayResult<bool> {
        let result = sqlx::query(
            "UPDATE objects SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ObjectStatus::Failed)
        .bind(Utc::now())
        .bind(id)
        .bind(ObjectStatus::Pending)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a record. Returns false when it was already gone.
    pub async fn delete(&self, id: Uuid) -> GatewayResult<bool> {
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List records newest-first with an opaque continuation token.
    ///
    /// Fetches one row beyond the limit to detect truncation, like S3-style
    /// listings do. The cursor is the (created_at, id) pair of the last row.
    pub async fn list(&self, limit: usize, token: Option<&str>) -> GatewayResult<ListPage> {
        let limit = limit.clamp(1, 100);
        let fetch_limit = limit + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {RECORD_COLUMNS} FROM objects"
        ));

        if let Some(token) = token {
            let (created_at, id) = decode_continuation_token(token)?;
            builder.push(" WHERE (created_at < ");
            builder.push_bind(created_at);
            builder.push(" OR (created_at = ");
            builder.push_bind(created_at);
            builder.push(" AND id < ");
            builder.push_bind(id);
            builder.push("))");
        }

        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<ObjectRecord> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            if let Some(last) = rows.last() {
                next_token = Some(encode_continuation_token(&last.created_at, &last.id));
            }
        }

        Ok(ListPage {
            objects: rows,
            next_token,
        })
    }
}

/// Reduce a client-supplied filename to a safe store-key segment.
///
/// Keeps only ASCII alphanumerics plus `.`, `-`, `_`; anything else becomes
/// `-`. Path components are discarded and leading dots stripped, so neither
/// traversal sequences nor hidden-file names survive. Falls back to `file`
/// when nothing is left.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let mut cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.len() > MAX_FILENAME_LEN {
        cleaned.truncate(MAX_FILENAME_LEN);
    }
    let cleaned = cleaned.trim_start_matches(['.', '-']);
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

fn encode_continuation_token(created_at: &DateTime<Utc>, id: &Uuid) -> String {
    general_purpose::STANDARD.encode(format!("{}|{}", created_at.to_rfc3339(), id))
}

fn decode_continuation_token(token: &str) -> GatewayResult<(DateTime<Utc>, Uuid)> {
    let invalid = || GatewayError::Validation("invalid continuation token".into());
    let bytes = general_purpose::STANDARD.decode(token).map_err(|_| invalid())?;
    let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (ts, id) = raw.split_once('|').ok_or_else(invalid)?;
    let created_at = DateTime::parse_from_rfc3339(ts)
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|_| invalid())?;
    Ok((created_at, id))
}
