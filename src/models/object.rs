//! Metadata record for an object tracked by the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle state of an object in the metadata side-table.
///
/// Records are created as `Pending` when an upload is initiated, move to
/// `Complete` once the gateway has verified the bytes exist upstream, and to
/// `Failed` when verification definitively ruled the object absent. There is
/// no transition back to `Pending`.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ObjectStatus {
    Pending,
    Complete,
    Failed,
}

impl std::fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectStatus::Pending => write!(f, "pending"),
            ObjectStatus::Complete => write!(f, "complete"),
            ObjectStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Metadata for a single object stored upstream.
///
/// The gateway never holds the object bytes; this row is the only local
/// record. `object_key` is the key inside the backing store and always embeds
/// the record id as a prefix, so two uploads whose filenames sanitize to the
/// same string can never collide.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ObjectRecord {
    /// Record id, also the public handle used in download URLs.
    pub id: Uuid,

    /// Key inside the backing object store (`{id}/{sanitized_filename}`).
    pub object_key: String,

    /// Original client-supplied filename (post-sanitization).
    pub filename: String,

    /// MIME type declared at upload initiation.
    pub content_type: String,

    /// Declared size in bytes; used for range validation and signed PUT headers.
    pub size_bytes: i64,

    /// Current lifecycle state.
    pub status: ObjectStatus,

    /// When the upload was initiated.
    pub created_at: DateTime<Utc>,

    /// Last status transition, if any.
    pub updated_at: Option<DateTime<Utc>>,
}

impl ObjectRecord {
    /// Declared size as an unsigned count, clamping any negative value to zero.
    pub fn total_bytes(&self) -> u64 {
        self.size_bytes.max(0) as u64
    }
}
