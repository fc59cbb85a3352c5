use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::DocumentStatus;

/// A referral document attached to a case. The bytes live in the blob
/// store; `storage_key` is the opaque handle issued at upload time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDocument {
    pub id: Uuid,
    pub case_id: Uuid,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub storage_key: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
}
