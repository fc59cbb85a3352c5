use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in a case's append-only audit trail. Rows are only ever
/// inserted; nothing updates or deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: Uuid,
    pub case_id: Uuid,
    pub action: String,
    pub details: Option<String>,
    pub performed_by: String,
    pub timestamp: DateTime<Utc>,
}
