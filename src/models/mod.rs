pub mod activity;
pub mod case;
pub mod catalog;
pub mod classification;
pub mod document;
pub mod enums;
pub mod patient;

pub use activity::*;
pub use case::*;
pub use catalog::*;
pub use classification::*;
pub use document::*;
pub use enums::*;
pub use patient::*;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::DatabaseError;

/// Parse a TEXT-stored UUID. A corrupt id is a constraint violation, not a
/// silent skip.
pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

pub(crate) fn parse_uuid_opt(s: Option<String>) -> Option<Uuid> {
    s.and_then(|v| Uuid::parse_str(&v).ok())
}

/// Parse an RFC 3339 timestamp stored as TEXT. Falls back to the epoch for
/// unparseable values rather than failing the whole row read.
pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

pub(crate) fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|v| parse_ts(&v))
}
