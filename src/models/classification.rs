use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::RuleCheckStatus;

/// The (at most one) record binding a case to a taxonomy triple.
/// Reclassification patches this row in place — same id — so foreign
/// references to it stay valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseClassification {
    pub id: Uuid,
    pub case_id: Uuid,
    pub specialty_id: Uuid,
    pub treatment_type_id: Option<Uuid>,
    pub procedure_id: Option<Uuid>,
    pub confidence: Option<f64>,
    pub classified_by: String,
    pub classified_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// A per-case materialized instance of a rule's evaluation.
///
/// Stores a snapshot of the rule's title/description taken at
/// materialization time. `original_rule_id` is a soft back-reference for
/// audit only — it may dangle after the source rule is deleted, and the
/// snapshot fields stay authoritative for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCheck {
    pub id: Uuid,
    pub case_id: Uuid,
    pub rule_title: String,
    pub rule_description: String,
    pub original_rule_id: Option<Uuid>,
    pub status: RuleCheckStatus,
    pub notes: Option<String>,
    pub reasoning: Option<String>,
    pub required_additional_info: Vec<String>,
    pub checked_by: String,
    pub checked_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_for_classification_id: Option<Uuid>,
}

/// Input for classifying (or reclassifying) a case down to a procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub case_id: Uuid,
    pub specialty_id: Uuid,
    pub treatment_type_id: Uuid,
    pub procedure_id: Uuid,
    pub classified_by: String,
    pub confidence: Option<f64>,
}

/// Result of a classify call: the live classification row and the ids of
/// the rule checks created by *this* call (not the case's full check set).
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyOutcome {
    pub classification_id: Uuid,
    pub new_rule_check_ids: Vec<Uuid>,
}

/// Partial patch for a classification. Setting `reviewed_by` also stamps
/// `reviewed_at`.
#[derive(Debug, Clone, Default)]
pub struct ClassificationUpdate {
    pub specialty_id: Option<Uuid>,
    pub treatment_type_id: Option<Uuid>,
    pub procedure_id: Option<Uuid>,
    pub confidence: Option<f64>,
    pub reviewed_by: Option<String>,
}

/// Classification joined with taxonomy names and the case's rule checks.
/// Check rows surface their embedded rule snapshots directly — there is no
/// live join back to the rules table.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationView {
    #[serde(flatten)]
    pub classification: CaseClassification,
    pub specialty_name: Option<String>,
    pub treatment_type_name: Option<String>,
    pub procedure_name: Option<String>,
    pub rule_checks: Vec<RuleCheck>,
}

/// Read-side fold over a case's check set. Recomputed on every read, never
/// stored, so individual check updates change it immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleAggregate {
    /// At least one check is `deny`.
    Denied,
    /// Every check is `valid` and the set is non-empty.
    Valid,
    /// Mixed progress: how many checks are `valid` out of the total.
    Pending { valid: usize, total: usize },
    /// No checks materialized yet — neutral display state, not an error.
    Empty,
}

impl std::fmt::Display for RuleAggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Denied => write!(f, "Denied"),
            Self::Valid => write!(f, "Valid"),
            Self::Pending { valid, total } => write!(f, "{valid}/{total}"),
            Self::Empty => write!(f, "—"),
        }
    }
}
