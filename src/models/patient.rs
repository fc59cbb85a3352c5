use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in a patient's open-schema data bag. The extraction pipeline
/// may produce arbitrary named fields (date of birth, insurance, MRN, ...),
/// so this is a tagged key-value record with optional provenance, not a
/// fixed struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
}

impl PatientField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            confidence: None,
            source: None,
            extracted_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Ordered: append and merge preserve insertion order.
    pub additional_data: Vec<PatientField>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPatient {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub additional_data: Vec<PatientField>,
    pub notes: Option<String>,
}

/// Partial patch for a patient. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct PatientUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub additional_data: Option<Vec<PatientField>>,
    pub notes: Option<String>,
}

/// Which criterion flagged a patient as a potential duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMatchType {
    Email,
    Phone,
    NameAndAdditionalData,
}

/// A potential duplicate, tagged with the criterion that matched. A patient
/// matched by several criteria appears once, under the first match.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateMatch {
    pub patient: Patient,
    pub match_type: DuplicateMatchType,
}

/// Patient joined with their cases, newest case first.
#[derive(Debug, Clone, Serialize)]
pub struct PatientWithCases {
    #[serde(flatten)]
    pub patient: Patient,
    pub cases: Vec<super::Case>,
}
