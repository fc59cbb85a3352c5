use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::activity::ActivityLog;
use super::document::CaseDocument;
use super::enums::{CasePriority, CaseStatus, EligibilityStatus};
use super::patient::Patient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: Uuid,
    pub referral_source: String,
    pub status: CaseStatus,
    pub priority: CasePriority,
    pub patient_id: Option<Uuid>,
    pub eligibility_status: Option<EligibilityStatus>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub provider: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for opening a new case. Status always starts at `new`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCase {
    pub referral_source: String,
    pub priority: Option<CasePriority>,
    pub notes: Option<String>,
    pub patient_id: Option<Uuid>,
}

/// Partial patch for a case. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct CaseUpdate {
    pub status: Option<CaseStatus>,
    pub priority: Option<CasePriority>,
    pub patient_id: Option<Uuid>,
    pub eligibility_status: Option<EligibilityStatus>,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub provider: Option<String>,
    pub notes: Option<String>,
}

impl CaseUpdate {
    /// Names of the fields this patch would touch, for the activity log.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push("status");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.patient_id.is_some() {
            fields.push("patient_id");
        }
        if self.eligibility_status.is_some() {
            fields.push("eligibility_status");
        }
        if self.appointment_date.is_some() {
            fields.push("appointment_date");
        }
        if self.appointment_time.is_some() {
            fields.push("appointment_time");
        }
        if self.provider.is_some() {
            fields.push("provider");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        fields
    }
}

/// Case joined with its patient, for list views.
#[derive(Debug, Clone, Serialize)]
pub struct CaseWithPatient {
    #[serde(flatten)]
    pub case: Case,
    pub patient: Option<Patient>,
}

/// Full case detail: patient, documents, and activity log (newest first).
#[derive(Debug, Clone, Serialize)]
pub struct CaseDetails {
    #[serde(flatten)]
    pub case: Case,
    pub patient: Option<Patient>,
    pub documents: Vec<CaseDocument>,
    pub activity: Vec<ActivityLog>,
}
