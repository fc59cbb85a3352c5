use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top level of the clinical taxonomy (e.g. "Ophthalmology").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specialty {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Middle level, owned by a specialty (e.g. "Procedure or Surgery").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentType {
    pub id: Uuid,
    pub specialty_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Leaf level, owned by a treatment type (e.g. "Trabeculectomy").
/// The only level a case is classified down to with full specificity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub id: Uuid,
    pub treatment_type_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable compliance requirement. Not owned by any taxonomy node;
/// linked to specialties/treatment types/procedures via junction rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Treatment type with its procedures, for the hierarchy view.
#[derive(Debug, Clone, Serialize)]
pub struct TreatmentTypeNode {
    #[serde(flatten)]
    pub treatment_type: TreatmentType,
    pub procedures: Vec<Procedure>,
}

/// Specialty with its full subtree, ordered by name at every level.
#[derive(Debug, Clone, Serialize)]
pub struct SpecialtyNode {
    #[serde(flatten)]
    pub specialty: Specialty,
    pub treatment_types: Vec<TreatmentTypeNode>,
}
