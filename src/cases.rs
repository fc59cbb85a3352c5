//! Case Store — referral cases, their documents, and the append-only
//! activity log.
//!
//! Every mutation here appends an activity entry. The log is the case's
//! audit trail: rows are inserted and never touched again.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;
use crate::patients;

/// Append an entry to a case's activity log.
pub fn log_activity(
    conn: &Connection,
    case_id: &Uuid,
    action: &str,
    details: Option<&str>,
    performed_by: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO activity_logs (id, case_id, action, details, performed_by, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            case_id.to_string(),
            action,
            details,
            performed_by,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// A case's activity log, newest first.
pub fn case_activity(conn: &Connection, case_id: &Uuid) -> Result<Vec<ActivityLog>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, case_id, action, details, performed_by, timestamp
         FROM activity_logs WHERE case_id = ?1
         ORDER BY timestamp DESC",
    )?;
    let rows = stmt
        .query_map(params![case_id.to_string()], activity_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(activity_from_row).collect()
}

/// Open a new case. Status starts at `new`; priority defaults to `medium`.
pub fn create_case(conn: &Connection, input: &NewCase) -> Result<Case, DatabaseError> {
    let now = chrono::Utc::now();
    let id = Uuid::new_v4();
    let priority = input.priority.unwrap_or(CasePriority::Medium);

    conn.execute(
        "INSERT INTO cases (id, referral_source, status, priority, patient_id, notes,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id.to_string(),
            input.referral_source,
            CaseStatus::New.as_str(),
            priority.as_str(),
            input.patient_id.map(|p| p.to_string()),
            input.notes,
            now.to_rfc3339(),
        ],
    )?;

    let details = match input.patient_id {
        Some(patient_id) => format!(
            "New case created from {} for patient {patient_id}",
            input.referral_source
        ),
        None => format!("New case created from {}", input.referral_source),
    };
    log_activity(conn, &id, "case_created", Some(&details), "system")?;
    tracing::info!(case_id = %id, source = %input.referral_source, "Case created");

    Ok(Case {
        id,
        referral_source: input.referral_source.clone(),
        status: CaseStatus::New,
        priority,
        patient_id: input.patient_id,
        eligibility_status: None,
        appointment_date: None,
        appointment_time: None,
        provider: None,
        notes: input.notes.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Combined intake path: create the patient first, then a case pointing at
/// them. For an existing patient, use [`create_case`] with `patient_id` set.
pub fn create_case_with_patient(
    conn: &Connection,
    case_input: &NewCase,
    patient_input: &NewPatient,
) -> Result<(Case, Patient), DatabaseError> {
    let patient = patients::create_patient(conn, patient_input)?;
    let case = create_case(
        conn,
        &NewCase {
            patient_id: Some(patient.id),
            ..case_input.clone()
        },
    )?;
    Ok((case, patient))
}

pub fn get_case(conn: &Connection, id: &Uuid) -> Result<Option<Case>, DatabaseError> {
    let result = conn.query_row(
        &format!("{CASE_SELECT} WHERE id = ?1"),
        params![id.to_string()],
        case_row,
    );
    match result {
        Ok(row) => Ok(Some(case_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All cases, optionally filtered by status, newest first, each joined with
/// its patient.
pub fn list_cases(
    conn: &Connection,
    status: Option<CaseStatus>,
) -> Result<Vec<CaseWithPatient>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{CASE_SELECT} WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC"
    ))?;
    let rows = stmt
        .query_map(params![status.map(|s| s.as_str())], case_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let case = case_from_row(row)?;
        let patient = match &case.patient_id {
            Some(pid) => patients::get_patient(conn, pid)?,
            None => None,
        };
        result.push(CaseWithPatient { case, patient });
    }
    Ok(result)
}

/// All cases referencing a patient, newest first.
pub fn cases_for_patient(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Vec<Case>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{CASE_SELECT} WHERE patient_id = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt
        .query_map(params![patient_id.to_string()], case_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(case_from_row).collect()
}

/// Patch a case in place. Only the given fields change; `updated_at` is
/// stamped and the changed field names are logged.
pub fn update_case(
    conn: &Connection,
    case_id: &Uuid,
    update: &CaseUpdate,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE cases SET
            status = COALESCE(?2, status),
            priority = COALESCE(?3, priority),
            patient_id = COALESCE(?4, patient_id),
            eligibility_status = COALESCE(?5, eligibility_status),
            appointment_date = COALESCE(?6, appointment_date),
            appointment_time = COALESCE(?7, appointment_time),
            provider = COALESCE(?8, provider),
            notes = COALESCE(?9, notes),
            updated_at = ?10
         WHERE id = ?1",
        params![
            case_id.to_string(),
            update.status.map(|s| s.as_str()),
            update.priority.map(|p| p.as_str()),
            update.patient_id.map(|p| p.to_string()),
            update.eligibility_status.map(|e| e.as_str()),
            update.appointment_date,
            update.appointment_time,
            update.provider,
            update.notes,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("case", case_id));
    }

    let details = format!("Case updated: {}", update.changed_fields().join(", "));
    log_activity(conn, case_id, "case_updated", Some(&details), "system")?;
    Ok(())
}

/// Register an uploaded document against a case. A `new` case moves to
/// `processing`; other statuses are left alone.
pub fn add_document(
    conn: &Connection,
    case_id: &Uuid,
    file_name: &str,
    file_type: &str,
    file_size: i64,
    storage_key: &str,
) -> Result<CaseDocument, DatabaseError> {
    let case = get_case(conn, case_id)?
        .ok_or_else(|| DatabaseError::not_found("case", case_id))?;

    let now = chrono::Utc::now();
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO documents (id, case_id, file_name, file_type, file_size, storage_key,
         status, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.to_string(),
            case_id.to_string(),
            file_name,
            file_type,
            file_size,
            storage_key,
            DocumentStatus::Uploaded.as_str(),
            now.to_rfc3339(),
        ],
    )?;

    if case.status == CaseStatus::New {
        conn.execute(
            "UPDATE cases SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                case_id.to_string(),
                CaseStatus::Processing.as_str(),
                now.to_rfc3339(),
            ],
        )?;
    }

    log_activity(
        conn,
        case_id,
        "document_uploaded",
        Some(&format!("Document uploaded: {file_name}")),
        "system",
    )?;

    Ok(CaseDocument {
        id,
        case_id: *case_id,
        file_name: file_name.to_string(),
        file_type: file_type.to_string(),
        file_size,
        storage_key: storage_key.to_string(),
        status: DocumentStatus::Uploaded,
        uploaded_at: now,
    })
}

pub fn list_documents(
    conn: &Connection,
    case_id: &Uuid,
) -> Result<Vec<CaseDocument>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, case_id, file_name, file_type, file_size, storage_key, status, uploaded_at
         FROM documents WHERE case_id = ?1
         ORDER BY uploaded_at",
    )?;
    let rows = stmt
        .query_map(params![case_id.to_string()], document_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(document_from_row).collect()
}

pub fn set_document_status(
    conn: &Connection,
    document_id: &Uuid,
    status: DocumentStatus,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE documents SET status = ?2 WHERE id = ?1",
        params![document_id.to_string(), status.as_str()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("document", document_id));
    }
    Ok(())
}

/// A case joined with its patient, documents, and activity log (newest
/// first). `Ok(None)` for an unknown case.
pub fn get_case_with_details(
    conn: &Connection,
    case_id: &Uuid,
) -> Result<Option<CaseDetails>, DatabaseError> {
    let Some(case) = get_case(conn, case_id)? else {
        return Ok(None);
    };
    let patient = match &case.patient_id {
        Some(pid) => patients::get_patient(conn, pid)?,
        None => None,
    };
    let documents = list_documents(conn, case_id)?;
    let activity = case_activity(conn, case_id)?;
    Ok(Some(CaseDetails {
        case,
        patient,
        documents,
        activity,
    }))
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

const CASE_SELECT: &str = "SELECT id, referral_source, status, priority, patient_id,
    eligibility_status, appointment_date, appointment_time, provider, notes,
    created_at, updated_at FROM cases";

struct CaseRow {
    id: String,
    referral_source: String,
    status: String,
    priority: String,
    patient_id: Option<String>,
    eligibility_status: Option<String>,
    appointment_date: Option<String>,
    appointment_time: Option<String>,
    provider: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

fn case_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CaseRow> {
    Ok(CaseRow {
        id: row.get(0)?,
        referral_source: row.get(1)?,
        status: row.get(2)?,
        priority: row.get(3)?,
        patient_id: row.get(4)?,
        eligibility_status: row.get(5)?,
        appointment_date: row.get(6)?,
        appointment_time: row.get(7)?,
        provider: row.get(8)?,
        notes: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn case_from_row(row: CaseRow) -> Result<Case, DatabaseError> {
    use std::str::FromStr;
    Ok(Case {
        id: parse_uuid(&row.id)?,
        referral_source: row.referral_source,
        status: CaseStatus::from_str(&row.status)?,
        priority: CasePriority::from_str(&row.priority)?,
        patient_id: parse_uuid_opt(row.patient_id),
        eligibility_status: row
            .eligibility_status
            .as_deref()
            .map(EligibilityStatus::from_str)
            .transpose()?,
        appointment_date: row.appointment_date,
        appointment_time: row.appointment_time,
        provider: row.provider,
        notes: row.notes,
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    })
}

struct DocumentRow {
    id: String,
    case_id: String,
    file_name: String,
    file_type: String,
    file_size: i64,
    storage_key: String,
    status: String,
    uploaded_at: String,
}

fn document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        case_id: row.get(1)?,
        file_name: row.get(2)?,
        file_type: row.get(3)?,
        file_size: row.get(4)?,
        storage_key: row.get(5)?,
        status: row.get(6)?,
        uploaded_at: row.get(7)?,
    })
}

fn document_from_row(row: DocumentRow) -> Result<CaseDocument, DatabaseError> {
    use std::str::FromStr;
    Ok(CaseDocument {
        id: parse_uuid(&row.id)?,
        case_id: parse_uuid(&row.case_id)?,
        file_name: row.file_name,
        file_type: row.file_type,
        file_size: row.file_size,
        storage_key: row.storage_key,
        status: DocumentStatus::from_str(&row.status)?,
        uploaded_at: parse_ts(&row.uploaded_at),
    })
}

struct ActivityRow {
    id: String,
    case_id: String,
    action: String,
    details: Option<String>,
    performed_by: String,
    timestamp: String,
}

fn activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityRow> {
    Ok(ActivityRow {
        id: row.get(0)?,
        case_id: row.get(1)?,
        action: row.get(2)?,
        details: row.get(3)?,
        performed_by: row.get(4)?,
        timestamp: row.get(5)?,
    })
}

fn activity_from_row(row: ActivityRow) -> Result<ActivityLog, DatabaseError> {
    Ok(ActivityLog {
        id: parse_uuid(&row.id)?,
        case_id: parse_uuid(&row.case_id)?,
        action: row.action,
        details: row.details,
        performed_by: row.performed_by,
        timestamp: parse_ts(&row.timestamp),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn new_case_input() -> NewCase {
        NewCase {
            referral_source: "fax".into(),
            priority: None,
            notes: None,
            patient_id: None,
        }
    }

    #[test]
    fn create_defaults_and_logs() {
        let conn = open_memory_database().unwrap();
        let case = create_case(&conn, &new_case_input()).unwrap();

        assert_eq!(case.status, CaseStatus::New);
        assert_eq!(case.priority, CasePriority::Medium);

        let log = case_activity(&conn, &case.id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "case_created");
        assert_eq!(log[0].performed_by, "system");
    }

    #[test]
    fn create_with_patient_links_them() {
        let conn = open_memory_database().unwrap();
        let patient_input = NewPatient {
            name: Some("Jordan Reyes".into()),
            ..Default::default()
        };
        let (case, patient) =
            create_case_with_patient(&conn, &new_case_input(), &patient_input).unwrap();

        assert_eq!(case.patient_id, Some(patient.id));
        let details = get_case_with_details(&conn, &case.id).unwrap().unwrap();
        assert_eq!(
            details.patient.unwrap().name.as_deref(),
            Some("Jordan Reyes")
        );
    }

    #[test]
    fn update_patches_and_logs_field_names() {
        let conn = open_memory_database().unwrap();
        let case = create_case(&conn, &new_case_input()).unwrap();

        update_case(
            &conn,
            &case.id,
            &CaseUpdate {
                status: Some(CaseStatus::Eligible),
                provider: Some("Dr. Osei".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let got = get_case(&conn, &case.id).unwrap().unwrap();
        assert_eq!(got.status, CaseStatus::Eligible);
        assert_eq!(got.provider.as_deref(), Some("Dr. Osei"));
        assert_eq!(got.referral_source, "fax");

        let log = case_activity(&conn, &case.id).unwrap();
        let update_entry = log.iter().find(|e| e.action == "case_updated").unwrap();
        let details = update_entry.details.as_deref().unwrap();
        assert!(details.contains("status") && details.contains("provider"));
    }

    #[test]
    fn update_unknown_case_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = update_case(&conn, &Uuid::new_v4(), &CaseUpdate::default()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn document_upload_moves_new_case_to_processing() {
        let conn = open_memory_database().unwrap();
        let case = create_case(&conn, &new_case_input()).unwrap();

        add_document(&conn, &case.id, "referral.pdf", "application/pdf", 1024, "blob-1").unwrap();

        let got = get_case(&conn, &case.id).unwrap().unwrap();
        assert_eq!(got.status, CaseStatus::Processing);

        // A second upload does not disturb the status further.
        add_document(&conn, &case.id, "labs.pdf", "application/pdf", 2048, "blob-2").unwrap();
        let got = get_case(&conn, &case.id).unwrap().unwrap();
        assert_eq!(got.status, CaseStatus::Processing);
        assert_eq!(list_documents(&conn, &case.id).unwrap().len(), 2);
    }

    #[test]
    fn list_filters_by_status() {
        let conn = open_memory_database().unwrap();
        let a = create_case(&conn, &new_case_input()).unwrap();
        let b = create_case(&conn, &new_case_input()).unwrap();
        update_case(
            &conn,
            &b.id,
            &CaseUpdate {
                status: Some(CaseStatus::Scheduled),
                ..Default::default()
            },
        )
        .unwrap();

        let new_only = list_cases(&conn, Some(CaseStatus::New)).unwrap();
        assert_eq!(new_only.len(), 1);
        assert_eq!(new_only[0].case.id, a.id);
        assert_eq!(list_cases(&conn, None).unwrap().len(), 2);
    }
}
