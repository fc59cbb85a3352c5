//! Patient Store — patient records and the open-schema additional-data bag.
//!
//! `additional_data` is an ordered list of named fields the extraction
//! pipeline populates freely (date of birth, insurance, MRN, ...). It is
//! stored as a JSON column; updates go through an explicit merge strategy.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::cases;
use crate::db::DatabaseError;
use crate::models::*;

pub fn create_patient(conn: &Connection, input: &NewPatient) -> Result<Patient, DatabaseError> {
    let now = chrono::Utc::now();
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO patients (id, name, email, phone, additional_data, notes,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id.to_string(),
            input.name,
            input.email,
            input.phone,
            fields_to_json(&input.additional_data)?,
            input.notes,
            now.to_rfc3339(),
        ],
    )?;
    Ok(Patient {
        id,
        name: input.name.clone(),
        email: input.email.clone(),
        phone: input.phone.clone(),
        additional_data: input.additional_data.clone(),
        notes: input.notes.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let result = conn.query_row(
        &format!("{PATIENT_SELECT} WHERE id = ?1"),
        params![id.to_string()],
        patient_row,
    );
    match result {
        Ok(row) => Ok(Some(patient_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All patients, newest first.
pub fn list_patients(conn: &Connection) -> Result<Vec<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(&format!("{PATIENT_SELECT} ORDER BY created_at DESC"))?;
    let rows = stmt.query_map([], patient_row)?.collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(patient_from_row).collect()
}

/// Patch a patient in place. Only the given fields change.
pub fn update_patient(
    conn: &Connection,
    patient_id: &Uuid,
    update: &PatientUpdate,
) -> Result<(), DatabaseError> {
    let additional_data = update
        .additional_data
        .as_deref()
        .map(fields_to_json_slice)
        .transpose()?;
    let changed = conn.execute(
        "UPDATE patients SET
            name = COALESCE(?2, name),
            email = COALESCE(?3, email),
            phone = COALESCE(?4, phone),
            additional_data = COALESCE(?5, additional_data),
            notes = COALESCE(?6, notes),
            updated_at = ?7
         WHERE id = ?1",
        params![
            patient_id.to_string(),
            update.name,
            update.email,
            update.phone,
            additional_data,
            update.notes,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("patient", patient_id));
    }
    Ok(())
}

/// Fold incoming fields into a patient's additional-data bag using the
/// given strategy:
///
/// - `Replace` — the incoming list becomes the bag as-is.
/// - `Merge` — fields matched by case-insensitive name are updated in
///   place (keeping their position); unmatched fields are appended.
///   Incoming fields without `extracted_at` are stamped now.
/// - `Append` — everything is appended, stamping missing `extracted_at`.
pub fn update_additional_data(
    conn: &Connection,
    patient_id: &Uuid,
    incoming: &[PatientField],
    strategy: MergeStrategy,
) -> Result<(), DatabaseError> {
    let patient = get_patient(conn, patient_id)?
        .ok_or_else(|| DatabaseError::not_found("patient", patient_id))?;
    let now = chrono::Utc::now();

    let merged = match strategy {
        MergeStrategy::Replace => incoming.to_vec(),
        MergeStrategy::Merge => {
            let mut data = patient.additional_data;
            for item in incoming {
                let stamped = stamp(item, now);
                match data
                    .iter_mut()
                    .find(|existing| existing.name.eq_ignore_ascii_case(&item.name))
                {
                    Some(existing) => {
                        existing.name = stamped.name;
                        existing.value = stamped.value;
                        if stamped.confidence.is_some() {
                            existing.confidence = stamped.confidence;
                        }
                        if stamped.source.is_some() {
                            existing.source = stamped.source;
                        }
                        existing.extracted_at = stamped.extracted_at;
                    }
                    None => data.push(stamped),
                }
            }
            data
        }
        MergeStrategy::Append => {
            let mut data = patient.additional_data;
            data.extend(incoming.iter().map(|item| stamp(item, now)));
            data
        }
    };

    conn.execute(
        "UPDATE patients SET additional_data = ?2, updated_at = ?3 WHERE id = ?1",
        params![
            patient_id.to_string(),
            fields_to_json_slice(&merged)?,
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn stamp(item: &PatientField, now: chrono::DateTime<chrono::Utc>) -> PatientField {
    let mut out = item.clone();
    out.extracted_at = item.extracted_at.or(Some(now));
    out
}

pub fn find_by_email(conn: &Connection, email: &str) -> Result<Option<Patient>, DatabaseError> {
    let result = conn.query_row(
        &format!("{PATIENT_SELECT} WHERE email = ?1 LIMIT 1"),
        params![email],
        patient_row,
    );
    match result {
        Ok(row) => Ok(Some(patient_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn find_by_phone(conn: &Connection, phone: &str) -> Result<Option<Patient>, DatabaseError> {
    let result = conn.query_row(
        &format!("{PATIENT_SELECT} WHERE phone = ?1 LIMIT 1"),
        params![phone],
        patient_row,
    );
    match result {
        Ok(row) => Ok(Some(patient_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Find a patient by medical record number. The MRN lives inside the
/// open-schema bag, so this scans for a field whose name mentions
/// "medical record" and whose value matches exactly.
pub fn find_by_mrn(conn: &Connection, mrn: &str) -> Result<Option<Patient>, DatabaseError> {
    for patient in list_patients(conn)? {
        let matches = patient.additional_data.iter().any(|field| {
            field.name.to_lowercase().contains("medical record") && field.value == mrn
        });
        if matches {
            return Ok(Some(patient));
        }
    }
    Ok(None)
}

/// Case-insensitive substring search over patient names.
pub fn search_by_name(conn: &Connection, query: &str) -> Result<Vec<Patient>, DatabaseError> {
    let needle = query.to_lowercase();
    Ok(list_patients(conn)?
        .into_iter()
        .filter(|p| {
            p.name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&needle))
        })
        .collect())
}

/// Duplicate detection across all three identity signals, for intake review.
///
/// - `email` / `phone` — exact match against the contact columns.
/// - `name` + `fields_to_match` — exact name match combined with at least
///   one bag field matching by case-insensitive name and exact value
///   (typically date of birth). Both must be given for this path to run.
///
/// A patient hit by more than one criterion is reported once, tagged with
/// the first criterion that matched (email before phone before name).
pub fn find_potential_duplicates(
    conn: &Connection,
    name: Option<&str>,
    email: Option<&str>,
    phone: Option<&str>,
    fields_to_match: &[PatientField],
) -> Result<Vec<DuplicateMatch>, DatabaseError> {
    let mut matches = Vec::new();

    if let Some(email) = email {
        if let Some(patient) = find_by_email(conn, email)? {
            matches.push(DuplicateMatch {
                patient,
                match_type: DuplicateMatchType::Email,
            });
        }
    }

    if let Some(phone) = phone {
        if let Some(patient) = find_by_phone(conn, phone)? {
            matches.push(DuplicateMatch {
                patient,
                match_type: DuplicateMatchType::Phone,
            });
        }
    }

    if let Some(name) = name {
        if !fields_to_match.is_empty() {
            for patient in list_patients(conn)? {
                if patient.name.as_deref() != Some(name) {
                    continue;
                }
                let has_matching_data = fields_to_match.iter().any(|search| {
                    patient.additional_data.iter().any(|field| {
                        field.name.eq_ignore_ascii_case(&search.name)
                            && field.value == search.value
                    })
                });
                if has_matching_data {
                    matches.push(DuplicateMatch {
                        patient,
                        match_type: DuplicateMatchType::NameAndAdditionalData,
                    });
                }
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    matches.retain(|m| seen.insert(m.patient.id));
    Ok(matches)
}

/// Patient joined with their cases, newest case first.
pub fn get_patient_with_cases(
    conn: &Connection,
    patient_id: &Uuid,
) -> Result<Option<PatientWithCases>, DatabaseError> {
    let Some(patient) = get_patient(conn, patient_id)? else {
        return Ok(None);
    };
    let cases = cases::cases_for_patient(conn, patient_id)?;
    Ok(Some(PatientWithCases { patient, cases }))
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

const PATIENT_SELECT: &str = "SELECT id, name, email, phone, additional_data, notes,
    created_at, updated_at FROM patients";

struct PatientRow {
    id: String,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    additional_data: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

fn patient_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatientRow> {
    Ok(PatientRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        additional_data: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn patient_from_row(row: PatientRow) -> Result<Patient, DatabaseError> {
    Ok(Patient {
        id: parse_uuid(&row.id)?,
        name: row.name,
        email: row.email,
        phone: row.phone,
        additional_data: row
            .additional_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?
            .unwrap_or_default(),
        notes: row.notes,
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    })
}

fn fields_to_json(fields: &[PatientField]) -> Result<Option<String>, DatabaseError> {
    if fields.is_empty() {
        return Ok(None);
    }
    fields_to_json_slice(fields).map(Some)
}

fn fields_to_json_slice(fields: &[PatientField]) -> Result<String, DatabaseError> {
    serde_json::to_string(fields).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn patient_with_bag(conn: &Connection) -> Patient {
        create_patient(
            conn,
            &NewPatient {
                name: Some("Sam Okafor".into()),
                email: Some("sam@example.com".into()),
                additional_data: vec![
                    PatientField::new("Date of Birth", "1984-03-12"),
                    PatientField::new("Insurance Provider", "Acme Health"),
                ],
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn bag_round_trips_through_json_column() {
        let conn = open_memory_database().unwrap();
        let p = patient_with_bag(&conn);

        let got = get_patient(&conn, &p.id).unwrap().unwrap();
        assert_eq!(got.additional_data.len(), 2);
        assert_eq!(got.additional_data[0].name, "Date of Birth");
        assert_eq!(got.additional_data[1].value, "Acme Health");
    }

    #[test]
    fn merge_matches_names_case_insensitively() {
        let conn = open_memory_database().unwrap();
        let p = patient_with_bag(&conn);

        update_additional_data(
            &conn,
            &p.id,
            &[
                PatientField::new("date of birth", "1984-03-13"),
                PatientField::new("Medical Record Number", "MRN-0042"),
            ],
            MergeStrategy::Merge,
        )
        .unwrap();

        let got = get_patient(&conn, &p.id).unwrap().unwrap();
        assert_eq!(got.additional_data.len(), 3);
        // Updated in place: position 0 kept, value replaced.
        assert_eq!(got.additional_data[0].value, "1984-03-13");
        assert!(got.additional_data[0].extracted_at.is_some());
        assert_eq!(got.additional_data[2].name, "Medical Record Number");
    }

    #[test]
    fn append_keeps_duplicates() {
        let conn = open_memory_database().unwrap();
        let p = patient_with_bag(&conn);

        update_additional_data(
            &conn,
            &p.id,
            &[PatientField::new("Date of Birth", "1990-01-01")],
            MergeStrategy::Append,
        )
        .unwrap();

        let got = get_patient(&conn, &p.id).unwrap().unwrap();
        assert_eq!(got.additional_data.len(), 3);
        assert_eq!(got.additional_data[0].value, "1984-03-12");
        assert_eq!(got.additional_data[2].value, "1990-01-01");
    }

    #[test]
    fn replace_discards_existing_bag() {
        let conn = open_memory_database().unwrap();
        let p = patient_with_bag(&conn);

        update_additional_data(
            &conn,
            &p.id,
            &[PatientField::new("Allergy", "Penicillin")],
            MergeStrategy::Replace,
        )
        .unwrap();

        let got = get_patient(&conn, &p.id).unwrap().unwrap();
        assert_eq!(got.additional_data.len(), 1);
        assert_eq!(got.additional_data[0].name, "Allergy");
    }

    #[test]
    fn merge_into_unknown_patient_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = update_additional_data(
            &conn,
            &Uuid::new_v4(),
            &[PatientField::new("x", "y")],
            MergeStrategy::Merge,
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn find_by_mrn_scans_the_bag() {
        let conn = open_memory_database().unwrap();
        let p = patient_with_bag(&conn);
        update_additional_data(
            &conn,
            &p.id,
            &[PatientField::new("Medical Record Number", "MRN-0042")],
            MergeStrategy::Merge,
        )
        .unwrap();

        let found = find_by_mrn(&conn, "MRN-0042").unwrap().unwrap();
        assert_eq!(found.id, p.id);
        assert!(find_by_mrn(&conn, "MRN-9999").unwrap().is_none());
    }

    #[test]
    fn search_by_name_is_substring_match() {
        let conn = open_memory_database().unwrap();
        patient_with_bag(&conn);

        assert_eq!(search_by_name(&conn, "okaf").unwrap().len(), 1);
        assert!(search_by_name(&conn, "smith").unwrap().is_empty());
    }

    #[test]
    fn duplicates_matched_per_criterion() {
        let conn = open_memory_database().unwrap();
        let by_email = patient_with_bag(&conn);
        let by_phone = create_patient(
            &conn,
            &NewPatient {
                name: Some("Ana Lindqvist".into()),
                phone: Some("555-0142".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let matches = find_potential_duplicates(
            &conn,
            None,
            Some("sam@example.com"),
            Some("555-0142"),
            &[],
        )
        .unwrap();

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].patient.id, by_email.id);
        assert_eq!(matches[0].match_type, DuplicateMatchType::Email);
        assert_eq!(matches[1].patient.id, by_phone.id);
        assert_eq!(matches[1].match_type, DuplicateMatchType::Phone);
    }

    #[test]
    fn duplicates_by_name_need_matching_bag_field() {
        let conn = open_memory_database().unwrap();
        let p = patient_with_bag(&conn);

        // Exact name + case-insensitive field name + exact value.
        let dob = [PatientField::new("date of birth", "1984-03-12")];
        let matches =
            find_potential_duplicates(&conn, Some("Sam Okafor"), None, None, &dob).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].patient.id, p.id);
        assert_eq!(
            matches[0].match_type,
            DuplicateMatchType::NameAndAdditionalData
        );

        // Name alone, or a wrong field value, is not enough.
        assert!(find_potential_duplicates(&conn, Some("Sam Okafor"), None, None, &[])
            .unwrap()
            .is_empty());
        let wrong = [PatientField::new("Date of Birth", "1990-01-01")];
        assert!(
            find_potential_duplicates(&conn, Some("Sam Okafor"), None, None, &wrong)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn duplicate_hit_by_several_criteria_reported_once() {
        let conn = open_memory_database().unwrap();
        let p = patient_with_bag(&conn);

        let dob = [PatientField::new("Date of Birth", "1984-03-12")];
        let matches = find_potential_duplicates(
            &conn,
            Some("Sam Okafor"),
            Some("sam@example.com"),
            None,
            &dob,
        )
        .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].patient.id, p.id);
        assert_eq!(matches[0].match_type, DuplicateMatchType::Email);
    }

    #[test]
    fn lookup_by_email() {
        let conn = open_memory_database().unwrap();
        let p = patient_with_bag(&conn);
        let found = find_by_email(&conn, "sam@example.com").unwrap().unwrap();
        assert_eq!(found.id, p.id);
    }
}
