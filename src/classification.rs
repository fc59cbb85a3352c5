//! Classification Engine and Rule Check Lifecycle.
//!
//! Classifying a case binds it to a taxonomy triple (specialty → treatment
//! type → procedure) and materializes one rule check per rule linked to the
//! procedure. Checks snapshot the rule's title/description at that moment;
//! later edits or deletion of the rule never rewrite a check.
//!
//! Reclassification patches the single live classification row in place and
//! only adds checks for rules the case has not seen before (matched by rule
//! id). Prior checks are part of the case's compliance record and survive.
//!
//! Concurrency: each operation is one SQLite transaction. Two concurrent
//! classify calls, or an AI title-addressed update racing a reviewer
//! id-addressed update, resolve last-commit-wins. That is deliberate —
//! classification is a rare human/AI-initiated event, and adding locking
//! would change observable semantics.

use std::collections::HashSet;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::cases::log_activity;
use crate::db::DatabaseError;
use crate::models::*;

/// Actor recorded on title-addressed rule check updates.
const AI_AGENT: &str = "ai_agent";

/// Classify (or reclassify) a case down to a procedure and materialize its
/// rule checks.
///
/// Rules already represented among the case's checks — matched by
/// `original_rule_id`, not title — are skipped: no duplicate check, no
/// status reset. The returned ids cover only the checks created by this
/// call.
///
/// The taxonomy triple is not validated for hierarchy consistency
/// (procedure under treatment type under specialty); a mismatched triple is
/// accepted as-is. Known gap.
pub fn classify_case(
    conn: &mut Connection,
    request: &ClassifyRequest,
) -> Result<ClassifyOutcome, DatabaseError> {
    let tx = conn.transaction()?;
    let now = chrono::Utc::now();
    let now_s = now.to_rfc3339();

    let case_exists = match tx.query_row(
        "SELECT 1 FROM cases WHERE id = ?1",
        params![request.case_id.to_string()],
        |_| Ok(()),
    ) {
        Ok(()) => true,
        Err(rusqlite::Error::QueryReturnedNoRows) => false,
        Err(e) => return Err(e.into()),
    };
    if !case_exists {
        return Err(DatabaseError::not_found("case", request.case_id));
    }

    // Read-then-write inside the transaction keeps the one-live-row
    // invariant without a schema constraint.
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM case_classifications WHERE case_id = ?1 LIMIT 1",
            params![request.case_id.to_string()],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let classification_id = match existing {
        Some(id) => {
            // Reclassification: patch in place, same id. Existing rule
            // checks are left alone — they belong to the case's history.
            tx.execute(
                "UPDATE case_classifications SET
                    specialty_id = ?2, treatment_type_id = ?3, procedure_id = ?4,
                    confidence = ?5, classified_by = ?6, classified_at = ?7
                 WHERE id = ?1",
                params![
                    id,
                    request.specialty_id.to_string(),
                    request.treatment_type_id.to_string(),
                    request.procedure_id.to_string(),
                    request.confidence,
                    request.classified_by,
                    now_s,
                ],
            )?;
            parse_uuid(&id)?
        }
        None => {
            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO case_classifications (id, case_id, specialty_id,
                 treatment_type_id, procedure_id, confidence, classified_by, classified_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.to_string(),
                    request.case_id.to_string(),
                    request.specialty_id.to_string(),
                    request.treatment_type_id.to_string(),
                    request.procedure_id.to_string(),
                    request.confidence,
                    request.classified_by,
                    now_s,
                ],
            )?;
            id
        }
    };

    // Rules linked to the target procedure, with the snapshot fields.
    let procedure_rules: Vec<(String, String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT r.id, r.title, r.description
             FROM rules r
             JOIN procedure_rules j ON j.rule_id = r.id
             WHERE j.procedure_id = ?1
             ORDER BY r.title",
        )?;
        let rows = stmt
            .query_map(params![request.procedure_id.to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    // Rule ids the case has already been evaluated against.
    let seen_rule_ids: HashSet<String> = {
        let mut stmt = tx.prepare(
            "SELECT original_rule_id FROM rule_checks
             WHERE case_id = ?1 AND original_rule_id IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(params![request.case_id.to_string()], |row| row.get(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        rows
    };

    let mut new_rule_check_ids = Vec::new();
    for (rule_id, title, description) in &procedure_rules {
        if seen_rule_ids.contains(rule_id) {
            continue;
        }
        let check_id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO rule_checks (id, case_id, rule_title, rule_description,
             original_rule_id, status, checked_by, checked_at, created_for_classification_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                check_id.to_string(),
                request.case_id.to_string(),
                title,
                description,
                rule_id,
                RuleCheckStatus::Pending.as_str(),
                "system",
                now_s,
                classification_id.to_string(),
            ],
        )?;
        new_rule_check_ids.push(check_id);
    }

    log_activity(
        &tx,
        &request.case_id,
        "case_classified",
        Some(&format!(
            "Case classified with procedure and {} new rules to check",
            new_rule_check_ids.len()
        )),
        &request.classified_by,
    )?;

    tx.commit()?;
    tracing::info!(
        case_id = %request.case_id,
        classification_id = %classification_id,
        new_checks = new_rule_check_ids.len(),
        "Case classified"
    );

    Ok(ClassifyOutcome {
        classification_id,
        new_rule_check_ids,
    })
}

/// The case's classification joined with taxonomy names and all its rule
/// checks. `Ok(None)` when the case has no classification (including when
/// the case itself does not exist) — reads never throw for absence.
pub fn get_classification_with_checks(
    conn: &Connection,
    case_id: &Uuid,
) -> Result<Option<ClassificationView>, DatabaseError> {
    let result = conn.query_row(
        "SELECT c.id, c.case_id, c.specialty_id, c.treatment_type_id, c.procedure_id,
                c.confidence, c.classified_by, c.classified_at, c.reviewed_by, c.reviewed_at,
                s.name, t.name, p.name
         FROM case_classifications c
         LEFT JOIN specialties s ON s.id = c.specialty_id
         LEFT JOIN treatment_types t ON t.id = c.treatment_type_id
         LEFT JOIN procedures p ON p.id = c.procedure_id
         WHERE c.case_id = ?1
         LIMIT 1",
        params![case_id.to_string()],
        |row| {
            Ok((
                classification_row(row)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, Option<String>>(12)?,
            ))
        },
    );

    let (class_row, specialty_name, treatment_type_name, procedure_name) = match result {
        Ok(v) => v,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(ClassificationView {
        classification: classification_from_row(class_row)?,
        specialty_name,
        treatment_type_name,
        procedure_name,
        rule_checks: list_rule_checks(conn, case_id)?,
    }))
}

/// Fetch the live classification row for a case, if any.
pub fn get_case_classification(
    conn: &Connection,
    case_id: &Uuid,
) -> Result<Option<CaseClassification>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, case_id, specialty_id, treatment_type_id, procedure_id, confidence,
                classified_by, classified_at, reviewed_by, reviewed_at
         FROM case_classifications WHERE case_id = ?1 LIMIT 1",
        params![case_id.to_string()],
        classification_row,
    );
    match result {
        Ok(row) => Ok(Some(classification_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Patch a classification by id. Setting `reviewed_by` also stamps
/// `reviewed_at`.
pub fn update_case_classification(
    conn: &Connection,
    id: &Uuid,
    update: &ClassificationUpdate,
) -> Result<(), DatabaseError> {
    let reviewed_at = update
        .reviewed_by
        .as_ref()
        .map(|_| chrono::Utc::now().to_rfc3339());
    let changed = conn.execute(
        "UPDATE case_classifications SET
            specialty_id = COALESCE(?2, specialty_id),
            treatment_type_id = COALESCE(?3, treatment_type_id),
            procedure_id = COALESCE(?4, procedure_id),
            confidence = COALESCE(?5, confidence),
            reviewed_by = COALESCE(?6, reviewed_by),
            reviewed_at = COALESCE(?7, reviewed_at)
         WHERE id = ?1",
        params![
            id.to_string(),
            update.specialty_id.map(|v| v.to_string()),
            update.treatment_type_id.map(|v| v.to_string()),
            update.procedure_id.map(|v| v.to_string()),
            update.confidence,
            update.reviewed_by,
            reviewed_at,
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("case_classification", id));
    }
    Ok(())
}

/// All rule checks for a case, oldest first, then by title for stable
/// ordering of same-batch rows.
pub fn list_rule_checks(conn: &Connection, case_id: &Uuid) -> Result<Vec<RuleCheck>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "{RULE_CHECK_SELECT} WHERE case_id = ?1 ORDER BY checked_at, rule_title"
    ))?;
    let rows = stmt
        .query_map(params![case_id.to_string()], rule_check_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(rule_check_from_row).collect()
}

pub fn get_rule_check(conn: &Connection, id: &Uuid) -> Result<Option<RuleCheck>, DatabaseError> {
    let result = conn.query_row(
        &format!("{RULE_CHECK_SELECT} WHERE id = ?1"),
        params![id.to_string()],
        rule_check_row,
    );
    match result {
        Ok(row) => Ok(Some(rule_check_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Title-addressed update — the AI processor's path.
///
/// The external processor reports results by `(case_id, rule_title)`, never
/// by internal id: the title is the snapshot key it received with the check.
/// Unknown titles (drift between what was materialized and what the
/// processor reports) fail with NotFound and mutate nothing.
pub fn update_rule_check(
    conn: &mut Connection,
    case_id: &Uuid,
    rule_title: &str,
    status: RuleCheckStatus,
    reasoning: &str,
    required_additional_info: &[String],
) -> Result<Uuid, DatabaseError> {
    let tx = conn.transaction()?;
    let now_s = chrono::Utc::now().to_rfc3339();

    let check_id: String = tx
        .query_row(
            "SELECT id FROM rule_checks WHERE case_id = ?1 AND rule_title = ?2 LIMIT 1",
            params![case_id.to_string(), rule_title],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DatabaseError::not_found("rule_check", rule_title)
            }
            other => other.into(),
        })?;

    let required_json = serde_json::to_string(required_additional_info)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    tx.execute(
        "UPDATE rule_checks SET
            status = ?2, reasoning = ?3, required_additional_info = ?4,
            processed_at = ?5, updated_at = ?5
         WHERE id = ?1",
        params![check_id, status.as_str(), reasoning, required_json, now_s],
    )?;

    log_activity(
        &tx,
        case_id,
        "rule_check_processed",
        Some(&format!("Rule '{rule_title}' processed: {}", status.as_str())),
        AI_AGENT,
    )?;

    tx.commit()?;
    parse_uuid(&check_id)
}

/// Id-addressed update — the human reviewer's path. Coexists with the
/// title-addressed path; overlapping writes resolve last-write-wins.
pub fn update_rule_check_status(
    conn: &mut Connection,
    rule_check_id: &Uuid,
    status: RuleCheckStatus,
    notes: Option<&str>,
    checked_by: &str,
) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    let now_s = chrono::Utc::now().to_rfc3339();

    let (case_id, rule_title): (String, String) = tx
        .query_row(
            "SELECT case_id, rule_title FROM rule_checks WHERE id = ?1",
            params![rule_check_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DatabaseError::not_found("rule_check", rule_check_id)
            }
            other => other.into(),
        })?;

    tx.execute(
        "UPDATE rule_checks SET
            status = ?2, notes = COALESCE(?3, notes), checked_by = ?4,
            checked_at = ?5, updated_at = ?5
         WHERE id = ?1",
        params![rule_check_id.to_string(), status.as_str(), notes, checked_by, now_s],
    )?;

    log_activity(
        &tx,
        &parse_uuid(&case_id)?,
        "rule_check_updated",
        Some(&format!("Rule '{rule_title}' set to {}", status.as_str())),
        checked_by,
    )?;

    tx.commit()?;
    Ok(())
}

/// Remove a single rule check from a case. The activity log keeps the
/// record of it having existed.
pub fn remove_rule_check(conn: &mut Connection, rule_check_id: &Uuid) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;

    let (case_id, rule_title): (String, String) = tx
        .query_row(
            "SELECT case_id, rule_title FROM rule_checks WHERE id = ?1",
            params![rule_check_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DatabaseError::not_found("rule_check", rule_check_id)
            }
            other => other.into(),
        })?;

    tx.execute(
        "DELETE FROM rule_checks WHERE id = ?1",
        params![rule_check_id.to_string()],
    )?;
    log_activity(
        &tx,
        &parse_uuid(&case_id)?,
        "rule_check_removed",
        Some(&format!("Rule check '{rule_title}' removed")),
        "system",
    )?;

    tx.commit()?;
    Ok(())
}

/// Pure fold over a case's check set for dashboards. Recomputed on every
/// read; never persisted.
pub fn rule_aggregate(checks: &[RuleCheck]) -> RuleAggregate {
    if checks.is_empty() {
        return RuleAggregate::Empty;
    }
    if checks.iter().any(|c| c.status == RuleCheckStatus::Deny) {
        return RuleAggregate::Denied;
    }
    let valid = checks
        .iter()
        .filter(|c| c.status == RuleCheckStatus::Valid)
        .count();
    if valid == checks.len() {
        RuleAggregate::Valid
    } else {
        RuleAggregate::Pending {
            valid,
            total: checks.len(),
        }
    }
}

/// Aggregate straight from the store.
pub fn case_rule_aggregate(
    conn: &Connection,
    case_id: &Uuid,
) -> Result<RuleAggregate, DatabaseError> {
    Ok(rule_aggregate(&list_rule_checks(conn, case_id)?))
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

struct ClassificationRow {
    id: String,
    case_id: String,
    specialty_id: String,
    treatment_type_id: Option<String>,
    procedure_id: Option<String>,
    confidence: Option<f64>,
    classified_by: String,
    classified_at: String,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
}

fn classification_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClassificationRow> {
    Ok(ClassificationRow {
        id: row.get(0)?,
        case_id: row.get(1)?,
        specialty_id: row.get(2)?,
        treatment_type_id: row.get(3)?,
        procedure_id: row.get(4)?,
        confidence: row.get(5)?,
        classified_by: row.get(6)?,
        classified_at: row.get(7)?,
        reviewed_by: row.get(8)?,
        reviewed_at: row.get(9)?,
    })
}

fn classification_from_row(row: ClassificationRow) -> Result<CaseClassification, DatabaseError> {
    Ok(CaseClassification {
        id: parse_uuid(&row.id)?,
        case_id: parse_uuid(&row.case_id)?,
        specialty_id: parse_uuid(&row.specialty_id)?,
        treatment_type_id: parse_uuid_opt(row.treatment_type_id),
        procedure_id: parse_uuid_opt(row.procedure_id),
        confidence: row.confidence,
        classified_by: row.classified_by,
        classified_at: parse_ts(&row.classified_at),
        reviewed_by: row.reviewed_by,
        reviewed_at: parse_ts_opt(row.reviewed_at),
    })
}

const RULE_CHECK_SELECT: &str = "SELECT id, case_id, rule_title, rule_description,
    original_rule_id, status, notes, reasoning, required_additional_info,
    checked_by, checked_at, processed_at, reviewed_by, reviewed_at, updated_at,
    created_for_classification_id FROM rule_checks";

struct RuleCheckRow {
    id: String,
    case_id: String,
    rule_title: String,
    rule_description: String,
    original_rule_id: Option<String>,
    status: String,
    notes: Option<String>,
    reasoning: Option<String>,
    required_additional_info: Option<String>,
    checked_by: String,
    checked_at: String,
    processed_at: Option<String>,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    updated_at: Option<String>,
    created_for_classification_id: Option<String>,
}

fn rule_check_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RuleCheckRow> {
    Ok(RuleCheckRow {
        id: row.get(0)?,
        case_id: row.get(1)?,
        rule_title: row.get(2)?,
        rule_description: row.get(3)?,
        original_rule_id: row.get(4)?,
        status: row.get(5)?,
        notes: row.get(6)?,
        reasoning: row.get(7)?,
        required_additional_info: row.get(8)?,
        checked_by: row.get(9)?,
        checked_at: row.get(10)?,
        processed_at: row.get(11)?,
        reviewed_by: row.get(12)?,
        reviewed_at: row.get(13)?,
        updated_at: row.get(14)?,
        created_for_classification_id: row.get(15)?,
    })
}

fn rule_check_from_row(row: RuleCheckRow) -> Result<RuleCheck, DatabaseError> {
    use std::str::FromStr;
    Ok(RuleCheck {
        id: parse_uuid(&row.id)?,
        case_id: parse_uuid(&row.case_id)?,
        rule_title: row.rule_title,
        rule_description: row.rule_description,
        original_rule_id: parse_uuid_opt(row.original_rule_id),
        status: RuleCheckStatus::from_str(&row.status)?,
        notes: row.notes,
        reasoning: row.reasoning,
        required_additional_info: row
            .required_additional_info
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?
            .unwrap_or_default(),
        checked_by: row.checked_by,
        checked_at: parse_ts(&row.checked_at),
        processed_at: parse_ts_opt(row.processed_at),
        reviewed_by: row.reviewed_by,
        reviewed_at: parse_ts_opt(row.reviewed_at),
        updated_at: parse_ts_opt(row.updated_at),
        created_for_classification_id: parse_uuid_opt(row.created_for_classification_id),
    })
}
