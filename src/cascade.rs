//! Cascade deletion for the clinical taxonomy.
//!
//! Removing a taxonomy node takes its whole subtree with it, plus the
//! junction rows and case classifications that point into the subtree.
//! The blast radius stops there: cases, patients, rule checks, and
//! activity logs are untouchable. A rule check's `original_rule_id` may
//! dangle afterwards — its embedded snapshot is what display reads.
//!
//! Each top-level call is one transaction; a failure partway leaves the
//! taxonomy exactly as it was.

use rusqlite::{params, Connection, Transaction};
use uuid::Uuid;

use crate::db::DatabaseError;

/// Delete a procedure, its rule links, and any classifications that
/// reference it.
pub fn delete_procedure_cascade(conn: &mut Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    delete_procedure_in_tx(&tx, id)?;
    tx.commit()?;
    tracing::info!(procedure_id = %id, "Procedure cascade delete committed");
    Ok(())
}

/// Delete a treatment type and every procedure under it.
pub fn delete_treatment_type_cascade(
    conn: &mut Connection,
    id: &Uuid,
) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    delete_treatment_type_in_tx(&tx, id)?;
    tx.commit()?;
    tracing::info!(treatment_type_id = %id, "Treatment type cascade delete committed");
    Ok(())
}

/// Delete a specialty and its entire subtree of treatment types and
/// procedures.
pub fn delete_specialty_cascade(conn: &mut Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;

    let treatment_type_ids = child_ids(
        &tx,
        "SELECT id FROM treatment_types WHERE specialty_id = ?1",
        id,
    )?;
    for tt_id in &treatment_type_ids {
        delete_treatment_type_in_tx(&tx, tt_id)?;
    }

    tx.execute(
        "DELETE FROM specialty_rules WHERE specialty_id = ?1",
        params![id.to_string()],
    )?;
    tx.execute(
        "DELETE FROM case_classifications WHERE specialty_id = ?1",
        params![id.to_string()],
    )?;
    let changed = tx.execute(
        "DELETE FROM specialties WHERE id = ?1",
        params![id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("specialty", id));
    }

    tx.commit()?;
    tracing::info!(specialty_id = %id, "Specialty cascade delete committed");
    Ok(())
}

fn delete_treatment_type_in_tx(tx: &Transaction<'_>, id: &Uuid) -> Result<(), DatabaseError> {
    let procedure_ids = child_ids(
        tx,
        "SELECT id FROM procedures WHERE treatment_type_id = ?1",
        id,
    )?;
    for procedure_id in &procedure_ids {
        delete_procedure_in_tx(tx, procedure_id)?;
    }

    tx.execute(
        "DELETE FROM treatment_type_rules WHERE treatment_type_id = ?1",
        params![id.to_string()],
    )?;
    tx.execute(
        "DELETE FROM case_classifications WHERE treatment_type_id = ?1",
        params![id.to_string()],
    )?;
    let changed = tx.execute(
        "DELETE FROM treatment_types WHERE id = ?1",
        params![id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("treatment_type", id));
    }
    Ok(())
}

fn delete_procedure_in_tx(tx: &Transaction<'_>, id: &Uuid) -> Result<(), DatabaseError> {
    tx.execute(
        "DELETE FROM procedure_rules WHERE procedure_id = ?1",
        params![id.to_string()],
    )?;
    tx.execute(
        "DELETE FROM case_classifications WHERE procedure_id = ?1",
        params![id.to_string()],
    )?;
    let changed = tx.execute(
        "DELETE FROM procedures WHERE id = ?1",
        params![id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("procedure", id));
    }
    Ok(())
}

fn child_ids(tx: &Transaction<'_>, sql: &str, parent: &Uuid) -> Result<Vec<Uuid>, DatabaseError> {
    let mut stmt = tx.prepare(sql)?;
    let ids = stmt
        .query_map(params![parent.to_string()], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.iter().map(|s| crate::models::parse_uuid(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::{case_activity, create_case};
    use crate::catalog::*;
    use crate::classification::{classify_case, get_case_classification, list_rule_checks};
    use crate::db::open_memory_database;
    use crate::models::{ClassifyRequest, NewCase};

    struct Tree {
        case_id: Uuid,
        specialty_id: Uuid,
        treatment_type_id: Uuid,
        procedure_id: Uuid,
        rule_id: Uuid,
    }

    fn classified_tree(conn: &mut Connection) -> Tree {
        let case = create_case(
            conn,
            &NewCase {
                referral_source: "portal".into(),
                priority: None,
                notes: None,
                patient_id: None,
            },
        )
        .unwrap();
        let s = create_specialty(conn, "Cardiology", None).unwrap();
        let t = create_treatment_type(conn, &s.id, "Diagnostic", None).unwrap();
        let p = create_procedure(conn, &t.id, "Stress Echocardiogram", None).unwrap();
        let r = create_rule(conn, "Referring ECG Attached", "Recent ECG on file", None).unwrap();
        link_rule_to_procedure(conn, &p.id, &r.id).unwrap();

        classify_case(
            conn,
            &ClassifyRequest {
                case_id: case.id,
                specialty_id: s.id,
                treatment_type_id: t.id,
                procedure_id: p.id,
                classified_by: "ai".into(),
                confidence: Some(0.8),
            },
        )
        .unwrap();

        Tree {
            case_id: case.id,
            specialty_id: s.id,
            treatment_type_id: t.id,
            procedure_id: p.id,
            rule_id: r.id,
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn procedure_cascade_removes_links_and_classification() {
        let mut conn = open_memory_database().unwrap();
        let tree = classified_tree(&mut conn);

        delete_procedure_cascade(&mut conn, &tree.procedure_id).unwrap();

        assert_eq!(count(&conn, "procedures"), 0);
        assert_eq!(count(&conn, "procedure_rules"), 0);
        assert!(get_case_classification(&conn, &tree.case_id).unwrap().is_none());
        // Parent nodes and the rule itself survive.
        assert_eq!(count(&conn, "treatment_types"), 1);
        assert_eq!(count(&conn, "rules"), 1);
    }

    #[test]
    fn specialty_cascade_clears_whole_subtree() {
        let mut conn = open_memory_database().unwrap();
        let tree = classified_tree(&mut conn);

        // Second branch under the same specialty, with links at every level.
        let t2 = create_treatment_type(&conn, &tree.specialty_id, "Interventional", None).unwrap();
        let p2 = create_procedure(&conn, &t2.id, "Angioplasty", None).unwrap();
        link_rule_to_specialty(&conn, &tree.specialty_id, &tree.rule_id).unwrap();
        link_rule_to_treatment_type(&conn, &t2.id, &tree.rule_id).unwrap();
        link_rule_to_procedure(&conn, &p2.id, &tree.rule_id).unwrap();

        delete_specialty_cascade(&mut conn, &tree.specialty_id).unwrap();

        for table in [
            "specialties",
            "treatment_types",
            "procedures",
            "specialty_rules",
            "treatment_type_rules",
            "procedure_rules",
            "case_classifications",
        ] {
            assert_eq!(count(&conn, table), 0, "{table} should be empty");
        }
        assert_eq!(count(&conn, "rules"), 1);
    }

    #[test]
    fn cascade_preserves_case_history() {
        let mut conn = open_memory_database().unwrap();
        let tree = classified_tree(&mut conn);

        let checks_before = list_rule_checks(&conn, &tree.case_id).unwrap();
        let activity_before = case_activity(&conn, &tree.case_id).unwrap().len();
        assert_eq!(checks_before.len(), 1);

        delete_specialty_cascade(&mut conn, &tree.specialty_id).unwrap();

        // Case, its checks (snapshots intact, back-reference now dangling),
        // and its activity log all survive.
        assert_eq!(count(&conn, "cases"), 1);
        let checks_after = list_rule_checks(&conn, &tree.case_id).unwrap();
        assert_eq!(checks_after.len(), 1);
        assert_eq!(checks_after[0].rule_title, "Referring ECG Attached");
        assert_eq!(checks_after[0].original_rule_id, Some(tree.rule_id));
        assert_eq!(case_activity(&conn, &tree.case_id).unwrap().len(), activity_before);
    }

    #[test]
    fn treatment_type_cascade_is_scoped_to_its_branch() {
        let mut conn = open_memory_database().unwrap();
        let tree = classified_tree(&mut conn);
        let t2 = create_treatment_type(&conn, &tree.specialty_id, "Interventional", None).unwrap();
        let p2 = create_procedure(&conn, &t2.id, "Angioplasty", None).unwrap();

        delete_treatment_type_cascade(&mut conn, &tree.treatment_type_id).unwrap();

        assert!(get_treatment_type(&conn, &t2.id).unwrap().is_some());
        assert!(get_procedure(&conn, &p2.id).unwrap().is_some());
        assert!(get_procedure(&conn, &tree.procedure_id).unwrap().is_none());
        assert!(get_case_classification(&conn, &tree.case_id).unwrap().is_none());
    }

    #[test]
    fn deleting_missing_node_rolls_back_with_not_found() {
        let mut conn = open_memory_database().unwrap();
        let err = delete_specialty_cascade(&mut conn, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }
}
