//! Catalog Store — the three-level clinical taxonomy (specialty →
//! treatment type → procedure) plus the shared pool of rules and the
//! many-to-many links between rules and any taxonomy level.
//!
//! Simple deletes refuse to orphan children; use `cascade` for subtree
//! removal. Rule links are junction rows, so linking is idempotent and
//! unlinking never touches the rule itself.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

// ═══════════════════════════════════════════
// Specialties
// ═══════════════════════════════════════════

pub fn create_specialty(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
) -> Result<Specialty, DatabaseError> {
    let now = chrono::Utc::now();
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO specialties (id, name, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id.to_string(), name, description, now.to_rfc3339()],
    )?;
    Ok(Specialty {
        id,
        name: name.to_string(),
        description: description.map(str::to_string),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_specialty(conn: &Connection, id: &Uuid) -> Result<Option<Specialty>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, name, description, created_at, updated_at
         FROM specialties WHERE id = ?1",
        params![id.to_string()],
        specialty_row,
    );
    match result {
        Ok(row) => Ok(Some(specialty_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_specialties(conn: &Connection) -> Result<Vec<Specialty>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, created_at, updated_at
         FROM specialties ORDER BY name",
    )?;
    let rows = stmt
        .query_map([], specialty_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(specialty_from_row).collect()
}

pub fn update_specialty(
    conn: &Connection,
    id: &Uuid,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE specialties SET
            name = COALESCE(?2, name),
            description = COALESCE(?3, description),
            updated_at = ?4
         WHERE id = ?1",
        params![id.to_string(), name, description, chrono::Utc::now().to_rfc3339()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("specialty", id));
    }
    Ok(())
}

/// Simple delete: refuses when treatment types still reference this
/// specialty. Rule links are unlinked (the rules themselves survive).
pub fn delete_specialty(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let children: i64 = conn.query_row(
        "SELECT COUNT(*) FROM treatment_types WHERE specialty_id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    if children > 0 {
        return Err(DatabaseError::ConstraintViolation(
            "Cannot delete specialty with existing treatment types. \
             Please delete or reassign treatment types first."
                .into(),
        ));
    }
    ensure_no_classifications(conn, "specialty", "specialty_id", id)?;
    conn.execute(
        "DELETE FROM specialty_rules WHERE specialty_id = ?1",
        params![id.to_string()],
    )?;
    let deleted = conn.execute(
        "DELETE FROM specialties WHERE id = ?1",
        params![id.to_string()],
    )?;
    if deleted == 0 {
        return Err(DatabaseError::not_found("specialty", id));
    }
    tracing::info!(specialty_id = %id, "Specialty deleted");
    Ok(())
}

// ═══════════════════════════════════════════
// Treatment types
// ═══════════════════════════════════════════

pub fn create_treatment_type(
    conn: &Connection,
    specialty_id: &Uuid,
    name: &str,
    description: Option<&str>,
) -> Result<TreatmentType, DatabaseError> {
    let now = chrono::Utc::now();
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO treatment_types (id, specialty_id, name, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            id.to_string(),
            specialty_id.to_string(),
            name,
            description,
            now.to_rfc3339(),
        ],
    )?;
    Ok(TreatmentType {
        id,
        specialty_id: *specialty_id,
        name: name.to_string(),
        description: description.map(str::to_string),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_treatment_type(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<TreatmentType>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, specialty_id, name, description, created_at, updated_at
         FROM treatment_types WHERE id = ?1",
        params![id.to_string()],
        treatment_type_row,
    );
    match result {
        Ok(row) => Ok(Some(treatment_type_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List treatment types, optionally scoped to one specialty. Ordered by name.
pub fn list_treatment_types(
    conn: &Connection,
    specialty_id: Option<&Uuid>,
) -> Result<Vec<TreatmentType>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, specialty_id, name, description, created_at, updated_at
         FROM treatment_types
         WHERE (?1 IS NULL OR specialty_id = ?1)
         ORDER BY name",
    )?;
    let rows = stmt
        .query_map(params![specialty_id.map(Uuid::to_string)], treatment_type_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(treatment_type_from_row).collect()
}

pub fn update_treatment_type(
    conn: &Connection,
    id: &Uuid,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE treatment_types SET
            name = COALESCE(?2, name),
            description = COALESCE(?3, description),
            updated_at = ?4
         WHERE id = ?1",
        params![id.to_string(), name, description, chrono::Utc::now().to_rfc3339()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("treatment_type", id));
    }
    Ok(())
}

/// Simple delete: refuses when procedures still reference this treatment type.
pub fn delete_treatment_type(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let children: i64 = conn.query_row(
        "SELECT COUNT(*) FROM procedures WHERE treatment_type_id = ?1",
        params![id.to_string()],
        |row| row.get(0),
    )?;
    if children > 0 {
        return Err(DatabaseError::ConstraintViolation(
            "Cannot delete treatment type with existing procedures. \
             Please delete or reassign procedures first."
                .into(),
        ));
    }
    ensure_no_classifications(conn, "treatment type", "treatment_type_id", id)?;
    conn.execute(
        "DELETE FROM treatment_type_rules WHERE treatment_type_id = ?1",
        params![id.to_string()],
    )?;
    let deleted = conn.execute(
        "DELETE FROM treatment_types WHERE id = ?1",
        params![id.to_string()],
    )?;
    if deleted == 0 {
        return Err(DatabaseError::not_found("treatment_type", id));
    }
    tracing::info!(treatment_type_id = %id, "Treatment type deleted");
    Ok(())
}

// ═══════════════════════════════════════════
// Procedures
// ═══════════════════════════════════════════

pub fn create_procedure(
    conn: &Connection,
    treatment_type_id: &Uuid,
    name: &str,
    description: Option<&str>,
) -> Result<Procedure, DatabaseError> {
    let now = chrono::Utc::now();
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO procedures (id, treatment_type_id, name, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            id.to_string(),
            treatment_type_id.to_string(),
            name,
            description,
            now.to_rfc3339(),
        ],
    )?;
    Ok(Procedure {
        id,
        treatment_type_id: *treatment_type_id,
        name: name.to_string(),
        description: description.map(str::to_string),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_procedure(conn: &Connection, id: &Uuid) -> Result<Option<Procedure>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, treatment_type_id, name, description, created_at, updated_at
         FROM procedures WHERE id = ?1",
        params![id.to_string()],
        procedure_row,
    );
    match result {
        Ok(row) => Ok(Some(procedure_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// List procedures, optionally scoped to one treatment type. Ordered by name.
pub fn list_procedures(
    conn: &Connection,
    treatment_type_id: Option<&Uuid>,
) -> Result<Vec<Procedure>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, treatment_type_id, name, description, created_at, updated_at
         FROM procedures
         WHERE (?1 IS NULL OR treatment_type_id = ?1)
         ORDER BY name",
    )?;
    let rows = stmt
        .query_map(params![treatment_type_id.map(Uuid::to_string)], procedure_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(procedure_from_row).collect()
}

pub fn update_procedure(
    conn: &Connection,
    id: &Uuid,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE procedures SET
            name = COALESCE(?2, name),
            description = COALESCE(?3, description),
            updated_at = ?4
         WHERE id = ?1",
        params![id.to_string(), name, description, chrono::Utc::now().to_rfc3339()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("procedure", id));
    }
    Ok(())
}

/// Simple delete. Unlinks the procedure's rules; refuses while case
/// classifications still point at the procedure (use the cascade variant
/// for those).
pub fn delete_procedure(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    ensure_no_classifications(conn, "procedure", "procedure_id", id)?;
    conn.execute(
        "DELETE FROM procedure_rules WHERE procedure_id = ?1",
        params![id.to_string()],
    )?;
    let deleted = conn.execute(
        "DELETE FROM procedures WHERE id = ?1",
        params![id.to_string()],
    )?;
    if deleted == 0 {
        return Err(DatabaseError::not_found("procedure", id));
    }
    tracing::info!(procedure_id = %id, "Procedure deleted");
    Ok(())
}

// ═══════════════════════════════════════════
// Rules
// ═══════════════════════════════════════════

pub fn create_rule(
    conn: &Connection,
    title: &str,
    description: &str,
    created_by: Option<&str>,
) -> Result<Rule, DatabaseError> {
    let now = chrono::Utc::now();
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO rules (id, title, description, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id.to_string(), title, description, created_by, now.to_rfc3339()],
    )?;
    Ok(Rule {
        id,
        title: title.to_string(),
        description: description.to_string(),
        created_by: created_by.map(str::to_string),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_rule(conn: &Connection, id: &Uuid) -> Result<Option<Rule>, DatabaseError> {
    let result = conn.query_row(
        "SELECT id, title, description, created_by, created_at, updated_at
         FROM rules WHERE id = ?1",
        params![id.to_string()],
        rule_row,
    );
    match result {
        Ok(row) => Ok(Some(rule_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn list_rules(conn: &Connection) -> Result<Vec<Rule>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, title, description, created_by, created_at, updated_at
         FROM rules ORDER BY title",
    )?;
    let rows = stmt.query_map([], rule_row)?.collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(rule_from_row).collect()
}

pub fn update_rule(
    conn: &Connection,
    id: &Uuid,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE rules SET
            title = COALESCE(?2, title),
            description = COALESCE(?3, description),
            updated_at = ?4
         WHERE id = ?1",
        params![id.to_string(), title, description, chrono::Utc::now().to_rfc3339()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::not_found("rule", id));
    }
    Ok(())
}

/// Delete a rule and its junction rows at every taxonomy level. Existing
/// rule checks keep their snapshots; their `original_rule_id` now dangles,
/// which is accepted.
pub fn delete_rule(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    let id_s = id.to_string();
    conn.execute("DELETE FROM specialty_rules WHERE rule_id = ?1", params![id_s])?;
    conn.execute(
        "DELETE FROM treatment_type_rules WHERE rule_id = ?1",
        params![id_s],
    )?;
    conn.execute("DELETE FROM procedure_rules WHERE rule_id = ?1", params![id_s])?;
    let deleted = conn.execute("DELETE FROM rules WHERE id = ?1", params![id_s])?;
    if deleted == 0 {
        return Err(DatabaseError::not_found("rule", id));
    }
    tracing::info!(rule_id = %id, "Rule deleted");
    Ok(())
}

// ═══════════════════════════════════════════
// Rule junctions
// ═══════════════════════════════════════════

/// Link a rule to a specialty. Idempotent — relinking is a no-op.
pub fn link_rule_to_specialty(
    conn: &Connection,
    specialty_id: &Uuid,
    rule_id: &Uuid,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO specialty_rules (specialty_id, rule_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![
            specialty_id.to_string(),
            rule_id.to_string(),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn unlink_rule_from_specialty(
    conn: &Connection,
    specialty_id: &Uuid,
    rule_id: &Uuid,
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM specialty_rules WHERE specialty_id = ?1 AND rule_id = ?2",
        params![specialty_id.to_string(), rule_id.to_string()],
    )?;
    Ok(())
}

pub fn link_rule_to_treatment_type(
    conn: &Connection,
    treatment_type_id: &Uuid,
    rule_id: &Uuid,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO treatment_type_rules (treatment_type_id, rule_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![
            treatment_type_id.to_string(),
            rule_id.to_string(),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn unlink_rule_from_treatment_type(
    conn: &Connection,
    treatment_type_id: &Uuid,
    rule_id: &Uuid,
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM treatment_type_rules WHERE treatment_type_id = ?1 AND rule_id = ?2",
        params![treatment_type_id.to_string(), rule_id.to_string()],
    )?;
    Ok(())
}

pub fn link_rule_to_procedure(
    conn: &Connection,
    procedure_id: &Uuid,
    rule_id: &Uuid,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO procedure_rules (procedure_id, rule_id, created_at)
         VALUES (?1, ?2, ?3)",
        params![
            procedure_id.to_string(),
            rule_id.to_string(),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn unlink_rule_from_procedure(
    conn: &Connection,
    procedure_id: &Uuid,
    rule_id: &Uuid,
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM procedure_rules WHERE procedure_id = ?1 AND rule_id = ?2",
        params![procedure_id.to_string(), rule_id.to_string()],
    )?;
    Ok(())
}

/// Rules linked to a specialty, ordered by title.
pub fn rules_for_specialty(
    conn: &Connection,
    specialty_id: &Uuid,
) -> Result<Vec<Rule>, DatabaseError> {
    rules_via_junction(conn, "specialty_rules", "specialty_id", specialty_id)
}

/// Rules linked to a treatment type, ordered by title.
pub fn rules_for_treatment_type(
    conn: &Connection,
    treatment_type_id: &Uuid,
) -> Result<Vec<Rule>, DatabaseError> {
    rules_via_junction(conn, "treatment_type_rules", "treatment_type_id", treatment_type_id)
}

/// Rules linked to a procedure, ordered by title. This is the set the
/// classification engine materializes rule checks from.
pub fn rules_for_procedure(
    conn: &Connection,
    procedure_id: &Uuid,
) -> Result<Vec<Rule>, DatabaseError> {
    rules_via_junction(conn, "procedure_rules", "procedure_id", procedure_id)
}

/// Simple deletes refuse while case classifications still reference the
/// node; the cascade module handles that removal deliberately.
fn ensure_no_classifications(
    conn: &Connection,
    node_kind: &str,
    node_column: &str,
    id: &Uuid,
) -> Result<(), DatabaseError> {
    // Column name comes from the three delete functions, never from input.
    let sql =
        format!("SELECT COUNT(*) FROM case_classifications WHERE {node_column} = ?1");
    let referencing: i64 = conn.query_row(&sql, params![id.to_string()], |row| row.get(0))?;
    if referencing > 0 {
        return Err(DatabaseError::ConstraintViolation(format!(
            "Cannot delete {node_kind} referenced by {referencing} case classification(s). \
             Use the cascade delete to remove them."
        )));
    }
    Ok(())
}

fn rules_via_junction(
    conn: &Connection,
    junction: &str,
    node_column: &str,
    node_id: &Uuid,
) -> Result<Vec<Rule>, DatabaseError> {
    // Table/column names come from the three callers above, never from input.
    let sql = format!(
        "SELECT r.id, r.title, r.description, r.created_by, r.created_at, r.updated_at
         FROM rules r
         JOIN {junction} j ON j.rule_id = r.id
         WHERE j.{node_column} = ?1
         ORDER BY r.title",
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![node_id.to_string()], rule_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(rule_from_row).collect()
}

// ═══════════════════════════════════════════
// Hierarchy view
// ═══════════════════════════════════════════

/// The full taxonomy tree, ordered by name at every level.
pub fn specialty_hierarchy(conn: &Connection) -> Result<Vec<SpecialtyNode>, DatabaseError> {
    let specialties = list_specialties(conn)?;
    let mut result = Vec::with_capacity(specialties.len());

    for specialty in specialties {
        let treatment_types = list_treatment_types(conn, Some(&specialty.id))?;
        let mut nodes = Vec::with_capacity(treatment_types.len());
        for treatment_type in treatment_types {
            let procedures = list_procedures(conn, Some(&treatment_type.id))?;
            nodes.push(TreatmentTypeNode {
                treatment_type,
                procedures,
            });
        }
        result.push(SpecialtyNode {
            specialty,
            treatment_types: nodes,
        });
    }

    Ok(result)
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

struct NodeRow {
    id: String,
    parent_id: Option<String>,
    name: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

fn specialty_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok(NodeRow {
        id: row.get(0)?,
        parent_id: None,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn treatment_type_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRow> {
    Ok(NodeRow {
        id: row.get(0)?,
        parent_id: Some(row.get(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

// Same column layout as treatment types.
use self::treatment_type_row as procedure_row;

fn specialty_from_row(row: NodeRow) -> Result<Specialty, DatabaseError> {
    Ok(Specialty {
        id: parse_uuid(&row.id)?,
        name: row.name,
        description: row.description,
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    })
}

fn treatment_type_from_row(row: NodeRow) -> Result<TreatmentType, DatabaseError> {
    let parent = row
        .parent_id
        .as_deref()
        .ok_or_else(|| DatabaseError::ConstraintViolation("treatment type without specialty".into()))?;
    Ok(TreatmentType {
        id: parse_uuid(&row.id)?,
        specialty_id: parse_uuid(parent)?,
        name: row.name,
        description: row.description,
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    })
}

fn procedure_from_row(row: NodeRow) -> Result<Procedure, DatabaseError> {
    let parent = row
        .parent_id
        .as_deref()
        .ok_or_else(|| DatabaseError::ConstraintViolation("procedure without treatment type".into()))?;
    Ok(Procedure {
        id: parse_uuid(&row.id)?,
        treatment_type_id: parse_uuid(parent)?,
        name: row.name,
        description: row.description,
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    })
}

struct RuleRow {
    id: String,
    title: String,
    description: String,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

fn rule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RuleRow> {
    Ok(RuleRow {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn rule_from_row(row: RuleRow) -> Result<Rule, DatabaseError> {
    Ok(Rule {
        id: parse_uuid(&row.id)?,
        title: row.title,
        description: row.description,
        created_by: row.created_by,
        created_at: parse_ts(&row.created_at),
        updated_at: parse_ts(&row.updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    #[test]
    fn specialties_list_ordered_by_name() {
        let conn = open_memory_database().unwrap();
        create_specialty(&conn, "Ophthalmology", None).unwrap();
        create_specialty(&conn, "Cardiology", Some("Heart")).unwrap();

        let all = list_specialties(&conn).unwrap();
        let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Cardiology", "Ophthalmology"]);
    }

    #[test]
    fn update_patches_only_given_fields() {
        let conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Cardiology", Some("Heart")).unwrap();

        update_specialty(&conn, &s.id, None, Some("Heart and vessels")).unwrap();

        let got = get_specialty(&conn, &s.id).unwrap().unwrap();
        assert_eq!(got.name, "Cardiology");
        assert_eq!(got.description.as_deref(), Some("Heart and vessels"));
    }

    #[test]
    fn simple_delete_blocked_by_children() {
        let conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Cardiology", None).unwrap();
        create_treatment_type(&conn, &s.id, "Diagnostics", None).unwrap();

        let err = delete_specialty(&conn, &s.id).unwrap_err();
        match err {
            DatabaseError::ConstraintViolation(msg) => {
                assert!(msg.contains("treatment types"), "message names child type: {msg}");
            }
            other => panic!("expected ConstraintViolation, got {other:?}"),
        }
        assert!(get_specialty(&conn, &s.id).unwrap().is_some());
    }

    #[test]
    fn simple_delete_of_childless_node_succeeds() {
        let conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Cardiology", None).unwrap();
        let t = create_treatment_type(&conn, &s.id, "Diagnostics", None).unwrap();

        delete_treatment_type(&conn, &t.id).unwrap();
        delete_specialty(&conn, &s.id).unwrap();
        assert!(list_specialties(&conn).unwrap().is_empty());
    }

    #[test]
    fn simple_delete_blocked_by_pointing_classification() {
        let mut conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Cardiology", None).unwrap();
        let t = create_treatment_type(&conn, &s.id, "Diagnostics", None).unwrap();
        let p = create_procedure(&conn, &t.id, "Stress Echocardiogram", None).unwrap();
        let case = crate::cases::create_case(
            &conn,
            &crate::models::NewCase {
                referral_source: "fax".into(),
                priority: None,
                notes: None,
                patient_id: None,
            },
        )
        .unwrap();
        crate::classification::classify_case(
            &mut conn,
            &crate::models::ClassifyRequest {
                case_id: case.id,
                specialty_id: s.id,
                treatment_type_id: t.id,
                procedure_id: p.id,
                classified_by: "ai".into(),
                confidence: None,
            },
        )
        .unwrap();

        let err = delete_procedure(&conn, &p.id).unwrap_err();
        match err {
            DatabaseError::ConstraintViolation(msg) => {
                assert!(msg.contains("classification"), "message names the blocker: {msg}");
            }
            other => panic!("expected ConstraintViolation, got {other:?}"),
        }
        assert!(get_procedure(&conn, &p.id).unwrap().is_some());

        // The whole branch is pinned the same way.
        assert!(matches!(
            delete_treatment_type(&conn, &t.id).unwrap_err(),
            DatabaseError::ConstraintViolation(_)
        ));

        // Cascade clears the classification and unblocks the simple path.
        crate::cascade::delete_procedure_cascade(&mut conn, &p.id).unwrap();
        delete_treatment_type(&conn, &t.id).unwrap();
        delete_specialty(&conn, &s.id).unwrap();
    }

    #[test]
    fn delete_missing_node_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = delete_procedure(&conn, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn rule_linking_is_idempotent() {
        let conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Cardiology", None).unwrap();
        let t = create_treatment_type(&conn, &s.id, "Surgery", None).unwrap();
        let p = create_procedure(&conn, &t.id, "Bypass", None).unwrap();
        let r = create_rule(&conn, "Prior Authorization Required", "Payer must approve", None).unwrap();

        link_rule_to_procedure(&conn, &p.id, &r.id).unwrap();
        link_rule_to_procedure(&conn, &p.id, &r.id).unwrap();

        assert_eq!(rules_for_procedure(&conn, &p.id).unwrap().len(), 1);
    }

    #[test]
    fn rule_may_link_at_multiple_levels() {
        let conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Cardiology", None).unwrap();
        let t = create_treatment_type(&conn, &s.id, "Surgery", None).unwrap();
        let p = create_procedure(&conn, &t.id, "Bypass", None).unwrap();
        let r = create_rule(&conn, "Referral Letter", "Letter on file", None).unwrap();

        link_rule_to_specialty(&conn, &s.id, &r.id).unwrap();
        link_rule_to_treatment_type(&conn, &t.id, &r.id).unwrap();
        link_rule_to_procedure(&conn, &p.id, &r.id).unwrap();

        assert_eq!(rules_for_specialty(&conn, &s.id).unwrap().len(), 1);
        assert_eq!(rules_for_treatment_type(&conn, &t.id).unwrap().len(), 1);
        assert_eq!(rules_for_procedure(&conn, &p.id).unwrap().len(), 1);
    }

    #[test]
    fn unlink_leaves_rule_intact() {
        let conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Cardiology", None).unwrap();
        let t = create_treatment_type(&conn, &s.id, "Surgery", None).unwrap();
        let p = create_procedure(&conn, &t.id, "Bypass", None).unwrap();
        let r = create_rule(&conn, "Consent Form", "Signed consent", None).unwrap();
        link_rule_to_procedure(&conn, &p.id, &r.id).unwrap();

        unlink_rule_from_procedure(&conn, &p.id, &r.id).unwrap();

        assert!(rules_for_procedure(&conn, &p.id).unwrap().is_empty());
        assert!(get_rule(&conn, &r.id).unwrap().is_some());
    }

    #[test]
    fn delete_rule_removes_junctions_everywhere() {
        let conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Cardiology", None).unwrap();
        let t = create_treatment_type(&conn, &s.id, "Surgery", None).unwrap();
        let p = create_procedure(&conn, &t.id, "Bypass", None).unwrap();
        let r = create_rule(&conn, "Imaging Report", "Recent imaging attached", None).unwrap();
        link_rule_to_specialty(&conn, &s.id, &r.id).unwrap();
        link_rule_to_procedure(&conn, &p.id, &r.id).unwrap();

        delete_rule(&conn, &r.id).unwrap();

        assert!(get_rule(&conn, &r.id).unwrap().is_none());
        assert!(rules_for_specialty(&conn, &s.id).unwrap().is_empty());
        assert!(rules_for_procedure(&conn, &p.id).unwrap().is_empty());
    }

    #[test]
    fn hierarchy_nests_three_levels_ordered() {
        let conn = open_memory_database().unwrap();
        let s = create_specialty(&conn, "Ophthalmology", None).unwrap();
        let t = create_treatment_type(&conn, &s.id, "Surgery", None).unwrap();
        create_procedure(&conn, &t.id, "Vitrectomy", None).unwrap();
        create_procedure(&conn, &t.id, "Trabeculectomy", None).unwrap();

        let tree = specialty_hierarchy(&conn).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].treatment_types.len(), 1);
        let names: Vec<_> = tree[0].treatment_types[0]
            .procedures
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Trabeculectomy", "Vitrectomy"]);
    }
}
