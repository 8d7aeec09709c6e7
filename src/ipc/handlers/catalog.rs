use crate::auth::Role;
use crate::ipc::helpers::{conn_as, db_conn, db_err, exists, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Clone, Copy)]
enum Catalog {
    Subjects,
    Batches,
}

impl Catalog {
    fn table(self) -> &'static str {
        match self {
            Catalog::Subjects => "subjects",
            Catalog::Batches => "batches",
        }
    }

    fn lecture_column(self) -> &'static str {
        match self {
            Catalog::Subjects => "subject_id",
            Catalog::Batches => "batch_id",
        }
    }

    fn duplicate_message(self) -> &'static str {
        match self {
            Catalog::Subjects => "This subject already exists.",
            Catalog::Batches => "This batch already exists.",
        }
    }

    fn missing_message(self) -> &'static str {
        match self {
            Catalog::Subjects => "subject not found",
            Catalog::Batches => "batch not found",
        }
    }
}

fn catalog_list(state: &AppState, catalog: Catalog) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let sql = match catalog {
        Catalog::Subjects => {
            "SELECT s.id, s.name,
               (SELECT COUNT(*) FROM lectures l WHERE l.subject_id = s.id) AS lecture_count,
               (SELECT COUNT(*) FROM teacher_subjects ts WHERE ts.subject_id = s.id) AS member_count
             FROM subjects s
             ORDER BY s.name COLLATE NOCASE"
        }
        Catalog::Batches => {
            "SELECT b.id, b.name,
               (SELECT COUNT(*) FROM lectures l WHERE l.batch_id = b.id) AS lecture_count,
               (SELECT COUNT(*) FROM student_profiles sp WHERE sp.batch_id = b.id) AS member_count
             FROM batches b
             ORDER BY b.name COLLATE NOCASE"
        }
    };
    let member_key = match catalog {
        Catalog::Subjects => "teacherCount",
        Catalog::Batches => "studentCount",
    };
    let mut stmt = conn.prepare(sql).map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let lecture_count: i64 = r.get(2)?;
            let member_count: i64 = r.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "lectureCount": lecture_count,
                member_key: member_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ catalog.table(): rows }))
}

fn catalog_create(state: &AppState, catalog: Catalog, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let name = required_str(params, "name")?;
    if exists(
        conn,
        &format!(
            "SELECT COUNT(*) FROM {} WHERE name = ? COLLATE NOCASE",
            catalog.table()
        ),
        [&name],
    )? {
        return Err(HandlerErr::conflict(catalog.duplicate_message()));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        &format!("INSERT INTO {}(id, name) VALUES(?, ?)", catalog.table()),
        (&id, &name),
    )
    .map_err(|e| {
        db_err("db_insert_failed")(e).with_details(json!({ "table": catalog.table() }))
    })?;
    tracing::info!(table = catalog.table(), name = %name, "catalog entry created");
    Ok(json!({ "id": id, "name": name }))
}

fn catalog_delete(state: &AppState, catalog: Catalog, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let id = required_str(params, "id")?;
    if !exists(
        conn,
        &format!("SELECT COUNT(*) FROM {} WHERE id = ?", catalog.table()),
        [&id],
    )? {
        return Err(HandlerErr::not_found(catalog.missing_message()));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;

    // Dependents first; foreign keys are enforced but never cascade.
    let mut steps: Vec<(&str, String)> = vec![
        (
            "attendance_records",
            format!(
                "DELETE FROM attendance_records
                 WHERE lecture_id IN (SELECT id FROM lectures WHERE {} = ?)",
                catalog.lecture_column()
            ),
        ),
        (
            "lectures",
            format!("DELETE FROM lectures WHERE {} = ?", catalog.lecture_column()),
        ),
    ];
    match catalog {
        Catalog::Subjects => {
            steps.push((
                "student_subjects",
                "DELETE FROM student_subjects WHERE subject_id = ?".into(),
            ));
            steps.push((
                "teacher_subjects",
                "DELETE FROM teacher_subjects WHERE subject_id = ?".into(),
            ));
        }
        Catalog::Batches => {
            steps.push((
                "student_profiles",
                "UPDATE student_profiles SET batch_id = NULL WHERE batch_id = ?".into(),
            ));
        }
    }
    steps.push((
        catalog.table(),
        format!("DELETE FROM {} WHERE id = ?", catalog.table()),
    ));

    for (table, sql) in &steps {
        tx.execute(sql, [&id]).map_err(|e| {
            db_err("db_delete_failed")(e).with_details(json!({ "table": table }))
        })?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(table = catalog.table(), id = %id, "catalog entry deleted");
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (catalog, op) = match req.method.split_once('.') {
        Some(("subjects", op)) => (Catalog::Subjects, op),
        Some(("batches", op)) => (Catalog::Batches, op),
        _ => return None,
    };
    let result = match op {
        "list" => catalog_list(state, catalog),
        "create" => catalog_create(state, catalog, &req.params),
        "delete" => catalog_delete(state, catalog, &req.params),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
