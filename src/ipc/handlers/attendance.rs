use super::accounts;
use crate::auth::Role;
use crate::calc::{self, AttendanceStatus, AttendanceSummary};
use crate::db;
use crate::events::{self, DomainEvent};
use crate::ipc::helpers::{conn_as, db_err, opt_str, params_object, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

struct LectureHead {
    teacher_id: String,
    batch_id: String,
    class_date: Option<String>,
    label: String,
}

fn load_lecture_head(conn: &Connection, lecture_id: &str) -> Result<LectureHead, HandlerErr> {
    conn.query_row(
        "SELECT l.teacher_id, l.batch_id, l.class_date, s.name, b.name, l.day, l.start_time
         FROM lectures l
         JOIN subjects s ON s.id = l.subject_id
         JOIN batches b ON b.id = l.batch_id
         WHERE l.id = ?",
        [lecture_id],
        |r| {
            let subject: String = r.get(3)?;
            let batch: String = r.get(4)?;
            let day: String = r.get(5)?;
            let start: String = r.get(6)?;
            Ok(LectureHead {
                teacher_id: r.get(0)?,
                batch_id: r.get(1)?,
                class_date: r.get(2)?,
                label: format!("{} ({}) {} {}", subject, batch, day, start),
            })
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))?
    .ok_or_else(|| HandlerErr::not_found("lecture not found"))
}

/// The lecture must belong to the logged-in teacher.
fn owned_lecture(conn: &Connection, teacher_id: &str, lecture_id: &str) -> Result<LectureHead, HandlerErr> {
    let head = load_lecture_head(conn, lecture_id)?;
    if head.teacher_id != teacher_id {
        return Err(HandlerErr::new("forbidden", "this lecture is not assigned to you"));
    }
    Ok(head)
}

#[derive(Debug, Clone)]
struct RosterEntry {
    student_id: String,
    name: String,
    enrollment_number: String,
    status: AttendanceStatus,
}

/// Approved students of the lecture's batch. Unmarked students read as absent.
fn roster(conn: &Connection, lecture_id: &str, batch_id: &str) -> Result<Vec<RosterEntry>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT u.id, u.first_name, u.last_name, sp.enrollment_number, ar.status
             FROM student_profiles sp
             JOIN users u ON u.id = sp.user_id
             LEFT JOIN attendance_records ar ON ar.student_id = u.id AND ar.lecture_id = ?1
             WHERE sp.batch_id = ?2 AND u.status = 'approved'
             ORDER BY u.first_name COLLATE NOCASE, u.last_name COLLATE NOCASE",
        )
        .map_err(db_err("db_query_failed"))?;
    stmt.query_map((lecture_id, batch_id), |r| {
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        let status: Option<String> = r.get(4)?;
        Ok(RosterEntry {
            student_id: r.get(0)?,
            name: format!("{} {}", first, last).trim().to_string(),
            enrollment_number: r.get(3)?,
            status: status
                .as_deref()
                .and_then(AttendanceStatus::parse)
                .unwrap_or(AttendanceStatus::Absent),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}

fn attendance_sheet(state: &AppState, params: &serde_json::Value) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Teacher)?;
    let lecture_id = required_str(params, "lectureId")?;
    let head = owned_lecture(conn, &session.user_id, &lecture_id)?;
    let rows: Vec<Value> = roster(conn, &lecture_id, &head.batch_id)?
        .into_iter()
        .map(|e| {
            json!({
                "studentId": e.student_id,
                "name": e.name,
                "enrollmentNumber": e.enrollment_number,
                "status": e.status.as_str()
            })
        })
        .collect();
    Ok(json!({
        "lectureId": lecture_id,
        "lecture": head.label,
        "date": head.class_date.unwrap_or_else(|| calc::today().to_string()),
        "students": rows
    }))
}

fn attendance_mark(state: &AppState, params: &serde_json::Value) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Teacher)?;
    let lecture_id = required_str(params, "lectureId")?;
    let marks_obj = params_object(params, "marks")?;
    let head = owned_lecture(conn, &session.user_id, &lecture_id)?;

    let mut marks: HashMap<&str, AttendanceStatus> = HashMap::new();
    for (student_id, v) in marks_obj {
        let status = v
            .as_str()
            .and_then(AttendanceStatus::parse)
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("status for {} must be present or absent", student_id))
            })?;
        marks.insert(student_id.as_str(), status);
    }

    let date = head
        .class_date
        .clone()
        .unwrap_or_else(|| calc::today().to_string());
    let entries = roster(conn, &lecture_id, &head.batch_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let mut statuses = Vec::with_capacity(entries.len());
    for entry in &entries {
        let status = marks
            .get(entry.student_id.as_str())
            .copied()
            .unwrap_or(AttendanceStatus::Absent);
        tx.execute(
            "INSERT INTO attendance_records(id, lecture_id, student_id, date, status, created_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(lecture_id, student_id) DO UPDATE SET
               status = excluded.status,
               date = excluded.date",
            (
                Uuid::new_v4().to_string(),
                &lecture_id,
                &entry.student_id,
                &date,
                status.as_str(),
                db::now_ts(),
            ),
        )
        .map_err(|e| {
            db_err("db_update_failed")(e).with_details(json!({ "table": "attendance_records" }))
        })?;
        statuses.push(status);
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;

    let summary = calc::attendance_summary(statuses);
    tracing::info!(
        lecture = %lecture_id,
        present = summary.present,
        total = summary.total,
        "attendance marked"
    );
    if let Some(teacher) = accounts::load_user(conn, &session.user_id)? {
        events::publish(
            conn,
            DomainEvent::AttendanceMarked {
                teacher: teacher.subject(),
                lecture: head.label.clone(),
                present: summary.present,
                total: summary.total,
            },
        );
    }
    Ok(json!({ "lectureId": lecture_id, "date": date, "summary": summary }))
}

fn record_rows(conn: &Connection, student_id: Option<&str>) -> Result<Vec<(Value, AttendanceStatus)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT ar.id, ar.lecture_id, ar.student_id, u.first_name, u.last_name, ar.date, ar.status,
                    s.name, b.name, l.day, l.start_time, l.end_time
             FROM attendance_records ar
             JOIN users u ON u.id = ar.student_id
             JOIN lectures l ON l.id = ar.lecture_id
             JOIN subjects s ON s.id = l.subject_id
             JOIN batches b ON b.id = l.batch_id
             WHERE (?1 IS NULL OR ar.student_id = ?1)
             ORDER BY ar.date DESC, ar.created_at DESC",
        )
        .map_err(db_err("db_query_failed"))?;
    stmt.query_map([student_id], |r| {
        let first: String = r.get(3)?;
        let last: String = r.get(4)?;
        let status_raw: String = r.get(6)?;
        let status = AttendanceStatus::parse(&status_raw).unwrap_or(AttendanceStatus::Absent);
        let id: String = r.get(0)?;
        let lecture_id: String = r.get(1)?;
        let student_id: String = r.get(2)?;
        let date: String = r.get(5)?;
        let subject: String = r.get(7)?;
        let batch: String = r.get(8)?;
        let day: String = r.get(9)?;
        let start: String = r.get(10)?;
        let end: String = r.get(11)?;
        Ok((
            json!({
                "id": id,
                "lectureId": lecture_id,
                "studentId": student_id,
                "studentName": format!("{} {}", first, last).trim().to_string(),
                "date": date,
                "status": status.as_str(),
                "subjectName": subject,
                "batchName": batch,
                "day": day,
                "startTime": start,
                "endTime": end
            }),
            status,
        ))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}

/// One student's records, newest first, with the present/absent summary.
pub fn student_attendance(conn: &Connection, student_id: &str) -> Result<(Vec<Value>, AttendanceSummary), HandlerErr> {
    let rows = record_rows(conn, Some(student_id))?;
    let summary = calc::attendance_summary(rows.iter().map(|(_, s)| *s));
    Ok((rows.into_iter().map(|(v, _)| v).collect(), summary))
}

fn attendance_list(state: &AppState, params: &serde_json::Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let student_id = opt_str(params, "studentId").filter(|s| !s.is_empty());
    let rows = record_rows(conn, student_id.as_deref())?;
    let summary = calc::attendance_summary(rows.iter().map(|(_, s)| *s));
    Ok(json!({
        "records": rows.into_iter().map(|(v, _)| v).collect::<Vec<_>>(),
        "summary": summary
    }))
}

fn students_attendance(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Student)?;
    let (records, summary) = student_attendance(conn, &session.user_id)?;
    Ok(json!({ "records": records, "summary": summary }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.sheet" => attendance_sheet(state, &req.params),
        "attendance.mark" => attendance_mark(state, &req.params),
        "attendance.list" => attendance_list(state, &req.params),
        "students.attendance" => students_attendance(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
