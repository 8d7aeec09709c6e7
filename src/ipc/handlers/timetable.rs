use super::accounts;
use super::profiles;
use crate::auth::{AccountStatus, Role};
use crate::calc;
use crate::db;
use crate::ipc::helpers::{
    conn_as, count, db_conn, db_err, exists, opt_str, params_object, parse_date, require_session,
    required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, LectureSlot, ScheduleError, Weekday};
use crate::setup::{self, TimetableRules};
use chrono::{NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::{json, Map, Value};
use uuid::Uuid;

const LECTURE_SELECT: &str = "SELECT l.id, l.teacher_id, u.first_name, u.last_name, l.subject_id, s.name,
        l.batch_id, b.name, l.day, l.start_time, l.end_time, l.class_date, l.topic
 FROM lectures l
 JOIN users u ON u.id = l.teacher_id
 JOIN subjects s ON s.id = l.subject_id
 JOIN batches b ON b.id = l.batch_id";

const WEEK_ORDER: &str = "CASE l.day
   WHEN 'Monday' THEN 0 WHEN 'Tuesday' THEN 1 WHEN 'Wednesday' THEN 2
   WHEN 'Thursday' THEN 3 WHEN 'Friday' THEN 4 WHEN 'Saturday' THEN 5 ELSE 6 END";

#[derive(Default)]
pub struct LectureFilter<'a> {
    pub batch_id: Option<&'a str>,
    pub teacher_id: Option<&'a str>,
    pub day: Option<Weekday>,
    pub limit: Option<i64>,
}

fn lecture_json(r: &rusqlite::Row) -> rusqlite::Result<Value> {
    let id: String = r.get(0)?;
    let teacher_id: String = r.get(1)?;
    let first: String = r.get(2)?;
    let last: String = r.get(3)?;
    let subject_id: String = r.get(4)?;
    let subject_name: String = r.get(5)?;
    let batch_id: String = r.get(6)?;
    let batch_name: String = r.get(7)?;
    let day: String = r.get(8)?;
    let start: String = r.get(9)?;
    let end: String = r.get(10)?;
    let class_date: Option<String> = r.get(11)?;
    let topic: String = r.get(12)?;
    let teacher_name = format!("{} {}", first, last).trim().to_string();
    Ok(json!({
        "id": id,
        "teacherId": teacher_id,
        "teacherName": teacher_name,
        "subjectId": subject_id,
        "subjectName": subject_name,
        "batchId": batch_id,
        "batchName": batch_name,
        "day": day,
        "startTime": start,
        "endTime": end,
        "classDate": class_date,
        "topic": topic
    }))
}

/// Lectures ordered by weekday, then start time.
pub fn query_lectures(conn: &Connection, filter: &LectureFilter) -> Result<Vec<Value>, HandlerErr> {
    let sql = format!(
        "{}
         WHERE (?1 IS NULL OR l.batch_id = ?1)
           AND (?2 IS NULL OR l.teacher_id = ?2)
           AND (?3 IS NULL OR l.day = ?3)
         ORDER BY {}, l.start_time, l.id
         LIMIT ?4",
        LECTURE_SELECT, WEEK_ORDER
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    stmt.query_map(
        (
            filter.batch_id,
            filter.teacher_id,
            filter.day.map(|d| d.as_str()),
            filter.limit.unwrap_or(-1),
        ),
        lecture_json,
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}

pub fn lecture_by_id(conn: &Connection, lecture_id: &str) -> Result<Option<Value>, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE l.id = ?", LECTURE_SELECT),
        [lecture_id],
        lecture_json,
    )
    .optional()
    .map_err(db_err("db_query_failed"))
}

/// A lecture as written to storage.
#[derive(Debug, Clone)]
struct LectureRecord {
    id: Option<String>,
    teacher_id: String,
    subject_id: String,
    batch_id: String,
    day: Weekday,
    start: NaiveTime,
    end: NaiveTime,
    class_date: Option<NaiveDate>,
    topic: String,
}

impl LectureRecord {
    fn slot(&self) -> LectureSlot {
        LectureSlot {
            id: self.id.clone(),
            batch_id: self.batch_id.clone(),
            day: self.day,
            start: self.start,
            end: self.end,
        }
    }
}

fn load_record(conn: &Connection, lecture_id: &str) -> Result<Option<LectureRecord>, HandlerErr> {
    let raw = conn
        .query_row(
            "SELECT id, teacher_id, subject_id, batch_id, day, start_time, end_time, class_date, topic
             FROM lectures WHERE id = ?",
            [lecture_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, String>(8)?,
                ))
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    let Some((id, teacher_id, subject_id, batch_id, day, start, end, class_date, topic)) = raw else {
        return Ok(None);
    };
    let corrupt = |what: &str| HandlerErr::new("db_query_failed", format!("stored lecture has bad {}", what));
    Ok(Some(LectureRecord {
        id: Some(id),
        teacher_id,
        subject_id,
        batch_id,
        day: Weekday::parse(&day).ok_or_else(|| corrupt("day"))?,
        start: schedule::parse_time(&start).map_err(|_| corrupt("start_time"))?,
        end: schedule::parse_time(&end).map_err(|_| corrupt("end_time"))?,
        class_date: class_date
            .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
            .transpose()
            .map_err(|_| corrupt("class_date"))?,
        topic,
    }))
}

fn id_field(obj: &Map<String, Value>, key: &str, base: Option<&String>) -> Result<String, HandlerErr> {
    match obj.get(key) {
        Some(v) => v
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-empty string", key))),
        None => base
            .cloned()
            .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key))),
    }
}

fn time_field(obj: &Map<String, Value>, key: &str, base: Option<NaiveTime>) -> Result<NaiveTime, HandlerErr> {
    match obj.get(key) {
        Some(v) => v
            .as_str()
            .and_then(|s| schedule::parse_time(s).ok())
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be HH:MM or HH:MM:SS", key))),
        None => base.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key))),
    }
}

/// Overlays `obj` on `base` (or builds from scratch). When a class date is
/// set the weekday comes from it, and an explicit `day` must agree.
fn build_record(base: Option<&LectureRecord>, obj: &Map<String, Value>) -> Result<LectureRecord, HandlerErr> {
    let teacher_id = id_field(obj, "teacherId", base.map(|b| &b.teacher_id))?;
    let subject_id = id_field(obj, "subjectId", base.map(|b| &b.subject_id))?;
    let batch_id = id_field(obj, "batchId", base.map(|b| &b.batch_id))?;
    let start = time_field(obj, "startTime", base.map(|b| b.start))?;
    let end = time_field(obj, "endTime", base.map(|b| b.end))?;

    let class_date = match obj.get("classDate") {
        None => base.and_then(|b| b.class_date),
        Some(Value::Null) => None,
        Some(v) => Some(parse_date(v, "classDate")?),
    };
    let explicit_day = match obj.get("day") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_str().and_then(Weekday::parse).ok_or_else(|| {
            HandlerErr::bad_params("day must be one of Monday..Saturday")
        })?),
    };
    let day = match class_date {
        Some(date) => {
            let derived = Weekday::from_date(date)
                .ok_or_else(|| HandlerErr::validation("Lectures cannot be scheduled on a Sunday."))?;
            if let Some(d) = explicit_day {
                if d != derived {
                    return Err(HandlerErr::validation(format!(
                        "classDate {} falls on a {}, not {}.",
                        date,
                        derived.as_str(),
                        d.as_str()
                    )));
                }
            }
            derived
        }
        None => explicit_day
            .or(base.map(|b| b.day))
            .ok_or_else(|| HandlerErr::bad_params("missing day"))?,
    };
    let topic = match obj.get("topic") {
        None => base.map(|b| b.topic.clone()).unwrap_or_default(),
        Some(Value::Null) => String::new(),
        Some(v) => v
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| HandlerErr::bad_params("topic must be a string"))?,
    };

    Ok(LectureRecord {
        id: base.and_then(|b| b.id.clone()),
        teacher_id,
        subject_id,
        batch_id,
        day,
        start,
        end,
        class_date,
        topic,
    })
}

fn check_references(conn: &Connection, rec: &LectureRecord) -> Result<(), HandlerErr> {
    match accounts::load_user(conn, &rec.teacher_id)? {
        Some(u) if u.role == Role::Teacher && u.status == AccountStatus::Approved => {}
        Some(u) if u.role == Role::Teacher => {
            return Err(HandlerErr::validation("teacher account is not approved"))
        }
        _ => return Err(HandlerErr::not_found("teacher not found")),
    }
    if !exists(conn, "SELECT COUNT(*) FROM subjects WHERE id = ?", [&rec.subject_id])? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    if !exists(conn, "SELECT COUNT(*) FROM batches WHERE id = ?", [&rec.batch_id])? {
        return Err(HandlerErr::not_found("batch not found"));
    }
    Ok(())
}

fn check_working_time(rules: &TimetableRules, rec: &LectureRecord) -> Result<(), HandlerErr> {
    if !rules.allows_day(rec.day) {
        return Err(HandlerErr::validation(format!(
            "{} is not a working day.",
            rec.day.as_str()
        )));
    }
    if !rules.within_hours(rec.start, rec.end) {
        return Err(HandlerErr::validation(format!(
            "Lectures must fall within working hours {}.",
            rules.hours_label()
        )));
    }
    Ok(())
}

/// Overlap check against what is stored now, then the configured working time.
fn validate_record(conn: &Connection, rules: &TimetableRules, rec: &LectureRecord) -> Result<(), HandlerErr> {
    let existing = schedule::load_day_slots(conn, &rec.batch_id, rec.day, rec.id.as_deref())
        .map_err(db_err("db_query_failed"))?;
    if let Err(e) = schedule::validate(&rec.slot(), &existing) {
        if let ScheduleError::ScheduleConflict { conflicting_ids } = &e {
            tracing::warn!(
                batch = %rec.batch_id,
                day = rec.day.as_str(),
                conflicts = ?conflicting_ids,
                "lecture rejected: schedule conflict"
            );
        }
        return Err(e.into());
    }
    check_working_time(rules, rec)
}

fn write_record(conn: &Connection, rec: &LectureRecord) -> Result<String, HandlerErr> {
    let rules = setup::timetable_rules(conn);
    check_references(conn, rec)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(db_err("db_tx_failed"))?;
    validate_record(&tx, &rules, rec)?;

    let class_date = rec.class_date.map(|d| d.to_string());
    let id = match &rec.id {
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO lectures(id, teacher_id, subject_id, batch_id, day, start_time, end_time, class_date, topic, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    rec.teacher_id,
                    rec.subject_id,
                    rec.batch_id,
                    rec.day.as_str(),
                    schedule::format_time(rec.start),
                    schedule::format_time(rec.end),
                    class_date,
                    rec.topic,
                    db::now_ts(),
                ],
            )
            .map_err(db_err("db_insert_failed"))?;
            id
        }
        Some(id) => {
            tx.execute(
                "UPDATE lectures
                 SET teacher_id = ?, subject_id = ?, batch_id = ?, day = ?, start_time = ?,
                     end_time = ?, class_date = ?, topic = ?
                 WHERE id = ?",
                rusqlite::params![
                    rec.teacher_id,
                    rec.subject_id,
                    rec.batch_id,
                    rec.day.as_str(),
                    schedule::format_time(rec.start),
                    schedule::format_time(rec.end),
                    class_date,
                    rec.topic,
                    id,
                ],
            )
            .map_err(db_err("db_update_failed"))?;
            id.clone()
        }
    };
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(
        lecture = %id,
        batch = %rec.batch_id,
        day = rec.day.as_str(),
        start = %rec.start,
        end = %rec.end,
        "lecture saved"
    );
    Ok(id)
}

fn lectures_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    require_session(state)?;
    let batch_id = opt_str(params, "batchId");
    let teacher_id = opt_str(params, "teacherId");
    let day = match params.get("day").and_then(|v| v.as_str()) {
        Some(s) => Some(
            Weekday::parse(s).ok_or_else(|| HandlerErr::bad_params("day must be one of Monday..Saturday"))?,
        ),
        None => None,
    };
    let lectures = query_lectures(
        conn,
        &LectureFilter {
            batch_id: batch_id.as_deref(),
            teacher_id: teacher_id.as_deref(),
            day,
            limit: None,
        },
    )?;
    Ok(json!({ "lectures": lectures }))
}

fn lectures_open(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    require_session(state)?;
    let lecture_id = required_str(params, "lectureId")?;
    let lecture = lecture_by_id(conn, &lecture_id)?
        .ok_or_else(|| HandlerErr::not_found("lecture not found"))?;
    Ok(json!({ "lecture": lecture }))
}

fn lectures_create(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let input = params_object(params, "input")?;
    let rec = build_record(None, input)?;
    let id = write_record(conn, &rec)?;
    let lecture = lecture_by_id(conn, &id)?;
    Ok(json!({ "lectureId": id, "lecture": lecture }))
}

fn lectures_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let lecture_id = required_str(params, "lectureId")?;
    let patch = params_object(params, "patch")?;
    let base = load_record(conn, &lecture_id)?
        .ok_or_else(|| HandlerErr::not_found("lecture not found"))?;
    let rec = build_record(Some(&base), patch)?;
    write_record(conn, &rec)?;
    let lecture = lecture_by_id(conn, &lecture_id)?;
    Ok(json!({ "lectureId": lecture_id, "lecture": lecture }))
}

/// Runs the same checks as create/update without writing.
fn lectures_check(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let input = params_object(params, "input")?;
    let base = match opt_str(params, "lectureId") {
        Some(id) => Some(
            load_record(conn, &id)?.ok_or_else(|| HandlerErr::not_found("lecture not found"))?,
        ),
        None => None,
    };
    let rec = build_record(base.as_ref(), input)?;
    check_references(conn, &rec)?;
    let rules = setup::timetable_rules(conn);
    match validate_record(conn, &rules, &rec) {
        Ok(()) => Ok(json!({ "valid": true })),
        Err(e) => Ok(json!({
            "valid": false,
            "error": {
                "code": e.code,
                "message": e.message,
                "details": e.details
            }
        })),
    }
}

fn lectures_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let lecture_id = required_str(params, "lectureId")?;
    if !exists(conn, "SELECT COUNT(*) FROM lectures WHERE id = ?", [&lecture_id])? {
        return Err(HandlerErr::not_found("lecture not found"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let removed = tx
        .execute(
            "DELETE FROM attendance_records WHERE lecture_id = ?",
            [&lecture_id],
        )
        .map_err(|e| {
            db_err("db_delete_failed")(e).with_details(json!({ "table": "attendance_records" }))
        })?;
    tx.execute("DELETE FROM lectures WHERE id = ?", [&lecture_id])
        .map_err(|e| db_err("db_delete_failed")(e).with_details(json!({ "table": "lectures" })))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(lecture = %lecture_id, attendance_removed = removed, "lecture deleted");
    Ok(json!({ "deleted": true, "attendanceRemoved": removed }))
}

fn teachers_lectures(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Teacher)?;
    let lectures = query_lectures(
        conn,
        &LectureFilter {
            teacher_id: Some(&session.user_id),
            ..Default::default()
        },
    )?;
    Ok(json!({ "lectures": lectures }))
}

fn students_lectures(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Student)?;
    let profile = profiles::load_student_profile(conn, &session.user_id)?
        .ok_or_else(|| HandlerErr::new("profile_incomplete", "complete your profile first"))?;
    let lectures = match profile.batch_id.as_deref() {
        Some(batch_id) => query_lectures(
            conn,
            &LectureFilter {
                batch_id: Some(batch_id),
                ..Default::default()
            },
        )?,
        None => Vec::new(),
    };
    Ok(json!({ "batchId": profile.batch_id, "lectures": lectures }))
}

fn teachers_dashboard(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Teacher)?;
    let total = count(
        conn,
        "SELECT COUNT(*) FROM lectures WHERE teacher_id = ?",
        [&session.user_id],
    )?;
    let today = calc::today();
    let todays = match Weekday::from_date(today) {
        Some(day) => query_lectures(
            conn,
            &LectureFilter {
                teacher_id: Some(&session.user_id),
                day: Some(day),
                ..Default::default()
            },
        )?,
        None => Vec::new(),
    };
    let profile = match profiles::load_teacher_profile(conn, &session.user_id)? {
        Some(p) => p.to_json(conn)?,
        None => Value::Null,
    };
    Ok(json!({
        "date": today.to_string(),
        "totalLectures": total,
        "todayLectures": todays,
        "profile": profile
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "lectures.list" => lectures_list(state, &req.params),
        "lectures.open" => lectures_open(state, &req.params),
        "lectures.create" => lectures_create(state, &req.params),
        "lectures.update" => lectures_update(state, &req.params),
        "lectures.check" => lectures_check(state, &req.params),
        "lectures.delete" => lectures_delete(state, &req.params),
        "teachers.lectures" => teachers_lectures(state),
        "students.lectures" => students_lectures(state),
        "teachers.dashboard" => teachers_dashboard(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
