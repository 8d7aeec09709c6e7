use super::accounts::{self, USER_PATCH_KEYS};
use super::attendance;
use super::profiles::{
    self, StudentProfile, STATUS_APPROVED, STATUS_PENDING, STUDENT_FEE_KEYS, STUDENT_PROFILE_KEYS,
};
use super::timetable::{self, LectureFilter};
use crate::auth::{AccountStatus, Role};
use crate::calc;
use crate::events::{self, DomainEvent};
use crate::ipc::helpers::{conn_as, db_err, opt_str, params_object, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn profile_json(conn: &Connection, profile: Option<&StudentProfile>) -> Result<Value, HandlerErr> {
    match profile {
        Some(p) => p.to_json(conn),
        None => Ok(Value::Null),
    }
}

fn own_profile(conn: &Connection, user_id: &str) -> Result<StudentProfile, HandlerErr> {
    profiles::load_student_profile(conn, user_id)?
        .ok_or_else(|| HandlerErr::new("profile_incomplete", "complete your profile first"))
}

fn students_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let search = opt_str(params, "search");
    let users = accounts::list_approved(
        conn,
        Role::Student,
        "student_profiles",
        "enrollment_number",
        search.as_deref(),
    )?;
    let mut out = Vec::with_capacity(users.len());
    for user in &users {
        let profile = profiles::load_student_profile(conn, &user.id)?;
        out.push(json!({
            "user": user.to_json(),
            "profile": profile_json(conn, profile.as_ref())?
        }));
    }
    Ok(json!({ "students": out }))
}

fn students_add(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user = accounts::parse_new_user(params)?;
    let profile_input = match params.get("profile") {
        Some(Value::Object(obj)) => Some(profiles::parse_student_input(obj, true)?),
        Some(Value::Null) | None => None,
        Some(_) => return Err(HandlerErr::bad_params("profile must be an object")),
    };
    accounts::check_new_user(conn, &user, Role::Student)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let id = accounts::insert_user(&tx, &user, Role::Student, AccountStatus::Approved)?;
    if let Some(input) = &profile_input {
        profiles::save_student_profile(&tx, &id, None, input, STATUS_APPROVED)?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(username = %user.username, "student added");
    Ok(json!({ "userId": id }))
}

fn students_complete_profile(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user_id = required_str(params, "userId")?;
    let obj = params_object(params, "profile")?;
    profiles::check_known_keys(obj, &[&STUDENT_PROFILE_KEYS, &STUDENT_FEE_KEYS])?;
    let input = profiles::parse_student_input(obj, true)?;
    accounts::require_user(conn, &user_id, Role::Student)?;
    if profiles::load_student_profile(conn, &user_id)?.is_some() {
        return Err(HandlerErr::conflict("student profile already exists"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    profiles::save_student_profile(&tx, &user_id, None, &input, STATUS_APPROVED)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    let profile = profiles::load_student_profile(conn, &user_id)?;
    Ok(json!({ "profile": profile_json(conn, profile.as_ref())? }))
}

fn students_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user_id = required_str(params, "userId")?;
    let patch = params_object(params, "patch")?;
    profiles::check_known_keys(patch, &[&USER_PATCH_KEYS, &STUDENT_PROFILE_KEYS, &STUDENT_FEE_KEYS])?;

    // Parse everything up front: a malformed field rejects the whole update.
    let user_patch = accounts::parse_user_patch(patch)?;
    let input = profiles::parse_student_input(patch, true)?;
    let touches_profile = patch
        .keys()
        .any(|k| STUDENT_PROFILE_KEYS.contains(&k.as_str()) || STUDENT_FEE_KEYS.contains(&k.as_str()));
    let touches_fees = input.total_fees.is_some() || input.fees_paid.is_some();

    let user = accounts::require_user(conn, &user_id, Role::Student)?;
    let existing = profiles::load_student_profile(conn, &user_id)?;
    if touches_profile && existing.is_none() {
        return Err(HandlerErr::new(
            "profile_incomplete",
            "student has no profile; use students.completeProfile",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    accounts::write_user_patch(&tx, &user, &user_patch)?;
    if let (true, Some(cur)) = (touches_profile, existing.as_ref()) {
        profiles::save_student_profile(&tx, &user_id, Some(cur), &input, &cur.status)?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;

    let profile = profiles::load_student_profile(conn, &user_id)?;
    if let (true, Some(p)) = (touches_fees, profile.as_ref()) {
        tracing::info!(student = %user.username, total = p.total_fees, paid = p.fees_paid, "fees updated");
        events::publish(
            conn,
            DomainEvent::FeesUpdated {
                student: user.subject(),
                total: p.total_fees,
                paid: p.fees_paid,
            },
        );
    }
    let user = accounts::require_user(conn, &user_id, Role::Student)?;
    Ok(json!({
        "user": user.to_json(),
        "profile": profile_json(conn, profile.as_ref())?
    }))
}

fn students_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user_id = required_str(params, "userId")?;
    let user = accounts::require_user(conn, &user_id, Role::Student)?;
    accounts::delete_user_with(
        conn,
        &user_id,
        &[
            (
                "attendance_records",
                "DELETE FROM attendance_records WHERE student_id = ?1",
            ),
            ("student_subjects", "DELETE FROM student_subjects WHERE user_id = ?1"),
            ("student_profiles", "DELETE FROM student_profiles WHERE user_id = ?1"),
        ],
    )?;
    tracing::info!(username = %user.username, "student deleted");
    Ok(json!({ "deleted": true }))
}

fn students_profile_get(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Student)?;
    let user = accounts::require_user(conn, &session.user_id, Role::Student)?;
    let profile = profiles::load_student_profile(conn, &session.user_id)?;
    Ok(json!({
        "user": user.to_json(),
        "profile": profile_json(conn, profile.as_ref())?
    }))
}

/// Creates or edits the student's own profile and queues it for review.
fn students_profile_submit(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Student)?;
    let obj = params_object(params, "profile")?;
    profiles::check_known_keys(obj, &[&USER_PATCH_KEYS, &STUDENT_PROFILE_KEYS, &STUDENT_FEE_KEYS])?;
    let user_patch = accounts::parse_user_patch(obj)?;
    let input = profiles::parse_student_input(obj, false)?;

    let user = accounts::require_user(conn, &session.user_id, Role::Student)?;
    let existing = profiles::load_student_profile(conn, &user.id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    accounts::write_user_patch(&tx, &user, &user_patch)?;
    profiles::save_student_profile(&tx, &user.id, existing.as_ref(), &input, STATUS_PENDING)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    tracing::info!(student = %user.username, "profile submitted for review");
    events::publish(conn, DomainEvent::ProfileUpdate(user.subject()));
    let profile = profiles::load_student_profile(conn, &user.id)?;
    Ok(json!({
        "profile": profile_json(conn, profile.as_ref())?,
        "message": "Profile updated successfully! Waiting for admin approval..."
    }))
}

fn students_fees(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Student)?;
    let p = own_profile(conn, &session.user_id)?;
    Ok(json!({ "fees": calc::balance(p.total_fees, p.fees_paid) }))
}

fn students_dashboard(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Student)?;
    let p = own_profile(conn, &session.user_id)?;
    let lectures = match p.batch_id.as_deref() {
        Some(batch_id) => timetable::query_lectures(
            conn,
            &LectureFilter {
                batch_id: Some(batch_id),
                limit: Some(10),
                ..Default::default()
            },
        )?,
        None => Vec::new(),
    };
    let (_, summary) = attendance::student_attendance(conn, &session.user_id)?;
    Ok(json!({
        "profile": p.to_json(conn)?,
        "lectures": lectures,
        "attendance": summary
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, &req.params),
        "students.add" => students_add(state, &req.params),
        "students.completeProfile" => students_complete_profile(state, &req.params),
        "students.update" => students_update(state, &req.params),
        "students.delete" => students_delete(state, &req.params),
        "students.profile.get" => students_profile_get(state),
        "students.profile.submit" => students_profile_submit(state, &req.params),
        "students.fees" => students_fees(state),
        "students.dashboard" => students_dashboard(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
