use super::accounts::{self, USER_PATCH_KEYS};
use super::profiles::{
    self, TeacherProfile, STATUS_APPROVED, STATUS_PENDING, TEACHER_PROFILE_KEYS,
    TEACHER_SALARY_KEYS,
};
use crate::auth::{AccountStatus, Role};
use crate::calc;
use crate::events::{self, DomainEvent};
use crate::ipc::helpers::{conn_as, db_err, opt_str, params_object, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn profile_json(conn: &Connection, profile: Option<&TeacherProfile>) -> Result<Value, HandlerErr> {
    match profile {
        Some(p) => p.to_json(conn),
        None => Ok(Value::Null),
    }
}

fn teachers_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let search = opt_str(params, "search");
    let users = accounts::list_approved(
        conn,
        Role::Teacher,
        "teacher_profiles",
        "employee_id",
        search.as_deref(),
    )?;
    let mut out = Vec::with_capacity(users.len());
    for user in &users {
        let profile = profiles::load_teacher_profile(conn, &user.id)?;
        out.push(json!({
            "user": user.to_json(),
            "profile": profile_json(conn, profile.as_ref())?
        }));
    }
    Ok(json!({ "teachers": out }))
}

fn teachers_add(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user = accounts::parse_new_user(params)?;
    let profile_input = match params.get("profile") {
        Some(Value::Object(obj)) => Some(profiles::parse_teacher_input(obj, true)?),
        Some(Value::Null) | None => None,
        Some(_) => return Err(HandlerErr::bad_params("profile must be an object")),
    };
    accounts::check_new_user(conn, &user, Role::Teacher)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    let id = accounts::insert_user(&tx, &user, Role::Teacher, AccountStatus::Approved)?;
    if let Some(input) = &profile_input {
        profiles::save_teacher_profile(&tx, &id, None, input, STATUS_APPROVED)?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(username = %user.username, "teacher added");
    Ok(json!({ "userId": id }))
}

fn teachers_complete_profile(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user_id = required_str(params, "userId")?;
    let obj = params_object(params, "profile")?;
    profiles::check_known_keys(obj, &[&TEACHER_PROFILE_KEYS, &TEACHER_SALARY_KEYS])?;
    let input = profiles::parse_teacher_input(obj, true)?;
    accounts::require_user(conn, &user_id, Role::Teacher)?;
    if profiles::load_teacher_profile(conn, &user_id)?.is_some() {
        return Err(HandlerErr::conflict("teacher profile already exists"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    profiles::save_teacher_profile(&tx, &user_id, None, &input, STATUS_APPROVED)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;
    let profile = profiles::load_teacher_profile(conn, &user_id)?;
    Ok(json!({ "profile": profile_json(conn, profile.as_ref())? }))
}

fn teachers_update(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user_id = required_str(params, "userId")?;
    let patch = params_object(params, "patch")?;
    profiles::check_known_keys(patch, &[&USER_PATCH_KEYS, &TEACHER_PROFILE_KEYS, &TEACHER_SALARY_KEYS])?;

    let user_patch = accounts::parse_user_patch(patch)?;
    let input = profiles::parse_teacher_input(patch, true)?;
    let touches_profile = patch.keys().any(|k| {
        TEACHER_PROFILE_KEYS.contains(&k.as_str()) || TEACHER_SALARY_KEYS.contains(&k.as_str())
    });
    let touches_salary = input.salary.is_some() || input.salary_paid.is_some();

    let user = accounts::require_user(conn, &user_id, Role::Teacher)?;
    let existing = profiles::load_teacher_profile(conn, &user_id)?;
    if touches_profile && existing.is_none() {
        return Err(HandlerErr::new(
            "profile_incomplete",
            "teacher has no profile; use teachers.completeProfile",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    accounts::write_user_patch(&tx, &user, &user_patch)?;
    if let (true, Some(cur)) = (touches_profile, existing.as_ref()) {
        profiles::save_teacher_profile(&tx, &user_id, Some(cur), &input, &cur.status)?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;

    let profile = profiles::load_teacher_profile(conn, &user_id)?;
    if let (true, Some(p)) = (touches_salary, profile.as_ref()) {
        tracing::info!(teacher = %user.username, salary = p.salary, paid = p.salary_paid, "salary updated");
        events::publish(
            conn,
            DomainEvent::SalaryUpdated {
                teacher: user.subject(),
                salary: p.salary,
                paid: p.salary_paid,
            },
        );
    }
    let user = accounts::require_user(conn, &user_id, Role::Teacher)?;
    Ok(json!({
        "user": user.to_json(),
        "profile": profile_json(conn, profile.as_ref())?
    }))
}

fn teachers_delete(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user_id = required_str(params, "userId")?;
    let user = accounts::require_user(conn, &user_id, Role::Teacher)?;
    accounts::delete_user_with(
        conn,
        &user_id,
        &[
            (
                "attendance_records",
                "DELETE FROM attendance_records
                 WHERE lecture_id IN (SELECT id FROM lectures WHERE teacher_id = ?1)",
            ),
            ("lectures", "DELETE FROM lectures WHERE teacher_id = ?1"),
            ("teacher_subjects", "DELETE FROM teacher_subjects WHERE user_id = ?1"),
            ("teacher_profiles", "DELETE FROM teacher_profiles WHERE user_id = ?1"),
        ],
    )?;
    tracing::info!(username = %user.username, "teacher deleted");
    Ok(json!({ "deleted": true }))
}

fn teachers_profile_get(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Teacher)?;
    let user = accounts::require_user(conn, &session.user_id, Role::Teacher)?;
    let profile = profiles::load_teacher_profile(conn, &session.user_id)?;
    Ok(json!({
        "user": user.to_json(),
        "profile": profile_json(conn, profile.as_ref())?
    }))
}

fn teachers_profile_submit(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Teacher)?;
    let obj = params_object(params, "profile")?;
    profiles::check_known_keys(obj, &[&USER_PATCH_KEYS, &TEACHER_PROFILE_KEYS, &TEACHER_SALARY_KEYS])?;
    let user_patch = accounts::parse_user_patch(obj)?;
    let input = profiles::parse_teacher_input(obj, false)?;

    let user = accounts::require_user(conn, &session.user_id, Role::Teacher)?;
    let existing = profiles::load_teacher_profile(conn, &user.id)?;
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    accounts::write_user_patch(&tx, &user, &user_patch)?;
    profiles::save_teacher_profile(&tx, &user.id, existing.as_ref(), &input, STATUS_PENDING)?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    tracing::info!(teacher = %user.username, "profile submitted for review");
    events::publish(conn, DomainEvent::ProfileUpdate(user.subject()));
    let profile = profiles::load_teacher_profile(conn, &user.id)?;
    Ok(json!({
        "profile": profile_json(conn, profile.as_ref())?,
        "message": "Profile updated successfully! Waiting for admin approval..."
    }))
}

fn teachers_salary(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Teacher)?;
    let p = profiles::load_teacher_profile(conn, &session.user_id)?
        .ok_or_else(|| HandlerErr::new("profile_incomplete", "complete your profile first"))?;
    Ok(json!({ "salary": calc::balance(p.salary, p.salary_paid) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => teachers_list(state, &req.params),
        "teachers.add" => teachers_add(state, &req.params),
        "teachers.completeProfile" => teachers_complete_profile(state, &req.params),
        "teachers.update" => teachers_update(state, &req.params),
        "teachers.delete" => teachers_delete(state, &req.params),
        "teachers.profile.get" => teachers_profile_get(state),
        "teachers.profile.submit" => teachers_profile_submit(state, &req.params),
        "teachers.salary" => teachers_salary(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
