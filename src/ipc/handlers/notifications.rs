use crate::auth::Role;
use crate::ipc::helpers::{conn_as, count, db_err, parse_bool, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn list_for(conn: &Connection, user_id: &str, unread_only: bool, limit: i64) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT n.id, n.kind, n.title, n.message, n.related_user_id, n.is_read, n.created_at
             FROM notifications n
             WHERE n.user_id = ?1 AND (?2 = 0 OR n.is_read = 0)
             ORDER BY n.created_at DESC, n.id
             LIMIT ?3",
        )
        .map_err(db_err("db_query_failed"))?;
    stmt.query_map((user_id, unread_only as i64, limit), |r| {
        let id: String = r.get(0)?;
        let kind: String = r.get(1)?;
        let title: String = r.get(2)?;
        let message: String = r.get(3)?;
        let related: Option<String> = r.get(4)?;
        let is_read: i64 = r.get(5)?;
        let created_at: String = r.get(6)?;
        Ok(json!({
            "id": id,
            "kind": kind,
            "title": title,
            "message": message,
            "relatedUserId": related,
            "isRead": is_read != 0,
            "createdAt": created_at
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}

fn notifications_list(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Admin)?;
    let unread_only = match params.get("unreadOnly") {
        Some(v) => parse_bool(v, "unreadOnly")?,
        None => false,
    };
    let limit = match params.get("limit") {
        None => 100,
        Some(v) => match v.as_i64() {
            Some(n) if (1..=1000).contains(&n) => n,
            _ => return Err(HandlerErr::bad_params("limit must be in 1..=1000")),
        },
    };
    let items = list_for(conn, &session.user_id, unread_only, limit)?;
    Ok(json!({ "notifications": items }))
}

fn notifications_mark_read(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Admin)?;
    let id = required_str(params, "id")?;
    let changed = conn
        .execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?",
            (&id, &session.user_id),
        )
        .map_err(db_err("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("notification not found"));
    }
    Ok(json!({ "id": id, "isRead": true }))
}

fn admin_dashboard(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, session) = conn_as(state, Role::Admin)?;
    let unread = count(
        conn,
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
        [&session.user_id],
    )?;
    let students = count(
        conn,
        "SELECT COUNT(*) FROM users WHERE role = 'student' AND status = 'approved'",
        [],
    )?;
    let teachers = count(
        conn,
        "SELECT COUNT(*) FROM users WHERE role = 'teacher' AND status = 'approved'",
        [],
    )?;
    let pending_registrations = count(
        conn,
        "SELECT COUNT(*) FROM users WHERE role <> 'admin' AND status = 'pending'",
        [],
    )?;
    let pending_profiles = count(
        conn,
        "SELECT
           (SELECT COUNT(*) FROM student_profiles WHERE profile_update_status = 'pending')
         + (SELECT COUNT(*) FROM teacher_profiles WHERE profile_update_status = 'pending')",
        [],
    )?;
    Ok(json!({
        "unreadCount": unread,
        "notifications": list_for(conn, &session.user_id, true, 10)?,
        "totalStudents": students,
        "totalTeachers": teachers,
        "pendingRegistrations": pending_registrations,
        "pendingProfileUpdates": pending_profiles
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "notifications.list" => notifications_list(state, &req.params),
        "notifications.markRead" => notifications_mark_read(state, &req.params),
        "admin.dashboard" => admin_dashboard(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
