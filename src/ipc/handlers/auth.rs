use super::accounts::{self, UserRow, USER_COLUMNS};
use crate::auth::{check_login, AccountStatus, Role, Session, StoredAccount};
use crate::events::{self, DomainEvent};
use crate::ipc::helpers::{db_conn, db_err, exists, required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::{json, Value};

fn session_json(session: &Session) -> Value {
    json!({
        "userId": session.user_id,
        "role": session.role.as_str(),
        "displayName": session.display_name
    })
}

fn bootstrap_admin(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    if exists(conn, "SELECT COUNT(*) FROM users WHERE role = 'admin'", [])? {
        return Err(HandlerErr::conflict("an admin account already exists"));
    }
    let user = accounts::parse_new_user(params)?;
    accounts::check_new_user(conn, &user, Role::Admin)?;
    let id = accounts::insert_user(conn, &user, Role::Admin, AccountStatus::Approved)?;
    tracing::info!(username = %user.username, "admin account created");
    Ok(json!({ "userId": id }))
}

fn register(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let conn = db_conn(state)?;
    let role_raw = required_str(params, "role")?;
    let role = match Role::parse(&role_raw) {
        Some(r @ (Role::Student | Role::Teacher)) => r,
        _ => return Err(HandlerErr::bad_params("role must be student or teacher")),
    };
    let user = accounts::parse_new_user(params)?;
    accounts::check_new_user(conn, &user, role)?;
    let id = accounts::insert_user(conn, &user, role, AccountStatus::Pending)?;
    tracing::info!(username = %user.username, role = role.as_str(), "registration received");

    if let Some(row) = accounts::load_user(conn, &id)? {
        events::publish(conn, DomainEvent::Registration(row.subject()));
    }
    Ok(json!({
        "userId": id,
        "status": AccountStatus::Pending.as_str(),
        "message": "Registration successful! Please wait for admin approval."
    }))
}

fn login(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let username = required_str(params, "username")?;
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
    let role_raw = required_str(params, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| HandlerErr::bad_params("role must be admin, student or teacher"))?;

    let conn = db_conn(state)?;
    let found = conn
        .query_row(
            &format!(
                "SELECT {}, u.password_hash, u.password_salt FROM users u WHERE u.username = ?",
                USER_COLUMNS
            ),
            [&username],
            |r| {
                let user = accounts::map_user(r, 0)?;
                let hash: String = r.get(11)?;
                let salt: String = r.get(12)?;
                Ok((user, hash, salt))
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    let Some((user, password_hash, password_salt)) = found else {
        tracing::info!(username = %username, "login refused: unknown user");
        return Err(crate::auth::AuthError::InvalidCredentials.into());
    };
    let account = StoredAccount {
        user_id: user.id.clone(),
        role: user.role,
        status: user.status,
        password_hash,
        password_salt,
    };
    if let Err(e) = check_login(&account, password, role) {
        tracing::info!(username = %username, code = e.code(), "login refused");
        return Err(e.into());
    }

    let session = Session {
        user_id: account.user_id,
        role: user.role,
        display_name: user.full_name(),
    };
    let out = session_json(&session);
    if user.role != Role::Admin {
        events::publish(conn, DomainEvent::Login(user.subject()));
    }
    tracing::info!(username = %username, role = user.role.as_str(), "login");
    state.session = Some(session);
    Ok(json!({ "session": out, "user": UserRow::to_json(&user) }))
}

fn logout(state: &mut AppState) -> Result<Value, HandlerErr> {
    let was = state.session.take();
    Ok(json!({ "loggedOut": was.is_some() }))
}

fn session(state: &AppState) -> Result<Value, HandlerErr> {
    Ok(json!({ "session": state.session.as_ref().map(session_json) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.bootstrapAdmin" => bootstrap_admin(state, &req.params),
        "auth.register" => register(state, &req.params),
        "auth.login" => login(state, &req.params),
        "auth.logout" => logout(state),
        "auth.session" => session(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
