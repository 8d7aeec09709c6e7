use crate::auth::{self, AccountStatus, Role};
use crate::calc;
use crate::db;
use crate::events::Subject;
use crate::ipc::helpers::{
    conn_as, db_err, exists, opt_date, opt_str, parse_date, required_str, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::setup;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub const USER_COLUMNS: &str =
    "u.id, u.username, u.email, u.first_name, u.last_name, u.role, u.phone, u.date_of_birth, u.address, u.status, u.created_at";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub phone: String,
    pub date_of_birth: Option<String>,
    pub address: String,
    pub status: AccountStatus,
    pub created_at: String,
}

impl UserRow {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn subject(&self) -> Subject {
        Subject {
            user_id: self.id.clone(),
            username: self.username.clone(),
            full_name: self.full_name(),
            role: self.role,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "username": self.username,
            "email": self.email,
            "firstName": self.first_name,
            "lastName": self.last_name,
            "fullName": self.full_name(),
            "role": self.role.as_str(),
            "phone": self.phone,
            "dateOfBirth": self.date_of_birth,
            "address": self.address,
            "status": self.status.as_str(),
            "createdAt": self.created_at
        })
    }
}

/// Reads the `USER_COLUMNS` prefix of a row starting at `offset`.
pub fn map_user(r: &Row, offset: usize) -> rusqlite::Result<UserRow> {
    let role_raw: String = r.get(offset + 5)?;
    let status_raw: String = r.get(offset + 9)?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            offset + 5,
            Type::Text,
            format!("unknown role {}", role_raw).into(),
        )
    })?;
    let status = AccountStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            offset + 9,
            Type::Text,
            format!("unknown status {}", status_raw).into(),
        )
    })?;
    Ok(UserRow {
        id: r.get(offset)?,
        username: r.get(offset + 1)?,
        email: r.get(offset + 2)?,
        first_name: r.get(offset + 3)?,
        last_name: r.get(offset + 4)?,
        role,
        phone: r.get(offset + 6)?,
        date_of_birth: r.get(offset + 7)?,
        address: r.get(offset + 8)?,
        status,
        created_at: r.get(offset + 10)?,
    })
}

pub fn load_user(conn: &Connection, user_id: &str) -> Result<Option<UserRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS),
        [user_id],
        |r| map_user(r, 0),
    )
    .optional()
    .map_err(db_err("db_query_failed"))
}

/// Loads a user and insists on its role.
pub fn require_user(conn: &Connection, user_id: &str, role: Role) -> Result<UserRow, HandlerErr> {
    match load_user(conn, user_id)? {
        Some(u) if u.role == role => Ok(u),
        _ => Err(HandlerErr::not_found(format!(
            "{} not found",
            role.as_str()
        ))),
    }
}

pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    pub date_of_birth: Option<NaiveDate>,
}

pub fn parse_new_user(params: &Value) -> Result<NewUser, HandlerErr> {
    let password = params
        .get("password")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;
    Ok(NewUser {
        username: required_str(params, "username")?,
        email: required_str(params, "email")?,
        password,
        first_name: required_str(params, "firstName")?,
        last_name: opt_str(params, "lastName").unwrap_or_default(),
        phone: opt_str(params, "phone").unwrap_or_default(),
        address: opt_str(params, "address").unwrap_or_default(),
        date_of_birth: opt_date(params, "dateOfBirth")?,
    })
}

fn check_unique_identity(
    conn: &Connection,
    username: Option<&str>,
    email: Option<&str>,
    exclude_id: Option<&str>,
) -> Result<(), HandlerErr> {
    if let Some(username) = username {
        if exists(
            conn,
            "SELECT COUNT(*) FROM users WHERE username = ? AND (? IS NULL OR id <> ?)",
            (username, exclude_id, exclude_id),
        )? {
            return Err(HandlerErr::conflict("Username already exists."));
        }
    }
    if let Some(email) = email {
        if exists(
            conn,
            "SELECT COUNT(*) FROM users WHERE email = ? COLLATE NOCASE AND (? IS NULL OR id <> ?)",
            (email, exclude_id, exclude_id),
        )? {
            return Err(HandlerErr::conflict("Email already registered."));
        }
    }
    Ok(())
}

/// Sign-up rules from the `registration` setup section, then uniqueness.
pub fn check_new_user(conn: &Connection, user: &NewUser, role: Role) -> Result<(), HandlerErr> {
    let rules = setup::registration_rules(conn);
    rules.check_password(&user.password)?;
    if let Some(dob) = user.date_of_birth {
        rules.check_birth_date(role, dob, calc::today())?;
    }
    check_unique_identity(conn, Some(&user.username), Some(&user.email), None)
}

pub fn insert_user(
    conn: &Connection,
    user: &NewUser,
    role: Role,
    status: AccountStatus,
) -> Result<String, HandlerErr> {
    let id = Uuid::new_v4().to_string();
    let salt = auth::new_salt();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO users(id, username, email, password_hash, password_salt, first_name, last_name, role, phone, date_of_birth, address, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            user.username,
            user.email,
            auth::hash_password(&user.password, &salt),
            salt,
            user.first_name,
            user.last_name,
            role.as_str(),
            user.phone,
            user.date_of_birth.map(|d| d.to_string()),
            user.address,
            status.as_str(),
            now,
            now,
        ],
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(id)
}

/// User fields an admin may change on a student or teacher.
#[derive(Default)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub date_of_birth: Option<Option<NaiveDate>>,
}

pub const USER_PATCH_KEYS: [&str; 6] = [
    "firstName",
    "lastName",
    "email",
    "phone",
    "address",
    "dateOfBirth",
];

pub fn parse_user_patch(patch: &Map<String, Value>) -> Result<UserPatch, HandlerErr> {
    let text = |key: &str| -> Result<Option<String>, HandlerErr> {
        match patch.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_str()
                .map(|s| Some(s.trim().to_string()))
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
        }
    };
    let out = UserPatch {
        first_name: text("firstName")?,
        last_name: text("lastName")?,
        email: text("email")?,
        phone: text("phone")?,
        address: text("address")?,
        date_of_birth: match patch.get("dateOfBirth") {
            None => None,
            Some(Value::Null) => Some(None),
            Some(v) => Some(Some(parse_date(v, "dateOfBirth")?)),
        },
    };
    if out.first_name.as_deref() == Some("") {
        return Err(HandlerErr::bad_params("firstName must not be empty"));
    }
    if out.email.as_deref() == Some("") {
        return Err(HandlerErr::bad_params("email must not be empty"));
    }
    Ok(out)
}

pub fn write_user_patch(
    conn: &Connection,
    user: &UserRow,
    patch: &UserPatch,
) -> Result<(), HandlerErr> {
    check_unique_identity(conn, None, patch.email.as_deref(), Some(&user.id))?;
    let dob = match &patch.date_of_birth {
        Some(d) => d.map(|d| d.to_string()),
        None => user.date_of_birth.clone(),
    };
    conn.execute(
        "UPDATE users
         SET first_name = ?, last_name = ?, email = ?, phone = ?, address = ?, date_of_birth = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            patch.first_name.as_ref().unwrap_or(&user.first_name),
            patch.last_name.as_ref().unwrap_or(&user.last_name),
            patch.email.as_ref().unwrap_or(&user.email),
            patch.phone.as_ref().unwrap_or(&user.phone),
            patch.address.as_ref().unwrap_or(&user.address),
            dob,
            db::now_ts(),
            user.id,
        ],
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(())
}

/// Approved users of `role`, optionally filtered by a case-insensitive
/// substring over names, email and the profile's `id_column`.
pub fn list_approved(
    conn: &Connection,
    role: Role,
    profile_table: &str,
    id_column: &str,
    search: Option<&str>,
) -> Result<Vec<UserRow>, HandlerErr> {
    let pattern = search
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s));
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {cols} FROM users u
             WHERE u.role = ?1 AND u.status = 'approved'
               AND (?2 IS NULL
                    OR lower(u.first_name) LIKE ?2
                    OR lower(u.last_name) LIKE ?2
                    OR lower(u.email) LIKE ?2
                    OR u.id IN (SELECT p.user_id FROM {table} p WHERE lower(p.{col}) LIKE ?2))
             ORDER BY u.first_name COLLATE NOCASE, u.last_name COLLATE NOCASE",
            cols = USER_COLUMNS,
            table = profile_table,
            col = id_column
        ))
        .map_err(db_err("db_query_failed"))?;
    stmt.query_map((role.as_str(), pattern), |r| map_user(r, 0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))
}

/// Runs `steps` (table, SQL bound to `?1` = user id) and finally removes the
/// user, all in one transaction.
pub fn delete_user_with(
    conn: &Connection,
    user_id: &str,
    steps: &[(&str, &str)],
) -> Result<(), HandlerErr> {
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    // Other users' notifications about this account are kept, unlinked.
    let common: [(&str, &str); 3] = [
        (
            "notifications",
            "UPDATE notifications SET related_user_id = NULL WHERE related_user_id = ?1",
        ),
        ("notifications", "DELETE FROM notifications WHERE user_id = ?1"),
        ("users", "DELETE FROM users WHERE id = ?1"),
    ];
    for (table, sql) in steps.iter().chain(common.iter()) {
        tx.execute(sql, [user_id]).map_err(|e| {
            db_err("db_delete_failed")(e).with_details(json!({ "table": table }))
        })?;
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    Ok(())
}

fn registrations_list_pending(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM users u
             WHERE u.status = 'pending' AND u.role <> 'admin'
             ORDER BY u.created_at, u.username",
            USER_COLUMNS
        ))
        .map_err(db_err("db_query_failed"))?;
    let users = stmt
        .query_map([], |r| map_user(r, 0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "users": users.iter().map(UserRow::to_json).collect::<Vec<_>>() }))
}

fn set_registration_status(
    state: &AppState,
    params: &Value,
    status: AccountStatus,
) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let user_id = required_str(params, "userId")?;
    let user = match load_user(conn, &user_id)? {
        Some(u) if u.role != Role::Admin => u,
        _ => return Err(HandlerErr::not_found("user not found")),
    };
    conn.execute(
        "UPDATE users SET status = ?, updated_at = ? WHERE id = ?",
        (status.as_str(), db::now_ts(), &user.id),
    )
    .map_err(db_err("db_update_failed"))?;
    tracing::info!(user = %user.username, status = status.as_str(), "registration reviewed");
    Ok(json!({ "userId": user.id, "status": status.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "registrations.listPending" => registrations_list_pending(state),
        "registrations.approve" => set_registration_status(state, &req.params, AccountStatus::Approved),
        "registrations.reject" => set_registration_status(state, &req.params, AccountStatus::Rejected),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
