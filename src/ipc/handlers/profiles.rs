use super::accounts::{self, USER_COLUMNS};
use crate::auth::Role;
use crate::calc;
use crate::db;
use crate::ipc::helpers::{amount, conn_as, db_err, exists, required_str, respond, string_list, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Student,
    Teacher,
}

impl ProfileKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "student" => Some(Self::Student),
            "teacher" => Some(Self::Teacher),
            _ => None,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Student => "student_profiles",
            Self::Teacher => "teacher_profiles",
        }
    }

    fn link_table(self) -> &'static str {
        match self {
            Self::Student => "student_subjects",
            Self::Teacher => "teacher_subjects",
        }
    }
}

fn load_subjects(conn: &Connection, kind: ProfileKind, user_id: &str) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT s.id, s.name FROM {} l JOIN subjects s ON s.id = l.subject_id
             WHERE l.user_id = ? ORDER BY s.name COLLATE NOCASE",
            kind.link_table()
        ))
        .map_err(db_err("db_query_failed"))?;
    stmt.query_map([user_id], |r| {
        let id: String = r.get(0)?;
        let name: String = r.get(1)?;
        Ok(json!({ "id": id, "name": name }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err("db_query_failed"))
}

fn replace_subjects(
    conn: &Connection,
    kind: ProfileKind,
    user_id: &str,
    subject_ids: &[String],
) -> Result<(), HandlerErr> {
    conn.execute(
        &format!("DELETE FROM {} WHERE user_id = ?", kind.link_table()),
        [user_id],
    )
    .map_err(db_err("db_delete_failed"))?;
    for sid in subject_ids {
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {}(user_id, subject_id) VALUES(?, ?)",
                kind.link_table()
            ),
            (user_id, sid),
        )
        .map_err(db_err("db_insert_failed"))?;
    }
    Ok(())
}

fn check_subjects_exist(conn: &Connection, subject_ids: &[String]) -> Result<(), HandlerErr> {
    for sid in subject_ids {
        if !exists(conn, "SELECT COUNT(*) FROM subjects WHERE id = ?", [sid])? {
            return Err(HandlerErr::not_found(format!("subject not found: {}", sid)));
        }
    }
    Ok(())
}

fn text_field(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, HandlerErr> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key)))?;
            if s.is_empty() {
                return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
            }
            Ok(Some(s))
        }
    }
}

fn amount_field(obj: &Map<String, Value>, key: &str) -> Result<Option<f64>, HandlerErr> {
    obj.get(key).map(|v| amount(v, key)).transpose()
}

fn required<T>(v: Option<T>, key: &str) -> Result<T, HandlerErr> {
    v.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

// ---------------------------------------------------------------------------
// Students

#[derive(Debug, Clone)]
pub struct StudentProfile {
    pub user_id: String,
    pub enrollment_number: String,
    pub guardian_name: String,
    pub guardian_phone: String,
    pub batch_id: Option<String>,
    pub batch_name: Option<String>,
    pub total_fees: f64,
    pub fees_paid: f64,
    pub status: String,
}

impl StudentProfile {
    pub fn to_json(&self, conn: &Connection) -> Result<Value, HandlerErr> {
        let subjects = load_subjects(conn, ProfileKind::Student, &self.user_id)?;
        Ok(json!({
            "userId": self.user_id,
            "enrollmentNumber": self.enrollment_number,
            "guardianName": self.guardian_name,
            "guardianPhone": self.guardian_phone,
            "batchId": self.batch_id,
            "batchName": self.batch_name,
            "subjects": subjects,
            "fees": calc::balance(self.total_fees, self.fees_paid),
            "profileUpdateStatus": self.status
        }))
    }
}

pub fn load_student_profile(conn: &Connection, user_id: &str) -> Result<Option<StudentProfile>, HandlerErr> {
    conn.query_row(
        "SELECT sp.user_id, sp.enrollment_number, sp.guardian_name, sp.guardian_phone,
                sp.batch_id, b.name, sp.total_fees, sp.fees_paid, sp.profile_update_status
         FROM student_profiles sp
         LEFT JOIN batches b ON b.id = sp.batch_id
         WHERE sp.user_id = ?",
        [user_id],
        |r| {
            Ok(StudentProfile {
                user_id: r.get(0)?,
                enrollment_number: r.get(1)?,
                guardian_name: r.get(2)?,
                guardian_phone: r.get(3)?,
                batch_id: r.get(4)?,
                batch_name: r.get(5)?,
                total_fees: r.get(6)?,
                fees_paid: r.get(7)?,
                status: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))
}

#[derive(Debug, Default)]
pub struct StudentProfileInput {
    pub enrollment_number: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_phone: Option<String>,
    pub batch_id: Option<Option<String>>,
    pub subject_ids: Option<Vec<String>>,
    pub total_fees: Option<f64>,
    pub fees_paid: Option<f64>,
}

pub const STUDENT_PROFILE_KEYS: [&str; 5] = [
    "enrollmentNumber",
    "guardianName",
    "guardianPhone",
    "batchId",
    "subjectIds",
];
pub const STUDENT_FEE_KEYS: [&str; 2] = ["totalFees", "feesPaid"];

/// Fee fields are only read when `allow_fees`; students cannot set their own.
pub fn parse_student_input(obj: &Map<String, Value>, allow_fees: bool) -> Result<StudentProfileInput, HandlerErr> {
    let batch_id = match obj.get("batchId") {
        None => None,
        Some(Value::Null) => Some(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(Some(s.trim().to_string())),
        Some(_) => return Err(HandlerErr::bad_params("batchId must be a string or null")),
    };
    let mut input = StudentProfileInput {
        enrollment_number: text_field(obj, "enrollmentNumber")?,
        guardian_name: text_field(obj, "guardianName")?,
        guardian_phone: text_field(obj, "guardianPhone")?,
        batch_id,
        subject_ids: obj
            .get("subjectIds")
            .map(|v| string_list(v, "subjectIds"))
            .transpose()?,
        ..Default::default()
    };
    if allow_fees {
        input.total_fees = amount_field(obj, "totalFees")?;
        input.fees_paid = amount_field(obj, "feesPaid")?;
    } else if STUDENT_FEE_KEYS.iter().any(|k| obj.contains_key(*k)) {
        return Err(HandlerErr::new("forbidden", "fees are managed by the admin"));
    }
    Ok(input)
}

/// Creates the profile when `existing` is `None`, otherwise applies `input` over it.
pub fn save_student_profile(
    conn: &Connection,
    user_id: &str,
    existing: Option<&StudentProfile>,
    input: &StudentProfileInput,
    status: &str,
) -> Result<(), HandlerErr> {
    if let Some(Some(batch_id)) = &input.batch_id {
        if !exists(conn, "SELECT COUNT(*) FROM batches WHERE id = ?", [batch_id])? {
            return Err(HandlerErr::not_found("batch not found"));
        }
    }
    if let Some(ids) = &input.subject_ids {
        check_subjects_exist(conn, ids)?;
    }
    if let Some(enr) = &input.enrollment_number {
        if exists(
            conn,
            "SELECT COUNT(*) FROM student_profiles WHERE enrollment_number = ? AND user_id <> ?",
            (enr, user_id),
        )? {
            return Err(HandlerErr::conflict("Enrollment number already exists."));
        }
    }

    let now = db::now_ts();
    match existing {
        None => {
            conn.execute(
                "INSERT INTO student_profiles(user_id, enrollment_number, guardian_name, guardian_phone, batch_id, total_fees, fees_paid, profile_update_status, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    user_id,
                    required(input.enrollment_number.as_ref(), "enrollmentNumber")?,
                    required(input.guardian_name.as_ref(), "guardianName")?,
                    required(input.guardian_phone.as_ref(), "guardianPhone")?,
                    input.batch_id.clone().flatten(),
                    input.total_fees.unwrap_or(0.0),
                    input.fees_paid.unwrap_or(0.0),
                    status,
                    now,
                    now,
                ],
            )
            .map_err(db_err("db_insert_failed"))?;
        }
        Some(cur) => {
            let batch_id = match &input.batch_id {
                Some(b) => b.clone(),
                None => cur.batch_id.clone(),
            };
            conn.execute(
                "UPDATE student_profiles
                 SET enrollment_number = ?, guardian_name = ?, guardian_phone = ?, batch_id = ?,
                     total_fees = ?, fees_paid = ?, profile_update_status = ?, updated_at = ?
                 WHERE user_id = ?",
                rusqlite::params![
                    input.enrollment_number.as_ref().unwrap_or(&cur.enrollment_number),
                    input.guardian_name.as_ref().unwrap_or(&cur.guardian_name),
                    input.guardian_phone.as_ref().unwrap_or(&cur.guardian_phone),
                    batch_id,
                    input.total_fees.unwrap_or(cur.total_fees),
                    input.fees_paid.unwrap_or(cur.fees_paid),
                    status,
                    now,
                    user_id,
                ],
            )
            .map_err(db_err("db_update_failed"))?;
        }
    }
    if let Some(ids) = &input.subject_ids {
        replace_subjects(conn, ProfileKind::Student, user_id, ids)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Teachers

#[derive(Debug, Clone)]
pub struct TeacherProfile {
    pub user_id: String,
    pub employee_id: String,
    pub qualifications: String,
    pub experience_years: i64,
    pub salary: f64,
    pub salary_paid: f64,
    pub status: String,
}

impl TeacherProfile {
    pub fn to_json(&self, conn: &Connection) -> Result<Value, HandlerErr> {
        let subjects = load_subjects(conn, ProfileKind::Teacher, &self.user_id)?;
        Ok(json!({
            "userId": self.user_id,
            "employeeId": self.employee_id,
            "qualifications": self.qualifications,
            "experienceYears": self.experience_years,
            "subjectsTaught": subjects,
            "salary": calc::balance(self.salary, self.salary_paid),
            "profileUpdateStatus": self.status
        }))
    }
}

pub fn load_teacher_profile(conn: &Connection, user_id: &str) -> Result<Option<TeacherProfile>, HandlerErr> {
    conn.query_row(
        "SELECT user_id, employee_id, qualifications, experience_years, salary, salary_paid, profile_update_status
         FROM teacher_profiles WHERE user_id = ?",
        [user_id],
        |r| {
            Ok(TeacherProfile {
                user_id: r.get(0)?,
                employee_id: r.get(1)?,
                qualifications: r.get(2)?,
                experience_years: r.get(3)?,
                salary: r.get(4)?,
                salary_paid: r.get(5)?,
                status: r.get(6)?,
            })
        },
    )
    .optional()
    .map_err(db_err("db_query_failed"))
}

#[derive(Debug, Default)]
pub struct TeacherProfileInput {
    pub employee_id: Option<String>,
    pub qualifications: Option<String>,
    pub experience_years: Option<i64>,
    pub subject_ids: Option<Vec<String>>,
    pub salary: Option<f64>,
    pub salary_paid: Option<f64>,
}

pub const TEACHER_PROFILE_KEYS: [&str; 4] =
    ["employeeId", "qualifications", "experienceYears", "subjectIds"];
pub const TEACHER_SALARY_KEYS: [&str; 2] = ["salary", "salaryPaid"];

pub fn parse_teacher_input(obj: &Map<String, Value>, allow_salary: bool) -> Result<TeacherProfileInput, HandlerErr> {
    let experience_years = match obj.get("experienceYears") {
        None => None,
        Some(v) => match v.as_i64() {
            Some(n) if (0..=80).contains(&n) => Some(n),
            _ => {
                return Err(HandlerErr::bad_params(
                    "experienceYears must be an integer in 0..=80",
                ))
            }
        },
    };
    let mut input = TeacherProfileInput {
        employee_id: text_field(obj, "employeeId")?,
        qualifications: text_field(obj, "qualifications")?,
        experience_years,
        subject_ids: obj
            .get("subjectIds")
            .map(|v| string_list(v, "subjectIds"))
            .transpose()?,
        ..Default::default()
    };
    if allow_salary {
        input.salary = amount_field(obj, "salary")?;
        input.salary_paid = amount_field(obj, "salaryPaid")?;
    } else if TEACHER_SALARY_KEYS.iter().any(|k| obj.contains_key(*k)) {
        return Err(HandlerErr::new("forbidden", "salary is managed by the admin"));
    }
    Ok(input)
}

pub fn save_teacher_profile(
    conn: &Connection,
    user_id: &str,
    existing: Option<&TeacherProfile>,
    input: &TeacherProfileInput,
    status: &str,
) -> Result<(), HandlerErr> {
    if let Some(ids) = &input.subject_ids {
        check_subjects_exist(conn, ids)?;
    }
    if let Some(emp) = &input.employee_id {
        if exists(
            conn,
            "SELECT COUNT(*) FROM teacher_profiles WHERE employee_id = ? AND user_id <> ?",
            (emp, user_id),
        )? {
            return Err(HandlerErr::conflict("Employee ID already exists."));
        }
    }

    let now = db::now_ts();
    match existing {
        None => {
            conn.execute(
                "INSERT INTO teacher_profiles(user_id, employee_id, qualifications, experience_years, salary, salary_paid, profile_update_status, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    user_id,
                    required(input.employee_id.as_ref(), "employeeId")?,
                    required(input.qualifications.as_ref(), "qualifications")?,
                    input.experience_years.unwrap_or(0),
                    input.salary.unwrap_or(0.0),
                    input.salary_paid.unwrap_or(0.0),
                    status,
                    now,
                    now,
                ],
            )
            .map_err(db_err("db_insert_failed"))?;
        }
        Some(cur) => {
            conn.execute(
                "UPDATE teacher_profiles
                 SET employee_id = ?, qualifications = ?, experience_years = ?, salary = ?,
                     salary_paid = ?, profile_update_status = ?, updated_at = ?
                 WHERE user_id = ?",
                rusqlite::params![
                    input.employee_id.as_ref().unwrap_or(&cur.employee_id),
                    input.qualifications.as_ref().unwrap_or(&cur.qualifications),
                    input.experience_years.unwrap_or(cur.experience_years),
                    input.salary.unwrap_or(cur.salary),
                    input.salary_paid.unwrap_or(cur.salary_paid),
                    status,
                    now,
                    user_id,
                ],
            )
            .map_err(db_err("db_update_failed"))?;
        }
    }
    if let Some(ids) = &input.subject_ids {
        replace_subjects(conn, ProfileKind::Teacher, user_id, ids)?;
    }
    Ok(())
}

/// Rejects keys outside `allowed`, so typos do not silently drop changes.
pub fn check_known_keys(obj: &Map<String, Value>, allowed: &[&[&str]]) -> Result<(), HandlerErr> {
    for k in obj.keys() {
        if !allowed.iter().any(|set| set.contains(&k.as_str())) {
            return Err(HandlerErr::bad_params(format!("unknown field: {}", k)));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Review queue

fn pending_for(conn: &Connection, kind: ProfileKind) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM {} p JOIN users u ON u.id = p.user_id
             WHERE p.profile_update_status = 'pending'
             ORDER BY p.updated_at",
            USER_COLUMNS,
            kind.table()
        ))
        .map_err(db_err("db_query_failed"))?;
    let users = stmt
        .query_map([], |r| accounts::map_user(r, 0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;

    let mut out = Vec::with_capacity(users.len());
    for user in users {
        let profile = match kind {
            ProfileKind::Student => match load_student_profile(conn, &user.id)? {
                Some(p) => p.to_json(conn)?,
                None => Value::Null,
            },
            ProfileKind::Teacher => match load_teacher_profile(conn, &user.id)? {
                Some(p) => p.to_json(conn)?,
                None => Value::Null,
            },
        };
        out.push(json!({ "user": user.to_json(), "profile": profile }));
    }
    Ok(out)
}

fn profile_updates_list_pending(state: &AppState) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    Ok(json!({
        "students": pending_for(conn, ProfileKind::Student)?,
        "teachers": pending_for(conn, ProfileKind::Teacher)?
    }))
}

fn profile_updates_review(state: &AppState, params: &Value, status: &str) -> Result<Value, HandlerErr> {
    let (conn, _) = conn_as(state, Role::Admin)?;
    let kind_raw = required_str(params, "kind")?;
    let kind = ProfileKind::parse(&kind_raw)
        .ok_or_else(|| HandlerErr::bad_params("kind must be student or teacher"))?;
    let user_id = required_str(params, "userId")?;
    let changed = conn
        .execute(
            &format!(
                "UPDATE {} SET profile_update_status = ?, updated_at = ? WHERE user_id = ?",
                kind.table()
            ),
            (status, db::now_ts(), &user_id),
        )
        .map_err(db_err("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("profile not found"));
    }
    tracing::info!(kind = kind_raw.as_str(), user = %user_id, status, "profile update reviewed");
    Ok(json!({ "userId": user_id, "profileUpdateStatus": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "profileUpdates.listPending" => profile_updates_list_pending(state),
        "profileUpdates.approve" => profile_updates_review(state, &req.params, STATUS_APPROVED),
        "profileUpdates.reject" => profile_updates_review(state, &req.params, STATUS_REJECTED),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
