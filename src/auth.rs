use crate::calc;
use chrono::NaiveDate;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Student,
    Teacher,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "student" => Some(Self::Student),
            "teacher" => Some(Self::Teacher),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Student => "student",
            Self::Teacher => "teacher",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Admin => "Admin",
            Self::Student => "Student",
            Self::Teacher => "Teacher",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Pending,
    Approved,
    Rejected,
}

impl AccountStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Invalid role selected. You are registered as {}", .0.label())]
    RoleMismatch(Role),
    #[error("Your account is pending approval from admin.")]
    PendingApproval,
    #[error("Your account has been rejected by admin.")]
    Rejected,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "unauthenticated",
            AuthError::RoleMismatch(_) | AuthError::PendingApproval | AuthError::Rejected => {
                "forbidden"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("Password must be at least {0} characters")]
    PasswordTooShort(usize),
    #[error("Date of birth cannot be in the future.")]
    BirthDateInFuture,
    #[error("{} must be at least {} years old.", .role.label(), .min_age)]
    TooYoung { role: Role, min_age: i32 },
}

/// Minimum ages and password length applied at sign-up.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationRules {
    pub min_student_age: i32,
    pub min_teacher_age: i32,
    pub min_password_length: usize,
}

impl Default for RegistrationRules {
    fn default() -> Self {
        Self {
            min_student_age: 15,
            min_teacher_age: 21,
            min_password_length: 8,
        }
    }
}

impl RegistrationRules {
    pub fn check_password(&self, password: &str) -> Result<(), RegistrationError> {
        if password.chars().count() < self.min_password_length {
            return Err(RegistrationError::PasswordTooShort(self.min_password_length));
        }
        Ok(())
    }

    pub fn check_birth_date(
        &self,
        role: Role,
        birth: NaiveDate,
        today: NaiveDate,
    ) -> Result<(), RegistrationError> {
        if birth > today {
            return Err(RegistrationError::BirthDateInFuture);
        }
        let min_age = match role {
            Role::Student => self.min_student_age,
            Role::Teacher => self.min_teacher_age,
            Role::Admin => return Ok(()),
        };
        if calc::age_on(birth, today) < min_age {
            return Err(RegistrationError::TooYoung { role, min_age });
        }
        Ok(())
    }
}

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

const HASH_SCHEME: &str = "pbkdf2_sha256";
const PBKDF2_ROUNDS: u32 = 100_000;

/// PBKDF2-HMAC-SHA256, stored as `pbkdf2_sha256$<rounds>$<hex>`.
pub fn hash_password(password: &str, salt: &str) -> String {
    hash_with_rounds(password, salt, PBKDF2_ROUNDS)
}

fn hash_with_rounds(password: &str, salt: &str, rounds: u32) -> String {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), rounds, &mut key);
    let hex: String = key.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}${}${}", HASH_SCHEME, rounds, hex)
}

/// Recomputes with the round count recorded in `stored`.
pub fn verify_password(password: &str, salt: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    let scheme = parts.next();
    let rounds = parts.next().and_then(|r| r.parse::<u32>().ok());
    match (scheme, rounds, parts.next()) {
        (Some(HASH_SCHEME), Some(rounds), Some(_)) if rounds > 0 => {
            hash_with_rounds(password, salt, rounds) == stored
        }
        _ => false,
    }
}

/// Credentials row as loaded for a login attempt.
#[derive(Debug, Clone)]
pub struct StoredAccount {
    pub user_id: String,
    pub role: Role,
    pub status: AccountStatus,
    pub password_hash: String,
    pub password_salt: String,
}

/// Checks order: password, then the role the user picked, then approval.
pub fn check_login(
    account: &StoredAccount,
    password: &str,
    requested_role: Role,
) -> Result<(), AuthError> {
    if !verify_password(password, &account.password_salt, &account.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    if account.role != requested_role {
        return Err(AuthError::RoleMismatch(account.role));
    }
    match account.status {
        AccountStatus::Approved => Ok(()),
        AccountStatus::Pending => Err(AuthError::PendingApproval),
        AccountStatus::Rejected => Err(AuthError::Rejected),
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub role: Role,
    pub display_name: String,
}
