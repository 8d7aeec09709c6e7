use chrono::{Datelike, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: usize,
    pub absent: usize,
    pub total: usize,
    pub percentage: f64,
}

/// Present over all recorded lectures, as a percentage. No records means 0.
pub fn attendance_summary<I>(statuses: I) -> AttendanceSummary
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut present: usize = 0;
    let mut absent: usize = 0;
    for s in statuses {
        match s {
            AttendanceStatus::Present => present += 1,
            AttendanceStatus::Absent => absent += 1,
        }
    }
    let total = present + absent;
    let percentage = if total > 0 {
        100.0 * (present as f64) / (total as f64)
    } else {
        0.0
    };
    AttendanceSummary {
        present,
        absent,
        total,
        percentage,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub due: f64,
    pub paid: f64,
    pub remaining: f64,
}

/// Used for both student fees and teacher salary.
pub fn balance(due: f64, paid: f64) -> Balance {
    Balance {
        due,
        paid,
        remaining: due - paid,
    }
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Whole years elapsed between `birth` and `today`.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

/// Money fields arrive as JSON numbers or numeric strings. Anything else,
/// including negatives and non-finite values, is refused.
pub fn parse_amount(v: &serde_json::Value) -> Option<f64> {
    let n = match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if n.is_finite() && n >= 0.0 {
        Some(n)
    } else {
        None
    }
}
