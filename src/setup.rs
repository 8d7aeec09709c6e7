use crate::auth::RegistrationRules;
use crate::db;
use crate::schedule::{self, Weekday};
use chrono::NaiveTime;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Registration,
    Timetable,
    Notifications,
}

impl SetupSection {
    pub const ALL: [SetupSection; 3] = [
        SetupSection::Registration,
        SetupSection::Timetable,
        SetupSection::Notifications,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registration" => Some(Self::Registration),
            "timetable" => Some(Self::Timetable),
            "notifications" => Some(Self::Notifications),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Timetable => "timetable",
            Self::Notifications => "notifications",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Registration => "setup.registration",
            Self::Timetable => "setup.timetable",
            Self::Notifications => "setup.notifications",
        }
    }
}

pub fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Registration => json!({
            "minStudentAge": 15,
            "minTeacherAge": 21,
            "minPasswordLength": 8
        }),
        SetupSection::Timetable => json!({
            "workingDays": Weekday::ALL.iter().map(|d| d.as_str()).collect::<Vec<_>>()
        }),
        SetupSection::Notifications => json!({
            "notifyOnRegistration": true,
            "notifyOnLogin": true,
            "notifyOnProfileUpdate": true,
            "notifyOnAttendance": true,
            "notifyOnFees": true,
            "notifyOnSalary": true
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_clock(v: &Value, key: &str) -> Result<NaiveTime, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    schedule::parse_time(s).map_err(|_| format!("{} must be HH:MM", key))
}

fn parse_working_days(v: &Value, key: &str) -> Result<Vec<Weekday>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of day names", key))?;
    let mut days = Vec::new();
    for item in arr {
        let day = item
            .as_str()
            .and_then(Weekday::parse)
            .ok_or_else(|| format!("{} contains an unknown day: {}", key, item))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    days.sort();
    Ok(days)
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Registration => match k.as_str() {
                "minStudentAge" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 30)?));
                }
                "minTeacherAge" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 16, 40)?));
                }
                "minPasswordLength" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 4, 64)?));
                }
                _ => return Err(format!("unknown registration field: {}", k)),
            },
            SetupSection::Timetable => match k.as_str() {
                "workingDays" => {
                    let days = parse_working_days(v, k)?;
                    obj.insert(
                        k.clone(),
                        json!(days.iter().map(|d| d.as_str()).collect::<Vec<_>>()),
                    );
                }
                // Null clears the bound; with neither bound set any hour is allowed.
                "dayStart" | "dayEnd" if v.is_null() => {
                    obj.remove(k);
                }
                "dayStart" | "dayEnd" => {
                    let t = parse_clock(v, k)?;
                    obj.insert(k.clone(), Value::String(t.format("%H:%M").to_string()));
                }
                _ => return Err(format!("unknown timetable field: {}", k)),
            },
            SetupSection::Notifications => match k.as_str() {
                "notifyOnRegistration" | "notifyOnLogin" | "notifyOnProfileUpdate"
                | "notifyOnAttendance" | "notifyOnFees" | "notifyOnSalary" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown notifications field: {}", k)),
            },
        }
    }

    if section == SetupSection::Timetable {
        let start = obj
            .get("dayStart")
            .map(|v| parse_clock(v, "dayStart"))
            .transpose()?;
        let end = obj.get("dayEnd").map(|v| parse_clock(v, "dayEnd")).transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err("dayStart must be before dayEnd".into());
            }
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed stored value must not block the workspace.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn registration_rules(conn: &Connection) -> RegistrationRules {
    let defaults = RegistrationRules::default();
    let Ok(obj) = load_section(conn, SetupSection::Registration) else {
        return defaults;
    };
    RegistrationRules {
        min_student_age: obj
            .get("minStudentAge")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(defaults.min_student_age),
        min_teacher_age: obj
            .get("minTeacherAge")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(defaults.min_teacher_age),
        min_password_length: obj
            .get("minPasswordLength")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(defaults.min_password_length),
    }
}

#[derive(Debug, Clone)]
pub struct TimetableRules {
    pub working_days: Vec<Weekday>,
    pub day_start: Option<NaiveTime>,
    pub day_end: Option<NaiveTime>,
}

impl Default for TimetableRules {
    fn default() -> Self {
        Self {
            working_days: Weekday::ALL.to_vec(),
            day_start: None,
            day_end: None,
        }
    }
}

impl TimetableRules {
    pub fn allows_day(&self, day: Weekday) -> bool {
        self.working_days.contains(&day)
    }

    pub fn within_hours(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.day_start.map_or(true, |s| start >= s) && self.day_end.map_or(true, |e| end <= e)
    }

    pub fn hours_label(&self) -> String {
        let fmt = |t: Option<NaiveTime>, open: &str| {
            t.map(|t| t.format("%H:%M").to_string())
                .unwrap_or_else(|| open.to_string())
        };
        format!("{}-{}", fmt(self.day_start, "00:00"), fmt(self.day_end, "24:00"))
    }
}

pub fn timetable_rules(conn: &Connection) -> TimetableRules {
    let defaults = TimetableRules::default();
    let Ok(obj) = load_section(conn, SetupSection::Timetable) else {
        return defaults;
    };
    let working_days = obj
        .get("workingDays")
        .and_then(|v| parse_working_days(v, "workingDays").ok())
        .unwrap_or_else(|| defaults.working_days.clone());
    let day_start = obj
        .get("dayStart")
        .and_then(|v| parse_clock(v, "dayStart").ok())
        .or(defaults.day_start);
    let day_end = obj
        .get("dayEnd")
        .and_then(|v| parse_clock(v, "dayEnd").ok())
        .or(defaults.day_end);
    TimetableRules {
        working_days,
        day_start,
        day_end,
    }
}

/// Whether the notifications section enables `field`. Unknown fields read as enabled.
pub fn notification_enabled(conn: &Connection, field: &str) -> bool {
    load_section(conn, SetupSection::Notifications)
        .ok()
        .and_then(|obj| obj.get(field).and_then(|v| v.as_bool()))
        .unwrap_or(true)
}
