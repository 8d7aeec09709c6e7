//! Domain events raised by write paths after their transaction commits, and
//! the sinks that turn them into admin notifications.

use crate::auth::Role;
use crate::setup;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

/// The user an event is about.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub user_id: String,
    pub username: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    Registration(Subject),
    Login(Subject),
    ProfileUpdate(Subject),
    FeesUpdated {
        student: Subject,
        total: f64,
        paid: f64,
    },
    SalaryUpdated {
        teacher: Subject,
        salary: f64,
        paid: f64,
    },
    AttendanceMarked {
        teacher: Subject,
        lecture: String,
        present: usize,
        total: usize,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::Registration(_) => "registration",
            DomainEvent::Login(_) => "login",
            DomainEvent::ProfileUpdate(_) => "profile_update",
            DomainEvent::FeesUpdated { .. } => "fees",
            DomainEvent::SalaryUpdated { .. } => "salary",
            DomainEvent::AttendanceMarked { .. } => "attendance",
        }
    }

    /// Field of the `notifications` setup section gating this event.
    pub fn setting_field(&self) -> &'static str {
        match self {
            DomainEvent::Registration(_) => "notifyOnRegistration",
            DomainEvent::Login(_) => "notifyOnLogin",
            DomainEvent::ProfileUpdate(_) => "notifyOnProfileUpdate",
            DomainEvent::FeesUpdated { .. } => "notifyOnFees",
            DomainEvent::SalaryUpdated { .. } => "notifyOnSalary",
            DomainEvent::AttendanceMarked { .. } => "notifyOnAttendance",
        }
    }

    pub fn subject(&self) -> &Subject {
        match self {
            DomainEvent::Registration(s) | DomainEvent::Login(s) | DomainEvent::ProfileUpdate(s) => s,
            DomainEvent::FeesUpdated { student, .. } => student,
            DomainEvent::SalaryUpdated { teacher, .. } => teacher,
            DomainEvent::AttendanceMarked { teacher, .. } => teacher,
        }
    }

    pub fn title(&self) -> String {
        let s = self.subject();
        match self {
            DomainEvent::Registration(_) => format!("New {} Registration", s.role.label()),
            DomainEvent::Login(_) => format!("{} Logged In", s.full_name),
            DomainEvent::ProfileUpdate(_) => {
                format!("{} Profile Update - {}", s.role.label(), s.full_name)
            }
            DomainEvent::FeesUpdated { .. } => format!("Fees Updated - {}", s.full_name),
            DomainEvent::SalaryUpdated { .. } => format!("Salary Updated - {}", s.full_name),
            DomainEvent::AttendanceMarked { .. } => format!("Attendance Marked - {}", s.full_name),
        }
    }

    pub fn message(&self) -> String {
        let s = self.subject();
        match self {
            DomainEvent::Registration(_) => format!(
                "{} ({}) has registered as {}",
                s.full_name,
                s.username,
                s.role.label()
            ),
            DomainEvent::Login(_) => format!("{} has logged in to the system", s.full_name),
            DomainEvent::ProfileUpdate(_) => format!(
                "{} has updated their profile and is waiting for approval",
                s.full_name
            ),
            DomainEvent::FeesUpdated { total, paid, .. } => format!(
                "Fees for {}: {:.2} paid of {:.2}, {:.2} remaining",
                s.full_name,
                paid,
                total,
                total - paid
            ),
            DomainEvent::SalaryUpdated { salary, paid, .. } => format!(
                "Salary for {}: {:.2} paid of {:.2}, {:.2} remaining",
                s.full_name,
                paid,
                salary,
                salary - paid
            ),
            DomainEvent::AttendanceMarked {
                lecture,
                present,
                total,
                ..
            } => format!(
                "{} marked attendance for {}: {} of {} present",
                s.full_name, lecture, present, total
            ),
        }
    }
}

pub trait NotificationSink {
    fn deliver(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Writes a notification row for the most recently created admin account.
pub struct DbNotifier<'a> {
    pub conn: &'a Connection,
}

impl NotificationSink for DbNotifier<'_> {
    fn deliver(&self, event: &DomainEvent) -> anyhow::Result<()> {
        if !setup::notification_enabled(self.conn, event.setting_field()) {
            return Ok(());
        }
        let admin_id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM users WHERE role = 'admin' ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        let Some(admin_id) = admin_id else {
            return Ok(());
        };
        self.conn.execute(
            "INSERT INTO notifications(id, user_id, kind, title, message, related_user_id, is_read, created_at)
             VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
            (
                Uuid::new_v4().to_string(),
                &admin_id,
                event.kind(),
                event.title(),
                event.message(),
                &event.subject().user_id,
                crate::db::now_ts(),
            ),
        )?;
        Ok(())
    }
}

/// Hands `event` to `sink`. A failing sink never fails the write that raised it.
pub fn publish_to(sink: &dyn NotificationSink, event: &DomainEvent) {
    if let Err(e) = sink.deliver(event) {
        tracing::warn!(kind = event.kind(), error = %e, "notification delivery failed");
    }
}

pub fn publish(conn: &Connection, event: DomainEvent) {
    publish_to(&DbNotifier { conn }, &event);
}
