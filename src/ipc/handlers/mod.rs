pub mod accounts;
pub mod attendance;
pub mod auth;
pub mod catalog;
pub mod core;
pub mod notifications;
pub mod profiles;
pub mod setup;
pub mod students;
pub mod teachers;
pub mod timetable;
