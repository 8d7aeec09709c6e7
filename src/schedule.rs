use chrono::{Datelike, NaiveDate, NaiveTime};
use rusqlite::{types::Type, Connection};
use thiserror::Error;

pub const TIME_STORAGE_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 6] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    /// Accepts full names and three-letter abbreviations, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|d| {
            let full = d.as_str().to_ascii_lowercase();
            t == full || (t.len() == 3 && full.starts_with(&t))
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
        }
    }

    /// Sundays have no timetable.
    pub fn from_date(date: NaiveDate) -> Option<Self> {
        match date.weekday() {
            chrono::Weekday::Mon => Some(Weekday::Monday),
            chrono::Weekday::Tue => Some(Weekday::Tuesday),
            chrono::Weekday::Wed => Some(Weekday::Wednesday),
            chrono::Weekday::Thu => Some(Weekday::Thursday),
            chrono::Weekday::Fri => Some(Weekday::Friday),
            chrono::Weekday::Sat => Some(Weekday::Saturday),
            chrono::Weekday::Sun => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("Start time must be before end time.")]
    InvalidTimeRange,
    #[error("Lecture time clashes with an existing lecture for this batch.")]
    ScheduleConflict { conflicting_ids: Vec<String> },
}

impl ScheduleError {
    pub fn code(&self) -> &'static str {
        match self {
            ScheduleError::InvalidTimeRange => "invalid_time_range",
            ScheduleError::ScheduleConflict { .. } => "schedule_conflict",
        }
    }
}

/// One lecture as seen by the conflict check. `id` is `None` for a lecture
/// that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LectureSlot {
    pub id: Option<String>,
    pub batch_id: String,
    pub day: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Half-open `[start, end)` intersection test.
pub fn overlaps(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && b_start < a_end
}

/// Decides whether `candidate` may be persisted next to `existing`.
///
/// Lectures on another batch or day are never in conflict, and a stored
/// lecture with the candidate's own id is skipped so that re-saving an
/// unchanged lecture succeeds. Every clashing id is reported.
pub fn validate<'a, I>(candidate: &LectureSlot, existing: I) -> Result<(), ScheduleError>
where
    I: IntoIterator<Item = &'a LectureSlot>,
{
    if candidate.start >= candidate.end {
        return Err(ScheduleError::InvalidTimeRange);
    }

    let conflicting_ids: Vec<String> = existing
        .into_iter()
        .filter(|other| other.batch_id == candidate.batch_id && other.day == candidate.day)
        .filter(|other| match (&candidate.id, &other.id) {
            (Some(own), Some(theirs)) => own != theirs,
            _ => true,
        })
        .filter(|other| overlaps(candidate.start, candidate.end, other.start, other.end))
        .map(|other| other.id.clone().unwrap_or_default())
        .collect();

    if conflicting_ids.is_empty() {
        Ok(())
    } else {
        Err(ScheduleError::ScheduleConflict { conflicting_ids })
    }
}

pub fn parse_time(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    let t = s.trim();
    NaiveTime::parse_from_str(t, TIME_STORAGE_FORMAT).or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
}

pub fn format_time(t: NaiveTime) -> String {
    t.format(TIME_STORAGE_FORMAT).to_string()
}

/// Stored lectures for one `(batch, day)`, optionally leaving one id out.
pub fn load_day_slots(
    conn: &Connection,
    batch_id: &str,
    day: Weekday,
    exclude_id: Option<&str>,
) -> rusqlite::Result<Vec<LectureSlot>> {
    let mut stmt = conn.prepare(
        "SELECT id, start_time, end_time
         FROM lectures
         WHERE batch_id = ? AND day = ? AND (? IS NULL OR id <> ?)
         ORDER BY start_time",
    )?;
    let rows = stmt.query_map((batch_id, day.as_str(), exclude_id, exclude_id), |r| {
        let id: String = r.get(0)?;
        let start_raw: String = r.get(1)?;
        let end_raw: String = r.get(2)?;
        let start = parse_time(&start_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
        let end = parse_time(&end_raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        Ok(LectureSlot {
            id: Some(id),
            batch_id: batch_id.to_string(),
            day,
            start,
            end,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_time(s).expect("time")
    }

    fn slot(id: Option<&str>, batch: &str, day: Weekday, start: &str, end: &str) -> LectureSlot {
        LectureSlot {
            id: id.map(|s| s.to_string()),
            batch_id: batch.to_string(),
            day,
            start: t(start),
            end: t(end),
        }
    }

    #[test]
    fn start_not_before_end_is_rejected() {
        let none: Vec<LectureSlot> = Vec::new();
        let equal = slot(None, "b1", Weekday::Monday, "09:00", "09:00");
        assert_eq!(validate(&equal, &none), Err(ScheduleError::InvalidTimeRange));
        let reversed = slot(None, "b1", Weekday::Monday, "10:00", "09:00");
        assert_eq!(validate(&reversed, &none), Err(ScheduleError::InvalidTimeRange));
    }

    #[test]
    fn ordering_is_checked_before_overlap() {
        let existing = [slot(Some("a"), "b1", Weekday::Monday, "09:00", "11:00")];
        let bad = slot(None, "b1", Weekday::Monday, "10:30", "10:00");
        assert_eq!(validate(&bad, &existing), Err(ScheduleError::InvalidTimeRange));
    }

    #[test]
    fn adjacent_lectures_do_not_clash() {
        let a = slot(Some("a"), "b1", Weekday::Monday, "09:00", "10:00");
        let b = slot(None, "b1", Weekday::Monday, "10:00", "11:00");
        assert_eq!(validate(&b, [&a]), Ok(()));
        let before = slot(None, "b1", Weekday::Monday, "08:00", "09:00");
        assert_eq!(validate(&before, [&a]), Ok(()));
    }

    #[test]
    fn one_minute_overlap_clashes() {
        let a = slot(Some("a"), "b1", Weekday::Monday, "09:00", "10:00");
        let b = slot(None, "b1", Weekday::Monday, "09:59", "10:30");
        assert_eq!(
            validate(&b, [&a]),
            Err(ScheduleError::ScheduleConflict {
                conflicting_ids: vec!["a".to_string()]
            })
        );
    }

    #[test]
    fn containment_clashes_both_ways() {
        let outer = slot(Some("outer"), "b1", Weekday::Friday, "09:00", "12:00");
        let inner = slot(None, "b1", Weekday::Friday, "10:00", "10:30");
        assert!(validate(&inner, [&outer]).is_err());

        let small = slot(Some("small"), "b1", Weekday::Friday, "10:00", "10:30");
        let big = slot(None, "b1", Weekday::Friday, "09:00", "12:00");
        assert!(validate(&big, [&small]).is_err());
    }

    #[test]
    fn other_day_or_batch_never_clashes() {
        let a = slot(Some("a"), "b1", Weekday::Monday, "09:00", "10:00");
        let tuesday = slot(None, "b1", Weekday::Tuesday, "09:00", "10:00");
        assert_eq!(validate(&tuesday, [&a]), Ok(()));
        let other_batch = slot(None, "b2", Weekday::Monday, "09:00", "10:00");
        assert_eq!(validate(&other_batch, [&a]), Ok(()));
    }

    #[test]
    fn editing_skips_own_record() {
        let stored = slot(Some("a"), "b1", Weekday::Monday, "09:00", "10:00");
        let same = stored.clone();
        assert_eq!(validate(&same, [&stored]), Ok(()));

        let widened = slot(Some("a"), "b1", Weekday::Monday, "08:30", "10:30");
        assert_eq!(validate(&widened, [&stored]), Ok(()));
    }

    #[test]
    fn every_clashing_lecture_is_reported() {
        let existing = [
            slot(Some("a"), "b1", Weekday::Wednesday, "09:00", "10:00"),
            slot(Some("b"), "b1", Weekday::Wednesday, "10:00", "11:00"),
            slot(Some("c"), "b1", Weekday::Wednesday, "11:00", "12:00"),
        ];
        let wide = slot(None, "b1", Weekday::Wednesday, "09:30", "11:00");
        match validate(&wide, &existing) {
            Err(ScheduleError::ScheduleConflict { conflicting_ids }) => {
                assert_eq!(conflicting_ids, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn messages_match_user_facing_text() {
        assert_eq!(
            ScheduleError::InvalidTimeRange.to_string(),
            "Start time must be before end time."
        );
        assert_eq!(
            ScheduleError::ScheduleConflict {
                conflicting_ids: vec![]
            }
            .to_string(),
            "Lecture time clashes with an existing lecture for this batch."
        );
    }

    #[test]
    fn weekday_parsing_and_dates() {
        assert_eq!(Weekday::parse("monday"), Some(Weekday::Monday));
        assert_eq!(Weekday::parse(" SAT "), Some(Weekday::Saturday));
        assert_eq!(Weekday::parse("Sunday"), None);
        assert_eq!(Weekday::parse("m"), None);

        let sunday = NaiveDate::from_ymd_opt(2026, 3, 1).expect("date");
        assert_eq!(Weekday::from_date(sunday), None);
        let thursday = NaiveDate::from_ymd_opt(2026, 3, 5).expect("date");
        assert_eq!(Weekday::from_date(thursday), Some(Weekday::Thursday));
    }

    #[test]
    fn times_accept_minutes_or_seconds() {
        assert_eq!(format_time(t("09:05")), "09:05:00");
        assert_eq!(format_time(t("13:45:30")), "13:45:30");
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("noon").is_err());
    }
}
