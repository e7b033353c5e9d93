//! Attendance business rules: Present/Late determination and the mark
//! operation.

use chrono::{NaiveDateTime, NaiveTime};

use crate::store::{InsertOutcome, MarkMethod, Store, StoreError};

/// Time format used by `employees.shift_start`.
const SHIFT_TIME_FMT: &str = "%H:%M:%S";

/// Day-level attendance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Present,
    Late,
}

impl DayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayStatus::Present => "Present",
            DayStatus::Late => "Late",
        }
    }
}

/// Outcome of a mark attempt, surfaced to the dispatcher and to manual
/// check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// Attendance recorded; carries the employee's full name for the
    /// welcome message.
    Marked { full_name: String },
    /// Already marked today; expected, not an error.
    AlreadyMarked,
    /// The code is not enrolled. No insert is attempted.
    NotFound,
}

/// Present vs Late for a mark happening at `now`.
///
/// Strictly after shift start is Late. A missing, blank, or unparseable
/// shift start defaults to Present.
pub fn compute_status(shift_start: Option<&str>, now: NaiveDateTime) -> DayStatus {
    let Some(raw) = shift_start else {
        return DayStatus::Present;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DayStatus::Present;
    }

    match NaiveTime::parse_from_str(trimmed, SHIFT_TIME_FMT) {
        Ok(shift) => {
            if now.time() > shift {
                DayStatus::Late
            } else {
                DayStatus::Present
            }
        }
        Err(_) => {
            tracing::warn!(shift_start = trimmed, "unparseable shift start, defaulting to Present");
            DayStatus::Present
        }
    }
}

/// Look up the employee, compute the day status, and insert the record.
pub fn mark(
    store: &Store,
    emp_code: &str,
    method: MarkMethod,
    now: NaiveDateTime,
) -> Result<MarkOutcome, StoreError> {
    let Some((full_name, shift_start)) = store.shift_info(emp_code)? else {
        return Ok(MarkOutcome::NotFound);
    };

    let status = compute_status(shift_start.as_deref(), now);
    let date = now.format("%Y-%m-%d").to_string();
    let in_time = now.format(SHIFT_TIME_FMT).to_string();

    match store.insert_attendance(emp_code, &date, &in_time, status.as_str(), method)? {
        InsertOutcome::Inserted => Ok(MarkOutcome::Marked { full_name }),
        InsertOutcome::AlreadyMarked => Ok(MarkOutcome::AlreadyMarked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewEmployee;
    use chrono::NaiveDate;
    use presence_core::Embedding;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn no_shift_start_is_present() {
        assert_eq!(compute_status(None, at(23, 0, 0)), DayStatus::Present);
        assert_eq!(compute_status(Some("  "), at(23, 0, 0)), DayStatus::Present);
    }

    #[test]
    fn before_shift_start_is_present() {
        assert_eq!(
            compute_status(Some("09:30:00"), at(9, 15, 0)),
            DayStatus::Present
        );
    }

    #[test]
    fn exactly_at_shift_start_is_present() {
        assert_eq!(
            compute_status(Some("09:30:00"), at(9, 30, 0)),
            DayStatus::Present
        );
    }

    #[test]
    fn after_shift_start_is_late() {
        assert_eq!(
            compute_status(Some("09:30:00"), at(9, 30, 1)),
            DayStatus::Late
        );
    }

    #[test]
    fn garbage_shift_start_defaults_to_present() {
        assert_eq!(
            compute_status(Some("nine-ish"), at(13, 0, 0)),
            DayStatus::Present
        );
    }

    #[test]
    fn mark_unknown_code_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let outcome = mark(&store, "E404", MarkMethod::Face, at(9, 0, 0)).unwrap();
        assert_eq!(outcome, MarkOutcome::NotFound);
    }

    #[test]
    fn mark_inserts_then_reports_already_marked() {
        let store = Store::open_in_memory().unwrap();
        store
            .add_employee(
                &NewEmployee {
                    code: "E001".into(),
                    full_name: "Asha Rao".into(),
                    joining_date: None,
                    shift_start: Some("09:30:00".into()),
                },
                &[Embedding::new(vec![1.0])],
            )
            .unwrap();

        let first = mark(&store, "E001", MarkMethod::Face, at(9, 0, 0)).unwrap();
        assert_eq!(
            first,
            MarkOutcome::Marked {
                full_name: "Asha Rao".into()
            }
        );

        let second = mark(&store, "E001", MarkMethod::Face, at(9, 5, 0)).unwrap();
        assert_eq!(second, MarkOutcome::AlreadyMarked);
    }
}
