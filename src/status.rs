//! Pure status derivation. No I/O here: these functions are the single
//! source of truth for how a stored row (or its absence) reads as a status,
//! and for the roster-wide day counts.

use crate::model::{AttendanceRecord, DayStats, DerivedStatus, Outcome, Student};
use std::collections::HashMap;

/// Map a student's attendance row for one day to their five-way status.
///
/// Total over every reachable input: a missing row is `Unmarked`, a stored
/// `Absent` or `Complete` outcome wins outright, and otherwise the presence
/// of the two timestamps decides.
pub fn derive_status(record: Option<&AttendanceRecord>) -> DerivedStatus {
    let Some(record) = record else {
        return DerivedStatus::Unmarked;
    };
    match record.outcome {
        Outcome::Absent => DerivedStatus::Absent,
        Outcome::Complete => DerivedStatus::Complete,
        _ => match (record.entry_time.is_some(), record.exit_time.is_some()) {
            (true, true) => DerivedStatus::Complete,
            (true, false) => DerivedStatus::EntryOnly,
            (false, true) => DerivedStatus::ExitOnly,
            (false, false) => DerivedStatus::Unmarked,
        },
    }
}

/// Roster-wide counts for one day, keyed by today's records per student id.
///
/// `not_marked` is defined as the remainder `total - complete - entry_only -
/// absent`, so exit-only students land in it rather than in a bucket of
/// their own. That is the historical accounting and callers depend on the
/// four explicit buckets summing with the remainder to `total`.
pub fn aggregate(roster: &[Student], records: &HashMap<String, AttendanceRecord>) -> DayStats {
    let total = roster.len();
    let mut complete = 0;
    let mut entry_only = 0;
    let mut absent = 0;

    for student in roster {
        match derive_status(records.get(&student.id)) {
            DerivedStatus::Complete => complete += 1,
            DerivedStatus::EntryOnly => entry_only += 1,
            DerivedStatus::Absent => absent += 1,
            DerivedStatus::ExitOnly | DerivedStatus::Unmarked => {}
        }
    }

    DayStats {
        total,
        complete,
        entry_only,
        absent,
        not_marked: total - complete - entry_only - absent,
    }
}
