//! The event mutation service: every attendance write goes through here,
//! and each call is one SQLite transaction so the event row and the roster
//! counters never diverge.

use crate::config::Policy;
use crate::db::{self, Pool};
use crate::error::AttendanceError;
use crate::model::{
    AttendanceRecord, DayStats, DerivedStatus, MarkRequest, Outcome, ScanKind, Student,
};
use crate::status::{aggregate, derive_status};
use chrono::{DateTime, Local, NaiveDate, Utc};
use sqlx::{Sqlite, Transaction};
use std::collections::HashMap;
use tracing::{info, instrument};

/// Calendar date the device considers "today". Past dates are never
/// mutated; a skewed clock is a known divergence risk vs the server.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn owned_student(
    tx: &mut Transaction<'_, Sqlite>,
    student_id: &str,
    marked_by: &str,
) -> Result<Student, AttendanceError> {
    let student = db::student_by_id_tx(tx, student_id)
        .await?
        .ok_or(AttendanceError::StudentNotFound)?;
    // Unowned students are markable by anyone.
    if let Some(owner) = &student.teacher_id {
        if owner != marked_by {
            return Err(AttendanceError::StudentNotFound);
        }
    }
    Ok(student)
}

/// Record an entry or exit scan (or a manual absence) for today.
///
/// Counters move only when this creates the day's first record; later scans
/// on the same day update the row in place.
#[instrument(skip(pool, policy))]
pub async fn record_scan(
    pool: &Pool,
    policy: &Policy,
    student_id: &str,
    kind: ScanKind,
    mark: MarkRequest,
    marked_by: &str,
) -> Result<AttendanceRecord, AttendanceError> {
    let date = today();
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    let student = owned_student(&mut tx, student_id, marked_by).await?;

    let record = match db::record_for_day_tx(&mut tx, student_id, date).await? {
        None => create_first_record(&mut tx, policy, student_id, date, kind, mark, now, marked_by)
            .await?,
        Some(existing) => {
            apply_scan(&mut tx, &existing, kind, mark, now, marked_by).await?
        }
    };
    tx.commit().await?;

    info!(
        student = %student.name,
        status = derive_status(Some(&record)).as_str(),
        "scan recorded"
    );
    Ok(record)
}

#[allow(clippy::too_many_arguments)]
async fn create_first_record(
    tx: &mut Transaction<'_, Sqlite>,
    policy: &Policy,
    student_id: &str,
    date: NaiveDate,
    kind: ScanKind,
    mark: MarkRequest,
    now: DateTime<Utc>,
    marked_by: &str,
) -> Result<AttendanceRecord, AttendanceError> {
    let (outcome, entry_time, exit_time) = match (kind, mark) {
        (_, MarkRequest::Absent) => (Outcome::Absent, None, None),
        (ScanKind::Entry, MarkRequest::Present) => {
            if policy.require_double_verification {
                (Outcome::EntryOnly, Some(now), None)
            } else {
                // Single-tap deployments: one presence scan settles the day.
                (Outcome::Complete, Some(now), Some(now))
            }
        }
        (ScanKind::Exit, MarkRequest::Present) => {
            if !policy.allow_exit_without_entry {
                return Err(AttendanceError::ExitBeforeEntry);
            }
            (Outcome::ExitOnly, None, Some(now))
        }
    };

    let id =
        db::insert_record_tx(tx, student_id, date, outcome, entry_time, exit_time, marked_by)
            .await?;

    // First record of the day is the only point that moves counters.
    let (present_delta, absent_delta) = match outcome {
        Outcome::Absent => (0, 1),
        _ => (1, 0),
    };
    db::bump_counters_tx(tx, student_id, present_delta, absent_delta, 1).await?;

    Ok(AttendanceRecord {
        id,
        student_id: student_id.to_string(),
        date,
        entry_time,
        exit_time,
        outcome,
        marked_by: Some(marked_by.to_string()),
        synced: false,
    })
}

async fn apply_scan(
    tx: &mut Transaction<'_, Sqlite>,
    existing: &AttendanceRecord,
    kind: ScanKind,
    mark: MarkRequest,
    now: DateTime<Utc>,
    marked_by: &str,
) -> Result<AttendanceRecord, AttendanceError> {
    if derive_status(Some(existing)) == DerivedStatus::Absent {
        return Err(AttendanceError::MarkedAbsent);
    }
    if mark == MarkRequest::Absent {
        // A presence scan is already on file; switching to absent is an edit.
        return Err(if existing.entry_time.is_some() {
            AttendanceError::AlreadyMarked(ScanKind::Entry)
        } else {
            AttendanceError::AlreadyMarked(ScanKind::Exit)
        });
    }

    let mut updated = existing.clone();
    match kind {
        ScanKind::Entry => {
            if existing.entry_time.is_some() {
                return Err(AttendanceError::AlreadyMarked(ScanKind::Entry));
            }
            updated.entry_time = Some(now);
        }
        ScanKind::Exit => {
            if existing.exit_time.is_some() {
                return Err(AttendanceError::AlreadyMarked(ScanKind::Exit));
            }
            updated.exit_time = Some(now);
        }
    }
    // The missing half of the pair just arrived.
    updated.outcome = Outcome::Complete;
    updated.marked_by = Some(marked_by.to_string());
    updated.synced = false;

    db::update_record_tx(
        tx,
        existing.id,
        updated.outcome,
        updated.entry_time,
        updated.exit_time,
        marked_by,
    )
    .await?;
    Ok(updated)
}

/// Flip today's record between present and absent. Requires an existing
/// record; historical days are immutable.
#[instrument(skip(pool, policy))]
pub async fn edit_today(
    pool: &Pool,
    policy: &Policy,
    student_id: &str,
    new_mark: MarkRequest,
    marked_by: &str,
) -> Result<AttendanceRecord, AttendanceError> {
    let date = today();
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    let student = owned_student(&mut tx, student_id, marked_by).await?;

    let existing = db::record_for_day_tx(&mut tx, student_id, date)
        .await?
        .ok_or(AttendanceError::NoRecordToday)?;
    let status = derive_status(Some(&existing));

    let mut updated = existing.clone();
    match new_mark {
        MarkRequest::Present => {
            if status.is_present() {
                return Err(AttendanceError::NoOpChange(MarkRequest::Present));
            }
            let (outcome, entry_time, exit_time) = if policy.require_double_verification {
                (Outcome::EntryOnly, Some(now), None)
            } else {
                (Outcome::Complete, Some(now), Some(now))
            };
            updated.outcome = outcome;
            updated.entry_time = entry_time;
            updated.exit_time = exit_time;
            db::bump_counters_tx(&mut tx, student_id, 1, -1, 0).await?;
        }
        MarkRequest::Absent => {
            if status == DerivedStatus::Absent {
                return Err(AttendanceError::NoOpChange(MarkRequest::Absent));
            }
            updated.outcome = Outcome::Absent;
            updated.entry_time = None;
            updated.exit_time = None;
            db::bump_counters_tx(&mut tx, student_id, -1, 1, 0).await?;
        }
    }
    updated.marked_by = Some(marked_by.to_string());
    updated.synced = false;

    db::update_record_tx(
        &mut tx,
        existing.id,
        updated.outcome,
        updated.entry_time,
        updated.exit_time,
        marked_by,
    )
    .await?;
    tx.commit().await?;

    info!(
        student = %student.name,
        to = new_mark.as_str(),
        "attendance edited"
    );
    Ok(updated)
}

/// Today's roster-wide counts for one teacher.
#[instrument(skip_all)]
pub async fn today_stats(pool: &Pool, teacher_id: &str) -> Result<DayStats, AttendanceError> {
    let roster = db::students_for_teacher(pool, teacher_id).await?;
    let records = db::records_for_date(pool, today()).await?;
    let by_student: HashMap<String, AttendanceRecord> = records
        .into_iter()
        .map(|r| (r.student_id.clone(), r))
        .collect();
    Ok(aggregate(&roster, &by_student))
}
