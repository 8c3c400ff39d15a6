use crate::model::{MarkRequest, ScanKind};
use thiserror::Error;

/// Everything a marking, roster, or sync call can fail with. Validation
/// variants are resolved locally and never retried; `Network` leaves local
/// state durable and unsynced so the sync coordinator can retry it.
#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("student not found")]
    StudentNotFound,

    #[error("{} already marked for today", .0.as_str())]
    AlreadyMarked(ScanKind),

    #[error("already marked absent for today; use an edit to change it")]
    MarkedAbsent,

    #[error("entry must be marked before exit")]
    ExitBeforeEntry,

    #[error("attendance is already {}", .0.as_str())]
    NoOpChange(MarkRequest),

    #[error("no attendance record found for today")]
    NoRecordToday,

    #[error("a student with roll number {roll_number} already exists in class {class}")]
    DuplicateRoll { roll_number: String, class: String },

    #[error("invalid student: {0}")]
    InvalidStudent(&'static str),

    #[error("remote attendance store unreachable: {0}")]
    Network(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl AttendanceError {
    /// Rejections the caller should surface as-is, without retry.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AttendanceError::StudentNotFound
                | AttendanceError::AlreadyMarked(_)
                | AttendanceError::MarkedAbsent
                | AttendanceError::ExitBeforeEntry
                | AttendanceError::NoOpChange(_)
                | AttendanceError::NoRecordToday
                | AttendanceError::DuplicateRoll { .. }
                | AttendanceError::InvalidStudent(_)
        )
    }
}
