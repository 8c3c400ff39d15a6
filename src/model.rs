use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Stored ground-truth outcome for a (student, date) pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Outcome {
    Absent,
    EntryOnly,
    ExitOnly,
    Complete,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Absent => "absent",
            Outcome::EntryOnly => "entry-only",
            Outcome::ExitOnly => "exit-only",
            Outcome::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "absent" => Some(Outcome::Absent),
            "entry-only" => Some(Outcome::EntryOnly),
            "exit-only" => Some(Outcome::ExitOnly),
            "complete" => Some(Outcome::Complete),
            _ => None,
        }
    }
}

/// Five-way status computed on read. Never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DerivedStatus {
    Unmarked,
    EntryOnly,
    ExitOnly,
    Complete,
    Absent,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedStatus::Unmarked => "unmarked",
            DerivedStatus::EntryOnly => "entry-only",
            DerivedStatus::ExitOnly => "exit-only",
            DerivedStatus::Complete => "complete",
            DerivedStatus::Absent => "absent",
        }
    }

    /// True for any status backed by a presence scan.
    pub fn is_present(&self) -> bool {
        matches!(
            self,
            DerivedStatus::EntryOnly | DerivedStatus::ExitOnly | DerivedStatus::Complete
        )
    }
}

/// Which gate a scan came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScanKind {
    Entry,
    Exit,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Entry => "entry",
            ScanKind::Exit => "exit",
        }
    }
}

/// What the caller is asking to record: a presence scan or a manual absence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MarkRequest {
    Present,
    Absent,
}

impl MarkRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkRequest::Present => "present",
            MarkRequest::Absent => "absent",
        }
    }
}

/// Input for adding a student to a roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStudent {
    pub name: String,
    pub roll_number: String,
    pub class: String,
    pub section: String,
    pub school_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    pub class: String,
    pub section: String,
    pub school_name: String,
    pub teacher_id: Option<String>,
    pub present_days: i64,
    pub absent_days: i64,
    pub total_days: i64,
}

/// One attendance row per student per calendar day. Rows with
/// `synced = false` are what the sync coordinator drains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: String,
    pub date: NaiveDate,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub outcome: Outcome,
    pub marked_by: Option<String>,
    pub synced: bool,
}

/// Attendance event as the remote store returns it (no local row id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub student_id: String,
    pub attendance_date: NaiveDate,
    pub status: String,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub marked_by: Option<String>,
}

/// Roster-wide counts for one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayStats {
    pub total: usize,
    pub complete: usize,
    pub entry_only: usize,
    pub absent: usize,
    pub not_marked: usize,
}
