use crate::error::AttendanceError;
use crate::model::{AttendanceRecord, NewStudent, Outcome, Student};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool, AttendanceError> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match path_part.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<(), AttendanceError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| AttendanceError::Db(sqlx::Error::Migrate(Box::new(err))))?;
    Ok(())
}

fn map_student(row: &SqliteRow) -> Student {
    Student {
        id: row.get("id"),
        name: row.get("name"),
        roll_number: row.get("roll_number"),
        class: row.get("class"),
        section: row.get("section"),
        school_name: row.get("school_name"),
        teacher_id: row.get("teacher_id"),
        present_days: row.get("present_days"),
        absent_days: row.get("absent_days"),
        total_days: row.get("total_days"),
    }
}

fn map_record(row: &SqliteRow) -> Result<AttendanceRecord, sqlx::Error> {
    let raw: String = row.get("outcome");
    let outcome = Outcome::parse(&raw)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown outcome '{raw}'").into()))?;
    Ok(AttendanceRecord {
        id: row.get("id"),
        student_id: row.get("student_id"),
        date: row.get("attendance_date"),
        entry_time: row.get("entry_time"),
        exit_time: row.get("exit_time"),
        outcome,
        marked_by: row.get("marked_by"),
        synced: row.get("synced"),
    })
}

const STUDENT_COLS: &str = "id, name, roll_number, class, section, school_name, teacher_id, \
     present_days, absent_days, total_days";

const RECORD_COLS: &str =
    "id, student_id, attendance_date, entry_time, exit_time, outcome, marked_by, synced";

#[instrument(skip_all)]
pub async fn add_student(
    pool: &Pool,
    teacher_id: &str,
    new: &NewStudent,
) -> Result<Student, AttendanceError> {
    let name = new.name.trim();
    let roll_number = new.roll_number.trim();
    let class = new.class.trim();
    if name.is_empty() || roll_number.is_empty() || class.is_empty() {
        return Err(AttendanceError::InvalidStudent(
            "name, roll number and class are required",
        ));
    }
    let section = new.section.trim();
    let section = if section.is_empty() { "A" } else { section };

    let mut tx = pool.begin().await?;
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM students WHERE roll_number = ? AND class = ? AND section = ?",
    )
    .bind(roll_number)
    .bind(class)
    .bind(section)
    .fetch_optional(&mut *tx)
    .await?;
    if existing.is_some() {
        return Err(AttendanceError::DuplicateRoll {
            roll_number: roll_number.to_string(),
            class: class.to_string(),
        });
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO students (id, name, roll_number, class, section, school_name, teacher_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(roll_number)
    .bind(class)
    .bind(section)
    .bind(new.school_name.trim())
    .bind(teacher_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Student {
        id,
        name: name.to_string(),
        roll_number: roll_number.to_string(),
        class: class.to_string(),
        section: section.to_string(),
        school_name: new.school_name.trim().to_string(),
        teacher_id: Some(teacher_id.to_string()),
        present_days: 0,
        absent_days: 0,
        total_days: 0,
    })
}

/// Detach a student from a teacher's roster. History and counters survive.
#[instrument(skip_all)]
pub async fn remove_student(
    pool: &Pool,
    student_id: &str,
    teacher_id: &str,
) -> Result<(), AttendanceError> {
    let res = sqlx::query("UPDATE students SET teacher_id = NULL WHERE id = ? AND teacher_id = ?")
        .bind(student_id)
        .bind(teacher_id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(AttendanceError::StudentNotFound);
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn students_for_teacher(
    pool: &Pool,
    teacher_id: &str,
) -> Result<Vec<Student>, AttendanceError> {
    let rows = sqlx::query(&format!(
        "SELECT {STUDENT_COLS} FROM students WHERE teacher_id = ? ORDER BY roll_number"
    ))
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(map_student).collect())
}

#[instrument(skip_all)]
pub async fn student_by_id(pool: &Pool, id: &str) -> Result<Option<Student>, AttendanceError> {
    let row = sqlx::query(&format!("SELECT {STUDENT_COLS} FROM students WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(map_student))
}

pub(crate) async fn student_by_id_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<Option<Student>, AttendanceError> {
    let row = sqlx::query(&format!("SELECT {STUDENT_COLS} FROM students WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.as_ref().map(map_student))
}

#[instrument(skip_all)]
pub async fn record_for_day(
    pool: &Pool,
    student_id: &str,
    date: NaiveDate,
) -> Result<Option<AttendanceRecord>, AttendanceError> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLS} FROM attendance WHERE student_id = ? AND attendance_date = ?"
    ))
    .bind(student_id)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(map_record).transpose()?)
}

pub(crate) async fn record_for_day_tx(
    tx: &mut Transaction<'_, Sqlite>,
    student_id: &str,
    date: NaiveDate,
) -> Result<Option<AttendanceRecord>, AttendanceError> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLS} FROM attendance WHERE student_id = ? AND attendance_date = ?"
    ))
    .bind(student_id)
    .bind(date)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.as_ref().map(map_record).transpose()?)
}

#[instrument(skip_all)]
pub async fn records_for_date(
    pool: &Pool,
    date: NaiveDate,
) -> Result<Vec<AttendanceRecord>, AttendanceError> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLS} FROM attendance WHERE attendance_date = ?"
    ))
    .bind(date)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| map_record(r).map_err(AttendanceError::from))
        .collect()
}

/// Per-student history, newest day first.
#[instrument(skip_all)]
pub async fn records_for_student(
    pool: &Pool,
    student_id: &str,
) -> Result<Vec<AttendanceRecord>, AttendanceError> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLS} FROM attendance WHERE student_id = ? ORDER BY attendance_date DESC"
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| map_record(r).map_err(AttendanceError::from))
        .collect()
}

#[instrument(skip_all)]
pub async fn unsynced_records(pool: &Pool) -> Result<Vec<AttendanceRecord>, AttendanceError> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLS} FROM attendance WHERE synced = 0 ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| map_record(r).map_err(AttendanceError::from))
        .collect()
}

#[instrument(skip_all)]
pub async fn unsynced_count(pool: &Pool) -> Result<i64, AttendanceError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attendance WHERE synced = 0")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn mark_synced(pool: &Pool, ids: &[i64]) -> Result<(), AttendanceError> {
    if ids.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!("UPDATE attendance SET synced = 1 WHERE id IN ({placeholders})");
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    query.execute(pool).await?;
    Ok(())
}

pub(crate) async fn insert_record_tx(
    tx: &mut Transaction<'_, Sqlite>,
    student_id: &str,
    date: NaiveDate,
    outcome: Outcome,
    entry_time: Option<DateTime<Utc>>,
    exit_time: Option<DateTime<Utc>>,
    marked_by: &str,
) -> Result<i64, AttendanceError> {
    let rec = sqlx::query(
        "INSERT INTO attendance (student_id, attendance_date, entry_time, exit_time, outcome, marked_by, synced) \
         VALUES (?, ?, ?, ?, ?, ?, 0) RETURNING id",
    )
    .bind(student_id)
    .bind(date)
    .bind(entry_time)
    .bind(exit_time)
    .bind(outcome.as_str())
    .bind(marked_by)
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

/// Rewrite an existing row. Always resets `synced` so the change is pushed
/// again on the next pass.
pub(crate) async fn update_record_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
    outcome: Outcome,
    entry_time: Option<DateTime<Utc>>,
    exit_time: Option<DateTime<Utc>>,
    marked_by: &str,
) -> Result<(), AttendanceError> {
    sqlx::query(
        "UPDATE attendance SET outcome = ?, entry_time = ?, exit_time = ?, marked_by = ?, synced = 0 \
         WHERE id = ?",
    )
    .bind(outcome.as_str())
    .bind(entry_time)
    .bind(exit_time)
    .bind(marked_by)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Apply counter deltas, flooring each counter at zero.
pub(crate) async fn bump_counters_tx(
    tx: &mut Transaction<'_, Sqlite>,
    student_id: &str,
    present_delta: i64,
    absent_delta: i64,
    total_delta: i64,
) -> Result<(), AttendanceError> {
    sqlx::query(
        "UPDATE students SET \
             present_days = MAX(0, present_days + ?), \
             absent_days = MAX(0, absent_days + ?), \
             total_days = MAX(0, total_days + ?) \
         WHERE id = ?",
    )
    .bind(present_delta)
    .bind(absent_delta)
    .bind(total_delta)
    .bind(student_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// First-run convenience: insert the demo roster when the table is empty.
/// Demo students are unowned so any teacher can mark them.
#[instrument(skip_all)]
pub async fn seed_demo_students(pool: &Pool) -> Result<usize, AttendanceError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(0);
    }

    let demo = [
        ("Rahul Kumar", "501"),
        ("Priya Sharma", "502"),
        ("Amit Singh", "503"),
        ("Neha Patel", "504"),
        ("Vikram Rao", "505"),
        ("Anjali Verma", "506"),
        ("Rohit Mehta", "507"),
        ("Kavya Reddy", "508"),
    ];
    let mut tx = pool.begin().await?;
    for (name, roll) in demo {
        sqlx::query(
            "INSERT INTO students (id, name, roll_number, class, section, school_name) \
             VALUES (?, ?, ?, '5A', 'A', 'Rural School')",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(name)
        .bind(roll)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(demo.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn new_student(name: &str, roll: &str) -> NewStudent {
        NewStudent {
            name: name.into(),
            roll_number: roll.into(),
            class: "5A".into(),
            section: "A".into(),
            school_name: "Rural School".into(),
        }
    }

    #[tokio::test]
    async fn add_and_list_students() {
        let pool = setup_pool().await;
        let s = add_student(&pool, "t-1", &new_student("Asha", "10"))
            .await
            .unwrap();
        assert_eq!(s.total_days, 0);

        add_student(&pool, "t-1", &new_student("Bharat", "2"))
            .await
            .unwrap();

        let roster = students_for_teacher(&pool, "t-1").await.unwrap();
        assert_eq!(roster.len(), 2);
        // Roll numbers are TEXT, so the ordering is lexicographic.
        assert_eq!(roster[0].roll_number, "10");
        assert_eq!(roster[1].roll_number, "2");
    }

    #[tokio::test]
    async fn duplicate_roll_rejected() {
        let pool = setup_pool().await;
        add_student(&pool, "t-1", &new_student("Asha", "7"))
            .await
            .unwrap();
        let err = add_student(&pool, "t-2", &new_student("Asha Again", "7"))
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::DuplicateRoll { .. }));
    }

    #[tokio::test]
    async fn remove_requires_owner() {
        let pool = setup_pool().await;
        let s = add_student(&pool, "t-1", &new_student("Asha", "7"))
            .await
            .unwrap();

        let err = remove_student(&pool, &s.id, "t-2").await.unwrap_err();
        assert!(matches!(err, AttendanceError::StudentNotFound));

        remove_student(&pool, &s.id, "t-1").await.unwrap();
        let kept = student_by_id(&pool, &s.id).await.unwrap().unwrap();
        assert_eq!(kept.teacher_id, None);
        assert!(students_for_teacher(&pool, "t-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = setup_pool().await;
        assert_eq!(seed_demo_students(&pool).await.unwrap(), 8);
        assert_eq!(seed_demo_students(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unsynced_lifecycle() {
        let pool = setup_pool().await;
        let s = add_student(&pool, "t-1", &new_student("Asha", "7"))
            .await
            .unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();

        let mut tx = pool.begin().await.unwrap();
        let id = insert_record_tx(
            &mut tx,
            &s.id,
            date,
            Outcome::EntryOnly,
            Some(Utc::now()),
            None,
            "t-1",
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let pending = unsynced_records(&pool).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        mark_synced(&pool, &[id]).await.unwrap();
        assert_eq!(unsynced_count(&pool).await.unwrap(), 0);

        // An update requeues the row.
        let mut tx = pool.begin().await.unwrap();
        update_record_tx(&mut tx, id, Outcome::Complete, Some(Utc::now()), Some(Utc::now()), "t-1")
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(unsynced_count(&pool).await.unwrap(), 1);
    }
}
