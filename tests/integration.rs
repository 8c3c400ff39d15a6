use chrono::NaiveDate;
use rollcall::config::Policy;
use rollcall::db;
use rollcall::model::{
    AttendanceRecord, DayStats, MarkRequest, NewStudent, RemoteEvent, ScanKind, Student,
};
use rollcall::remote::RemoteStore;
use rollcall::service;
use rollcall::sync::SyncCoordinator;
use rollcall::error::AttendanceError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const TEACHER: &str = "t-1";

async fn setup_pool() -> db::Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn add_roster(pool: &db::Pool, count: usize) -> Vec<Student> {
    let mut roster = Vec::with_capacity(count);
    for i in 1..=count {
        let s = db::add_student(
            pool,
            TEACHER,
            &NewStudent {
                name: format!("Student {i}"),
                roll_number: format!("{i:03}"),
                class: "5A".into(),
                section: "A".into(),
                school_name: "Rural School".into(),
            },
        )
        .await
        .unwrap();
        roster.push(s);
    }
    roster
}

/// Upsert-keyed in-memory remote, like the real store.
#[derive(Clone, Default)]
struct FakeRemote {
    events: Arc<Mutex<HashMap<(String, NaiveDate), String>>>,
    counters: Arc<Mutex<HashMap<String, (i64, i64, i64)>>>,
}

#[async_trait::async_trait]
impl RemoteStore for FakeRemote {
    async fn upsert_event(&self, event: &AttendanceRecord) -> Result<(), AttendanceError> {
        self.events.lock().await.insert(
            (event.student_id.clone(), event.date),
            event.outcome.as_str().to_string(),
        );
        Ok(())
    }

    async fn update_student_counters(
        &self,
        student_id: &str,
        present_days: i64,
        absent_days: i64,
        total_days: i64,
    ) -> Result<(), AttendanceError> {
        self.counters
            .lock()
            .await
            .insert(student_id.to_string(), (present_days, absent_days, total_days));
        Ok(())
    }

    async fn list_events(
        &self,
        _teacher_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<RemoteEvent>, AttendanceError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|((_, d), _)| *d == date)
            .map(|((student_id, d), status)| RemoteEvent {
                student_id: student_id.clone(),
                attendance_date: *d,
                status: status.clone(),
                entry_time: None,
                exit_time: None,
                marked_by: Some(TEACHER.to_string()),
            })
            .collect())
    }
}

#[tokio::test]
async fn marking_day_end_to_end() {
    let pool = setup_pool().await;
    let policy = Policy::default();
    let roster = add_roster(&pool, 10).await;

    // 3 complete, 2 entry-only, 1 absent, 4 untouched.
    for s in &roster[0..3] {
        service::record_scan(&pool, &policy, &s.id, ScanKind::Entry, MarkRequest::Present, TEACHER)
            .await
            .unwrap();
        service::record_scan(&pool, &policy, &s.id, ScanKind::Exit, MarkRequest::Present, TEACHER)
            .await
            .unwrap();
    }
    for s in &roster[3..5] {
        service::record_scan(&pool, &policy, &s.id, ScanKind::Entry, MarkRequest::Present, TEACHER)
            .await
            .unwrap();
    }
    service::record_scan(
        &pool,
        &policy,
        &roster[5].id,
        ScanKind::Entry,
        MarkRequest::Absent,
        TEACHER,
    )
    .await
    .unwrap();

    let stats = service::today_stats(&pool, TEACHER).await.unwrap();
    assert_eq!(
        stats,
        DayStats {
            total: 10,
            complete: 3,
            entry_only: 2,
            absent: 1,
            not_marked: 4,
        }
    );

    // Everything written so far is still local-only.
    assert_eq!(db::unsynced_count(&pool).await.unwrap(), 6);

    // Connectivity comes back: one pass drains the queue.
    let remote = Arc::new(FakeRemote::default());
    let coordinator = SyncCoordinator::new(pool.clone(), remote.clone(), Duration::from_secs(30));
    coordinator.set_online(false);
    assert_eq!(coordinator.sync_pass().await.unwrap(), 0);
    coordinator.set_online(true);
    assert_eq!(coordinator.sync_pass().await.unwrap(), 6);
    assert_eq!(db::unsynced_count(&pool).await.unwrap(), 0);

    let pushed = remote.events.lock().await.clone();
    assert_eq!(pushed.len(), 6);
    assert_eq!(
        pushed
            .get(&(roster[0].id.clone(), service::today()))
            .map(String::as_str),
        Some("complete")
    );
    assert_eq!(
        pushed
            .get(&(roster[5].id.clone(), service::today()))
            .map(String::as_str),
        Some("absent")
    );

    // Counter snapshots landed with current values.
    let counters = remote.counters.lock().await.clone();
    assert_eq!(counters.get(&roster[0].id), Some(&(1, 0, 1)));
    assert_eq!(counters.get(&roster[5].id), Some(&(0, 1, 1)));

    // The remote can answer the day's roll back to a fresh device.
    let listed = remote.list_events(TEACHER, service::today()).await.unwrap();
    assert_eq!(listed.len(), 6);
}

#[tokio::test]
async fn edit_after_sync_flows_through() {
    let pool = setup_pool().await;
    let policy = Policy::default();
    let roster = add_roster(&pool, 1).await;
    let sid = &roster[0].id;

    service::record_scan(&pool, &policy, sid, ScanKind::Entry, MarkRequest::Present, TEACHER)
        .await
        .unwrap();
    service::record_scan(&pool, &policy, sid, ScanKind::Exit, MarkRequest::Present, TEACHER)
        .await
        .unwrap();

    let remote = Arc::new(FakeRemote::default());
    let coordinator = SyncCoordinator::new(pool.clone(), remote.clone(), Duration::from_secs(30));
    assert_eq!(coordinator.sync_pass().await.unwrap(), 1);

    // Teacher corrects the day after it already synced.
    service::edit_today(&pool, &policy, sid, MarkRequest::Absent, TEACHER)
        .await
        .unwrap();
    assert_eq!(coordinator.sync_pass().await.unwrap(), 1);

    let pushed = remote.events.lock().await.clone();
    assert_eq!(
        pushed.get(&(sid.clone(), service::today())).map(String::as_str),
        Some("absent")
    );
    let counters = remote.counters.lock().await.clone();
    assert_eq!(counters.get(sid), Some(&(0, 1, 1)));
}

#[tokio::test]
async fn student_history_reads_back() {
    let pool = setup_pool().await;
    let policy = Policy::default();
    let roster = add_roster(&pool, 1).await;
    let sid = &roster[0].id;

    service::record_scan(&pool, &policy, sid, ScanKind::Entry, MarkRequest::Present, TEACHER)
        .await
        .unwrap();

    let history = db::records_for_student(&pool, sid).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].date, service::today());
    assert_eq!(history[0].marked_by.as_deref(), Some(TEACHER));
}
