use crate::config::Config;
use crate::error::AttendanceError;
use crate::model::{AttendanceRecord, RemoteEvent};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Remote attendance store. The upsert is keyed by (student_id, date) on
/// the server, so re-sending the same event after a crash converges
/// instead of duplicating.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert_event(&self, event: &AttendanceRecord) -> Result<(), AttendanceError>;

    async fn update_student_counters(
        &self,
        student_id: &str,
        present_days: i64,
        absent_days: i64,
        total_days: i64,
    ) -> Result<(), AttendanceError>;

    async fn list_events(
        &self,
        teacher_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<RemoteEvent>, AttendanceError>;
}

#[derive(Clone)]
pub struct HttpRemoteStore {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl fmt::Debug for HttpRemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(
        base_url: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, AttendanceError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| AttendanceError::Network(format!("invalid base url: {err}")))?;
        let http = Client::builder()
            .user_agent("rollcall/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .expect("reqwest client");
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, AttendanceError> {
        Self::new(
            &cfg.remote.base_url,
            cfg.remote.api_key.clone(),
            Duration::from_secs(cfg.app.request_timeout_seconds),
        )
    }

    pub fn build_request(&self, body: &Value) -> Result<reqwest::Request, AttendanceError> {
        let endpoint = self
            .base_url
            .join("v1/attendance")
            .map_err(|err| AttendanceError::Network(format!("invalid endpoint: {err}")))?;
        self.http
            .post(endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .map_err(|err| AttendanceError::Network(err.to_string()))
    }

    async fn execute(&self, body: Value) -> Result<ApiResponse, AttendanceError> {
        let request = self.build_request(&body)?;
        debug!(url = %request.url(), action = %body["action"], "remote store request");

        let res = self.http.execute(request).await.map_err(|err| {
            if err.is_timeout() {
                AttendanceError::Network("request timed out".into())
            } else {
                AttendanceError::Network(err.to_string())
            }
        })?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by remote store: {}", body);
            return Err(AttendanceError::Network(format!("received 429: {body}")));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!("remote store error - status: {}, body: {}", status, body);
            return Err(AttendanceError::Network(format!(
                "remote store error {status}: {body}"
            )));
        }

        let payload: ApiResponse = res
            .json()
            .await
            .map_err(|err| AttendanceError::Network(format!("invalid response JSON: {err}")))?;
        if !payload.success {
            return Err(AttendanceError::Network(
                payload.error.unwrap_or_else(|| "unknown remote error".into()),
            ));
        }
        Ok(payload)
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn upsert_event(&self, event: &AttendanceRecord) -> Result<(), AttendanceError> {
        self.execute(build_mark_request(event)).await?;
        Ok(())
    }

    async fn update_student_counters(
        &self,
        student_id: &str,
        present_days: i64,
        absent_days: i64,
        total_days: i64,
    ) -> Result<(), AttendanceError> {
        self.execute(build_counters_request(
            student_id,
            present_days,
            absent_days,
            total_days,
        ))
        .await?;
        Ok(())
    }

    async fn list_events(
        &self,
        teacher_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<RemoteEvent>, AttendanceError> {
        let payload = self.execute(build_list_request(teacher_id, date)).await?;
        Ok(payload.attendance.unwrap_or_default())
    }
}

pub fn build_mark_request(event: &AttendanceRecord) -> Value {
    json!({
        "action": "mark-attendance",
        "student_id": event.student_id,
        "attendance_date": event.date.format("%Y-%m-%d").to_string(),
        "status": event.outcome.as_str(),
        "entry_time": event.entry_time,
        "exit_time": event.exit_time,
        "marked_by": event.marked_by,
    })
}

pub fn build_counters_request(
    student_id: &str,
    present_days: i64,
    absent_days: i64,
    total_days: i64,
) -> Value {
    json!({
        "action": "update-student-stats",
        "student_id": student_id,
        "present_days": present_days,
        "absent_days": absent_days,
        "total_days": total_days,
    })
}

pub fn build_list_request(teacher_id: &str, date: NaiveDate) -> Value {
    json!({
        "action": "get-attendance",
        "teacher_id": teacher_id,
        "date": date.format("%Y-%m-%d").to_string(),
    })
}

#[derive(Deserialize)]
struct ApiResponse {
    success: bool,
    error: Option<String>,
    attendance: Option<Vec<RemoteEvent>>,
}
