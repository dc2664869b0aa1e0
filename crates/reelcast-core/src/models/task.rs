use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::VIDEO_PROCESS_TASK;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    VideoProcess,
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskType::VideoProcess => write!(f, "{}", VIDEO_PROCESS_TASK),
        }
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            VIDEO_PROCESS_TASK => Ok(TaskType::VideoProcess),
            _ => Err(anyhow::anyhow!("Invalid task type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "task_status", rename_all = "lowercase")
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Scheduled,
    Cancelled,
}

impl TaskStatus {
    /// Statuses in which the task still owns its video (not yet acknowledged or dead-lettered).
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Scheduled | TaskStatus::Running
        )
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Scheduled => write!(f, "scheduled"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "scheduled" => Ok(TaskStatus::Scheduled),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 3,
    #[default]
    Normal = 5,
    High = 7,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// A queue row. `timeout_seconds` doubles as the visibility timeout: a
/// `running` task not acknowledged within it becomes deliverable again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Task {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get::<String, _>("task_type")?.parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse task_type: {}", e).into())
            })?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            scheduled_at: row.try_get("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Task {
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Instant after which an unacknowledged `running` task may be redelivered.
    pub fn visibility_deadline(&self) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        let timeout = self.timeout_seconds?;
        Some(started + ChronoDuration::seconds(i64::from(timeout)))
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: TaskPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Build a payload value from a typed struct.
    pub fn payload_from<P: TaskPayload>(payload: &P) -> serde_json::Value {
        serde_json::to_value(payload).unwrap_or_default()
    }
}

/// Trait for type-safe task payloads
pub trait TaskPayload: Serialize + for<'de> Deserialize<'de> {
    fn task_type() -> TaskType;
}

/// Payload of a `video_process` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessVideoPayload {
    pub video_id: u64,
}

impl ProcessVideoPayload {
    pub fn new(video_id: i64) -> Option<Self> {
        u64::try_from(video_id)
            .ok()
            .map(|video_id| Self { video_id })
    }

    /// The id as stored in the record store, `None` when it does not fit a BIGINT.
    pub fn record_id(&self) -> Option<i64> {
        i64::try_from(self.video_id).ok()
    }
}

impl TaskPayload for ProcessVideoPayload {
    fn task_type() -> TaskType {
        TaskType::VideoProcess
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub scheduled: i64,
    pub cancelled: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(payload: serde_json::Value) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            task_type: TaskType::VideoProcess,
            status: TaskStatus::Running,
            priority: Priority::Normal.as_i32(),
            payload,
            result: None,
            scheduled_at: now,
            started_at: Some(now),
            completed_at: None,
            retry_count: 0,
            max_retries: 3,
            timeout_seconds: Some(600),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn payload_decodes_unsigned_ids() {
        let t = task(json!({ "video_id": 42 }));
        let payload: ProcessVideoPayload = t.try_payload_as().unwrap();
        assert_eq!(payload.video_id, 42);
        assert_eq!(payload.record_id(), Some(42));
    }

    #[test]
    fn payload_rejects_strings_and_negatives() {
        assert!(task(json!({ "video_id": "not-a-number" }))
            .try_payload_as::<ProcessVideoPayload>()
            .is_err());
        assert!(task(json!({ "video_id": -1 }))
            .try_payload_as::<ProcessVideoPayload>()
            .is_err());
        assert!(task(json!({}))
            .try_payload_as::<ProcessVideoPayload>()
            .is_err());
    }

    #[test]
    fn oversized_ids_have_no_record_id() {
        let payload = ProcessVideoPayload {
            video_id: u64::MAX,
        };
        assert_eq!(payload.record_id(), None);
        assert!(ProcessVideoPayload::new(-5).is_none());
    }

    #[test]
    fn payload_from_matches_wire_format() {
        let value = Task::payload_from(&ProcessVideoPayload { video_id: 7 });
        assert_eq!(value, json!({ "video_id": 7 }));
    }

    #[test]
    fn retry_budget() {
        let mut t = task(json!({ "video_id": 1 }));
        assert!(t.can_retry());
        t.retry_count = 3;
        assert!(!t.can_retry());
    }

    #[test]
    fn visibility_deadline_uses_start_plus_timeout() {
        let t = task(json!({ "video_id": 1 }));
        let deadline = t.visibility_deadline().unwrap();
        assert_eq!(
            deadline - t.started_at.unwrap(),
            ChronoDuration::seconds(600)
        );

        let mut pending = t.clone();
        pending.started_at = None;
        assert!(pending.visibility_deadline().is_none());
    }

    #[test]
    fn task_type_tag_is_stable() {
        assert_eq!(TaskType::VideoProcess.to_string(), "video_process");
        assert_eq!(
            "video_process".parse::<TaskType>().unwrap(),
            TaskType::VideoProcess
        );
        assert!(TaskStatus::Running.is_live());
        assert!(!TaskStatus::Failed.is_live());
    }
}
