use reelcast_core::models::{ProcessVideoPayload, Task};

/// Truncate a string to max_len characters, appending "..." if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// One line of the dead-letter listing: task id, video id, retries, failure
/// time and the recorded error.
pub fn dead_letter_row(task: &Task, error_width: usize) -> String {
    let video_id = task
        .try_payload_as::<ProcessVideoPayload>()
        .map(|p| p.video_id.to_string())
        .unwrap_or_else(|_| "?".to_string());
    let error = task
        .result
        .as_ref()
        .and_then(|r| r.get("error"))
        .and_then(|e| e.as_str())
        .unwrap_or("-");
    let failed_at = task
        .completed_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}  {:>10}  {:>2}/{:<2}  {}  {}",
        task.id,
        video_id,
        task.retry_count,
        task.max_retries,
        failed_at,
        truncate_string(error, error_width)
    )
}

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use reelcast_core::models::{Priority, TaskStatus, TaskType};
    use serde_json::json;

    #[test]
    fn truncate_string_short() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("", 5), "");
    }

    #[test]
    fn truncate_string_long() {
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(truncate_string("abc", 2), "...");
    }

    #[test]
    fn truncate_string_counts_characters() {
        assert_eq!(truncate_string("ééééé", 5), "ééééé");
        assert_eq!(truncate_string("éééééé", 5), "éé...");
    }

    #[test]
    fn dead_letter_row_shows_video_and_error() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let task = Task {
            id: uuid::Uuid::nil(),
            task_type: TaskType::VideoProcess,
            status: TaskStatus::Failed,
            priority: Priority::Normal.as_i32(),
            payload: json!({ "video_id": 42 }),
            result: Some(json!({ "error": "transcode: ffmpeg main step exited with exit status: 1" })),
            scheduled_at: at,
            started_at: None,
            completed_at: Some(at),
            retry_count: 3,
            max_retries: 3,
            timeout_seconds: Some(900),
            created_at: at,
            updated_at: at,
        };

        let row = dead_letter_row(&task, 20);
        assert!(row.contains("        42"));
        assert!(row.contains(" 3/3 "));
        assert!(row.contains("2025-03-01 12:00:00"));
        assert!(row.ends_with("transcode: ffmpeg..."));
    }
}
