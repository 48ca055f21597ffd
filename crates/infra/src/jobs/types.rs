//! Core task types.

use core::str::FromStr;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use rowforge_auth::PrincipalId;
use rowforge_core::StoreError;

/// Stored task fields, by name. Fields starting with `_` are private.
pub type TaskColumns = BTreeMap<String, String>;

pub const FIELD_OWNER: &str = "owner";
pub const FIELD_TYPE: &str = "type";
pub const FIELD_PARAMS: &str = "params";
pub const FIELD_SECRET_PARAMS: &str = "_params";
pub const FIELD_START_TIME: &str = "startTime";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_GOOD_ROWS: &str = "goodRows";
pub const FIELD_BAD_ROWS: &str = "badRows";

/// Opaque task identifier. Generated tokens are UUID v7 in simple form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskToken(String);

impl TaskToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TaskToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task lifecycle status. `Completed` and `Failed` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(StoreError::malformed("task status", other)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-job counters written after each processed row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub good_rows: u64,
    pub bad_rows: u64,
    pub status: TaskStatus,
}

impl TaskProgress {
    pub fn to_columns(&self) -> TaskColumns {
        TaskColumns::from([
            (FIELD_GOOD_ROWS.to_string(), self.good_rows.to_string()),
            (FIELD_BAD_ROWS.to_string(), self.bad_rows.to_string()),
            (FIELD_STATUS.to_string(), self.status.to_string()),
        ])
    }
}

/// A task as read back from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub token: TaskToken,
    pub columns: TaskColumns,
}

impl Task {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.columns.get(name).map(String::as_str)
    }

    pub fn owner(&self) -> Option<PrincipalId> {
        self.field(FIELD_OWNER).map(PrincipalId::from)
    }

    pub fn task_type(&self) -> Option<&str> {
        self.field(FIELD_TYPE)
    }

    pub fn params(&self) -> Option<JsonValue> {
        self.field(FIELD_PARAMS)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.field(FIELD_START_TIME)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.field(FIELD_STATUS).and_then(|raw| raw.parse().ok())
    }

    pub fn good_rows(&self) -> Option<u64> {
        self.field(FIELD_GOOD_ROWS).and_then(|raw| raw.parse().ok())
    }

    pub fn bad_rows(&self) -> Option<u64> {
        self.field(FIELD_BAD_ROWS).and_then(|raw| raw.parse().ok())
    }

    /// Drop private (`_`-prefixed) fields.
    pub fn into_public(mut self) -> Self {
        self.columns.retain(|name, _| !name.starts_with('_'));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique_simple_uuids() {
        let a = TaskToken::new();
        let b = TaskToken::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn progress_uses_wire_field_names() {
        let columns = TaskProgress {
            good_rows: 7,
            bad_rows: 3,
            status: TaskStatus::Completed,
        }
        .to_columns();
        assert_eq!(columns.get("goodRows").map(String::as_str), Some("7"));
        assert_eq!(columns.get("badRows").map(String::as_str), Some("3"));
        assert_eq!(columns.get("status").map(String::as_str), Some("completed"));
    }

    #[test]
    fn into_public_strips_private_fields() {
        let task = Task {
            token: TaskToken::from("t"),
            columns: TaskColumns::from([
                ("owner".to_string(), "alice".to_string()),
                ("_params".to_string(), "{}".to_string()),
            ]),
        };
        let public = task.into_public();
        assert_eq!(public.field("owner"), Some("alice"));
        assert_eq!(public.field("_params"), None);
    }
}
