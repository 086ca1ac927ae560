use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Fixed task buckets. Declaration order is the display order only; ranking
/// never compares groups with each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskGroup {
    Inbox,
    Today,
    Computer,
    Calls,
    Outside,
    Home,
    WaitingFor,
    Someday,
}

impl TaskGroup {
    pub const ALL: [TaskGroup; 8] = [
        TaskGroup::Inbox,
        TaskGroup::Today,
        TaskGroup::Computer,
        TaskGroup::Calls,
        TaskGroup::Outside,
        TaskGroup::Home,
        TaskGroup::WaitingFor,
        TaskGroup::Someday,
    ];

    pub const DEFAULT: TaskGroup = TaskGroup::Inbox;

    pub const SCHEDULED: TaskGroup = TaskGroup::Today;

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Today => "today",
            Self::Computer => "computer",
            Self::Calls => "calls",
            Self::Outside => "outside",
            Self::Home => "home",
            Self::WaitingFor => "waiting_for",
            Self::Someday => "someday",
        }
    }

    pub fn is_scheduled(self) -> bool {
        self == Self::SCHEDULED
    }
}

impl fmt::Display for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskGroup {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|group| group.as_str() == normalized)
            .ok_or_else(|| format!("unknown task group: {}", value.trim()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalLink {
    pub external_id: String,
    pub project_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSource {
    Personal,
    External(ExternalLink),
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::External(_) => "external",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub group: TaskGroup,
    pub position: u32,
    pub source: TaskSource,
    pub due_date: Option<NaiveDate>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_from_group: Option<TaskGroup>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        group: TaskGroup,
        source: TaskSource,
        due_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: next_id("tsk"),
            title: title.into(),
            group,
            position: 0,
            source,
            due_date,
            completed_at: None,
            completed_from_group: None,
            archived_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.title, "task.title")?;
        if let TaskSource::External(link) = &self.source {
            validate_non_empty(&link.external_id, "task.external_id")?;
        }
        if self.completed_from_group.is_some() && self.completed_at.is_none() {
            return Err("task.completed_from_group requires task.completed_at".to_string());
        }
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }

    /// Records completion and the group it happened in. Completing twice keeps
    /// the first timestamp.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        if self.completed_at.is_some() {
            return;
        }
        self.completed_at = Some(now);
        self.completed_from_group = Some(self.group);
        self.updated_at = now;
    }

    pub fn external_id(&self) -> Option<&str> {
        match &self.source {
            TaskSource::External(link) => Some(link.external_id.as_str()),
            TaskSource::Personal => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeBlock {
    pub id: String,
    pub task_id: String,
    pub date: NaiveDate,
    pub start_minutes: u32,
    pub duration_minutes: u32,
}

impl TimeBlock {
    pub fn end_minutes(&self) -> u32 {
        self.start_minutes + self.duration_minutes
    }

    pub fn start_time(&self) -> String {
        format_minutes(self.start_minutes)
    }

    pub fn end_time(&self) -> String {
        format_minutes(self.end_minutes())
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "time_block.id")?;
        validate_non_empty(&self.task_id, "time_block.task_id")?;
        if self.start_minutes >= 1440 {
            return Err("time_block.start_minutes must be < 1440".to_string());
        }
        if self.duration_minutes == 0 {
            return Err("time_block.duration_minutes must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalTodoSnapshot {
    pub external_id: String,
    pub title: String,
    pub due_date: Option<NaiveDate>,
    pub completed: bool,
    pub project_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteContainer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusyInterval {
    pub start_minutes: u32,
    pub end_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_minutes: u32,
    pub end_minutes: u32,
}

impl CalendarEvent {
    pub fn busy_interval(&self) -> BusyInterval {
        BusyInterval {
            start_minutes: self.start_minutes,
            end_minutes: self.end_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyGoal {
    pub date: NaiveDate,
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

pub fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
