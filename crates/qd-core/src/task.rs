use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::iso8601_serde;

/// Lead time given to a queue draft that arrives without a deadline.
pub const DEFAULT_DEADLINE_LEAD_SECS: i64 = 3_600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Queue,
    Stack,
}

impl TaskType {
    pub fn label(self) -> &'static str {
        match self {
            TaskType::Queue => "Queue (deadline)",
            TaskType::Stack => "Stack (idea)",
        }
    }
}

/// Persisted as its integer rank (0..=3).
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
    clap::ValueEnum,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
            Priority::Urgent => "Urgent",
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Low),
            1 => Ok(Priority::Medium),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Urgent),
            other => Err(format!("priority out of range (0-3): {other}")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,

    pub title: String,

    pub description: String,

    #[serde(default, with = "iso8601_serde::option")]
    pub deadline: Option<DateTime<Utc>>,

    pub priority: Priority,

    pub is_completed: bool,

    #[serde(with = "iso8601_serde")]
    pub created_at: DateTime<Utc>,

    pub notification_scheduled: bool,

    pub task_type: TaskType,
}

impl Task {
    pub fn new(title: impl Into<String>, task_type: TaskType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            deadline: None,
            priority: Priority::default(),
            is_completed: false,
            created_at: now,
            notification_scheduled: false,
            task_type,
        }
    }

    pub fn new_queue(title: impl Into<String>, deadline: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let mut task = Self::new(title, TaskType::Queue, now);
        task.deadline = Some(deadline);
        task
    }

    pub fn new_stack(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(title, TaskType::Stack, now)
    }

    pub fn is_queue(&self) -> bool {
        self.task_type == TaskType::Queue
    }

    pub fn is_stack(&self) -> bool {
        self.task_type == TaskType::Stack
    }

    /// Only open queue tasks with a deadline get reminders; a stack task may
    /// keep its deadline without them.
    pub fn drives_reminders(&self) -> bool {
        self.is_queue() && self.deadline.is_some() && !self.is_completed
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

/// User input for a new task, before defaults and validation are applied.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub deadline: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub task_type: Option<TaskType>,
}

impl TaskDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Returns `None` when the trimmed title is empty.
    pub fn build(self, now: DateTime<Utc>) -> Option<Task> {
        let title = self.title.trim();
        if title.is_empty() {
            return None;
        }

        let task_type = self.task_type.unwrap_or(TaskType::Queue);
        let mut task = Task::new(title, task_type, now);
        task.description = self.description.trim().to_string();
        task.priority = self.priority;
        task.deadline = match (task_type, self.deadline) {
            (_, Some(deadline)) => Some(deadline),
            (TaskType::Queue, None) => Some(now + Duration::seconds(DEFAULT_DEADLINE_LEAD_SECS)),
            (TaskType::Stack, None) => None,
        };
        Some(task)
    }
}
