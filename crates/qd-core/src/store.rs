use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::deadline::{DAY_SECS, time_remaining};
use crate::notify::NotificationCenter;
use crate::persist::{DEFAULT_SAVE_DEBOUNCE, SaveDebouncer};
use crate::reminders::{ReminderJob, ReminderQueue, ReminderScheduler};
use crate::repository::{RepositoryError, TaskRepository};
use crate::task::{Task, TaskDraft, TaskType};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("task id already exists: {0}")]
    DuplicateId(Uuid),

    #[error("task title cannot be empty")]
    EmptyTitle,

    #[error("no task id starts with '{0}'")]
    UnknownPrefix(String),

    #[error("task id prefix '{0}' matches more than one task")]
    AmbiguousPrefix(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to start the {worker} worker")]
    Spawn {
        worker: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
    Overdue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Added(Uuid),
    Updated(Uuid),
    Deleted(Vec<Uuid>),
    Imported(usize),
    Cleared,
    ViewChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub active: usize,
    pub completed: usize,
    pub overdue: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionLevel {
    Clear,
    DueSoon,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attention {
    pub level: AttentionLevel,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub save_debounce: StdDuration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
        }
    }
}

type Observer = Box<dyn FnMut(&StoreEvent) + Send>;

pub struct TaskStore {
    tasks: Vec<Task>,
    search_text: String,
    status_filter: StatusFilter,
    repository: Arc<dyn TaskRepository>,
    clock: Arc<dyn Clock>,
    reminders: ReminderQueue,
    saver: SaveDebouncer,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl TaskStore {
    #[instrument(skip_all)]
    pub fn open(
        repository: Arc<dyn TaskRepository>,
        center: Arc<dyn NotificationCenter>,
        clock: Arc<dyn Clock>,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let tasks = repository.load();
        let reminders = ReminderQueue::spawn(ReminderScheduler::new(center)).map_err(|source| {
            StoreError::Spawn {
                worker: "reminder",
                source,
            }
        })?;
        let saver = SaveDebouncer::spawn(repository.clone(), options.save_debounce).map_err(
            |source| StoreError::Spawn {
                worker: "save",
                source,
            },
        )?;

        info!(count = tasks.len(), "opened task store");
        Ok(Self {
            tasks,
            search_text: String::new(),
            status_filter: StatusFilter::All,
            repository,
            clock,
            reminders,
            saver,
            observers: Vec::new(),
            next_subscription: 0,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ---- observation -------------------------------------------------------

    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&StoreEvent) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    fn emit(&mut self, event: StoreEvent) {
        debug!(?event, observers = self.observers.len(), "store event");
        for (_, observer) in &mut self.observers {
            observer(&event);
        }
    }

    // ---- view parameters ---------------------------------------------------

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn set_search_text(&mut self, text: impl Into<String>) {
        self.search_text = text.into();
        self.emit(StoreEvent::ViewChanged);
    }

    pub fn status_filter(&self) -> StatusFilter {
        self.status_filter
    }

    pub fn set_status_filter(&mut self, filter: StatusFilter) {
        self.status_filter = filter;
        self.emit(StoreEvent::ViewChanged);
    }

    // ---- lookups -----------------------------------------------------------

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn find_by_prefix(&self, prefix: &str) -> Result<&Task, StoreError> {
        let needle: String = prefix
            .trim()
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        if needle.is_empty() {
            return Err(StoreError::UnknownPrefix(prefix.to_string()));
        }

        let mut matches = self
            .tasks
            .iter()
            .filter(|task| task.id.simple().to_string().starts_with(&needle));
        let first = matches
            .next()
            .ok_or_else(|| StoreError::UnknownPrefix(prefix.to_string()))?;
        if matches.next().is_some() {
            return Err(StoreError::AmbiguousPrefix(prefix.to_string()));
        }
        Ok(first)
    }

    fn index_of(&self, id: Uuid) -> Result<usize, StoreError> {
        self.tasks
            .iter()
            .position(|task| task.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    // ---- derived views -----------------------------------------------------

    pub fn queue_tasks(&self) -> Vec<&Task> {
        let mut out: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| task.task_type == TaskType::Queue && !task.is_completed)
            .collect();
        out.sort_by(|a, b| by_deadline(a, b));
        out
    }

    pub fn stack_tasks(&self) -> Vec<&Task> {
        let mut out: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| task.task_type == TaskType::Stack && !task.is_completed)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub fn completed_tasks(&self) -> Vec<&Task> {
        let mut out: Vec<&Task> = self.tasks.iter().filter(|task| task.is_completed).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Open queue tasks due within the next day, exclusive at both ends.
    pub fn due_soon_tasks(&self, now: DateTime<Utc>) -> Vec<&Task> {
        let day = Duration::seconds(DAY_SECS);
        self.queue_tasks()
            .into_iter()
            .filter(|task| {
                time_remaining(task, now)
                    .is_some_and(|remaining| remaining > Duration::zero() && remaining < day)
            })
            .collect()
    }

    pub fn overdue_tasks(&self, now: DateTime<Utc>) -> Vec<&Task> {
        self.queue_tasks()
            .into_iter()
            .filter(|task| is_overdue(task, now))
            .collect()
    }

    pub fn queue_overdue_tasks(&self, now: DateTime<Utc>) -> Vec<&Task> {
        self.overdue_tasks(now)
    }

    pub fn queue_upcoming_tasks(&self, now: DateTime<Utc>) -> Vec<&Task> {
        self.queue_tasks()
            .into_iter()
            .filter(|task| !is_overdue(task, now))
            .collect()
    }

    pub fn filtered_tasks(&self, now: DateTime<Utc>) -> Vec<&Task> {
        let needle = self.search_text.to_lowercase();
        self.tasks
            .iter()
            .filter(|task| match self.status_filter {
                StatusFilter::All => true,
                StatusFilter::Active => !task.is_completed,
                StatusFilter::Completed => task.is_completed,
                StatusFilter::Overdue => !task.is_completed && is_overdue(task, now),
            })
            .filter(|task| {
                needle.is_empty()
                    || task.title.to_lowercase().contains(&needle)
                    || task.description.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn task_count_by_status(&self, now: DateTime<Utc>) -> StatusCounts {
        self.tasks
            .iter()
            .fold(StatusCounts::default(), |mut counts, task| {
                if task.is_completed {
                    counts.completed += 1;
                } else if is_overdue(task, now) {
                    counts.overdue += 1;
                } else {
                    counts.active += 1;
                }
                counts
            })
    }

    pub fn attention(&self, now: DateTime<Utc>) -> Attention {
        let overdue = self.overdue_tasks(now).len();
        let due_soon = self.due_soon_tasks(now).len();
        let level = if overdue > 0 {
            AttentionLevel::Overdue
        } else if due_soon > 0 {
            AttentionLevel::DueSoon
        } else {
            AttentionLevel::Clear
        };
        Attention {
            level,
            count: overdue + due_soon,
        }
    }

    // ---- mutations ---------------------------------------------------------

    pub fn create(&mut self, draft: TaskDraft) -> Result<Uuid, StoreError> {
        let task = draft.build(self.now()).ok_or(StoreError::EmptyTitle)?;
        let id = task.id;
        self.add(task)?;
        Ok(id)
    }

    #[instrument(skip(self, task), fields(task = %task.id))]
    pub fn add(&mut self, mut task: Task) -> Result<(), StoreError> {
        if task.title.trim().is_empty() {
            return Err(StoreError::EmptyTitle);
        }
        if self.get(task.id).is_some() {
            return Err(StoreError::DuplicateId(task.id));
        }

        let id = task.id;
        task.notification_scheduled = false;
        let drives_reminders = task.drives_reminders();
        self.tasks.push(task);
        if drives_reminders {
            self.reconcile_reminders(self.tasks.len() - 1);
        }

        info!(count = self.tasks.len(), "task added");
        self.emit(StoreEvent::Added(id));
        self.request_save();
        Ok(())
    }

    /// Replaces the stored task with the same id. `created_at` is kept.
    #[instrument(skip(self, task), fields(task = %task.id))]
    pub fn update(&mut self, mut task: Task) -> Result<(), StoreError> {
        if task.title.trim().is_empty() {
            return Err(StoreError::EmptyTitle);
        }
        let idx = self.index_of(task.id)?;
        let old = &self.tasks[idx];
        let reminders_changed = old.deadline != task.deadline
            || old.drives_reminders() != task.drives_reminders();
        task.created_at = old.created_at;
        task.notification_scheduled = old.notification_scheduled;
        self.tasks[idx] = task;

        if reminders_changed {
            debug!("deadline or reminder eligibility changed; reconciling reminders");
            self.reconcile_reminders(idx);
        }

        let id = self.tasks[idx].id;
        self.emit(StoreEvent::Updated(id));
        self.request_save();
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: Uuid) -> Result<(), StoreError> {
        let idx = self.index_of(id)?;
        self.reminders.enqueue(ReminderJob::Cancel(id));
        self.tasks.remove(idx);

        info!(count = self.tasks.len(), "task deleted");
        self.emit(StoreEvent::Deleted(vec![id]));
        self.request_save();
        Ok(())
    }

    #[instrument(skip(self, ids), fields(requested = ids.len()))]
    pub fn delete_many(&mut self, ids: &[Uuid]) -> usize {
        let wanted: HashSet<Uuid> = ids.iter().copied().collect();
        let removed: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|task| wanted.contains(&task.id))
            .map(|task| task.id)
            .collect();
        if removed.is_empty() {
            return 0;
        }

        for id in &removed {
            self.reminders.enqueue(ReminderJob::Cancel(*id));
        }
        self.tasks.retain(|task| !wanted.contains(&task.id));

        let count = removed.len();
        info!(removed = count, "tasks deleted");
        self.emit(StoreEvent::Deleted(removed));
        self.request_save();
        count
    }

    /// Flips completion; returns the new state.
    #[instrument(skip(self))]
    pub fn toggle_complete(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let idx = self.index_of(id)?;
        self.tasks[idx].is_completed = !self.tasks[idx].is_completed;
        let completed = self.tasks[idx].is_completed;
        if completed || self.tasks[idx].deadline.is_some() {
            self.reconcile_reminders(idx);
        }

        debug!(completed, "toggled completion");
        self.emit(StoreEvent::Updated(id));
        self.request_save();
        Ok(completed)
    }

    #[instrument(skip(self))]
    pub fn move_to_queue(&mut self, id: Uuid, deadline: DateTime<Utc>) -> Result<(), StoreError> {
        let idx = self.index_of(id)?;
        let task = &mut self.tasks[idx];
        task.task_type = TaskType::Queue;
        task.deadline = Some(deadline);
        self.reconcile_reminders(idx);

        self.emit(StoreEvent::Updated(id));
        self.request_save();
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn move_to_stack(&mut self, id: Uuid) -> Result<(), StoreError> {
        let idx = self.index_of(id)?;
        self.tasks[idx].task_type = TaskType::Stack;
        self.cancel_reminders(idx);

        self.emit(StoreEvent::Updated(id));
        self.request_save();
        Ok(())
    }

    /// Schedules every open queue task with a deadline and cancels whatever
    /// any other dated task may still own. Returns how many were scheduled.
    #[instrument(skip(self))]
    pub fn refresh_reminders(&mut self) -> usize {
        let mut scheduled = 0;
        let mut changed = false;
        for idx in 0..self.tasks.len() {
            let task = &self.tasks[idx];
            if task.deadline.is_none() && !task.notification_scheduled {
                continue;
            }
            let drives = task.drives_reminders();
            changed |= task.notification_scheduled != drives;
            self.reconcile_reminders(idx);
            if drives {
                scheduled += 1;
            }
        }

        info!(scheduled, "refreshed reminders");
        if changed {
            self.request_save();
        }
        scheduled
    }

    /// Removes the data file first; memory and reminders are only cleared once
    /// that succeeded.
    #[instrument(skip(self))]
    pub fn clear_all(&mut self) -> Result<(), StoreError> {
        self.saver.flush();
        self.repository.clear()?;
        self.tasks.clear();
        self.reminders.enqueue(ReminderJob::CancelAll);

        info!("cleared all tasks");
        self.emit(StoreEvent::Cleared);
        Ok(())
    }

    /// Upserts by id; returns how many tasks the document held.
    #[instrument(skip(self, path), fields(file = %path.display()))]
    pub fn import_from(&mut self, path: &Path) -> Result<usize, StoreError> {
        let imported = self.repository.import(path)?;
        let count = imported.len();

        for mut task in imported {
            let idx = match self.tasks.iter().position(|existing| existing.id == task.id) {
                Some(idx) => {
                    task.created_at = self.tasks[idx].created_at;
                    self.tasks[idx] = task;
                    idx
                }
                None => {
                    self.tasks.push(task);
                    self.tasks.len() - 1
                }
            };
            self.reconcile_reminders(idx);
        }

        info!(count, total = self.tasks.len(), "imported tasks");
        self.emit(StoreEvent::Imported(count));
        self.request_save();
        Ok(count)
    }

    #[instrument(skip(self, path), fields(file = %path.display()))]
    pub fn export_to(&self, path: &Path) -> Result<(), StoreError> {
        self.repository.export(&self.tasks, path)?;
        info!(count = self.tasks.len(), "exported tasks");
        Ok(())
    }

    // ---- follow-ups --------------------------------------------------------

    fn reconcile_reminders(&mut self, idx: usize) {
        if !self.tasks[idx].drives_reminders() {
            self.cancel_reminders(idx);
            return;
        }
        let now = self.clock.now();
        let task = &mut self.tasks[idx];
        task.notification_scheduled = true;
        self.reminders.enqueue(ReminderJob::Schedule {
            task: Box::new(task.clone()),
            now,
        });
    }

    fn cancel_reminders(&mut self, idx: usize) {
        let task = &mut self.tasks[idx];
        task.notification_scheduled = false;
        self.reminders.enqueue(ReminderJob::Cancel(task.id));
    }

    fn request_save(&self) {
        self.saver.request(self.tasks.clone());
    }

    /// Blocks until queued reminder work has reached the facility.
    pub fn sync_reminders(&self) {
        self.reminders.drain();
    }

    pub fn flush(&self) {
        self.saver.flush();
    }

    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.reminders.shutdown();
        self.saver.shutdown();
    }
}

impl Drop for TaskStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_overdue(task: &Task, now: DateTime<Utc>) -> bool {
    time_remaining(task, now).is_some_and(|remaining| remaining < Duration::zero())
}

fn by_deadline(a: &Task, b: &Task) -> Ordering {
    match (a.deadline, b.deadline) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
