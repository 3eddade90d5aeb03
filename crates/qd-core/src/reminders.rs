use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::notify::{
    AuthorizationStatus, InterruptionLevel, NotificationCenter, REMINDER_CATEGORY, ReminderRequest,
};
use crate::task::{Priority, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderOffset {
    pub secs: i64,
    pub label: &'static str,
}

pub const REMINDER_OFFSETS: [ReminderOffset; 3] = [
    ReminderOffset {
        secs: 1_800,
        label: "30 minutes",
    },
    ReminderOffset {
        secs: 3_600,
        label: "1 hour",
    },
    ReminderOffset {
        secs: 86_400,
        label: "24 hours",
    },
];

pub fn offset_label(offset_secs: i64) -> Option<&'static str> {
    REMINDER_OFFSETS
        .iter()
        .find(|offset| offset.secs == offset_secs)
        .map(|offset| offset.label)
}

pub fn reminder_key(task_id: Uuid, offset_secs: i64) -> String {
    format!("{task_id}-{offset_secs}")
}

/// Every key a task can own, live or not.
pub fn reminder_keys(task_id: Uuid) -> Vec<String> {
    REMINDER_OFFSETS
        .iter()
        .map(|offset| reminder_key(task_id, offset.secs))
        .collect()
}

pub fn interruption_level(priority: Priority) -> InterruptionLevel {
    match priority {
        Priority::Urgent => InterruptionLevel::Critical,
        Priority::High => InterruptionLevel::TimeSensitive,
        Priority::Low | Priority::Medium => InterruptionLevel::Active,
    }
}

fn build_request(task: &Task, offset: ReminderOffset, trigger_at: DateTime<Utc>) -> ReminderRequest {
    ReminderRequest {
        identifier: reminder_key(task.id, offset.secs),
        task_id: task.id,
        offset_secs: offset.secs,
        title: format!("Deadline approaching: {}", task.title),
        body: format!("Due in {}.", offset.label),
        trigger_at,
        level: interruption_level(task.priority),
        category: REMINDER_CATEGORY.to_string(),
    }
}

/// Publishes and cancels a task's reminders; scheduling always replaces.
#[derive(Clone)]
pub struct ReminderScheduler {
    center: Arc<dyn NotificationCenter>,
}

impl ReminderScheduler {
    pub fn new(center: Arc<dyn NotificationCenter>) -> Self {
        Self { center }
    }

    /// Returns how many reminders were registered.
    #[tracing::instrument(skip(self, task, now), fields(task = %task.id))]
    pub fn schedule(&self, task: &Task, now: DateTime<Utc>) -> usize {
        let Some(deadline) = task.deadline else {
            trace!("no deadline; nothing to schedule");
            return 0;
        };
        if task.is_completed {
            trace!("task completed; nothing to schedule");
            return 0;
        }
        if !self.ensure_authorized() {
            return 0;
        }

        self.cancel(task.id);

        let mut registered = 0;
        for offset in REMINDER_OFFSETS {
            let trigger_at = deadline - Duration::seconds(offset.secs);
            if trigger_at <= now {
                trace!(offset = offset.secs, "trigger already passed; skipping");
                continue;
            }

            let request = build_request(task, offset, trigger_at);
            let identifier = request.identifier.clone();
            match self.center.add(request) {
                Ok(()) => {
                    debug!(identifier = %identifier, trigger_at = %trigger_at, "registered reminder");
                    registered += 1;
                }
                Err(err) => {
                    warn!(identifier = %identifier, error = %err, "failed to register reminder");
                }
            }
        }

        info!(registered, "scheduled reminders");
        registered
    }

    pub fn cancel(&self, task_id: Uuid) {
        self.center.remove_pending(&reminder_keys(task_id));
        trace!(task = %task_id, "cancelled reminders");
    }

    pub fn cancel_all(&self) {
        self.center.remove_all_pending();
        debug!("cancelled all reminders");
    }

    fn ensure_authorized(&self) -> bool {
        if self.center.authorization() == AuthorizationStatus::Authorized {
            return true;
        }

        match self.center.request_authorization() {
            Ok(true) => {
                info!("reminder authorization granted");
                true
            }
            Ok(false) => {
                debug!("reminder authorization denied; skipping");
                false
            }
            Err(err) => {
                warn!(error = %err, "reminder authorization request failed; skipping");
                false
            }
        }
    }
}

#[derive(Debug)]
pub enum ReminderJob {
    Schedule { task: Box<Task>, now: DateTime<Utc> },
    Cancel(Uuid),
    CancelAll,
    Barrier(mpsc::Sender<()>),
}

/// Reconciliation jobs consumed in order by a dedicated worker thread, so
/// mutations never wait on authorization or the facility.
pub struct ReminderQueue {
    sender: Option<mpsc::Sender<ReminderJob>>,
    worker: Option<JoinHandle<()>>,
}

impl ReminderQueue {
    pub fn spawn(scheduler: ReminderScheduler) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<ReminderJob>();
        let worker = thread::Builder::new()
            .name("qd-reminders".to_string())
            .spawn(move || run_worker(scheduler, receiver))?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn enqueue(&self, job: ReminderJob) {
        let Some(sender) = &self.sender else {
            warn!(?job, "reminder queue shut down; dropping job");
            return;
        };
        if let Err(err) = sender.send(job) {
            warn!(job = ?err.0, "reminder worker stopped; dropping job");
        }
    }

    /// Blocks until every job enqueued so far has been processed.
    pub fn drain(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.enqueue(ReminderJob::Barrier(ack_tx));
        if ack_rx.recv().is_err() {
            warn!("reminder worker exited before draining");
        }
    }

    pub fn shutdown(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("reminder worker panicked");
        }
    }
}

impl Drop for ReminderQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(scheduler: ReminderScheduler, receiver: mpsc::Receiver<ReminderJob>) {
    debug!("reminder worker started");
    while let Ok(job) = receiver.recv() {
        match job {
            ReminderJob::Schedule { task, now } => {
                scheduler.schedule(&task, now);
            }
            ReminderJob::Cancel(task_id) => scheduler.cancel(task_id),
            ReminderJob::CancelAll => scheduler.cancel_all(),
            ReminderJob::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("reminder worker stopped");
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::notify::MemoryNotificationCenter;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    fn scheduler() -> (Arc<MemoryNotificationCenter>, ReminderScheduler) {
        let center = Arc::new(MemoryNotificationCenter::new());
        let scheduler = ReminderScheduler::new(center.clone());
        (center, scheduler)
    }

    #[test]
    fn deadline_just_past_thirty_minutes_gets_only_the_thirty_minute_reminder() {
        let (center, scheduler) = scheduler();
        let task = Task::new_queue("pay rent", now() + Duration::seconds(1_801), now());

        assert_eq!(scheduler.schedule(&task, now()), 1);
        assert_eq!(center.pending_keys(), vec![reminder_key(task.id, 1_800)]);
    }

    #[test]
    fn trigger_exactly_now_is_skipped() {
        let (center, scheduler) = scheduler();
        let task = Task::new_queue("pay rent", now() + Duration::seconds(1_800), now());

        assert_eq!(scheduler.schedule(&task, now()), 0);
        assert!(center.pending_keys().is_empty());
    }

    #[test]
    fn far_deadline_gets_all_three_with_rendered_content() {
        let (center, scheduler) = scheduler();
        let mut task = Task::new_queue("launch", now() + Duration::days(3), now());
        task.priority = Priority::Urgent;

        assert_eq!(scheduler.schedule(&task, now()), 3);
        let hour = center
            .get(&reminder_key(task.id, 3_600))
            .expect("one hour reminder");
        assert_eq!(hour.title, "Deadline approaching: launch");
        assert_eq!(hour.body, "Due in 1 hour.");
        assert_eq!(hour.level, InterruptionLevel::Critical);
        assert_eq!(hour.trigger_at, now() + Duration::days(3) - Duration::hours(1));
    }

    #[test]
    fn rescheduling_replaces_instead_of_accumulating() {
        let (center, scheduler) = scheduler();
        let mut task = Task::new_queue("review", now() + Duration::days(2), now());
        scheduler.schedule(&task, now());
        assert_eq!(center.pending_keys().len(), 3);

        task.deadline = Some(now() + Duration::minutes(50));
        assert_eq!(scheduler.schedule(&task, now()), 1);
        assert_eq!(center.pending_keys(), vec![reminder_key(task.id, 1_800)]);
    }

    #[test]
    fn completed_or_deadline_free_tasks_are_ignored() {
        let (center, scheduler) = scheduler();
        let mut done = Task::new_queue("done", now() + Duration::days(2), now());
        done.is_completed = true;
        let idea = Task::new_stack("idea", now());

        assert_eq!(scheduler.schedule(&done, now()), 0);
        assert_eq!(scheduler.schedule(&idea, now()), 0);
        assert!(center.pending_keys().is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (center, scheduler) = scheduler();
        let task = Task::new_queue("x", now() + Duration::days(2), now());
        scheduler.schedule(&task, now());

        scheduler.cancel(task.id);
        scheduler.cancel(task.id);
        assert!(center.pending_keys().is_empty());
    }

    #[test]
    fn denial_skips_quietly_and_is_retried_next_time() {
        let center = Arc::new(MemoryNotificationCenter::undetermined(false));
        let scheduler = ReminderScheduler::new(center.clone());
        let task = Task::new_queue("x", now() + Duration::days(2), now());

        assert_eq!(scheduler.schedule(&task, now()), 0);
        assert_eq!(center.authorization_requests(), 1);

        center.set_grant(true);
        assert_eq!(scheduler.schedule(&task, now()), 3);
        assert_eq!(center.authorization_requests(), 2);

        scheduler.schedule(&task, now());
        assert_eq!(center.authorization_requests(), 2);
    }

    #[test]
    fn rejected_offset_does_not_stop_the_others() {
        let (center, scheduler) = scheduler();
        let task = Task::new_queue("x", now() + Duration::days(2), now());
        center.reject(reminder_key(task.id, 3_600));

        assert_eq!(scheduler.schedule(&task, now()), 2);
        assert_eq!(
            center.pending_keys().len(),
            2,
            "remaining offsets still registered"
        );
    }

    #[test]
    fn priority_maps_to_interruption_level() {
        assert_eq!(interruption_level(Priority::Urgent), InterruptionLevel::Critical);
        assert_eq!(interruption_level(Priority::High), InterruptionLevel::TimeSensitive);
        assert_eq!(interruption_level(Priority::Medium), InterruptionLevel::Active);
        assert_eq!(interruption_level(Priority::Low), InterruptionLevel::Active);
    }

    #[test]
    fn queue_processes_jobs_in_order() {
        let (center, scheduler) = scheduler();
        let queue = ReminderQueue::spawn(scheduler).expect("spawn worker");
        let task = Task::new_queue("x", now() + Duration::days(2), now());

        queue.enqueue(ReminderJob::Schedule {
            task: Box::new(task.clone()),
            now: now(),
        });
        queue.enqueue(ReminderJob::Cancel(task.id));
        queue.drain();
        assert!(center.pending_keys().is_empty());

        queue.enqueue(ReminderJob::Schedule {
            task: Box::new(task),
            now: now(),
        });
        queue.drain();
        assert_eq!(center.pending_keys().len(), 3);
    }
}
