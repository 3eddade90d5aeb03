use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::repository::TaskRepository;
use crate::task::Task;

pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_secs(1);

enum SaveCommand {
    Snapshot(Vec<Task>),
    Flush(mpsc::Sender<()>),
}

/// Coalesces save requests: each snapshot restarts the window, and only the
/// latest snapshot is written once the window passes without a new one.
pub struct SaveDebouncer {
    sender: Option<mpsc::Sender<SaveCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl SaveDebouncer {
    pub fn spawn(repository: Arc<dyn TaskRepository>, window: Duration) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("qd-save".to_string())
            .spawn(move || run_worker(repository, receiver, window))?;
        debug!(window_ms = window.as_millis() as u64, "save debouncer started");
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn request(&self, tasks: Vec<Task>) {
        let Some(sender) = &self.sender else {
            warn!("save debouncer shut down; dropping snapshot");
            return;
        };
        if sender.send(SaveCommand::Snapshot(tasks)).is_err() {
            warn!("save worker stopped; dropping snapshot");
        }
    }

    /// Writes any pending snapshot now and waits for the write to finish.
    pub fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::channel();
        if sender.send(SaveCommand::Flush(ack_tx)).is_err() || ack_rx.recv().is_err() {
            warn!("save worker stopped before flushing");
        }
    }

    /// Final synchronous save, then stops the worker.
    pub fn shutdown(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("save worker panicked");
        }
    }
}

impl Drop for SaveDebouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    repository: Arc<dyn TaskRepository>,
    receiver: mpsc::Receiver<SaveCommand>,
    window: Duration,
) {
    let mut pending: Option<Vec<Task>> = None;

    loop {
        let command = if pending.is_some() {
            match receiver.recv_timeout(window) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(tasks) = pending.take() {
                        save(repository.as_ref(), &tasks);
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            }
        };

        match command {
            SaveCommand::Snapshot(tasks) => {
                if pending.is_some() {
                    trace!("coalesced save request");
                }
                pending = Some(tasks);
            }
            SaveCommand::Flush(ack) => {
                if let Some(tasks) = pending.take() {
                    save(repository.as_ref(), &tasks);
                }
                let _ = ack.send(());
            }
        }
    }

    if let Some(tasks) = pending.take() {
        debug!("writing final snapshot on shutdown");
        save(repository.as_ref(), &tasks);
    }
}

fn save(repository: &dyn TaskRepository, tasks: &[Task]) {
    match repository.save(tasks) {
        Ok(()) => info!(count = tasks.len(), "saved tasks"),
        Err(err) => warn!(
            error = %err,
            cause = ?std::error::Error::source(&err),
            "failed to save tasks; keeping in-memory state"
        ),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::repository::InMemoryRepository;

    fn snapshot(title: &str) -> Vec<Task> {
        vec![Task::new_stack(title, Utc::now())]
    }

    #[test]
    fn burst_collapses_into_one_save_of_the_last_snapshot() {
        let repo = Arc::new(InMemoryRepository::new());
        let debouncer =
            SaveDebouncer::spawn(repo.clone(), Duration::from_millis(150)).expect("spawn");

        for title in ["a", "b", "c"] {
            debouncer.request(snapshot(title));
        }
        thread::sleep(Duration::from_millis(600));

        let saves = repo.saved_snapshots();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0][0].title, "c");
    }

    #[test]
    fn shutdown_writes_pending_snapshot() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut debouncer =
            SaveDebouncer::spawn(repo.clone(), Duration::from_secs(60)).expect("spawn");

        debouncer.request(snapshot("late"));
        debouncer.shutdown();

        assert_eq!(repo.save_count(), 1);
        assert_eq!(repo.stored().expect("stored")[0].title, "late");
    }

    #[test]
    fn flush_without_pending_snapshot_writes_nothing() {
        let repo = Arc::new(InMemoryRepository::new());
        let debouncer =
            SaveDebouncer::spawn(repo.clone(), Duration::from_secs(60)).expect("spawn");

        debouncer.flush();
        assert_eq!(repo.save_count(), 0);

        debouncer.request(snapshot("now"));
        debouncer.flush();
        assert_eq!(repo.save_count(), 1);
    }
}
