use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::task::Task;

pub const TASKS_FILE_NAME: &str = "tasks.json";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("no task file at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode tasks from {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode tasks")]
    Encode(#[source] serde_json::Error),
}

impl RepositoryError {
    pub fn is_decode(&self) -> bool {
        matches!(self, RepositoryError::Decode { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}

/// Persistence seam for the task store: the whole collection is one document.
pub trait TaskRepository: Send + Sync {
    /// Default-location load. Never fails: a missing, unreadable or corrupt
    /// file yields an empty collection.
    fn load(&self) -> Vec<Task>;

    fn save(&self, tasks: &[Task]) -> Result<(), RepositoryError>;

    /// Removes the default-location document.
    fn clear(&self) -> Result<(), RepositoryError>;

    fn import(&self, path: &Path) -> Result<Vec<Task>, RepositoryError> {
        read_tasks_file(path)
    }

    fn export(&self, tasks: &[Task], path: &Path) -> Result<(), RepositoryError> {
        write_tasks_file(path, tasks)
    }
}

pub fn encode_tasks(tasks: &[Task]) -> Result<String, RepositoryError> {
    serde_json::to_string_pretty(tasks).map_err(RepositoryError::Encode)
}

pub fn decode_tasks(raw: &str) -> Result<Vec<Task>, serde_json::Error> {
    serde_json::from_str(raw)
}

#[tracing::instrument(skip(path), fields(file = %path.display()))]
pub fn read_tasks_file(path: &Path) -> Result<Vec<Task>, RepositoryError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(RepositoryError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(RepositoryError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let tasks = decode_tasks(&raw).map_err(|source| RepositoryError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(count = tasks.len(), "decoded tasks");
    Ok(tasks)
}

#[tracing::instrument(skip(path, tasks), fields(file = %path.display(), count = tasks.len()))]
pub fn write_tasks_file(path: &Path, tasks: &[Task]) -> Result<(), RepositoryError> {
    let payload = encode_tasks(tasks)?;
    let io_err = |source: io::Error| RepositoryError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.write_all(payload.as_bytes()).map_err(io_err)?;
    temp.flush().map_err(io_err)?;
    temp.persist(path).map_err(|err| io_err(err.error))?;

    debug!("wrote tasks atomically");
    Ok(())
}

/// `tasks.json` inside a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
}

impl JsonFileRepository {
    #[tracing::instrument(skip(data_dir), fields(data_dir = %data_dir.display()))]
    pub fn open(data_dir: &Path) -> Self {
        let data_dir = data_dir.to_path_buf();
        if let Err(err) = fs::create_dir_all(&data_dir) {
            warn!(
                data_dir = %data_dir.display(),
                error = %err,
                "failed to create data directory; saves will fail until it exists"
            );
        }

        let tasks_path = data_dir.join(TASKS_FILE_NAME);
        info!(tasks = %tasks_path.display(), "opened task repository");
        Self {
            data_dir,
            tasks_path,
        }
    }
}

impl TaskRepository for JsonFileRepository {
    #[tracing::instrument(skip(self))]
    fn load(&self) -> Vec<Task> {
        match read_tasks_file(&self.tasks_path) {
            Ok(tasks) => {
                info!(count = tasks.len(), "loaded tasks");
                tasks
            }
            Err(RepositoryError::NotFound { .. }) => {
                debug!("no task file yet; starting empty");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, cause = ?std::error::Error::source(&err), "failed to load tasks; starting empty");
                Vec::new()
            }
        }
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    fn save(&self, tasks: &[Task]) -> Result<(), RepositoryError> {
        write_tasks_file(&self.tasks_path, tasks)
    }

    #[tracing::instrument(skip(self))]
    fn clear(&self) -> Result<(), RepositoryError> {
        match fs::remove_file(&self.tasks_path) {
            Ok(()) => {
                info!(file = %self.tasks_path.display(), "removed task file");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RepositoryError::Io {
                path: self.tasks_path.clone(),
                source,
            }),
        }
    }
}

/// Repository that keeps the collection in memory and records every save.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    stored: Option<Vec<Task>>,
    saves: Vec<Vec<Task>>,
    fail_writes: bool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let repo = Self::default();
        repo.state.lock().stored = Some(tasks);
        repo
    }

    /// Makes subsequent saves and clears fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().saves.len()
    }

    pub fn saved_snapshots(&self) -> Vec<Vec<Task>> {
        self.state.lock().saves.clone()
    }

    pub fn stored(&self) -> Option<Vec<Task>> {
        self.state.lock().stored.clone()
    }
}

impl TaskRepository for InMemoryRepository {
    fn load(&self) -> Vec<Task> {
        self.state.lock().stored.clone().unwrap_or_default()
    }

    fn save(&self, tasks: &[Task]) -> Result<(), RepositoryError> {
        let mut state = self.state.lock();
        state.saves.push(tasks.to_vec());
        if state.fail_writes {
            return Err(rejected_write());
        }
        state.stored = Some(tasks.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), RepositoryError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(rejected_write());
        }
        state.stored = None;
        Ok(())
    }
}

fn rejected_write() -> RepositoryError {
    RepositoryError::Io {
        path: PathBuf::from("<memory>"),
        source: io::Error::other("write rejected"),
    }
}
