use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::datetime::iso8601_serde;

pub const SPOOL_FILE_NAME: &str = "reminders.json";
pub const REMINDER_CATEGORY: &str = "TASK_REMINDER";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum InterruptionLevel {
    Active,
    TimeSensitive,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderRequest {
    pub identifier: String,
    pub task_id: Uuid,
    pub offset_secs: i64,
    pub title: String,
    pub body: String,
    #[serde(with = "iso8601_serde")]
    pub trigger_at: DateTime<Utc>,
    pub level: InterruptionLevel,
    pub category: String,
}

pub trait NotificationCenter: Send + Sync {
    fn authorization(&self) -> AuthorizationStatus;

    /// `Ok(false)` is a denial.
    fn request_authorization(&self) -> anyhow::Result<bool>;

    fn add(&self, request: ReminderRequest) -> anyhow::Result<()>;

    fn remove_pending(&self, identifiers: &[String]);

    fn remove_all_pending(&self);

    fn pending(&self) -> Vec<ReminderRequest>;
}

#[derive(Debug)]
pub struct SpoolNotificationCenter {
    path: PathBuf,
    enabled: bool,
    pending: Mutex<BTreeMap<String, ReminderRequest>>,
}

impl SpoolNotificationCenter {
    #[tracing::instrument(skip(data_dir), fields(data_dir = %data_dir.display()))]
    pub fn open(data_dir: &Path, enabled: bool) -> Self {
        let path = data_dir.join(SPOOL_FILE_NAME);
        let pending = load_spool(&path);
        info!(
            spool = %path.display(),
            enabled,
            pending = pending.len(),
            "opened reminder spool"
        );
        Self {
            path,
            enabled,
            pending: Mutex::new(pending),
        }
    }

    fn persist(&self, pending: &BTreeMap<String, ReminderRequest>) -> anyhow::Result<()> {
        let requests: Vec<&ReminderRequest> = pending.values().collect();
        let payload = serde_json::to_string_pretty(&requests)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        temp.write_all(payload.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

fn load_spool(path: &Path) -> BTreeMap<String, ReminderRequest> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeMap::new(),
    };
    match serde_json::from_str::<Vec<ReminderRequest>>(&raw) {
        Ok(requests) => requests
            .into_iter()
            .map(|request| (request.identifier.clone(), request))
            .collect(),
        Err(err) => {
            warn!(spool = %path.display(), error = %err, "ignoring unreadable reminder spool");
            BTreeMap::new()
        }
    }
}

impl NotificationCenter for SpoolNotificationCenter {
    fn authorization(&self) -> AuthorizationStatus {
        if self.enabled {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        }
    }

    fn request_authorization(&self) -> anyhow::Result<bool> {
        debug!(granted = self.enabled, "reminder spool authorization");
        Ok(self.enabled)
    }

    #[tracing::instrument(skip(self, request), fields(identifier = %request.identifier))]
    fn add(&self, request: ReminderRequest) -> anyhow::Result<()> {
        let mut pending = self.pending.lock();
        pending.insert(request.identifier.clone(), request);
        self.persist(&pending)
    }

    fn remove_pending(&self, identifiers: &[String]) {
        let mut pending = self.pending.lock();
        let before = pending.len();
        for identifier in identifiers {
            pending.remove(identifier);
        }
        if pending.len() == before {
            return;
        }
        if let Err(err) = self.persist(&pending) {
            warn!(error = %err, "failed to rewrite reminder spool after removal");
        }
    }

    fn remove_all_pending(&self) {
        let mut pending = self.pending.lock();
        pending.clear();
        if let Err(err) = self.persist(&pending) {
            warn!(error = %err, "failed to clear reminder spool");
        }
    }

    fn pending(&self) -> Vec<ReminderRequest> {
        let mut requests: Vec<ReminderRequest> = self.pending.lock().values().cloned().collect();
        requests.sort_by_key(|request| request.trigger_at);
        requests
    }
}

#[derive(Debug)]
pub struct MemoryNotificationCenter {
    state: Mutex<MemoryCenterState>,
}

#[derive(Debug)]
struct MemoryCenterState {
    status: AuthorizationStatus,
    grant_on_request: bool,
    authorization_requests: usize,
    rejected: HashSet<String>,
    pending: BTreeMap<String, ReminderRequest>,
}

impl Default for MemoryNotificationCenter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNotificationCenter {
    pub fn new() -> Self {
        Self::with_status(AuthorizationStatus::Authorized, true)
    }

    pub fn undetermined(grant: bool) -> Self {
        Self::with_status(AuthorizationStatus::NotDetermined, grant)
    }

    fn with_status(status: AuthorizationStatus, grant_on_request: bool) -> Self {
        Self {
            state: Mutex::new(MemoryCenterState {
                status,
                grant_on_request,
                authorization_requests: 0,
                rejected: HashSet::new(),
                pending: BTreeMap::new(),
            }),
        }
    }

    pub fn set_grant(&self, grant: bool) {
        self.state.lock().grant_on_request = grant;
    }

    pub fn reject(&self, identifier: impl Into<String>) {
        self.state.lock().rejected.insert(identifier.into());
    }

    pub fn authorization_requests(&self) -> usize {
        self.state.lock().authorization_requests
    }

    pub fn pending_keys(&self) -> Vec<String> {
        self.state.lock().pending.keys().cloned().collect()
    }

    pub fn get(&self, identifier: &str) -> Option<ReminderRequest> {
        self.state.lock().pending.get(identifier).cloned()
    }
}

impl NotificationCenter for MemoryNotificationCenter {
    fn authorization(&self) -> AuthorizationStatus {
        self.state.lock().status
    }

    fn request_authorization(&self) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        state.authorization_requests += 1;
        state.status = if state.grant_on_request {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
        Ok(state.grant_on_request)
    }

    fn add(&self, request: ReminderRequest) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.rejected.contains(&request.identifier) {
            return Err(anyhow!("reminder rejected: {}", request.identifier));
        }
        state.pending.insert(request.identifier.clone(), request);
        Ok(())
    }

    fn remove_pending(&self, identifiers: &[String]) {
        let mut state = self.state.lock();
        for identifier in identifiers {
            state.pending.remove(identifier);
        }
    }

    fn remove_all_pending(&self) {
        self.state.lock().pending.clear();
    }

    fn pending(&self) -> Vec<ReminderRequest> {
        self.state.lock().pending.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;

    fn request(identifier: &str) -> ReminderRequest {
        ReminderRequest {
            identifier: identifier.to_string(),
            task_id: Uuid::nil(),
            offset_secs: 1800,
            title: "Deadline approaching: ship".to_string(),
            body: "Due in 30 minutes.".to_string(),
            trigger_at: Utc
                .with_ymd_and_hms(2026, 5, 1, 8, 30, 0)
                .single()
                .expect("valid instant"),
            level: InterruptionLevel::Active,
            category: REMINDER_CATEGORY.to_string(),
        }
    }

    #[test]
    fn spool_survives_reopen_and_removal() {
        let temp = tempdir().expect("tempdir");
        let spool = SpoolNotificationCenter::open(temp.path(), true);
        spool.add(request("a-1800")).expect("add a");
        spool.add(request("b-1800")).expect("add b");
        spool.remove_pending(&["a-1800".to_string(), "missing".to_string()]);

        let reopened = SpoolNotificationCenter::open(temp.path(), true);
        let keys: Vec<String> = reopened
            .pending()
            .into_iter()
            .map(|request| request.identifier)
            .collect();
        assert_eq!(keys, vec!["b-1800".to_string()]);
    }

    #[test]
    fn disabled_spool_denies_authorization() {
        let temp = tempdir().expect("tempdir");
        let spool = SpoolNotificationCenter::open(temp.path(), false);
        assert_eq!(spool.authorization(), AuthorizationStatus::Denied);
        assert!(!spool.request_authorization().expect("request"));
    }
}
