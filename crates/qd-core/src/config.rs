use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::{debug, info, trace, warn};

use crate::persist::DEFAULT_SAVE_DEBOUNCE;

pub const RC_ENV: &str = "QDRC";
pub const RC_FILE_NAME: &str = ".qdrc";
pub const APP_DIR_NAME: &str = "QueueDeadline";

/// Flat `key = value` settings read from a `.qdrc` file and overrides.
#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut map = HashMap::new();
        map.insert(
            "save.debounce_ms".to_string(),
            DEFAULT_SAVE_DEBOUNCE.as_millis().to_string(),
        );
        map.insert("reminders".to_string(), "on".to_string());
        map.insert("color".to_string(), "on".to_string());
        map.insert("default.list".to_string(), "queue".to_string());
        Self {
            map,
            loaded_files: Vec::new(),
        }
    }
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        match resolve_rc_path(rc_override)? {
            Some(path) => {
                info!(qdrc = %path.display(), "loading qdrc");
                cfg.load_file(&path)?;
            }
            None => debug!("no qdrc found; using defaults"),
        }

        Ok(cfg)
    }

    /// Parses rc text as if it had been read from `origin`.
    pub fn from_str_at(text: &str, origin: &Path) -> anyhow::Result<Self> {
        let mut cfg = Config::default();
        cfg.parse_text(text, origin)?;
        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.map.get(key).map(|v| parse_bool(v))
    }

    pub fn get_u64(&self, key: &str) -> anyhow::Result<Option<u64>> {
        self.map
            .get(key)
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be a whole number, got '{v}'"))
            })
            .transpose()
    }

    pub fn save_debounce(&self) -> anyhow::Result<Duration> {
        Ok(self
            .get_u64("save.debounce_ms")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SAVE_DEBOUNCE))
    }

    pub fn reminders_enabled(&self) -> bool {
        self.get_bool("reminders").unwrap_or(true)
    }

    pub fn color_enabled(&self) -> bool {
        self.get_bool("color").unwrap_or(true)
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let path = fs::canonicalize(&path).unwrap_or(path);
        if self.loaded_files.contains(&path) {
            warn!(file = %path.display(), "config file already loaded; skipping repeated include");
            return Ok(());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.loaded_files.push(path.clone());
        self.parse_text(&text, &path)
    }

    fn parse_text(&mut self, text: &str, path: &Path) -> anyhow::Result<()> {
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before.trim(),
                None => raw_line.trim(),
            };
            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(&base_dir, include_rest.trim())?;
                debug!(
                    file = %path.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );
                if include_path.exists() {
                    self.load_file(&include_path)?;
                } else {
                    warn!(include = %include_path.display(), "include file does not exist; skipping");
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

/// Flag, then `data.location`, then the platform data directory.
#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(location) = cfg.get("data.location") {
        expand_tilde(Path::new(&location))
    } else {
        default_data_dir()?
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(rc_env) = std::env::var(RC_ENV) {
        if rc_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(rc_env)));
    }

    let Some(home) = dirs::home_dir() else {
        warn!("cannot determine home directory; skipping ~/{RC_FILE_NAME}");
        return Ok(None);
    };
    let candidate = home.join(RC_FILE_NAME);
    Ok(candidate.exists().then_some(candidate))
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    if let Some(data) = dirs::data_dir() {
        return Ok(data.join(APP_DIR_NAME));
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".local").join("share").join(APP_DIR_NAME))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let expanded = expand_tilde(Path::new(include));
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

pub fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "on" | "true"
    )
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn defaults_cover_every_key() {
        let cfg = Config::default();
        assert_eq!(cfg.save_debounce().expect("debounce"), Duration::from_secs(1));
        assert!(cfg.reminders_enabled());
        assert!(cfg.color_enabled());
        assert_eq!(cfg.get("default.list").as_deref(), Some("queue"));
        assert!(cfg.get("data.location").is_none());
    }

    #[test]
    fn parses_comments_and_overrides() {
        let cfg = Config::from_str_at(
            "# personal settings\nsave.debounce_ms = 250\nreminders = off  # quiet\n\ncolor=no\n",
            Path::new("/tmp/.qdrc"),
        )
        .expect("parse");

        assert_eq!(
            cfg.save_debounce().expect("debounce"),
            Duration::from_millis(250)
        );
        assert!(!cfg.reminders_enabled());
        assert!(!cfg.color_enabled());

        let mut cfg = cfg;
        cfg.apply_overrides([
            ("rc.reminders".to_string(), "yes".to_string()),
            ("default.list".to_string(), "stack".to_string()),
        ]);
        assert!(cfg.reminders_enabled());
        assert_eq!(cfg.get("default.list").as_deref(), Some("stack"));
    }

    #[test]
    fn rejects_lines_without_equals() {
        let err = Config::from_str_at("reminders on\n", Path::new("/tmp/.qdrc"))
            .expect_err("invalid line");
        assert!(err.to_string().contains("invalid config line"));
    }

    #[test]
    fn bad_debounce_value_is_reported() {
        let cfg = Config::from_str_at("save.debounce_ms = soon\n", Path::new("/tmp/.qdrc"))
            .expect("parse");
        assert!(cfg.save_debounce().is_err());
    }

    #[test]
    fn includes_resolve_relative_to_the_including_file() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("colors.rc"), "color = off\n").expect("write include");
        let rc = temp.path().join(".qdrc");
        fs::write(&rc, "include colors.rc\ninclude missing.rc\ndefault.list = stack\n")
            .expect("write rc");

        let cfg = Config::load(Some(&rc)).expect("load");
        assert!(!cfg.color_enabled());
        assert_eq!(cfg.get("default.list").as_deref(), Some("stack"));
        assert_eq!(cfg.loaded_files.len(), 2);
    }

    #[test]
    fn include_cycles_load_each_file_once() {
        let temp = tempdir().expect("tempdir");
        let rc = temp.path().join(".qdrc");
        fs::write(&rc, "include .qdrc\ninclude extra.rc\ncolor = off\n").expect("write rc");
        fs::write(temp.path().join("extra.rc"), "include .qdrc\nreminders = no\n")
            .expect("write extra");

        let cfg = Config::load(Some(&rc)).expect("load");
        assert_eq!(cfg.loaded_files.len(), 2);
        assert!(!cfg.color_enabled());
        assert!(!cfg.reminders_enabled());
    }

    #[test]
    fn data_dir_prefers_override_then_location() {
        let temp = tempdir().expect("tempdir");
        let location = temp.path().join("from-config");
        let mut cfg = Config::default();
        cfg.apply_overrides([(
            "data.location".to_string(),
            location.display().to_string(),
        )]);

        let resolved = resolve_data_dir(&cfg, None).expect("resolve");
        assert_eq!(resolved, location);
        assert!(location.is_dir());

        let flag = temp.path().join("from-flag");
        assert_eq!(resolve_data_dir(&cfg, Some(&flag)).expect("resolve"), flag);
    }
}
