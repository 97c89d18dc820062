//! Pre-mutation file backups under `.actiongate/backups/`.
//!
//! Names are `<actionId>_<timestampMs>_<basename>.bak`; the timestamp orders
//! pruning, oldest first.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::error::ActionError;

#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    retention: usize,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `source` into a fresh backup file and return its path.
    #[instrument(skip_all, fields(action_id = %action_id, source = %source.display()))]
    pub fn create(&self, action_id: &str, source: &Path) -> Result<PathBuf, ActionError> {
        fs::create_dir_all(&self.dir)
            .map_err(|err| ActionError::Backup(format!("create {}: {err}", self.dir.display())))?;
        let basename = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mut millis = Utc::now().timestamp_millis();
        let mut path = self.dir.join(format!("{action_id}_{millis}_{basename}.bak"));
        while path.exists() {
            millis += 1;
            path = self.dir.join(format!("{action_id}_{millis}_{basename}.bak"));
        }
        fs::copy(source, &path).map_err(|err| {
            ActionError::Backup(format!("copy {} to backup: {err}", source.display()))
        })?;
        debug!(backup = %path.display(), "backup created");
        Ok(path)
    }

    /// Copy backup bytes back over `target`, creating parents as needed.
    #[instrument(skip_all, fields(backup = %backup.display(), target = %target.display()))]
    pub fn restore(&self, backup: &Path, target: &Path) -> Result<(), ActionError> {
        if !backup.is_file() {
            return Err(ActionError::Backup(format!(
                "backup {} is missing",
                backup.display()
            )));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| ActionError::io(format!("create {}", parent.display()), err))?;
        }
        fs::copy(backup, target).map_err(|err| {
            ActionError::Backup(format!("restore {}: {err}", target.display()))
        })?;
        Ok(())
    }

    /// Remove a backup that is no longer needed. Failures are logged only.
    pub fn discard(&self, backup: &Path) {
        if let Err(err) = fs::remove_file(backup) {
            warn!(backup = %backup.display(), err = %err, "failed to discard backup");
        }
    }

    /// Delete the oldest backups beyond the retention cap.
    #[instrument(skip_all, fields(retention = self.retention))]
    pub fn prune(&self) -> Result<usize> {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut backups = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?
        {
            let entry = entry.with_context(|| format!("read entry in {}", self.dir.display()))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "bak") {
                let name = entry.file_name().to_string_lossy().into_owned();
                backups.push((backup_millis(&name), name, path));
            }
        }
        if backups.len() <= self.retention {
            return Ok(0);
        }
        backups.sort();
        let excess = backups.len() - self.retention;
        for (_, _, path) in backups.iter().take(excess) {
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        }
        debug!(removed = excess, "pruned backups");
        Ok(excess)
    }
}

fn backup_millis(name: &str) -> i64 {
    name.split('_')
        .nth(1)
        .and_then(|part| part.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_restore_round_trip_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("site.css");
        fs::write(&target, "original").expect("write");
        let store = BackupStore::new(temp.path().join("backups"), 10);

        let backup = store.create("abc", &target).expect("backup");
        let name = backup.file_name().expect("name").to_string_lossy().into_owned();
        assert!(name.starts_with("abc_"));
        assert!(name.ends_with("_site.css.bak"));

        fs::write(&target, "changed").expect("write");
        store.restore(&backup, &target).expect("restore");
        assert_eq!(fs::read_to_string(&target).expect("read"), "original");
    }

    #[test]
    fn backups_for_same_action_never_collide() {
        let temp = tempfile::tempdir().expect("tempdir");
        let target = temp.path().join("a.txt");
        fs::write(&target, "x").expect("write");
        let store = BackupStore::new(temp.path().join("backups"), 10);
        let first = store.create("id", &target).expect("first");
        let second = store.create("id", &target).expect("second");
        assert_ne!(first, second);
    }

    #[test]
    fn restoring_missing_backup_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = BackupStore::new(temp.path().join("backups"), 10);
        let err = store
            .restore(&temp.path().join("nope.bak"), &temp.path().join("a"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Backup);
    }

    #[test]
    fn prune_removes_oldest_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("backups");
        fs::create_dir_all(&dir).expect("mkdir");
        for (id, ms) in [("c", 3000), ("a", 1000), ("b", 2000)] {
            fs::write(dir.join(format!("{id}_{ms}_x.css.bak")), id).expect("write");
        }
        let store = BackupStore::new(&dir, 2);
        assert_eq!(store.prune().expect("prune"), 1);
        assert!(!dir.join("a_1000_x.css.bak").exists());
        assert!(dir.join("b_2000_x.css.bak").exists());
        assert!(dir.join("c_3000_x.css.bak").exists());
    }
}
