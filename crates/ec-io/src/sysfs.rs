//! One-line sysfs/procfs knobs living outside of the register file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::consts::NO_TURBO_PATH;
use crate::resource::AccessMode;
use crate::EcIoError;

/// CPU turbo boost switch. The kernel exposes the inverted `no_turbo` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurboBoostFlag {
    path: PathBuf,
}

impl TurboBoostFlag {
    /// The real `intel_pstate` flag, or a `no_turbo` file inside the dry-run
    /// directory (created with turbo enabled when missing).
    pub fn new(mode: &AccessMode) -> Result<Self, EcIoError> {
        match mode {
            AccessMode::Hardware => Ok(Self::at(NO_TURBO_PATH)),
            AccessMode::DryRun { dir } => {
                let path = dir.join("no_turbo");
                if !path.exists() {
                    write_line(&path, "0")?;
                }
                Ok(Self { path })
            }
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> Result<bool, EcIoError> {
        let value = read_line(&self.path)?;
        match value.as_str() {
            "0" => Ok(true),
            "1" => Ok(false),
            _ => Err(EcIoError::SysfsValue {
                path: self.path.display().to_string(),
                value,
            }),
        }
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), EcIoError> {
        write_line(&self.path, if enabled { "0" } else { "1" })?;
        debug!(enabled, "turbo boost flag written");
        Ok(())
    }
}

/// Remembers the first line of a file and writes it back on drop.
#[derive(Debug)]
pub struct OneLineBackup {
    path: PathBuf,
    saved: Option<String>,
}

impl OneLineBackup {
    /// Read failures are logged and disable the restore.
    pub fn capture(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let saved = match read_line(&path) {
            Ok(line) => Some(line),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to back up setting");
                None
            }
        };
        Self { path, saved }
    }

    /// Capture the current line, then replace it with `value` for the lifetime
    /// of the returned guard.
    pub fn override_with(path: impl Into<PathBuf>, value: &str) -> Self {
        let guard = Self::capture(path);
        if let Err(err) = write_line(&guard.path, value) {
            warn!(path = %guard.path.display(), error = %err, "failed to override setting");
        }
        guard
    }

    pub fn saved(&self) -> Option<&str> {
        self.saved.as_deref()
    }
}

impl Drop for OneLineBackup {
    fn drop(&mut self) {
        let Some(saved) = self.saved.take() else {
            return;
        };
        match write_line(&self.path, &saved) {
            Ok(()) => info!(path = %self.path.display(), value = %saved, "setting restored"),
            Err(err) => warn!(path = %self.path.display(), error = %err, "failed to restore setting"),
        }
    }
}

fn read_line(path: &Path) -> Result<String, EcIoError> {
    let text = fs::read_to_string(path).map_err(|source| EcIoError::Open {
        path: path.display().to_string(),
        source,
    })?;
    Ok(text.lines().next().unwrap_or_default().trim().to_string())
}

fn write_line(path: &Path, value: &str) -> Result<(), EcIoError> {
    fs::write(path, format!("{value}\n")).map_err(|source| EcIoError::Open {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turbo_flag_is_inverted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let flag = TurboBoostFlag::new(&AccessMode::DryRun {
            dir: dir.path().to_path_buf(),
        })
        .expect("flag");
        assert!(flag.is_enabled().expect("read"));

        flag.set_enabled(false).expect("write");
        assert_eq!(fs::read_to_string(flag.path()).expect("raw"), "1\n");
        assert!(!flag.is_enabled().expect("read"));
    }

    #[test]
    fn garbage_flag_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("no_turbo");
        fs::write(&path, "maybe\n").expect("seed");
        let err = TurboBoostFlag::at(&path).is_enabled().unwrap_err();
        assert!(matches!(err, EcIoError::SysfsValue { .. }));
    }

    #[test]
    fn one_line_backup_restores_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("protected_regular");
        fs::write(&path, "2\n").expect("seed");

        let guard = OneLineBackup::override_with(&path, "0");
        assert_eq!(guard.saved(), Some("2"));
        assert_eq!(fs::read_to_string(&path).expect("raw"), "0\n");
        drop(guard);
        assert_eq!(fs::read_to_string(&path).expect("raw"), "2\n");
    }

    #[test]
    fn missing_file_disables_restore() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent");
        let guard = OneLineBackup::capture(&path);
        assert_eq!(guard.saved(), None);
        drop(guard);
        assert!(!path.exists());
    }
}
