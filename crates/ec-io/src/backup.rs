//! Once-per-boot snapshot of the register file and best-effort restoration.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::consts::REGISTER_FILE_SIZE;
use crate::resource::{EcResource, RegisterIo};
use crate::shm::SharedSegment;
use crate::EcIoError;

/// Restores register bytes modified during a session.
pub trait BackupProvider: Send + Sync {
    /// Write the pristine value back to every listed offset. Implementations
    /// keep going after individual failures.
    fn restore_offsets(&self, offsets: &BTreeSet<u64>);
}

/// Pristine register snapshot kept in a named shared-memory block.
///
/// The block outlives the daemon process so a restarted daemon restores to
/// the state seen at first start, not to whatever it left behind.
#[derive(Debug)]
pub struct BackupBlock {
    segment: SharedSegment,
    resource: EcResource,
    captured_now: bool,
}

impl BackupBlock {
    /// Create the block and capture `resource` into it, or map the block a
    /// previous process already captured.
    pub fn open_or_capture(dir: &Path, name: &str, resource: &EcResource) -> Result<Self, EcIoError> {
        match SharedSegment::create_new(dir, name, REGISTER_FILE_SIZE) {
            Ok(mut segment) => {
                let snapshot = match resource.snapshot() {
                    Ok(data) => data,
                    Err(err) => {
                        // A block without a snapshot must not be reused later.
                        drop(segment);
                        if let Err(unlink) = SharedSegment::unlink(dir, name) {
                            warn!(name, error = %unlink, "failed to remove empty backup block");
                        }
                        return Err(err);
                    }
                };
                segment.as_mut_slice()[..snapshot.len()].copy_from_slice(&snapshot);
                segment.flush()?;
                info!(name, path = %resource.path().display(), "captured register backup");
                Ok(Self {
                    segment,
                    resource: resource.clone(),
                    captured_now: true,
                })
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let segment = SharedSegment::open(dir, name, REGISTER_FILE_SIZE)?;
                info!(name, "reusing register backup from earlier start");
                Ok(Self {
                    segment,
                    resource: resource.clone(),
                    captured_now: false,
                })
            }
            Err(source) => Err(EcIoError::Open {
                path: dir.join(name).display().to_string(),
                source,
            }),
        }
    }

    /// Whether this call took the snapshot (as opposed to reusing one).
    pub fn captured_now(&self) -> bool {
        self.captured_now
    }

    pub fn pristine(&self) -> &[u8] {
        &self.segment.as_slice()[..REGISTER_FILE_SIZE]
    }
}

impl BackupProvider for BackupBlock {
    fn restore_offsets(&self, offsets: &BTreeSet<u64>) {
        if offsets.is_empty() {
            return;
        }
        let mut file = match self.resource.open_write() {
            Ok(file) => file,
            Err(err) => {
                warn!(error = %err, count = offsets.len(), "cannot open registers for restore");
                return;
            }
        };
        let pristine = self.pristine();
        let mut restored = 0usize;
        for &offset in offsets {
            let Some(&byte) = pristine.get(offset as usize) else {
                warn!(offset, "offset outside of backup block");
                continue;
            };
            match file.write_at(offset, &[byte]) {
                Ok(()) => {
                    debug!(offset, value = byte, "restored register");
                    restored += 1;
                }
                Err(err) => warn!(offset, error = %err, "failed to restore register"),
            }
        }
        info!(restored, requested = offsets.len(), "register restore finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::AccessMode;

    fn seeded(dir: &Path) -> EcResource {
        let resource = EcResource::new(&AccessMode::DryRun {
            dir: dir.to_path_buf(),
        })
        .expect("resource");
        let mut file = resource.open_write().expect("open");
        file.write_at(0x20, &[0x11, 0x22]).expect("seed");
        resource
    }

    #[test]
    fn second_start_keeps_first_snapshot() {
        let regs = tempfile::tempdir().expect("tempdir");
        let shm = tempfile::tempdir().expect("tempdir");
        let resource = seeded(regs.path());

        let first = BackupBlock::open_or_capture(shm.path(), "bk", &resource).expect("capture");
        assert!(first.captured_now());
        drop(first);

        resource
            .open_write()
            .expect("open")
            .write_at(0x20, &[0x99])
            .expect("modify");

        let second = BackupBlock::open_or_capture(shm.path(), "bk", &resource).expect("reopen");
        assert!(!second.captured_now());
        assert_eq!(second.pristine()[0x20], 0x11);
        assert_eq!(second.pristine()[0x21], 0x22);
    }

    #[test]
    fn restore_rewrites_only_listed_offsets() {
        let regs = tempfile::tempdir().expect("tempdir");
        let shm = tempfile::tempdir().expect("tempdir");
        let resource = seeded(regs.path());
        let backup = BackupBlock::open_or_capture(shm.path(), "bk", &resource).expect("capture");

        resource
            .open_write()
            .expect("open")
            .write_at(0x20, &[0xAA, 0xBB])
            .expect("modify");
        backup.restore_offsets(&BTreeSet::from([0x20, 0x1000]));

        let now = resource.snapshot().expect("snapshot");
        assert_eq!(now[0x20], 0x11);
        assert_eq!(now[0x21], 0xBB);
    }

    #[test]
    fn failed_capture_leaves_no_block() {
        let shm = tempfile::tempdir().expect("tempdir");
        let missing = tempfile::tempdir().expect("tempdir");
        let resource = EcResource::new(&AccessMode::DryRun {
            dir: missing.path().to_path_buf(),
        })
        .expect("resource");
        std::fs::remove_file(resource.path()).expect("remove");

        assert!(BackupBlock::open_or_capture(shm.path(), "bk", &resource).is_err());
        assert!(!shm.path().join("bk").exists());
    }
}
