//! Named shared-memory blocks backed by files in a tmpfs directory.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::debug;

use crate::EcIoError;

/// Both the root daemon and the user session map the same block.
const SEGMENT_MODE: u32 = 0o666;

/// A mapped, fixed-size shared-memory block.
#[derive(Debug)]
pub struct SharedSegment {
    name: String,
    path: PathBuf,
    map: MmapMut,
}

impl SharedSegment {
    /// Create a new block; fails with [`io::ErrorKind::AlreadyExists`] when
    /// another process created it first.
    pub fn create_new(dir: &Path, name: &str, size: usize) -> io::Result<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(size as u64)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(SEGMENT_MODE))?;
        debug!(path = %path.display(), size, "created shared segment");
        Self::map(name, path, &file)
    }

    /// Map an existing block that must be at least `size` bytes long.
    pub fn open(dir: &Path, name: &str, size: usize) -> Result<Self, EcIoError> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| EcIoError::Open {
                path: path.display().to_string(),
                source,
            })?;
        let len = file.metadata()?.len() as usize;
        if len < size {
            return Err(EcIoError::SegmentSize {
                name: name.to_string(),
                len,
                need: size,
            });
        }
        debug!(path = %path.display(), len, "opened shared segment");
        Ok(Self::map(name, path, &file)?)
    }

    /// Remove the block name; existing mappings stay valid. Returns whether a
    /// block was present.
    pub fn unlink(dir: &Path, name: &str) -> io::Result<bool> {
        match fs::remove_file(dir.join(name)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn map(name: &str, path: PathBuf, file: &File) -> io::Result<Self> {
        // SAFETY: the block is only accessed through this mapping; concurrent
        // writers from other processes are coordinated by the callers.
        let map = unsafe { MmapMut::map_mut(file)? };
        Ok(Self {
            name: name.to_string(),
            path,
            map,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Base pointer for callers that share the block between threads.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_new_refuses_existing_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut first = SharedSegment::create_new(dir.path(), "blk", 64).expect("create");
        first.as_mut_slice()[3] = 7;
        let err = SharedSegment::create_new(dir.path(), "blk", 64).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        let second = SharedSegment::open(dir.path(), "blk", 64).expect("open");
        assert_eq!(second.as_slice()[3], 7);
    }

    #[test]
    fn block_is_world_accessible() {
        let dir = tempfile::tempdir().expect("tempdir");
        let seg = SharedSegment::create_new(dir.path(), "blk", 16).expect("create");
        let mode = fs::metadata(seg.path()).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, SEGMENT_MODE);
    }

    #[test]
    fn open_rejects_short_block() {
        let dir = tempfile::tempdir().expect("tempdir");
        SharedSegment::create_new(dir.path(), "blk", 16).expect("create");
        let err = SharedSegment::open(dir.path(), "blk", 32).unwrap_err();
        assert!(matches!(err, EcIoError::SegmentSize { len: 16, need: 32, .. }));
    }

    #[test]
    fn unlink_reports_presence() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!SharedSegment::unlink(dir.path(), "blk").expect("unlink"));
        SharedSegment::create_new(dir.path(), "blk", 16).expect("create");
        assert!(SharedSegment::unlink(dir.path(), "blk").expect("unlink"));
    }
}
