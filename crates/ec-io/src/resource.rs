//! The byte-addressable register resource: the hardware file or its dry-run
//! substitute.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::{DRY_RUN_FILE, HARDWARE_PATH, REGISTER_FILE_SIZE};
use crate::EcIoError;

/// Selects which register resource the process talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessMode {
    /// The real embedded controller.
    Hardware,
    /// A zero-filled file inside `dir`, recreated on every [`EcResource::new`].
    DryRun { dir: PathBuf },
}

/// Positional byte access used by the transport and the restore path.
pub trait RegisterIo {
    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    /// Store `data` starting at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;
}

impl RegisterIo for File {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(data)?;
        self.flush()
    }
}

/// Location of the register file together with the access mode it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcResource {
    path: PathBuf,
    dry_run: bool,
}

impl EcResource {
    /// Resolve the resource for `mode`.
    ///
    /// In dry-run mode the substitute file is (re)created with
    /// [`REGISTER_FILE_SIZE`] zero bytes.
    pub fn new(mode: &AccessMode) -> Result<Self, EcIoError> {
        match mode {
            AccessMode::Hardware => Ok(Self {
                path: PathBuf::from(HARDWARE_PATH),
                dry_run: false,
            }),
            AccessMode::DryRun { dir } => {
                let path = dir.join(DRY_RUN_FILE);
                std::fs::write(&path, [0u8; REGISTER_FILE_SIZE]).map_err(|source| {
                    EcIoError::Open {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                info!(path = %path.display(), "using dry-run register file");
                Ok(Self {
                    path,
                    dry_run: true,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn open_read(&self) -> Result<File, EcIoError> {
        File::open(&self.path).map_err(|source| self.open_error(source))
    }

    /// Open for read-modify-write; the file is neither created nor truncated.
    pub fn open_write(&self) -> Result<File, EcIoError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|source| self.open_error(source))
    }

    /// Copy of the whole register file.
    pub fn snapshot(&self) -> Result<Vec<u8>, EcIoError> {
        let mut file = self.open_read()?;
        let mut data = vec![0u8; REGISTER_FILE_SIZE];
        file.read_at(0, &mut data)
            .map_err(|source| EcIoError::Register { offset: 0, source })?;
        debug!(path = %self.path.display(), len = data.len(), "register snapshot");
        Ok(data)
    }

    /// Replace the dry-run file with a captured register image.
    pub fn load_image(&self, image: &[u8]) -> Result<(), EcIoError> {
        if !self.dry_run {
            return Err(EcIoError::NotDryRun);
        }
        if image.len() != REGISTER_FILE_SIZE {
            return Err(EcIoError::ImageSize {
                len: image.len(),
                need: REGISTER_FILE_SIZE,
            });
        }
        std::fs::write(&self.path, image).map_err(|source| self.open_error(source))?;
        info!(path = %self.path.display(), "dry-run register image loaded");
        Ok(())
    }

    fn open_error(&self, source: io::Error) -> EcIoError {
        EcIoError::Open {
            path: self.path.display().to_string(),
            source,
        }
    }
}
