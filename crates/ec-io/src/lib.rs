#![cfg_attr(docsrs, feature(doc_cfg))]
//! Register file access for the embedded controller.
//!
//! [`RegisterTransport`] turns command lists into seek + read/write calls on
//! the register resource and remembers every byte it modified. When the
//! transport is dropped those bytes are written back from a [`BackupBlock`]
//! captured once per boot, so firmware state never outlives the session.

use std::io;

use ec_cmd::CmdError;
use thiserror::Error;

pub mod backup;
pub mod resource;
pub mod shm;
pub mod sysfs;
mod transport;

pub use backup::{BackupBlock, BackupProvider};
pub use resource::{AccessMode, EcResource, RegisterIo};
pub use shm::SharedSegment;
pub use sysfs::{OneLineBackup, TurboBoostFlag};
pub use transport::{RegisterTransport, WriteHandle};

/// Constants describing the managed register file.
pub mod consts {
    /// Register file exposed by the `ec_sys` debugfs driver.
    pub const HARDWARE_PATH: &str = "/sys/kernel/debug/ec/ec0/io";
    /// Name of the zero-filled substitute file used in dry-run mode.
    pub const DRY_RUN_FILE: &str = "msiDryRun.bin";
    /// Size of the embedded-controller address space.
    pub const REGISTER_FILE_SIZE: usize = 256;
    /// Shared-memory block holding the pristine register snapshot.
    pub const BACKUP_BLOCK_NAME: &str = "MSIFansACPIBackup";
    /// Default directory for named shared-memory blocks.
    pub const DEFAULT_SHM_DIR: &str = "/dev/shm";
    /// Turbo boost toggle of the `intel_pstate` driver.
    pub const NO_TURBO_PATH: &str = "/sys/devices/system/cpu/intel_pstate/no_turbo";
}

/// Errors produced by register and shared-memory access.
#[derive(Debug, Error)]
pub enum EcIoError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("register {offset:#04x}: {source}")]
    Register { offset: u64, source: io::Error },
    #[error("{path}: {source}")]
    Open { path: String, source: io::Error },
    #[error("command: {0}")]
    Command(#[from] CmdError),
    #[error("shared memory {name} is {len} bytes, expected at least {need}")]
    SegmentSize { name: String, len: usize, need: usize },
    #[error("unexpected sysfs value in {path}: {value:?}")]
    SysfsValue { path: String, value: String },
    #[error("register image is {len} bytes, expected {need}")]
    ImageSize { len: usize, need: usize },
    #[error("register images can only be loaded in dry-run mode")]
    NotDryRun,
}
