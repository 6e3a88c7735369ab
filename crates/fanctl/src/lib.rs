#![cfg_attr(docsrs, feature(doc_cfg))]
//! Long-running services of the fan controller.
//!
//! [`DaemonService`] owns the hardware and answers requests left in the
//! shared channel. [`UiClient`] is the session side of that channel and
//! [`UiSession`] runs it on background threads, together with the optional
//! game mode decider.
//!
//! ```rust,no_run
//! use fanctl::{DaemonConfig, DaemonService, Runner};
//!
//! # fn run() -> Result<(), fanctl::ServiceError> {
//! let mut service = DaemonService::new(DaemonConfig::hardware())?;
//! let runner = Runner::spawn("daemon", move |stop| service.serve(&stop))?;
//! // ... wait for a termination signal ...
//! runner.join().unwrap_or(Ok(()))?;
//! # Ok(())
//! # }
//! ```

use std::io;

use ec_io::EcIoError;
use fanctl_decide::DecideError;
use fanctl_device::DeviceError;
use fanctl_proto::{ChannelError, WireError};
use thiserror::Error;

mod client;
mod daemon;
mod mailbox;
mod runner;
mod security;
mod session;
mod staleness;

pub use client::{ClientConfig, UiClient};
pub use daemon::{DaemonConfig, DaemonService};
pub use mailbox::Mailbox;
pub use runner::{Runner, StopFlag};
pub use security::{engage_filter, NoSyscallFilter, SyscallFilter};
pub use session::{ConnectionState, SessionConfig, UiHandle, UiSession, UiSnapshot};
pub use staleness::StalenessTracker;

pub mod consts {
    use std::time::Duration;

    /// Kernel knob that keeps root from opening files other users created in
    /// sticky directories such as `/dev/shm`.
    pub const PROTECTED_REGULAR_PATH: &str = "/proc/sys/fs/protected_regular";
    pub const CPUINFO_PATH: &str = "/proc/cpuinfo";
    /// Cycles without tag progress before the link is reported as broken.
    pub const STALE_CYCLES: u32 = 5;
    /// The communicator pings on every n-th idle loop.
    pub const PING_EVERY: u64 = 3;
    pub const BUSY_LOOP_DELAY: Duration = Duration::from_millis(250);
    pub const IDLE_LOOP_DELAY: Duration = Duration::from_secs(1);
    pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
    /// Extra pause of the game mode decider on top of the service delay.
    pub const GAME_MODE_EXTRA_DELAY: Duration = Duration::from_millis(500);
}

/// Errors raised by the services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("register access: {0}")]
    EcIo(#[from] EcIoError),
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("message: {0}")]
    Wire(#[from] WireError),
    #[error("device: {0}")]
    Device(#[from] DeviceError),
    #[error("decision: {0}")]
    Decide(#[from] DecideError),
    #[error("daemon does not answer pings, possibly stopped")]
    DaemonStopped,
    #[error("syscall filter unavailable: {0}")]
    FilterUnavailable(String),
}

impl ServiceError {
    /// Fatal errors end the current process attempt instead of being
    /// retried on the next cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            ServiceError::Device(err) => err.is_fatal(),
            ServiceError::Decide(_) => true,
            _ => false,
        }
    }
}
