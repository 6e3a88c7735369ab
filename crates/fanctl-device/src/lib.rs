//! Logical device operations for MSI laptops.
//!
//! A [`DeviceController`] turns "booster on" or "battery balanced" into raw
//! register writes. Hardware generations differ only in their command
//! tables, injected as a [`CommandTable`] strategy chosen by [`Variant`].

use ec_cmd::CmdError;
use ec_io::EcIoError;
use fanctl_proto::CurveError;
use thiserror::Error;

mod controller;
mod detector;
mod table;

pub use controller::DeviceController;
pub use detector::ProperCommandDetector;
pub use table::{cpu_generation, CommandTable, IntelBeforeGen10, IntelGen10, Variant};

/// How the caller must react to a [`DeviceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Report the error text and keep serving.
    Recoverable,
    /// Stop this process attempt; a supervisor restarts it.
    Fatal,
}

/// Errors raised by device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("io: {0}")]
    Io(#[from] EcIoError),
    #[error("hardware reports an unexpected {0} state")]
    UnexpectedState(&'static str),
    #[error("detection of {what} failed: {reason}")]
    Detection { what: &'static str, reason: String },
    #[error("command should be detected before use")]
    NotDetected,
    #[error("invalid fan curve: {0}")]
    InvalidCurve(#[from] CurveError),
    #[error("command: {0}")]
    Command(#[from] CmdError),
    #[error("unsupported device: {0}")]
    Unsupported(String),
}

impl DeviceError {
    pub fn severity(&self) -> Severity {
        match self {
            DeviceError::Io(_) | DeviceError::UnexpectedState(_) => Severity::Recoverable,
            DeviceError::Detection { .. }
            | DeviceError::NotDetected
            | DeviceError::InvalidCurve(_)
            | DeviceError::Command(_)
            | DeviceError::Unsupported(_) => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
