use tracing::{info, warn};

use crate::ServiceError;

/// OS level syscall allow-list applied before serving.
///
/// There is deliberately no way to disengage a filter once it is active.
pub trait SyscallFilter {
    fn name(&self) -> &str;
    fn engage(&mut self) -> Result<(), ServiceError>;
    fn is_engaged(&self) -> bool;
}

/// Used where no filter backend is compiled in; engaging always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSyscallFilter;

impl SyscallFilter for NoSyscallFilter {
    fn name(&self) -> &str {
        "none"
    }

    fn engage(&mut self) -> Result<(), ServiceError> {
        Err(ServiceError::FilterUnavailable(
            "no syscall filter backend in this build".into(),
        ))
    }

    fn is_engaged(&self) -> bool {
        false
    }
}

/// Engage `filter`, logging the outcome. A failure leaves the process
/// running without restrictions.
pub fn engage_filter(filter: &mut dyn SyscallFilter) -> bool {
    match filter.engage() {
        Ok(()) => {
            info!(filter = filter.name(), "syscall restrictions engaged");
            true
        }
        Err(err) => {
            warn!(filter = filter.name(), error = %err, "running without syscall restrictions");
            false
        }
    }
}
