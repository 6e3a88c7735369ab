#![cfg_attr(docsrs, feature(doc_cfg))]
//! Messages exchanged between the privileged daemon and the user session.
//!
//! The daemon publishes a [`FullInfoBlock`] after every served request and the
//! UI leaves a [`RequestFromUi`] behind a "request pending" flag. Both travel
//! through [`channel::SharedChannel`] using the versioned encoding in
//! [`codec`].

pub mod channel;
pub mod codec;
mod messages;

pub use channel::{ChannelConfig, ChannelError, ChannelFlags, ChannelGuard, SharedChannel};
pub use codec::{WireError, WireFormat};
pub use messages::*;

/// Protocol-wide constants.
pub mod consts {
    use std::time::Duration;

    /// Minimum delay between two service cycles of the daemon (its poll period).
    pub const MINIMUM_SERVICE_DELAY: Duration = Duration::from_millis(500);
    /// Name of the primary shared-memory block.
    pub const CHANNEL_NAME: &str = "MSICoolersSharedControlMem9";
    /// Total size of the primary shared-memory block.
    pub const CHANNEL_SIZE: usize = 4096;
    /// Alignment of the lock header in front of the buffers.
    pub const LOCK_ALIGN: usize = 64;
    /// Magic value opening every encoded [`crate::FullInfoBlock`].
    pub const FULL_INFO_SIGNATURE: u64 = 0xABBA_CDDC_DEFE_EF01;
    /// Tachometer period to RPM conversion constant.
    pub const RPM_DIVIDEND: u32 = 478_000;
}
