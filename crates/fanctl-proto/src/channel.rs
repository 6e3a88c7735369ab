//! Shared-memory channel between the daemon and the UI.
//!
//! Layout of the block:
//!
//! ```text
//! [lock word, padded to LOCK_ALIGN][daemon -> UI buffer][flags][UI -> daemon buffer]
//! ```
//!
//! Both buffers are only touched through a [`ChannelGuard`], i.e. while the
//! lock word is held.

use std::io;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use bitflags::bitflags;
use bytes::BytesMut;
use ec_io::consts::DEFAULT_SHM_DIR;
use ec_io::{EcIoError, SharedSegment};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::codec::{WireError, WireFormat};
use crate::consts::{CHANNEL_NAME, CHANNEL_SIZE, LOCK_ALIGN};
use crate::messages::{FullInfoBlock, RequestFromUi};

bitflags! {
    /// Signal byte placed between the two buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelFlags: u8 {
        /// The UI wrote a request the daemon has not consumed yet.
        const UI_REQUEST_PENDING = 0x01;
    }
}

/// Errors raised by the shared channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("shared memory: {0}")]
    Segment(#[from] EcIoError),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("channel lock not acquired within {0:?}")]
    LockTimeout(Duration),
    #[error("channel block of {0} bytes is too small")]
    TooSmall(usize),
    #[error("message: {0}")]
    Wire(#[from] WireError),
}

/// Where the channel lives and how long to wait for its lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub shm_dir: PathBuf,
    pub name: String,
    pub size: usize,
    pub lock_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
            name: CHANNEL_NAME.to_string(),
            size: CHANNEL_SIZE,
            lock_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Daemon,
    Ui,
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    /// Length of each buffer.
    half: usize,
}

impl Layout {
    fn for_size(size: usize) -> Result<Self, ChannelError> {
        let header = std::mem::size_of::<AtomicU32>().next_multiple_of(LOCK_ALIGN);
        let mut half = size.saturating_sub(header) / 2;
        if half % 2 == 1 {
            half -= 1;
        }
        // Room for the flag byte plus a useful message in each direction.
        if half < 64 {
            return Err(ChannelError::TooSmall(size));
        }
        Ok(Self { half })
    }

    const fn daemon_to_ui(&self) -> usize {
        LOCK_ALIGN
    }

    const fn flags(&self) -> usize {
        LOCK_ALIGN + self.half
    }

    const fn ui_to_daemon(&self) -> usize {
        LOCK_ALIGN + self.half + 1
    }

    const fn ui_to_daemon_len(&self) -> usize {
        self.half - 1
    }
}

/// One side of the shared channel.
///
/// The daemon side removes any stale block before creating a fresh one and
/// removes it again on drop; the UI side only maps an existing block.
#[derive(Debug)]
pub struct SharedChannel {
    segment: SharedSegment,
    layout: Layout,
    config: ChannelConfig,
    role: Role,
}

impl SharedChannel {
    pub fn create_for_daemon(config: ChannelConfig) -> Result<Self, ChannelError> {
        let layout = Layout::for_size(config.size)?;
        if SharedSegment::unlink(&config.shm_dir, &config.name)? {
            warn!(name = %config.name, "removed stale channel block");
        }
        let mut segment = SharedSegment::create_new(&config.shm_dir, &config.name, config.size)?;
        segment.as_mut_slice().fill(0);
        info!(path = %segment.path().display(), size = config.size, "channel created");
        Ok(Self {
            segment,
            layout,
            config,
            role: Role::Daemon,
        })
    }

    pub fn open_for_ui(config: ChannelConfig) -> Result<Self, ChannelError> {
        let layout = Layout::for_size(config.size)?;
        let segment = SharedSegment::open(&config.shm_dir, &config.name, config.size)?;
        debug!(path = %segment.path().display(), "channel opened");
        Ok(Self {
            segment,
            layout,
            config,
            role: Role::Ui,
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Acquire the cross-process lock, waiting at most the configured timeout.
    pub fn lock(&mut self) -> Result<ChannelGuard<'_>, ChannelError> {
        let base = self.segment.as_mut_ptr();
        // SAFETY: the mapping is page aligned and at least LOCK_ALIGN bytes
        // long, so offset 0 holds a properly aligned u32 that lives as long as
        // `self.segment`. It is only ever accessed atomically.
        let word = unsafe { &*(base as *const AtomicU32) };

        let deadline = Instant::now() + self.config.lock_timeout;
        let mut spins = 0u32;
        while word
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if Instant::now() >= deadline {
                return Err(ChannelError::LockTimeout(self.config.lock_timeout));
            }
            spins += 1;
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::sleep(Duration::from_micros(200));
            }
        }
        trace!(spins, "channel locked");
        Ok(ChannelGuard {
            word,
            base,
            layout: self.layout,
            _channel: PhantomData,
        })
    }
}

impl Drop for SharedChannel {
    fn drop(&mut self) {
        if self.role == Role::Daemon {
            match SharedSegment::unlink(&self.config.shm_dir, &self.config.name) {
                Ok(_) => debug!(name = %self.config.name, "channel removed"),
                Err(err) => warn!(name = %self.config.name, error = %err, "failed to remove channel"),
            }
        }
    }
}

/// Exclusive access to both buffers; the lock is released on drop.
pub struct ChannelGuard<'a> {
    word: &'a AtomicU32,
    base: *mut u8,
    layout: Layout,
    _channel: PhantomData<&'a mut SharedChannel>,
}

impl ChannelGuard<'_> {
    fn region(&self, start: usize, len: usize) -> &[u8] {
        // SAFETY: `start + len` stays inside the mapping (see `Layout`), the
        // region does not overlap the lock word, and the lock is held.
        unsafe { std::slice::from_raw_parts(self.base.add(start), len) }
    }

    fn region_mut(&mut self, start: usize, len: usize) -> &mut [u8] {
        // SAFETY: as in `region`; `&mut self` rules out a second live view.
        unsafe { std::slice::from_raw_parts_mut(self.base.add(start), len) }
    }

    pub fn flags(&self) -> ChannelFlags {
        ChannelFlags::from_bits_truncate(self.region(self.layout.flags(), 1)[0])
    }

    pub fn set_flags(&mut self, flags: ChannelFlags) {
        let at = self.layout.flags();
        self.region_mut(at, 1)[0] = flags.bits();
    }

    pub fn is_request_pending(&self) -> bool {
        self.flags().contains(ChannelFlags::UI_REQUEST_PENDING)
    }

    pub fn set_request_pending(&mut self, pending: bool) {
        let mut flags = self.flags();
        flags.set(ChannelFlags::UI_REQUEST_PENDING, pending);
        self.set_flags(flags);
    }

    pub fn read_info(&self) -> Result<FullInfoBlock, WireError> {
        let mut cursor = self.region(self.layout.daemon_to_ui(), self.layout.half);
        FullInfoBlock::decode(&mut cursor)
    }

    pub fn write_info(&mut self, info: &FullInfoBlock) -> Result<(), WireError> {
        let (start, len) = (self.layout.daemon_to_ui(), self.layout.half);
        store(self.region_mut(start, len), info)
    }

    pub fn read_request(&self) -> Result<RequestFromUi, WireError> {
        let mut cursor = self.region(self.layout.ui_to_daemon(), self.layout.ui_to_daemon_len());
        RequestFromUi::decode(&mut cursor)
    }

    pub fn write_request(&mut self, request: &RequestFromUi) -> Result<(), WireError> {
        let (start, len) = (self.layout.ui_to_daemon(), self.layout.ui_to_daemon_len());
        store(self.region_mut(start, len), request)
    }
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.word.store(0, Ordering::Release);
    }
}

fn store<T: WireFormat>(dst: &mut [u8], value: &T) -> Result<(), WireError> {
    let mut buf = BytesMut::with_capacity(dst.len());
    value.encode(&mut buf)?;
    if buf.len() > dst.len() {
        return Err(WireError::TooLarge {
            len: buf.len(),
            capacity: dst.len(),
        });
    }
    dst[..buf.len()].copy_from_slice(&buf);
    Ok(())
}
