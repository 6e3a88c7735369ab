#![cfg_attr(docsrs, feature(doc_cfg))]
//! Addressed register commands: the vocabulary spoken by the register
//! transport, the device tables and the shared-memory messages.
//!
//! Every command names an absolute byte offset in the embedded-controller
//! register file together with a fixed-width scalar payload. Multi-byte values
//! are stored most significant byte first.

use std::ops::Range;

use thiserror::Error;

mod state;
pub mod wire;

pub use state::StateMap;

/// Ordered sequence of commands. Order is significant for writes only.
pub type CommandList = Vec<AddressedCommand>;

/// Errors raised while building, decoding or comparing commands.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CmdError {
    #[error("buffer truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown command tag: {0}")]
    UnknownTag(u8),
    #[error("payload width mismatch at {offset:#04x}: expected {expected}, got {got}")]
    WidthMismatch {
        offset: u64,
        expected: usize,
        got: usize,
    },
    #[error("state maps have different key sets")]
    KeyMismatch,
    #[error("command list too long: {0} entries")]
    TooManyEntries(usize),
}

/// Fixed-width scalar payload of an addressed value.
pub trait RegisterScalar: Copy + Eq + std::fmt::Debug {
    /// Width of the value in the register file.
    const WIDTH: usize;

    /// Rebuild the scalar from big-endian register bytes.
    fn from_be_slice(bytes: &[u8]) -> Self;

    /// Serialize the scalar into big-endian register bytes.
    fn to_be_vec(self) -> Vec<u8>;
}

impl RegisterScalar for u8 {
    const WIDTH: usize = 1;

    fn from_be_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn to_be_vec(self) -> Vec<u8> {
        vec![self]
    }
}

impl RegisterScalar for u16 {
    const WIDTH: usize = 2;

    fn from_be_slice(bytes: &[u8]) -> Self {
        u16::from_be_bytes([bytes[0], bytes[1]])
    }

    fn to_be_vec(self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

/// Scalar value located at an absolute register offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressedValue<T> {
    pub offset: u64,
    pub value: T,
}

impl<T: RegisterScalar> AddressedValue<T> {
    pub const fn new(offset: u64, value: T) -> Self {
        Self { offset, value }
    }
}

/// Single register byte where only the bits selected by `mask` are owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AddressedBits {
    pub offset: u64,
    pub mask: u8,
    pub value: u8,
}

impl AddressedBits {
    /// Build a bit command; `value` is masked on construction.
    pub const fn new(offset: u64, mask: u8, value: u8) -> Self {
        Self {
            offset,
            mask,
            value: value & mask,
        }
    }

    /// Clear every value bit outside of the mask.
    pub fn mask_value(&mut self) {
        self.value &= self.mask;
    }

    /// Compute the byte to write given the byte currently in the register.
    ///
    /// Bits outside of the mask are preserved, bits inside are replaced.
    /// Applying the result again with the same inputs yields the same byte.
    pub const fn value_for_writing(&self, existing: u8) -> u8 {
        (existing & !self.mask) | (self.value & self.mask)
    }
}

/// One register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressedCommand {
    /// One byte at an offset.
    Byte(AddressedValue<u8>),
    /// Two bytes at an offset, most significant first.
    Word(AddressedValue<u16>),
    /// Masked bits of one byte.
    Bits(AddressedBits),
    /// Placeholder that is skipped by every transport path.
    Noop,
}

impl AddressedCommand {
    pub const fn byte(offset: u64, value: u8) -> Self {
        AddressedCommand::Byte(AddressedValue::new(offset, value))
    }

    pub const fn word(offset: u64, value: u16) -> Self {
        AddressedCommand::Word(AddressedValue::new(offset, value))
    }

    pub const fn bits(offset: u64, mask: u8, value: u8) -> Self {
        AddressedCommand::Bits(AddressedBits::new(offset, mask, value))
    }

    pub const fn is_noop(&self) -> bool {
        matches!(self, AddressedCommand::Noop)
    }

    /// Register offset, `None` for [`AddressedCommand::Noop`].
    pub const fn offset(&self) -> Option<u64> {
        match self {
            AddressedCommand::Byte(v) => Some(v.offset),
            AddressedCommand::Word(v) => Some(v.offset),
            AddressedCommand::Bits(b) => Some(b.offset),
            AddressedCommand::Noop => None,
        }
    }

    /// Number of register bytes covered by the payload.
    pub const fn width(&self) -> usize {
        match self {
            AddressedCommand::Byte(_) | AddressedCommand::Bits(_) => u8::WIDTH,
            AddressedCommand::Word(_) => u16::WIDTH,
            AddressedCommand::Noop => 0,
        }
    }

    /// Every byte offset touched by this command (empty for no-ops).
    pub fn byte_offsets(&self) -> Range<u64> {
        match self.offset() {
            Some(offset) => offset..offset + self.width() as u64,
            None => 0..0,
        }
    }

    /// Numeric payload widened to `u16`, `None` for no-ops.
    pub const fn raw_value(&self) -> Option<u16> {
        match self {
            AddressedCommand::Byte(v) => Some(v.value as u16),
            AddressedCommand::Word(v) => Some(v.value),
            AddressedCommand::Bits(b) => Some(b.value as u16),
            AddressedCommand::Noop => None,
        }
    }

    /// Payload as it appears in the register file.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            AddressedCommand::Byte(v) => v.value.to_be_vec(),
            AddressedCommand::Word(v) => v.value.to_be_vec(),
            AddressedCommand::Bits(b) => vec![b.value],
            AddressedCommand::Noop => Vec::new(),
        }
    }

    /// Replace the payload with bytes read from the register file.
    ///
    /// Bit commands keep only the bits selected by their mask.
    pub fn set_from_be_bytes(&mut self, bytes: &[u8]) -> Result<(), CmdError> {
        let expected = self.width();
        if bytes.len() != expected {
            return Err(CmdError::WidthMismatch {
                offset: self.offset().unwrap_or_default(),
                expected,
                got: bytes.len(),
            });
        }
        match self {
            AddressedCommand::Byte(v) => v.value = u8::from_be_slice(bytes),
            AddressedCommand::Word(v) => v.value = u16::from_be_slice(bytes),
            AddressedCommand::Bits(b) => {
                b.value = bytes[0];
                b.mask_value();
            }
            AddressedCommand::Noop => {}
        }
        Ok(())
    }
}
