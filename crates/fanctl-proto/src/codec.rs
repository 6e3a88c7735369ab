//! Versioned, big-endian binary encoding of the messages.
//!
//! Every structure is prefixed with its own `u32` schema version, so nested
//! values are checked independently. Decoders reject versions outside of
//! `MIN_VERSION..=VERSION` instead of guessing at the layout.

use bytes::{BufMut, Bytes, BytesMut};
use ec_cmd::wire::{self, get_bytes, get_u32, get_u64, get_u8};
use ec_cmd::{AddressedValue, CmdError};
use thiserror::Error;

use crate::consts::FULL_INFO_SIGNATURE;
use crate::messages::*;

/// Errors produced while encoding or decoding messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("{name}: version {found} is older than the minimum {min}")]
    VersionTooOld {
        name: &'static str,
        found: u32,
        min: u32,
    },
    #[error("{name}: version {found} is newer than the supported {max}")]
    VersionTooNew {
        name: &'static str,
        found: u32,
        max: u32,
    },
    #[error("wrong signature {0:#018x}")]
    BadSignature(u64),
    #[error("{name}: unknown value {value}")]
    UnknownEnum { name: &'static str, value: u8 },
    #[error("invalid utf-8 text")]
    Utf8,
    #[error("encoded message needs {len} bytes, buffer holds {capacity}")]
    TooLarge { len: usize, capacity: usize },
    #[error("{0}")]
    Command(#[from] CmdError),
}

/// Binary encoding with a schema version prefix.
pub trait WireFormat: Sized {
    const NAME: &'static str;
    const VERSION: u32;
    const MIN_VERSION: u32 = Self::VERSION;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError>;
    fn decode_body(buf: &mut &[u8], version: u32) -> Result<Self, WireError>;

    fn encode(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u32(Self::VERSION);
        self.encode_body(buf)
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, WireError> {
        let version = get_u32(buf)?;
        if version < Self::MIN_VERSION {
            return Err(WireError::VersionTooOld {
                name: Self::NAME,
                found: version,
                min: Self::MIN_VERSION,
            });
        }
        if version > Self::VERSION {
            return Err(WireError::VersionTooNew {
                name: Self::NAME,
                found: version,
                max: Self::VERSION,
            });
        }
        Self::decode_body(buf, version)
    }
}

/// Encode a message into a fresh buffer.
pub fn to_bytes<T: WireFormat>(value: &T) -> Result<Bytes, WireError> {
    let mut buf = BytesMut::with_capacity(256);
    value.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Decode a message from the start of `data`; trailing bytes are ignored.
pub fn from_bytes<T: WireFormat>(data: &[u8]) -> Result<T, WireError> {
    let mut cursor = data;
    T::decode(&mut cursor)
}

fn get_enum<T>(buf: &mut &[u8], name: &'static str, from_raw: fn(u8) -> Option<T>) -> Result<T, WireError> {
    let value = get_u8(buf)?;
    from_raw(value).ok_or(WireError::UnknownEnum { name, value })
}

fn put_string(buf: &mut BytesMut, text: &str) {
    buf.put_u32(text.len() as u32);
    buf.put_slice(text.as_bytes());
}

fn get_string(buf: &mut &[u8]) -> Result<String, WireError> {
    let len = get_u32(buf)? as usize;
    let raw = get_bytes(buf, len)?;
    String::from_utf8(raw).map_err(|_| WireError::Utf8)
}

impl WireFormat for Info {
    const NAME: &'static str = "Info";
    const VERSION: u32 = 1;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u16(self.temperature);
        buf.put_u16(self.fan_rpm);
        Ok(())
    }

    fn decode_body(buf: &mut &[u8], _version: u32) -> Result<Self, WireError> {
        Ok(Self {
            temperature: wire::get_u16(buf)?,
            fan_rpm: wire::get_u16(buf)?,
        })
    }
}

impl WireFormat for CpuGpuInfo {
    const NAME: &'static str = "CpuGpuInfo";
    const VERSION: u32 = 1;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.cpu.encode(buf)?;
        self.gpu.encode(buf)
    }

    fn decode_body(buf: &mut &[u8], _version: u32) -> Result<Self, WireError> {
        Ok(Self {
            cpu: Info::decode(buf)?,
            gpu: Info::decode(buf)?,
        })
    }
}

impl WireFormat for BoostersStates {
    const NAME: &'static str = "BoostersStates";
    const VERSION: u32 = 3;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u8(self.fan_booster.to_raw());
        buf.put_u8(self.cpu_turbo.to_raw());
        Ok(())
    }

    fn decode_body(buf: &mut &[u8], _version: u32) -> Result<Self, WireError> {
        Ok(Self {
            fan_booster: get_enum(buf, "BoosterState", BoosterState::from_raw)?,
            cpu_turbo: get_enum(buf, "CpuTurboBoostState", CpuTurboBoostState::from_raw)?,
        })
    }
}

impl WireFormat for CpuGpuFanCurve {
    const NAME: &'static str = "CpuGpuFanCurve";
    const VERSION: u32 = 1;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        wire::put_list(buf, &self.cpu)?;
        wire::put_list(buf, &self.gpu)?;
        Ok(())
    }

    fn decode_body(buf: &mut &[u8], _version: u32) -> Result<Self, WireError> {
        Ok(Self {
            cpu: wire::get_list(buf)?,
            gpu: wire::get_list(buf)?,
        })
    }
}

impl WireFormat for BehaveWithCurve {
    const NAME: &'static str = "BehaveWithCurve";
    const VERSION: u32 = 1;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u8(self.behave.to_raw());
        self.curve.encode(buf)
    }

    fn decode_body(buf: &mut &[u8], _version: u32) -> Result<Self, WireError> {
        Ok(Self {
            behave: get_enum(buf, "BehaveState", BehaveState::from_raw)?,
            curve: CpuGpuFanCurve::decode(buf)?,
        })
    }
}

impl WireFormat for Battery {
    const NAME: &'static str = "Battery";
    const VERSION: u32 = 1;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u8(self.max_level.to_raw());
        let raw = self.raw_read();
        buf.put_u64(raw.offset);
        buf.put_u8(raw.value);
        Ok(())
    }

    fn decode_body(buf: &mut &[u8], _version: u32) -> Result<Self, WireError> {
        let level = get_enum(buf, "BatteryLevel", BatteryLevel::from_raw)?;
        let offset = get_u64(buf)?;
        let value = get_u8(buf)?;
        Ok(Battery::with_raw_read(level, AddressedValue::new(offset, value)))
    }
}

impl WireFormat for FullInfoBlock {
    const NAME: &'static str = "FullInfoBlock";
    const VERSION: u32 = 4;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u64(FULL_INFO_SIGNATURE);
        buf.put_u64(self.tag);
        self.info.encode(buf)?;
        self.boosters.encode(buf)?;
        self.behave.encode(buf)?;
        put_string(buf, &self.daemon_device_exception);
        self.battery.encode(buf)
    }

    fn decode_body(buf: &mut &[u8], _version: u32) -> Result<Self, WireError> {
        let signature = get_u64(buf)?;
        if signature != FULL_INFO_SIGNATURE {
            return Err(WireError::BadSignature(signature));
        }
        Ok(Self {
            tag: get_u64(buf)?,
            info: CpuGpuInfo::decode(buf)?,
            boosters: BoostersStates::decode(buf)?,
            behave: BehaveWithCurve::decode(buf)?,
            daemon_device_exception: get_string(buf)?,
            battery: Battery::decode(buf)?,
        })
    }
}

impl WireFormat for RequestFromUi {
    const NAME: &'static str = "RequestFromUi";
    const VERSION: u32 = 4;

    fn encode_body(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        self.boosters.encode(buf)?;
        self.behave.encode(buf)?;
        buf.put_u8(self.kind.to_raw());
        self.battery.encode(buf)
    }

    fn decode_body(buf: &mut &[u8], _version: u32) -> Result<Self, WireError> {
        let boosters = BoostersStates::decode(buf)?;
        let behave = BehaveWithCurve::decode(buf)?;
        let kind = get_enum(buf, "RequestKind", RequestKind::from_raw)?;
        Ok(Self {
            kind,
            boosters,
            behave,
            battery: Battery::decode(buf)?,
        })
    }
}
