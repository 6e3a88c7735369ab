//! Big-endian binary encoding of commands and bounds-checked cursor helpers.
//!
//! A command is written as a tag byte followed by its offset (`u64`) and the
//! payload. Lists carry a `u16` element count prefix.

use bytes::{Buf, BufMut};

use crate::{AddressedCommand, CmdError, CommandList};

/// Tag values identifying each command kind on the wire.
pub mod tags {
    pub const BYTE: u8 = 0;
    pub const WORD: u8 = 1;
    pub const BITS: u8 = 2;
    pub const NOOP: u8 = 3;
}

fn ensure<B: Buf>(buf: &B, need: usize) -> Result<(), CmdError> {
    let have = buf.remaining();
    if have < need {
        return Err(CmdError::Truncated { need, have });
    }
    Ok(())
}

pub fn get_u8<B: Buf>(buf: &mut B) -> Result<u8, CmdError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u16<B: Buf>(buf: &mut B) -> Result<u16, CmdError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_u32<B: Buf>(buf: &mut B) -> Result<u32, CmdError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub fn get_u64<B: Buf>(buf: &mut B) -> Result<u64, CmdError> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

/// Copy `len` bytes out of the cursor.
pub fn get_bytes<B: Buf>(buf: &mut B, len: usize) -> Result<Vec<u8>, CmdError> {
    ensure(buf, len)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn put_command<B: BufMut>(buf: &mut B, cmd: &AddressedCommand) {
    match cmd {
        AddressedCommand::Byte(v) => {
            buf.put_u8(tags::BYTE);
            buf.put_u64(v.offset);
            buf.put_u8(v.value);
        }
        AddressedCommand::Word(v) => {
            buf.put_u8(tags::WORD);
            buf.put_u64(v.offset);
            buf.put_u16(v.value);
        }
        AddressedCommand::Bits(b) => {
            buf.put_u8(tags::BITS);
            buf.put_u64(b.offset);
            buf.put_u8(b.mask);
            buf.put_u8(b.value);
        }
        AddressedCommand::Noop => buf.put_u8(tags::NOOP),
    }
}

pub fn get_command<B: Buf>(buf: &mut B) -> Result<AddressedCommand, CmdError> {
    let tag = get_u8(buf)?;
    let cmd = match tag {
        tags::BYTE => {
            let offset = get_u64(buf)?;
            AddressedCommand::byte(offset, get_u8(buf)?)
        }
        tags::WORD => {
            let offset = get_u64(buf)?;
            AddressedCommand::word(offset, get_u16(buf)?)
        }
        tags::BITS => {
            let offset = get_u64(buf)?;
            let mask = get_u8(buf)?;
            AddressedCommand::bits(offset, mask, get_u8(buf)?)
        }
        tags::NOOP => AddressedCommand::Noop,
        other => return Err(CmdError::UnknownTag(other)),
    };
    Ok(cmd)
}

pub fn put_list<B: BufMut>(buf: &mut B, list: &[AddressedCommand]) -> Result<(), CmdError> {
    let count = u16::try_from(list.len()).map_err(|_| CmdError::TooManyEntries(list.len()))?;
    buf.put_u16(count);
    for cmd in list {
        put_command(buf, cmd);
    }
    Ok(())
}

pub fn get_list<B: Buf>(buf: &mut B) -> Result<CommandList, CmdError> {
    let count = get_u16(buf)? as usize;
    // Every entry needs at least its tag byte.
    ensure(buf, count)?;
    (0..count).map(|_| get_command(buf)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn list_layout_is_big_endian() {
        let mut buf = BytesMut::new();
        put_list(
            &mut buf,
            &[AddressedCommand::word(0xC8, 0x0102), AddressedCommand::Noop],
        )
        .expect("encode");
        assert_eq!(
            &buf[..],
            &[0, 2, tags::WORD, 0, 0, 0, 0, 0, 0, 0, 0xC8, 0x01, 0x02, tags::NOOP]
        );
        let mut cursor = &buf[..];
        let list = get_list(&mut cursor).expect("decode");
        assert_eq!(list[0].raw_value(), Some(0x0102));
        assert!(list[1].is_noop());
        assert!(cursor.is_empty());
    }

    #[test]
    fn truncated_command_is_rejected() {
        let mut cursor: &[u8] = &[tags::BITS, 0, 0, 0];
        let err = get_command(&mut cursor).unwrap_err();
        assert_eq!(err, CmdError::Truncated { need: 8, have: 3 });
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut cursor: &[u8] = &[9];
        assert_eq!(get_command(&mut cursor), Err(CmdError::UnknownTag(9)));
    }

    #[test]
    fn absurd_count_fails_before_allocating() {
        let mut cursor: &[u8] = &[0xFF, 0xFF, tags::NOOP];
        assert!(matches!(
            get_list(&mut cursor),
            Err(CmdError::Truncated { need: 0xFFFF, .. })
        ));
    }
}
