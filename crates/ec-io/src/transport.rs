use std::collections::BTreeSet;
use std::fmt::Debug;
use std::fs::File;
use std::sync::{Arc, Mutex, PoisonError};

use ec_cmd::{AddressedCommand, StateMap};
use tracing::{debug, trace, warn};

use crate::backup::BackupProvider;
use crate::resource::{EcResource, RegisterIo};
use crate::EcIoError;

/// Write session on the register resource, obtained from
/// [`RegisterTransport::start_writing`]. The file is closed on drop.
#[derive(Debug)]
pub struct WriteHandle {
    file: File,
}

#[derive(Debug, Default)]
struct RestoreSet {
    pending: BTreeSet<u64>,
    excused: BTreeSet<u64>,
}

/// Reads and writes command lists against an [`EcResource`].
///
/// Every byte offset written is remembered; on drop those offsets are handed
/// to the backup provider unless they were excused with
/// [`RegisterTransport::cancel_backup_on`].
pub struct RegisterTransport {
    resource: EcResource,
    backup: Option<Arc<dyn BackupProvider>>,
    restore: Mutex<RestoreSet>,
}

impl RegisterTransport {
    pub fn new(resource: EcResource, backup: Option<Arc<dyn BackupProvider>>) -> Self {
        Self {
            resource,
            backup,
            restore: Mutex::new(RestoreSet::default()),
        }
    }

    pub fn resource(&self) -> &EcResource {
        &self.resource
    }

    /// Fill the payload of every command from the register file.
    pub fn read(&self, cmds: &mut [AddressedCommand]) -> Result<(), EcIoError> {
        let mut file = self.resource.open_read()?;
        read_commands(&mut file, cmds.iter_mut())
    }

    /// Fill every command of a state map from the register file.
    pub fn read_map<S: Ord + Copy + Debug>(&self, map: &mut StateMap<S>) -> Result<(), EcIoError> {
        let mut file = self.resource.open_read()?;
        read_commands(&mut file, map.commands_mut())
    }

    pub fn start_writing(&self) -> Result<WriteHandle, EcIoError> {
        Ok(WriteHandle {
            file: self.resource.open_write()?,
        })
    }

    /// Write `cmds` in order. Bit commands read the current byte through the
    /// same handle and only replace the masked bits.
    pub fn write(&self, handle: &mut WriteHandle, cmds: &[AddressedCommand]) -> Result<(), EcIoError> {
        for cmd in cmds.iter().filter(|c| !c.is_noop()) {
            self.remember(cmd);
            write_command(&mut handle.file, cmd)?;
        }
        Ok(())
    }

    /// Never restore the bytes of `cmds`, including bytes already written.
    pub fn cancel_backup_on(&self, cmds: &[AddressedCommand]) {
        let mut restore = self.restore.lock().unwrap_or_else(PoisonError::into_inner);
        for offset in cmds.iter().flat_map(AddressedCommand::byte_offsets) {
            restore.pending.remove(&offset);
            restore.excused.insert(offset);
        }
    }

    /// Offsets that will be restored when the transport is dropped.
    pub fn pending_restore(&self) -> BTreeSet<u64> {
        self.restore
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .clone()
    }

    fn remember(&self, cmd: &AddressedCommand) {
        let mut restore = self.restore.lock().unwrap_or_else(PoisonError::into_inner);
        for offset in cmd.byte_offsets() {
            if !restore.excused.contains(&offset) {
                restore.pending.insert(offset);
            }
        }
    }
}

impl Drop for RegisterTransport {
    fn drop(&mut self) {
        let pending = std::mem::take(
            &mut self
                .restore
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner)
                .pending,
        );
        match &self.backup {
            Some(backup) => backup.restore_offsets(&pending),
            None if !pending.is_empty() => {
                warn!(count = pending.len(), "no backup available, registers left modified")
            }
            None => {}
        }
    }
}

pub(crate) fn read_commands<'a, I, It>(io: &mut I, cmds: It) -> Result<(), EcIoError>
where
    I: RegisterIo,
    It: Iterator<Item = &'a mut AddressedCommand>,
{
    for cmd in cmds {
        let Some(offset) = cmd.offset() else {
            continue;
        };
        let mut raw = vec![0u8; cmd.width()];
        io.read_at(offset, &mut raw)
            .map_err(|source| EcIoError::Register { offset, source })?;
        cmd.set_from_be_bytes(&raw)?;
        trace!(offset, raw = ?raw, "read register");
    }
    Ok(())
}

pub(crate) fn write_command<I: RegisterIo>(io: &mut I, cmd: &AddressedCommand) -> Result<(), EcIoError> {
    let Some(offset) = cmd.offset() else {
        return Ok(());
    };
    let bytes = match cmd {
        AddressedCommand::Bits(bits) => {
            let mut existing = [0u8; 1];
            io.read_at(offset, &mut existing)
                .map_err(|source| EcIoError::Register { offset, source })?;
            vec![bits.value_for_writing(existing[0])]
        }
        other => other.to_be_bytes(),
    };
    io.write_at(offset, &bytes)
        .map_err(|source| EcIoError::Register { offset, source })?;
    debug!(offset, value = ?bytes, "write register");
    Ok(())
}
