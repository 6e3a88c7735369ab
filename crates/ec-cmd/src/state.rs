use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::{AddressedCommand, CmdError};

/// Mapping from a closed set of logical states to the command encoding each
/// state in the register file.
///
/// A map is read by replacing every payload with the live register contents;
/// comparing the canonical map against such a snapshot tells which state the
/// hardware currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateMap<S: Ord> {
    entries: BTreeMap<S, AddressedCommand>,
}

impl<S: Ord + Copy + Debug> StateMap<S> {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, AddressedCommand)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, state: S) -> Option<&AddressedCommand> {
        self.entries.get(&state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (S, &AddressedCommand)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Mutable access to the commands, in key order.
    pub fn commands_mut(&mut self) -> impl Iterator<Item = &mut AddressedCommand> {
        self.entries.values_mut()
    }

    /// Return the single entry whose command differs between `self` and
    /// `snapshot`.
    ///
    /// `Ok(None)` means "no unique difference": either nothing changed or
    /// more than one entry did. Both maps must have the same key set.
    pub fn diff(&self, snapshot: &StateMap<S>) -> Result<Option<(S, AddressedCommand)>, CmdError> {
        if self.entries.len() != snapshot.entries.len()
            || !self.entries.keys().all(|k| snapshot.entries.contains_key(k))
        {
            return Err(CmdError::KeyMismatch);
        }

        let mut changed = self
            .entries
            .iter()
            .filter(|(k, v)| snapshot.entries.get(*k) != Some(*v));
        match (changed.next(), changed.next()) {
            (Some((state, cmd)), None) => Ok(Some((*state, *cmd))),
            _ => Ok(None),
        }
    }
}
