use std::sync::{Mutex, PoisonError};

/// Single-slot, last-write-wins hand-over between threads.
///
/// Producers never block on consumers: a value that was not taken yet is
/// simply replaced.
#[derive(Debug, Default)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn put(&self, value: T) {
        *self.lock() = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    /// Edit the pending value in place, starting from `T::default()` when
    /// the slot is empty.
    pub fn merge<F>(&self, edit: F)
    where
        T: Default,
        F: FnOnce(&mut T),
    {
        edit(self.lock().get_or_insert_with(T::default));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Mailbox<T> {
    /// Copy of the pending value, leaving it in place.
    pub fn peek(&self) -> Option<T> {
        self.lock().clone()
    }
}
