use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    thread::{self, ThreadId},
};

use log::debug;

use crate::error::{Error, Result};

/// Last error seen by each calling thread.
///
/// Every client operation already returns a [`Result`]; the channel mirrors those
/// outcomes so a caller can still ask what went wrong last on its own thread. A
/// channel is owned by one [`ConnectionPool`](super::ConnectionPool) and shared
/// with the connections it creates.
#[derive(Debug, Default)]
pub struct ErrorChannel {
    slots: Mutex<HashMap<ThreadId, Error>>,
}

impl ErrorChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `error` for the calling thread. A `None` error clears the slot.
    pub fn set(&self, error: Error) {
        if error.is_none() {
            self.clear();
            return;
        }
        let id = thread::current().id();
        debug!("{id:?}: {error}");
        self.slots().insert(id, error);
    }

    pub fn clear(&self) {
        self.slots().remove(&thread::current().id());
    }

    /// The calling thread's last error, or [`Error::none`].
    pub fn last_error(&self) -> Error {
        self.slots()
            .get(&thread::current().id())
            .cloned()
            .unwrap_or_default()
    }

    /// Mirrors one outcome: failures are stored, successes clear.
    pub fn record<T>(&self, result: &Result<T>) {
        match result {
            Ok(_) => self.clear(),
            Err(error) => self.set(error.clone()),
        }
    }

    /// Drops the slot of a thread that has exited.
    pub(crate) fn forget(&self, id: ThreadId) {
        self.slots().remove(&id);
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<ThreadId, Error>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
