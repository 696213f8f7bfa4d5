//! Exclusive access to a lazily opened connection
//!
//! A connection slot guarded by an async mutex. Callers obtain a scoped guard
//! that dereferences to the open connection; while the guard lives no other
//! caller can use the connection, so output captured by one command can never
//! be attributed to another.

use std::future::Future;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::error::{ProvisionError, Result};

/// Scoped guard over an open connection
pub type ExclusiveGuard<'a, C> = MappedMutexGuard<'a, C>;

/// Lazily opened connection with single-writer access
#[derive(Debug)]
pub struct Exclusive<C> {
    slot: Mutex<Option<C>>,
}

impl<C> Default for Exclusive<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Exclusive<C> {
    /// Create an empty slot; nothing is opened until the first `acquire`
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Lock the slot, opening the connection with `open` if it is empty
    ///
    /// The returned guard holds the lock until dropped. A failed `open`
    /// leaves the slot empty so a later caller may try again.
    pub async fn acquire<F, Fut>(&self, open: F) -> Result<ExclusiveGuard<'_, C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C>>,
    {
        let mut guard = self.slot.lock().await;
        if guard.is_none() {
            *guard = Some(open().await?);
        }

        MutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| ProvisionError::connection("Connection slot empty after open"))
    }

    /// Whether a connection is currently open
    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Remove the connection from the slot, waiting for any in-flight user
    pub async fn take(&self) -> Option<C> {
        self.slot.lock().await.take()
    }
}
