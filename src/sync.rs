//! Synchronization helpers shared by the protocol client and the read-ahead buffer.

use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::Semaphore;

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent between
/// statements, so a poisoned lock carries no torn state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A counting wake-up signal backed by a Tokio semaphore.
///
/// `Counting` signals hand out one permit per release and consume it on wake.
/// `Once` signals can be released a single time and wake every waiter from
/// then on.
#[derive(Debug)]
pub(crate) struct Signal {
    inner: Semaphore,
    kind: SignalKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SignalKind {
    Counting,
    Once,
}

impl Signal {
    pub(crate) fn counting() -> Self {
        Self {
            inner: Semaphore::new(0),
            kind: SignalKind::Counting,
        }
    }

    pub(crate) fn once() -> Self {
        Self {
            inner: Semaphore::new(0),
            kind: SignalKind::Once,
        }
    }

    pub(crate) fn release(&self) {
        match self.kind {
            SignalKind::Counting => self.inner.add_permits(1),
            SignalKind::Once => {
                if self.inner.available_permits() == 0 {
                    self.inner.add_permits(1);
                }
            }
        }
    }

    /// Waits for a release for at most `timeout`. Returns `true` if signalled.
    pub(crate) async fn wait(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.inner.acquire()).await {
            Ok(Ok(permit)) => {
                if self.kind == SignalKind::Counting {
                    permit.forget();
                }
                true
            }
            // The semaphore is never closed.
            Ok(Err(_)) | Err(_) => false,
        }
    }
}
