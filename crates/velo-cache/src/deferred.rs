//! Deferred rendered content.
//!
//! A partial prerender leaves dynamic holes in the cache tree. Each hole is a
//! [`DeferredRsc`]: a slot the trailing dynamic request resolves, and that an
//! aborted navigation rejects so no awaiter hangs forever.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use velo_tree::Rsc;

/// Error delivered to awaiters when a deferred slot is aborted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("dynamic request aborted: {0}")]
pub struct Aborted(pub String);

#[derive(Debug, Clone)]
enum DeferredState {
    Pending,
    Ready(Rsc),
    Aborted(Aborted),
}

#[derive(Debug)]
struct Inner {
    state: Mutex<DeferredState>,
    notify: Notify,
}

/// A rendered-content slot that settles exactly once.
#[derive(Debug, Clone)]
pub struct DeferredRsc {
    inner: Arc<Inner>,
}

impl DeferredRsc {
    /// Create a pending slot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DeferredState::Pending),
                notify: Notify::new(),
            }),
        }
    }

    /// Resolve the slot. A second settle attempt is ignored.
    pub fn resolve(&self, rsc: Rsc) {
        let mut state = self.inner.state.lock().unwrap();
        if matches!(*state, DeferredState::Pending) {
            *state = DeferredState::Ready(rsc);
            drop(state);
            self.inner.notify.notify_waiters();
        }
    }

    /// Abort the slot, waking awaiters with an error.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut state = self.inner.state.lock().unwrap();
        if matches!(*state, DeferredState::Pending) {
            *state = DeferredState::Aborted(Aborted(reason.into()));
            drop(state);
            self.inner.notify.notify_waiters();
        }
    }

    /// Check whether the slot is still pending.
    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.state.lock().unwrap(), DeferredState::Pending)
    }

    /// The settled value, if any.
    pub fn try_get(&self) -> Option<Result<Rsc, Aborted>> {
        match &*self.inner.state.lock().unwrap() {
            DeferredState::Pending => None,
            DeferredState::Ready(rsc) => Some(Ok(rsc.clone())),
            DeferredState::Aborted(err) => Some(Err(err.clone())),
        }
    }

    /// Wait for the slot to settle.
    pub async fn wait(&self) -> Result<Rsc, Aborted> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(result) = self.try_get() {
                return result;
            }
            notified.await;
        }
    }

    /// Identity comparison (two clones of the same slot are equal).
    pub fn ptr_eq(&self, other: &DeferredRsc) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for DeferredRsc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_settles_once() {
        let slot = DeferredRsc::new();
        assert!(slot.is_pending());
        slot.resolve(Rsc::new("first"));
        slot.resolve(Rsc::new("second"));
        assert_eq!(slot.try_get().unwrap().unwrap(), Rsc::new("first"));
    }

    #[test]
    fn test_abort_does_not_override_resolution() {
        let slot = DeferredRsc::new();
        slot.resolve(Rsc::new("data"));
        slot.abort("superseded");
        assert!(slot.try_get().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_wakes_on_resolve() {
        let slot = DeferredRsc::new();
        let waiter = slot.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;
        slot.resolve(Rsc::new("late"));
        assert_eq!(handle.await.unwrap().unwrap(), Rsc::new("late"));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_abort() {
        let slot = DeferredRsc::new();
        let waiter = slot.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;
        slot.abort("navigation superseded");
        assert!(handle.await.unwrap().is_err());
    }
}
