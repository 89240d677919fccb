use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::sync::Mutex;

/// Cooperative cancellation with a retained reason. Cancellation never
/// interrupts in-flight I/O; it takes effect the next time the driver
/// checks `is_cancelled` between state transitions.
#[derive(Clone)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
            }),
        }
    }

    /// Idempotent: only the first reason given is retained.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.inner.reason.lock().expect("poisoned") = Some(reason.into());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().expect("poisoned").clone()
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_keeps_first_reason() {
        let handle = CancellationHandle::new();
        handle.cancel("first reason");
        handle.cancel("second reason");
        assert!(handle.is_cancelled());
        assert_eq!(handle.reason(), Some("first reason".to_string()));
    }

    #[test]
    fn uncancelled_handle_has_no_reason() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());
        assert_eq!(handle.reason(), None);
    }

    #[test]
    fn clone_shares_cancellation_state() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        clone.cancel("from clone");
        assert!(handle.is_cancelled());
        assert_eq!(handle.reason(), Some("from clone".to_string()));
    }
}
