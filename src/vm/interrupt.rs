//! Cancellation line into the guest engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use deno_core::v8;

/// Thread-safe trigger that stops the guest at its next safe point.
///
/// Obtainable from a loaded sandbox at any time and cheap to clone; the
/// handle stays valid across snapshot, restore, and unload (the engine
/// behind it is swapped, the handle is retargeted).
///
/// `kill` is idempotent within a single call. Between calls it leaves a
/// pending request that survives only until the next call begins; call
/// entry clears it, so a kill fired while the sandbox is idle does not
/// affect later calls.
#[derive(Clone)]
pub struct InterruptHandle {
    inner: Arc<InterruptState>,
}

struct InterruptState {
    /// Set by `kill`; read back by the call path to classify the exit.
    cancel: AtomicBool,
    /// True while a guest call is in flight on the vCPU thread.
    running: AtomicBool,
    /// Thread-safe handle to the isolate currently backing the sandbox.
    isolate: Mutex<Option<v8::IsolateHandle>>,
}

impl InterruptHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(InterruptState {
                cancel: AtomicBool::new(false),
                running: AtomicBool::new(false),
                isolate: Mutex::new(None),
            }),
        }
    }

    /// Request that the current guest call stop at its next safe point.
    ///
    /// Safe to call from any thread at any time. With no call in progress
    /// this is a no-op for the quiescent period.
    pub fn kill(&self) {
        self.inner.cancel.store(true, Ordering::SeqCst);
        if self.inner.running.load(Ordering::SeqCst) {
            if let Ok(isolate) = self.inner.isolate.lock() {
                if let Some(handle) = isolate.as_ref() {
                    handle.terminate_execution();
                }
            }
        }
    }

    /// Point the handle at a freshly built isolate.
    pub(crate) fn retarget(&self, handle: v8::IsolateHandle) {
        if let Ok(mut isolate) = self.inner.isolate.lock() {
            *isolate = Some(handle);
        }
    }

    /// Mark call entry: drop any pending kill from the quiescent period and
    /// clear a stale engine-level termination left by a kill that raced a
    /// previous call's exit.
    pub(crate) fn begin_call(&self) {
        self.inner.cancel.store(false, Ordering::SeqCst);
        if let Ok(isolate) = self.inner.isolate.lock() {
            if let Some(handle) = isolate.as_ref() {
                handle.cancel_terminate_execution();
            }
        }
        self.inner.running.store(true, Ordering::SeqCst);
    }

    /// Mark call exit.
    pub(crate) fn end_call(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Whether the current or just-finished call was asked to die.
    pub(crate) fn cancelled(&self) -> bool {
        self.inner.cancel.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("cancel", &self.inner.cancel.load(Ordering::SeqCst))
            .field("running", &self.inner.running.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_without_isolate_is_a_noop() {
        let handle = InterruptHandle::new();
        handle.kill();
        handle.kill();
        assert!(handle.cancelled());
    }

    #[test]
    fn call_entry_clears_pending_kill() {
        let handle = InterruptHandle::new();
        handle.kill();
        assert!(handle.cancelled());

        handle.begin_call();
        assert!(!handle.cancelled());
        handle.end_call();
    }

    #[test]
    fn clones_share_state() {
        let handle = InterruptHandle::new();
        let clone = handle.clone();
        clone.kill();
        assert!(handle.cancelled());
    }
}
