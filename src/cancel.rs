use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::errors::{CredentialError, CredentialResult};

/// Shared handle to a live provider subprocess. The slot is emptied by
/// whichever side reaps the child first.
pub type ChildSlot = Arc<Mutex<Option<Child>>>;

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    children: Mutex<Vec<Weak<Mutex<Option<Child>>>>>,
}

/// Cancellation for one run. `cancel()` kills every registered provider
/// subprocess; resolutions in flight then complete their cache cell with
/// `Cancelled`, which releases blocked waiters.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

fn kill_slot(slot: &ChildSlot) {
    if let Some(mut child) = slot.lock().unwrap().take() {
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let mut children = self.inner.children.lock().unwrap();
        for weak in children.drain(..) {
            if let Some(slot) = weak.upgrade() {
                kill_slot(&slot);
            }
        }
    }

    /// Register a spawned child so `cancel()` can reach it. Fails with
    /// `Cancelled` (after killing the child) when the token already fired,
    /// including the race where it fires during registration.
    pub fn register(&self, slot: &ChildSlot) -> CredentialResult<()> {
        if self.is_cancelled() {
            kill_slot(slot);
            return Err(CredentialError::Cancelled);
        }
        let mut children = self.inner.children.lock().unwrap();
        // Drop entries for providers that already finished so a long run
        // does not accumulate dead weak references.
        children.retain(|weak| weak.upgrade().is_some_and(|slot| slot.lock().unwrap().is_some()));
        children.push(Arc::downgrade(slot));
        drop(children);
        if self.is_cancelled() {
            kill_slot(slot);
            return Err(CredentialError::Cancelled);
        }
        Ok(())
    }
}
