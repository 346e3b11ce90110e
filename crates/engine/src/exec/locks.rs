//! Per-target execution serialization.
//!
//! Two procedures touching the same target must never interleave steps, so
//! each target gets its own mutex. Independent targets run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::target::Target;

/// Lock table keyed by [`Target::lock_key`]. Entries are created lazily and
/// kept for the lifetime of the table; the set of targets an operator works
/// on in one session is small.
#[derive(Debug, Default)]
pub struct TargetLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `target`, waiting if another execution holds it.
    /// The guard is owned so it can be held across await points.
    pub async fn acquire(&self, target: &Target) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("lock table poisoned");
            map.entry(target.lock_key())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
