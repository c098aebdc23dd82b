use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use fakecall_core::CallId;

/// Per-call mutexes serializing read-modify-write sequences on one record.
///
/// A user edit, a timer fire and a recovery pass for the same id never
/// interleave; different ids proceed in parallel.
#[derive(Debug, Default)]
pub struct IdLocks {
    slots: DashMap<CallId, Arc<Mutex<()>>>,
}

impl IdLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `id`. Lock it with [`hold`].
    pub fn slot(&self, id: CallId) -> Arc<Mutex<()>> {
        // The shard guard is released at the end of this statement, before
        // the caller blocks on the returned mutex.
        self.slots.entry(id).or_default().clone()
    }
}

pub fn hold(slot: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock(slot)
}

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_shares_one_mutex() {
        let locks = IdLocks::new();
        let a = locks.slot(CallId(1));
        let b = locks.slot(CallId(1));
        let c = locks.slot(CallId(2));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn held_slot_blocks_other_holders() {
        let locks = IdLocks::new();
        let slot = locks.slot(CallId(7));
        let _guard = hold(&slot);
        assert!(locks.slot(CallId(7)).try_lock().is_err());
        assert!(locks.slot(CallId(8)).try_lock().is_ok());
    }
}
