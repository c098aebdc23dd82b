//! The deferred-execution boundary: something that can wake us up later.
//!
//! The host offers no per-call identity of its own. It hands back an opaque
//! [`AlarmHandle`] for each request and reports fires as [`FiredAlarm`]s; the
//! [`TriggerScheduler`](crate::scheduler::TriggerScheduler) owns the mapping
//! from call id to the one handle that is currently meaningful.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fakecall_core::CallId;
use uuid::Uuid;

use crate::locks::lock;

/// Opaque identity of one timer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlarmHandle(Uuid);

impl AlarmHandle {
    pub fn new() -> Self {
        // UUIDv7 sorts by creation time, which keeps log correlation readable.
        Self(Uuid::now_v7())
    }
}

impl Default for AlarmHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlarmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivered by the host when a request's time arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredAlarm {
    pub id: CallId,
    pub handle: AlarmHandle,
    /// The time that was requested, not the (possibly later) delivery time.
    pub fire_at: DateTime<Utc>,
}

/// Timer facility consumed by the scheduler.
///
/// Requests whose `fire_at` is already in the past must fire promptly.
/// Exactness is a best-effort upgrade: hosts may refuse it at any time, which
/// callers learn through [`can_schedule_exact`](AlarmHost::can_schedule_exact).
pub trait AlarmHost: Send + Sync {
    fn request(&self, id: CallId, fire_at: DateTime<Utc>, exact: bool) -> AlarmHandle;

    /// Cancelling an unknown or already-fired handle is a no-op.
    fn cancel(&self, handle: AlarmHandle);

    fn can_schedule_exact(&self) -> bool;
}

/// A request still waiting in a [`ManualAlarmHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAlarm {
    pub id: CallId,
    pub handle: AlarmHandle,
    pub fire_at: DateTime<Utc>,
    pub exact: bool,
}

/// An [`AlarmHost`] driven by hand: nothing fires until [`take_due`] is
/// called with a time at or past the request.
///
/// Used by the test suites and by embedders that own their own event loop.
///
/// [`take_due`]: ManualAlarmHost::take_due
#[derive(Debug)]
pub struct ManualAlarmHost {
    pending: Mutex<Vec<PendingAlarm>>,
    exact_allowed: AtomicBool,
    requests: AtomicUsize,
}

impl ManualAlarmHost {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            exact_allowed: AtomicBool::new(true),
            requests: AtomicUsize::new(0),
        }
    }

    /// Grant or revoke the exact-timer capability.
    pub fn set_exact_allowed(&self, allowed: bool) {
        self.exact_allowed.store(allowed, Ordering::SeqCst);
    }

    pub fn pending(&self) -> Vec<PendingAlarm> {
        lock(&self.pending).clone()
    }

    /// Number of requests outstanding for `id`.
    pub fn outstanding(&self, id: CallId) -> usize {
        lock(&self.pending).iter().filter(|p| p.id == id).count()
    }

    /// Total requests ever made, cancelled ones included.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Remove and return every request due at `now`, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<FiredAlarm> {
        let mut pending = lock(&self.pending);
        let mut due: Vec<PendingAlarm> = Vec::new();
        pending.retain(|p| {
            if p.fire_at <= now {
                due.push(*p);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|p| p.fire_at);
        due.into_iter()
            .map(|p| FiredAlarm {
                id: p.id,
                handle: p.handle,
                fire_at: p.fire_at,
            })
            .collect()
    }
}

impl Default for ManualAlarmHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmHost for ManualAlarmHost {
    fn request(&self, id: CallId, fire_at: DateTime<Utc>, exact: bool) -> AlarmHandle {
        let handle = AlarmHandle::new();
        self.requests.fetch_add(1, Ordering::SeqCst);
        lock(&self.pending).push(PendingAlarm {
            id,
            handle,
            fire_at,
            exact,
        });
        handle
    }

    fn cancel(&self, handle: AlarmHandle) {
        lock(&self.pending).retain(|p| p.handle != handle);
    }

    fn can_schedule_exact(&self) -> bool {
        self.exact_allowed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn take_due_returns_only_elapsed_requests_in_order() {
        let host = ManualAlarmHost::new();
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        host.request(CallId(2), t + Duration::seconds(20), true);
        host.request(CallId(1), t + Duration::seconds(10), true);
        host.request(CallId(3), t + Duration::seconds(60), false);

        let fired = host.take_due(t + Duration::seconds(30));
        assert_eq!(
            fired.iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![CallId(1), CallId(2)]
        );
        assert_eq!(host.pending().len(), 1);
        assert_eq!(host.request_count(), 3);
    }

    #[test]
    fn cancel_is_idempotent() {
        let host = ManualAlarmHost::new();
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let handle = host.request(CallId(1), t, true);
        host.cancel(handle);
        host.cancel(handle);
        host.cancel(AlarmHandle::new());
        assert_eq!(host.outstanding(CallId(1)), 0);
    }
}
