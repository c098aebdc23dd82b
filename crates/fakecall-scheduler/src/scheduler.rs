use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fakecall_core::{CallId, CallRecord};
use tracing::{debug, info, warn};

use crate::alarm::{AlarmHandle, AlarmHost, FiredAlarm};
use crate::locks::lock;

/// The one outstanding timer request of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Armed {
    pub handle: AlarmHandle,
    pub fire_at: DateTime<Utc>,
    pub exact: bool,
}

/// Outcome of [`TriggerScheduler::arm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arming {
    /// A new request replaced whatever was outstanding.
    Armed(Armed),
    /// A request for the same time was already outstanding and was kept.
    Unchanged(Armed),
    /// The record is inactive; nothing was requested.
    RejectedInactive,
}

/// Maps call ids to their single outstanding [`AlarmHost`] request.
///
/// The table is the only place that knows which handle is current for an id.
/// Arming cancels the previous handle and stores the new one under a single
/// lock, so at most one request per id is ever outstanding.
pub struct TriggerScheduler {
    host: Arc<dyn AlarmHost>,
    prefer_exact: bool,
    armed: Mutex<HashMap<CallId, Armed>>,
}

impl TriggerScheduler {
    pub fn new(host: Arc<dyn AlarmHost>, prefer_exact: bool) -> Self {
        Self {
            host,
            prefer_exact,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Request a fire at `record.scheduled_at`, superseding any earlier request.
    ///
    /// A `scheduled_at` in the past fires as soon as the host can deliver it.
    /// When the host refuses exact timing the request is made inexact instead.
    pub fn arm(&self, record: &CallRecord) -> Arming {
        if !record.is_active {
            warn!(call_id = %record.id, "refusing to arm an inactive call");
            return Arming::RejectedInactive;
        }

        let mut armed = lock(&self.armed);
        if let Some(current) = armed.get(&record.id) {
            if current.fire_at == record.scheduled_at {
                debug!(call_id = %record.id, handle = %current.handle, "already armed for this time");
                return Arming::Unchanged(*current);
            }
        }
        if let Some(previous) = armed.remove(&record.id) {
            self.host.cancel(previous.handle);
            debug!(call_id = %record.id, handle = %previous.handle, "superseded previous timer");
        }

        let exact = self.prefer_exact && self.host.can_schedule_exact();
        if self.prefer_exact && !exact {
            warn!(call_id = %record.id, "exact timers not permitted, falling back to inexact");
        }
        let handle = self.host.request(record.id, record.scheduled_at, exact);
        let entry = Armed {
            handle,
            fire_at: record.scheduled_at,
            exact,
        };
        armed.insert(record.id, entry);
        info!(
            call_id = %record.id,
            %handle,
            scheduled_at = %record.scheduled_at,
            exact,
            "call armed"
        );
        Arming::Armed(entry)
    }

    /// Cancel the outstanding request for `id`, if any. Returns whether one existed.
    pub fn cancel(&self, id: CallId) -> bool {
        match lock(&self.armed).remove(&id) {
            Some(previous) => {
                self.host.cancel(previous.handle);
                debug!(call_id = %id, handle = %previous.handle, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Consume the table entry for a fired alarm.
    ///
    /// Returns `false` when `fired` is not the current request for its id;
    /// it was cancelled or superseded after the host had already let it go.
    pub fn settle(&self, fired: &FiredAlarm) -> bool {
        let mut armed = lock(&self.armed);
        match armed.get(&fired.id) {
            Some(current) if current.handle == fired.handle => {
                armed.remove(&fired.id);
                true
            }
            _ => false,
        }
    }

    pub fn armed(&self, id: CallId) -> Option<Armed> {
        lock(&self.armed).get(&id).copied()
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.armed).len()
    }

    /// Ids with an outstanding request, in no particular order.
    pub fn armed_ids(&self) -> Vec<CallId> {
        lock(&self.armed).keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::ManualAlarmHost;
    use chrono::{Duration, TimeZone};
    use fakecall_core::CallPayload;

    fn record(id: i64, at: DateTime<Utc>) -> CallRecord {
        CallRecord {
            id: CallId(id),
            countdown_secs: 0,
            created_at: at,
            scheduled_at: at,
            is_active: true,
            payload: CallPayload::new("Test", "000", 10),
            updated_at: at,
        }
    }

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 18, 0, 0).unwrap()
    }

    #[test]
    fn rearming_replaces_the_outstanding_request() {
        let host = Arc::new(ManualAlarmHost::new());
        let sched = TriggerScheduler::new(host.clone(), true);

        let first = sched.arm(&record(1, t()));
        let second = sched.arm(&record(1, t() + Duration::seconds(30)));
        assert!(matches!(first, Arming::Armed(_)));
        let Arming::Armed(second) = second else {
            panic!("expected a fresh arm");
        };

        assert_eq!(host.outstanding(CallId(1)), 1);
        assert_eq!(host.pending()[0].handle, second.handle);
        assert_eq!(sched.armed(CallId(1)), Some(second));
    }

    #[test]
    fn same_time_is_kept() {
        let host = Arc::new(ManualAlarmHost::new());
        let sched = TriggerScheduler::new(host.clone(), true);
        let Arming::Armed(first) = sched.arm(&record(3, t())) else {
            panic!("expected a fresh arm");
        };
        assert_eq!(sched.arm(&record(3, t())), Arming::Unchanged(first));
        assert_eq!(host.request_count(), 1);
    }

    #[test]
    fn inactive_records_are_rejected() {
        let host = Arc::new(ManualAlarmHost::new());
        let sched = TriggerScheduler::new(host.clone(), true);
        let mut rec = record(2, t());
        rec.is_active = false;
        assert_eq!(sched.arm(&rec), Arming::RejectedInactive);
        assert_eq!(host.request_count(), 0);
        assert_eq!(sched.armed_count(), 0);
    }

    #[test]
    fn falls_back_to_inexact_when_permission_revoked() {
        let host = Arc::new(ManualAlarmHost::new());
        host.set_exact_allowed(false);
        let sched = TriggerScheduler::new(host.clone(), true);
        let Arming::Armed(armed) = sched.arm(&record(4, t())) else {
            panic!("arming must not fail without exact permission");
        };
        assert!(!armed.exact);
        assert!(!host.pending()[0].exact);
    }

    #[test]
    fn settle_only_accepts_the_current_handle() {
        let host = Arc::new(ManualAlarmHost::new());
        let sched = TriggerScheduler::new(host.clone(), true);
        let Arming::Armed(old) = sched.arm(&record(5, t())) else {
            panic!("expected a fresh arm");
        };
        let stale = FiredAlarm {
            id: CallId(5),
            handle: old.handle,
            fire_at: old.fire_at,
        };
        sched.arm(&record(5, t() + Duration::seconds(5)));
        assert!(!sched.settle(&stale));

        let current = host.take_due(t() + Duration::seconds(5));
        assert_eq!(current.len(), 1);
        assert!(sched.settle(&current[0]));
        assert!(!sched.settle(&current[0]));
        assert_eq!(sched.armed_count(), 0);
    }

    #[test]
    fn cancel_is_a_noop_for_unknown_ids() {
        let host = Arc::new(ManualAlarmHost::new());
        let sched = TriggerScheduler::new(host.clone(), true);
        assert!(!sched.cancel(CallId(99)));
        sched.arm(&record(6, t()));
        assert!(sched.cancel(CallId(6)));
        assert!(!sched.cancel(CallId(6)));
        assert_eq!(host.outstanding(CallId(6)), 0);
    }
}
