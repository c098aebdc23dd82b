use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fakecall_core::CallId;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::alarm::{AlarmHandle, AlarmHost, FiredAlarm};
use crate::clock::Clock;
use crate::locks::lock;

/// [`AlarmHost`] backed by sleeping Tokio tasks.
///
/// Each request is one task that sleeps until its deadline and then sends a
/// [`FiredAlarm`] down `fired_tx`. Inexact requests are batched to the next
/// `inexact_window_secs` boundary, the way a power-saving OS coalesces
/// wake-ups. Requests already due fire immediately either way.
///
/// Timers live in this process only: if it dies, recovery re-arms them.
pub struct TokioAlarmHost {
    runtime: Handle,
    clock: Arc<dyn Clock>,
    fired_tx: mpsc::Sender<FiredAlarm>,
    exact_allowed: AtomicBool,
    inexact_window_secs: u64,
    tasks: Arc<Mutex<HashMap<AlarmHandle, JoinHandle<()>>>>,
}

impl TokioAlarmHost {
    pub fn new(
        runtime: Handle,
        clock: Arc<dyn Clock>,
        fired_tx: mpsc::Sender<FiredAlarm>,
        inexact_window_secs: u64,
    ) -> Self {
        Self {
            runtime,
            clock,
            fired_tx,
            exact_allowed: AtomicBool::new(true),
            inexact_window_secs,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Grant or revoke the exact-timer capability at runtime.
    pub fn set_exact_allowed(&self, allowed: bool) {
        self.exact_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Number of timer tasks that have neither fired nor been cancelled.
    pub fn outstanding(&self) -> usize {
        lock(&self.tasks).len()
    }

    fn delay_for(&self, fire_at: DateTime<Utc>, exact: bool) -> std::time::Duration {
        let now = self.clock.now();
        if fire_at <= now {
            return std::time::Duration::ZERO;
        }
        let target = if exact {
            fire_at
        } else {
            coalesce(fire_at, self.inexact_window_secs)
        };
        // `to_std` only fails for negative spans, which were handled above.
        (target - now).to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

impl AlarmHost for TokioAlarmHost {
    fn request(&self, id: CallId, fire_at: DateTime<Utc>, exact: bool) -> AlarmHandle {
        let handle = AlarmHandle::new();
        let delay = self.delay_for(fire_at, exact);
        let fired = FiredAlarm {
            id,
            handle,
            fire_at,
        };
        let tx = self.fired_tx.clone();
        let tasks = Arc::clone(&self.tasks);

        // Hold the table while spawning so a zero-delay task cannot remove
        // its entry before it has been inserted.
        let mut table = lock(&self.tasks);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&tasks).remove(&handle);
            if tx.send(fired).await.is_err() {
                warn!(call_id = %id, "fired-alarm channel closed, alarm dropped");
            }
        });
        table.insert(handle, task);
        debug!(call_id = %id, %handle, exact, delay_ms = delay.as_millis() as u64, "timer requested");
        handle
    }

    fn cancel(&self, handle: AlarmHandle) {
        if let Some(task) = lock(&self.tasks).remove(&handle) {
            task.abort();
            debug!(%handle, "timer cancelled");
        }
    }

    fn can_schedule_exact(&self) -> bool {
        self.exact_allowed.load(Ordering::SeqCst)
    }
}

/// Round `fire_at` up to the next multiple of `window_secs` since the epoch.
fn coalesce(fire_at: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    let Ok(window) = i64::try_from(window_secs) else {
        return fire_at;
    };
    if window == 0 {
        return fire_at;
    }
    let secs = fire_at.timestamp();
    let floor = secs - secs.rem_euclid(window);
    if floor == secs && fire_at.timestamp_subsec_nanos() == 0 {
        return fire_at;
    }
    DateTime::from_timestamp(floor + window, 0).unwrap_or(fire_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::{Duration, TimeZone};

    #[test]
    fn coalesce_rounds_up_to_window() {
        let t = Utc.with_ymd_and_hms(2026, 2, 2, 10, 0, 12).unwrap();
        assert_eq!(
            coalesce(t, 60),
            Utc.with_ymd_and_hms(2026, 2, 2, 10, 1, 0).unwrap()
        );
        let aligned = Utc.with_ymd_and_hms(2026, 2, 2, 10, 5, 0).unwrap();
        assert_eq!(coalesce(aligned, 60), aligned);
        assert_eq!(coalesce(t, 0), t);
    }

    #[tokio::test]
    async fn due_request_fires_promptly() {
        let (tx, mut rx) = mpsc::channel(4);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let host = TokioAlarmHost::new(Handle::current(), Arc::clone(&clock), tx, 60);
        host.set_exact_allowed(false);

        // Inexact and in the past: still immediate, never batched.
        let past = clock.now() - Duration::seconds(30);
        let handle = host.request(CallId(7), past, false);

        let fired = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("alarm should fire")
            .expect("channel open");
        assert_eq!(fired.id, CallId(7));
        assert_eq!(fired.handle, handle);
        assert_eq!(fired.fire_at, past);
    }

    #[tokio::test]
    async fn cancelled_request_never_fires() {
        let (tx, mut rx) = mpsc::channel(4);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let host = TokioAlarmHost::new(Handle::current(), Arc::clone(&clock), tx, 60);

        let handle = host.request(CallId(1), clock.now() + Duration::milliseconds(200), true);
        assert_eq!(host.outstanding(), 1);
        host.cancel(handle);
        host.cancel(handle);
        assert_eq!(host.outstanding(), 0);

        let waited = tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv()).await;
        assert!(waited.is_err(), "cancelled alarm must not fire");
    }
}
