use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fakecall_core::{CallId, CallRecord, MissedPolicy};
use fakecall_store::RecordStore;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::dispatcher::{Dispatch, TriggerDispatcher};
use crate::error::Result;
use crate::handoff::PresentationHandoff;
use crate::locks::{hold, IdLocks};
use crate::scheduler::{Arming, TriggerScheduler};

/// Counts from one [`RebootRecovery::recover_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Future calls that got a fresh timer.
    pub rearmed: usize,
    /// Future calls whose timer was already outstanding.
    pub unchanged: usize,
    /// Missed calls deactivated under [`MissedPolicy::Discard`].
    pub missed_discarded: usize,
    /// Missed calls rung under [`MissedPolicy::FireImmediately`].
    pub missed_fired: usize,
    /// Missed calls that were already on screen, so nothing new rang.
    pub missed_coalesced: usize,
}

impl RecoveryReport {
    /// Count one missed call dispatched under [`MissedPolicy::FireImmediately`].
    fn tally_missed_dispatch(&mut self, id: CallId, outcome: Result<Dispatch>) {
        match outcome {
            Ok(Dispatch::Launched) => {
                info!(call_id = %id, "missed call rung on recovery");
                self.missed_fired += 1;
            }
            Ok(Dispatch::Coalesced) => {
                debug!(call_id = %id, "missed call already on screen");
                self.missed_coalesced += 1;
            }
            Ok(Dispatch::Discarded(reason)) => {
                debug!(call_id = %id, ?reason, "missed call no longer eligible");
            }
            // The call stays active; the next pass retries it.
            Err(e) => error!(call_id = %id, "missed call dispatch failed: {e}"),
        }
    }
}

/// Re-arms persisted calls after the process (or the machine) restarts.
///
/// Future calls are re-armed at their stored `scheduled_at`, never recomputed
/// from the countdown. Calls whose time passed while nothing was running get
/// the configured [`MissedPolicy`], the same way for every call in a pass.
pub struct RebootRecovery {
    store: Arc<dyn RecordStore>,
    scheduler: Arc<TriggerScheduler>,
    dispatcher: Arc<TriggerDispatcher>,
    handoff: Arc<PresentationHandoff>,
    locks: Arc<IdLocks>,
    clock: Arc<dyn Clock>,
    policy: MissedPolicy,
    booted: AtomicBool,
}

impl RebootRecovery {
    pub fn new(
        store: Arc<dyn RecordStore>,
        scheduler: Arc<TriggerScheduler>,
        dispatcher: Arc<TriggerDispatcher>,
        handoff: Arc<PresentationHandoff>,
        locks: Arc<IdLocks>,
        clock: Arc<dyn Clock>,
        policy: MissedPolicy,
    ) -> Self {
        Self {
            store,
            scheduler,
            dispatcher,
            handoff,
            locks,
            clock,
            policy,
            booted: AtomicBool::new(false),
        }
    }

    /// Boot signal entry point. Only the first signal runs a recovery pass;
    /// duplicates return `None`.
    pub fn on_boot(&self) -> Result<Option<RecoveryReport>> {
        if self.booted.swap(true, Ordering::SeqCst) {
            debug!("duplicate boot signal ignored");
            return Ok(None);
        }
        self.recover_all().map(Some)
    }

    /// Re-arm every active future call and apply the missed policy to every
    /// active call that is already due. Safe to run repeatedly.
    pub fn recover_all(&self) -> Result<RecoveryReport> {
        let now = self.clock.now();
        let mut report = RecoveryReport::default();

        for candidate in self.store.query_active_future(now)? {
            let slot = self.locks.slot(candidate.id);
            let _guard = hold(&slot);
            let Some(record) = self.fetch_active(candidate.id)? else {
                continue;
            };
            match self.scheduler.arm(&record) {
                Arming::Armed(_) => report.rearmed += 1,
                Arming::Unchanged(_) => report.unchanged += 1,
                Arming::RejectedInactive => {}
            }
        }

        let missed: Vec<CallRecord> = self
            .store
            .query_active_due(now)?
            .into_iter()
            .filter(|r| !self.in_flight(r))
            .collect();

        match self.policy {
            MissedPolicy::Discard => {
                for candidate in &missed {
                    let slot = self.locks.slot(candidate.id);
                    let _guard = hold(&slot);
                    let Some(record) = self.fetch_active(candidate.id)? else {
                        continue;
                    };
                    if !record.is_due(now) || self.in_flight(&record) {
                        continue;
                    }
                    self.scheduler.cancel(record.id);
                    if self.store.set_active(record.id, false, now)? {
                        warn!(
                            call_id = %record.id,
                            scheduled_at = %record.scheduled_at,
                            "call missed while offline, discarded"
                        );
                        report.missed_discarded += 1;
                    }
                }
            }
            MissedPolicy::FireImmediately => {
                for record in &missed {
                    let outcome = self.dispatcher.dispatch_now(record.id, record.scheduled_at);
                    report.tally_missed_dispatch(record.id, outcome);
                }
            }
        }

        info!(
            rearmed = report.rearmed,
            unchanged = report.unchanged,
            missed_discarded = report.missed_discarded,
            missed_fired = report.missed_fired,
            missed_coalesced = report.missed_coalesced,
            "recovery pass complete"
        );
        Ok(report)
    }

    /// Arm active calls that have no timer for their stored time, due or not,
    /// and cancel timers whose call was deleted or deactivated.
    ///
    /// Picks up changes written by other processes sharing the store. Calls on
    /// screen are left alone, and the missed policy is never applied here.
    /// Returns how many timers were requested.
    pub fn sync_pending(&self) -> Result<usize> {
        let mut requested = 0;
        let mut active = HashSet::new();
        for candidate in self.store.query_active()? {
            active.insert(candidate.id);
            if self.in_flight(&candidate) {
                continue;
            }
            let slot = self.locks.slot(candidate.id);
            let _guard = hold(&slot);
            let Some(record) = self.fetch_active(candidate.id)? else {
                continue;
            };
            if self.in_flight(&record) {
                continue;
            }
            if let Arming::Armed(_) = self.scheduler.arm(&record) {
                requested += 1;
            }
        }
        if requested > 0 {
            info!(count = requested, "armed calls picked up from the store");
        }

        let mut dropped = 0;
        for id in self.scheduler.armed_ids() {
            if active.contains(&id) {
                continue;
            }
            let slot = self.locks.slot(id);
            let _guard = hold(&slot);
            if self.fetch_active(id)?.is_none() && self.scheduler.cancel(id) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            info!(count = dropped, "timers cancelled for calls removed from the store");
        }
        Ok(requested)
    }

    fn fetch_active(&self, id: CallId) -> Result<Option<CallRecord>> {
        Ok(self.store.get(id)?.filter(|r| r.is_active))
    }

    /// Armed for its stored time, or already on screen.
    fn in_flight(&self, record: &CallRecord) -> bool {
        self.handoff.is_presenting(record.id)
            || self
                .scheduler
                .armed(record.id)
                .is_some_and(|a| a.fire_at == record.scheduled_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Discard;
    use crate::error::{HandoffError, SchedulerError};

    #[test]
    fn only_launched_missed_calls_count_as_fired() {
        let mut report = RecoveryReport::default();
        report.tally_missed_dispatch(CallId(1), Ok(Dispatch::Launched));
        report.tally_missed_dispatch(CallId(2), Ok(Dispatch::Coalesced));
        report.tally_missed_dispatch(CallId(3), Ok(Dispatch::Discarded(Discard::Inactive)));
        report.tally_missed_dispatch(
            CallId(4),
            Err(SchedulerError::Handoff {
                id: CallId(4),
                source: HandoffError::QueueFull,
            }),
        );

        assert_eq!(report.missed_fired, 1);
        assert_eq!(report.missed_coalesced, 1);
        assert_eq!(report.missed_discarded, 0);
    }
}
