use std::sync::Arc;

use fakecall_core::{CallId, CallPayload, CallRecord, NewCallRecord};
use fakecall_store::RecordStore;
use tracing::{info, instrument};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::handoff::PresentationHandoff;
use crate::locks::{hold, IdLocks};
use crate::scheduler::TriggerScheduler;

/// User actions on calls: save, edit, re-trigger, delete, and the UI's
/// "call ended" report.
///
/// Every action persists first and arms second, so nothing is ever armed for
/// a record that would not survive a restart.
pub struct CallService {
    store: Arc<dyn RecordStore>,
    scheduler: Arc<TriggerScheduler>,
    handoff: Arc<PresentationHandoff>,
    locks: Arc<IdLocks>,
    clock: Arc<dyn Clock>,
}

impl CallService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        scheduler: Arc<TriggerScheduler>,
        handoff: Arc<PresentationHandoff>,
        locks: Arc<IdLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            handoff,
            locks,
            clock,
        }
    }

    /// Save a new call and arm it `countdown_secs` from now.
    #[instrument(skip(self, payload))]
    pub fn create(&self, payload: CallPayload, countdown_secs: u32) -> Result<CallRecord> {
        let new = NewCallRecord::new(payload, countdown_secs, self.clock.now());
        let record = self.store.save(&new)?;

        let slot = self.locks.slot(record.id);
        let _guard = hold(&slot);
        self.scheduler.arm(&record);
        info!(call_id = %record.id, scheduled_at = %record.scheduled_at, "call created");
        Ok(record)
    }

    /// Change a call's payload and/or countdown. The countdown restarts from
    /// now and the new time supersedes any outstanding timer.
    #[instrument(skip(self, payload))]
    pub fn edit(
        &self,
        id: CallId,
        payload: Option<CallPayload>,
        countdown_secs: Option<u32>,
    ) -> Result<CallRecord> {
        let slot = self.locks.slot(id);
        let _guard = hold(&slot);

        let current = self
            .store
            .get(id)?
            .ok_or(SchedulerError::CallNotFound { id })?;
        let countdown = countdown_secs.unwrap_or(current.countdown_secs);
        let record = self
            .store
            .reschedule(id, countdown, self.clock.now(), payload.as_ref())?
            .ok_or(SchedulerError::CallNotFound { id })?;
        self.scheduler.arm(&record);
        info!(call_id = %id, scheduled_at = %record.scheduled_at, "call edited");
        Ok(record)
    }

    /// Ring a call from history again, with its saved countdown.
    #[instrument(skip(self))]
    pub fn retrigger(&self, id: CallId) -> Result<CallRecord> {
        self.edit(id, None, None)
    }

    /// Cancel the call's timer, then remove the record.
    #[instrument(skip(self))]
    pub fn delete(&self, id: CallId) -> Result<()> {
        let slot = self.locks.slot(id);
        let _guard = hold(&slot);

        self.scheduler.cancel(id);
        self.handoff.finish(id);
        if !self.store.delete(id)? {
            return Err(SchedulerError::CallNotFound { id });
        }
        info!(call_id = %id, "call deleted");
        Ok(())
    }

    /// Switch a call off without deleting it from history.
    #[instrument(skip(self))]
    pub fn deactivate(&self, id: CallId) -> Result<()> {
        let slot = self.locks.slot(id);
        let _guard = hold(&slot);

        self.scheduler.cancel(id);
        if !self.store.set_active(id, false, self.clock.now())? {
            return Err(SchedulerError::CallNotFound { id });
        }
        info!(call_id = %id, "call deactivated");
        Ok(())
    }

    /// The presentation layer reports that the call ended.
    ///
    /// Deactivates the record, unless it was re-armed for a later time while
    /// it was on screen; that newer cycle stays scheduled. Returns whether the
    /// record was deactivated.
    #[instrument(skip(self))]
    pub fn consumed(&self, id: CallId) -> Result<bool> {
        let slot = self.locks.slot(id);
        let _guard = hold(&slot);

        let presented = self.handoff.finish(id);
        let Some(record) = self.store.get(id)? else {
            return Ok(false);
        };
        if let Some(presented_at) = presented {
            if record.scheduled_at > presented_at {
                // The newer cycle may already have fired into a coalesced
                // launch, which settled its timer.
                self.scheduler.arm(&record);
                info!(call_id = %id, next = %record.scheduled_at, "call re-armed while presenting, kept active");
                return Ok(false);
            }
        }
        self.scheduler.cancel(id);
        self.store.set_active(id, false, self.clock.now())?;
        info!(call_id = %id, "call consumed");
        Ok(true)
    }

    pub fn get(&self, id: CallId) -> Result<Option<CallRecord>> {
        Ok(self.store.get(id)?)
    }

    /// Call history, newest first.
    pub fn history(&self) -> Result<Vec<CallRecord>> {
        Ok(self.store.list()?)
    }
}
