use std::sync::Arc;

use chrono::{DateTime, Utc};
use fakecall_core::{CallId, CallRecord};
use fakecall_store::RecordStore;
use tracing::{debug, instrument};

use crate::alarm::FiredAlarm;
use crate::error::Result;
use crate::handoff::{Launch, PresentationHandoff};
use crate::locks::{hold, IdLocks};
use crate::scheduler::TriggerScheduler;

/// Why a fire was dropped without reaching the presenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// The record was deleted after it was armed.
    Missing,
    /// The record was deactivated after it was armed.
    Inactive,
    /// A newer arm cycle replaced the one that fired.
    Superseded,
}

/// Outcome of validating one fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Launched,
    /// Validated, but the call was already on screen.
    Coalesced,
    Discarded(Discard),
}

/// Turns timer fires into presentation launches.
///
/// Every fire is re-validated against the store under the call's id lock;
/// the timer itself only says "something was due".
pub struct TriggerDispatcher {
    store: Arc<dyn RecordStore>,
    scheduler: Arc<TriggerScheduler>,
    handoff: Arc<PresentationHandoff>,
    locks: Arc<IdLocks>,
}

impl TriggerDispatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        scheduler: Arc<TriggerScheduler>,
        handoff: Arc<PresentationHandoff>,
        locks: Arc<IdLocks>,
    ) -> Self {
        Self {
            store,
            scheduler,
            handoff,
            locks,
        }
    }

    /// Handle an alarm delivered by the host.
    #[instrument(skip(self, fired), fields(call_id = %fired.id, handle = %fired.handle))]
    pub fn on_fire(&self, fired: &FiredAlarm) -> Result<Dispatch> {
        let slot = self.locks.slot(fired.id);
        let _guard = hold(&slot);

        if !self.scheduler.settle(fired) {
            debug!("stale alarm discarded");
            return Ok(Dispatch::Discarded(Discard::Superseded));
        }
        let record = match self.validate(fired.id)? {
            Ok(record) => record,
            Err(discard) => return Ok(Dispatch::Discarded(discard)),
        };
        if record.scheduled_at != fired.fire_at {
            // Another writer moved the call; follow the stored time.
            debug!(stored = %record.scheduled_at, fired = %fired.fire_at, "call was rescheduled");
            self.scheduler.arm(&record);
            return Ok(Dispatch::Discarded(Discard::Superseded));
        }
        self.present(&record)
    }

    /// Dispatch the arm cycle `scheduled_at` of `id` right away, bypassing
    /// the timer. Discarded if the call has since been rescheduled; otherwise
    /// any outstanding request for it is cancelled first.
    #[instrument(skip(self))]
    pub fn dispatch_now(&self, id: CallId, scheduled_at: DateTime<Utc>) -> Result<Dispatch> {
        let slot = self.locks.slot(id);
        let _guard = hold(&slot);

        let record = match self.validate(id)? {
            Ok(record) => record,
            Err(discard) => return Ok(Dispatch::Discarded(discard)),
        };
        if record.scheduled_at != scheduled_at {
            debug!(stored = %record.scheduled_at, "call was rescheduled");
            return Ok(Dispatch::Discarded(Discard::Superseded));
        }
        self.scheduler.cancel(id);
        self.present(&record)
    }

    fn validate(&self, id: CallId) -> Result<std::result::Result<CallRecord, Discard>> {
        Ok(match self.store.get(id)? {
            None => {
                debug!("record gone, fire discarded");
                Err(Discard::Missing)
            }
            Some(record) if !record.is_active => {
                debug!("record inactive, fire discarded");
                Err(Discard::Inactive)
            }
            Some(record) => Ok(record),
        })
    }

    fn present(&self, record: &CallRecord) -> Result<Dispatch> {
        match self
            .handoff
            .launch(record.id, &record.payload, record.scheduled_at)?
        {
            Launch::Launched => Ok(Dispatch::Launched),
            Launch::Coalesced => Ok(Dispatch::Coalesced),
        }
    }
}
