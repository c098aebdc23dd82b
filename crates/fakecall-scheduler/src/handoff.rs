use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fakecall_core::{CallId, CallPayload};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{HandoffError, Result, SchedulerError};
use crate::locks::lock;

/// What the presentation layer receives when a call should start ringing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub id: CallId,
    /// The arm cycle being presented.
    pub scheduled_at: DateTime<Utc>,
    pub payload: CallPayload,
}

/// The UI layer's side of the boundary.
///
/// `launch` must not block: queue the request and return.
pub trait Presenter: Send + Sync {
    fn launch(&self, request: LaunchRequest) -> std::result::Result<(), HandoffError>;
}

/// [`Presenter`] that forwards launch requests over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: mpsc::Sender<LaunchRequest>,
}

impl ChannelPresenter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LaunchRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Presenter for ChannelPresenter {
    fn launch(&self, request: LaunchRequest) -> std::result::Result<(), HandoffError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HandoffError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => HandoffError::Closed,
        })
    }
}

/// Outcome of [`PresentationHandoff::launch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    Launched,
    /// The call is already on screen; the duplicate was dropped.
    Coalesced,
}

/// The core's only output port. Tracks which calls are on screen so that a
/// second launch for the same id is coalesced.
pub struct PresentationHandoff {
    presenter: Arc<dyn Presenter>,
    presenting: Mutex<HashMap<CallId, DateTime<Utc>>>,
}

impl PresentationHandoff {
    pub fn new(presenter: Arc<dyn Presenter>) -> Self {
        Self {
            presenter,
            presenting: Mutex::new(HashMap::new()),
        }
    }

    pub fn launch(
        &self,
        id: CallId,
        payload: &CallPayload,
        scheduled_at: DateTime<Utc>,
    ) -> Result<Launch> {
        {
            let mut presenting = lock(&self.presenting);
            if presenting.contains_key(&id) {
                debug!(call_id = %id, "call already presenting, launch coalesced");
                return Ok(Launch::Coalesced);
            }
            presenting.insert(id, scheduled_at);
        }

        let request = LaunchRequest {
            id,
            scheduled_at,
            payload: payload.clone(),
        };
        if let Err(source) = self.presenter.launch(request) {
            lock(&self.presenting).remove(&id);
            return Err(SchedulerError::Handoff { id, source });
        }
        info!(call_id = %id, caller = %payload.caller_name, "incoming call launched");
        Ok(Launch::Launched)
    }

    /// Clear the presenting state of `id`, returning the arm cycle that was
    /// on screen.
    pub fn finish(&self, id: CallId) -> Option<DateTime<Utc>> {
        lock(&self.presenting).remove(&id)
    }

    pub fn is_presenting(&self, id: CallId) -> bool {
        lock(&self.presenting).contains_key(&id)
    }
}
