use std::sync::Arc;
use std::time::Duration;

use fakecall_core::config::SchedulerConfig;
use fakecall_core::MissedPolicy;
use fakecall_store::RecordStore;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::alarm::{AlarmHost, FiredAlarm};
use crate::clock::Clock;
use crate::dispatcher::TriggerDispatcher;
use crate::handoff::{PresentationHandoff, Presenter};
use crate::locks::IdLocks;
use crate::recovery::RebootRecovery;
use crate::scheduler::TriggerScheduler;
use crate::service::CallService;

/// Knobs taken from the `[scheduler]` config section.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub prefer_exact: bool,
    pub missed_policy: MissedPolicy,
    pub rescan_interval: Duration,
}

impl From<&SchedulerConfig> for EngineOptions {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            prefer_exact: cfg.exact_alarms,
            missed_policy: cfg.missed_policy,
            rescan_interval: Duration::from_secs(cfg.rescan_interval_secs.max(1)),
        }
    }
}

/// All scheduling components wired to one store, host, clock and presenter.
pub struct TriggerEngine {
    pub service: Arc<CallService>,
    pub dispatcher: Arc<TriggerDispatcher>,
    pub recovery: Arc<RebootRecovery>,
    pub scheduler: Arc<TriggerScheduler>,
    pub handoff: Arc<PresentationHandoff>,
    rescan_interval: Duration,
}

impl TriggerEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        host: Arc<dyn AlarmHost>,
        clock: Arc<dyn Clock>,
        presenter: Arc<dyn Presenter>,
        options: EngineOptions,
    ) -> Self {
        let locks = Arc::new(IdLocks::new());
        let scheduler = Arc::new(TriggerScheduler::new(host, options.prefer_exact));
        let handoff = Arc::new(PresentationHandoff::new(presenter));
        let dispatcher = Arc::new(TriggerDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&handoff),
            Arc::clone(&locks),
        ));
        let recovery = Arc::new(RebootRecovery::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&dispatcher),
            Arc::clone(&handoff),
            Arc::clone(&locks),
            Arc::clone(&clock),
            options.missed_policy,
        ));
        let service = Arc::new(CallService::new(
            store,
            Arc::clone(&scheduler),
            Arc::clone(&handoff),
            locks,
            clock,
        ));
        Self {
            service,
            dispatcher,
            recovery,
            scheduler,
            handoff,
            rescan_interval: options.rescan_interval,
        }
    }

    /// Main event loop: boot recovery, then dispatch fired alarms and rescan
    /// the store until `shutdown` broadcasts `true`.
    pub async fn run(
        self: Arc<Self>,
        mut fired_rx: mpsc::Receiver<FiredAlarm>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("trigger engine started");
        match self.recovery.on_boot() {
            Ok(Some(report)) => debug!(?report, "boot recovery done"),
            Ok(None) => {}
            Err(e) => error!("boot recovery failed: {e}"),
        }

        let mut rescan = tokio::time::interval(self.rescan_interval);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                Some(fired) = fired_rx.recv() => {
                    match self.dispatcher.on_fire(&fired) {
                        Ok(outcome) => debug!(call_id = %fired.id, ?outcome, "alarm handled"),
                        Err(e) => error!(call_id = %fired.id, "dispatch failed: {e}"),
                    }
                }
                _ = rescan.tick() => {
                    if let Err(e) = self.recovery.sync_pending() {
                        error!("store rescan failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("trigger engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}
