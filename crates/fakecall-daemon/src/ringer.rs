//! Terminal stand-in for the incoming-call screen.
//!
//! Each launch request "rings" by printing the caller, stays on screen for
//! the payload's display duration, then reports the call consumed.

use std::sync::Arc;
use std::time::Duration;

use fakecall_scheduler::{CallService, LaunchRequest};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

pub async fn run(
    mut launches: mpsc::Receiver<LaunchRequest>,
    service: Arc<CallService>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut screens = JoinSet::new();
    loop {
        tokio::select! {
            Some(request) = launches.recv() => {
                ring(&request);
                let service = Arc::clone(&service);
                screens.spawn(async move {
                    let on_screen = u64::from(request.payload.display_duration_secs);
                    tokio::time::sleep(Duration::from_secs(on_screen)).await;
                    hang_up(&service, &request);
                });
            }
            Some(_) = screens.join_next(), if !screens.is_empty() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    // Calls still on screen stay active and are handled by the next boot.
    screens.abort_all();
}

fn ring(request: &LaunchRequest) {
    let p = &request.payload;
    println!(
        "\n  📞 Incoming call: {} <{}>  [{}]\n",
        p.caller_name, p.caller_number, p.device_skin
    );
    info!(
        call_id = %request.id,
        scheduled_at = %request.scheduled_at,
        avatar = ?p.avatar,
        voice = ?p.voice,
        "ringing"
    );
}

fn hang_up(service: &CallService, request: &LaunchRequest) {
    match service.consumed(request.id) {
        Ok(true) => info!(call_id = %request.id, "call ended"),
        Ok(false) => info!(call_id = %request.id, "call ended, next ring still scheduled"),
        Err(e) => error!(call_id = %request.id, "failed to record call end: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fakecall_core::{CallPayload, MissedPolicy};
    use fakecall_scheduler::{
        ChannelPresenter, Clock, EngineOptions, ManualAlarmHost, ManualClock, TriggerEngine,
    };
    use fakecall_store::{RecordStore, SqliteRecordStore};

    #[tokio::test]
    async fn launched_call_is_consumed_after_its_display_time() {
        let store: Arc<dyn RecordStore> = Arc::new(
            SqliteRecordStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let host = Arc::new(ManualAlarmHost::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap(),
        ));
        let (presenter, launches) = ChannelPresenter::channel(4);
        let engine = TriggerEngine::new(
            Arc::clone(&store),
            host.clone(),
            clock.clone(),
            Arc::new(presenter),
            EngineOptions {
                prefer_exact: true,
                missed_policy: MissedPolicy::Discard,
                rescan_interval: Duration::from_secs(5),
            },
        );

        let record = engine
            .service
            .create(CallPayload::new("Mom", "+1 555 0100", 0), 0)
            .unwrap();
        for fired in host.take_due(clock.now()) {
            engine.dispatcher.on_fire(&fired).unwrap();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(launches, Arc::clone(&engine.service), shutdown_rx));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.get(record.id).unwrap().unwrap().is_active {
            assert!(tokio::time::Instant::now() < deadline, "call never consumed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!engine.handoff.is_presenting(record.id));

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
