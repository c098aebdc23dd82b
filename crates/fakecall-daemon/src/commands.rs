//! One-shot commands that only touch the store. A running daemon notices
//! their effects on its next rescan or when the affected timer fires.

use anyhow::{anyhow, Result};
use clap::Args;
use fakecall_core::{parse_countdown, CallId, CallPayload, CallRecord, NewCallRecord};
use fakecall_scheduler::{Clock, SystemClock};
use fakecall_store::RecordStore;
use tracing::info;

fn countdown_arg(s: &str) -> std::result::Result<u32, String> {
    parse_countdown(s).map_err(|e| e.to_string())
}

#[derive(Debug, Args)]
pub struct NewCallArgs {
    /// Caller name shown on the incoming-call screen.
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub number: String,
    /// Delay before ringing: `now`, `45`, `30s`, `5m`, `1h`.
    #[arg(long, default_value = "now", value_parser = countdown_arg)]
    pub countdown: u32,
    #[arg(long)]
    pub avatar: Option<String>,
    #[arg(long)]
    pub voice: Option<String>,
    #[arg(long)]
    pub skin: Option<String>,
    /// Seconds the call screen stays up.
    #[arg(long)]
    pub duration: Option<u32>,
}

#[derive(Debug, Default, Args)]
pub struct CallEdits {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub number: Option<String>,
    #[arg(long, value_parser = countdown_arg)]
    pub countdown: Option<u32>,
    #[arg(long)]
    pub avatar: Option<String>,
    #[arg(long)]
    pub voice: Option<String>,
    #[arg(long)]
    pub skin: Option<String>,
    #[arg(long)]
    pub duration: Option<u32>,
}

impl CallEdits {
    /// The edited payload, or `None` when no display field changed.
    fn apply(&self, current: &CallPayload) -> Option<CallPayload> {
        let touched = self.name.is_some()
            || self.number.is_some()
            || self.avatar.is_some()
            || self.voice.is_some()
            || self.skin.is_some()
            || self.duration.is_some();
        if !touched {
            return None;
        }
        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.caller_name = name.clone();
        }
        if let Some(number) = &self.number {
            next.caller_number = number.clone();
        }
        if let Some(avatar) = &self.avatar {
            next.avatar = Some(avatar.clone());
        }
        if let Some(voice) = &self.voice {
            next.voice = Some(voice.clone());
        }
        if let Some(skin) = &self.skin {
            next.device_skin = skin.clone();
        }
        if let Some(duration) = self.duration {
            next.display_duration_secs = duration;
        }
        Some(next)
    }
}

pub fn add(store: &dyn RecordStore, args: NewCallArgs, default_duration: u32) -> Result<CallRecord> {
    let mut payload = CallPayload::new(
        &args.name,
        &args.number,
        args.duration.unwrap_or(default_duration),
    );
    payload.avatar = args.avatar;
    payload.voice = args.voice;
    if let Some(skin) = args.skin {
        payload.device_skin = skin;
    }
    let record = store.save(&NewCallRecord::new(payload, args.countdown, SystemClock.now()))?;
    info!(call_id = %record.id, scheduled_at = %record.scheduled_at, "call saved");
    Ok(record)
}

pub fn edit(store: &dyn RecordStore, id: CallId, edits: CallEdits) -> Result<CallRecord> {
    let current = store.get(id)?.ok_or_else(|| anyhow!("call {id} not found"))?;
    let payload = edits.apply(&current.payload);
    let countdown = edits.countdown.unwrap_or(current.countdown_secs);
    store
        .reschedule(id, countdown, SystemClock.now(), payload.as_ref())?
        .ok_or_else(|| anyhow!("call {id} not found"))
}

pub fn retrigger(store: &dyn RecordStore, id: CallId) -> Result<CallRecord> {
    edit(store, id, CallEdits::default())
}

pub fn disable(store: &dyn RecordStore, id: CallId) -> Result<()> {
    if !store.set_active(id, false, SystemClock.now())? {
        return Err(anyhow!("call {id} not found"));
    }
    Ok(())
}

pub fn delete(store: &dyn RecordStore, id: CallId) -> Result<()> {
    if !store.delete(id)? {
        return Err(anyhow!("call {id} not found"));
    }
    Ok(())
}

/// One history line: id, state, ring time, caller.
pub fn format_row(record: &CallRecord) -> String {
    let state = if record.is_active { "active" } else { "done" };
    format!(
        "#{:<4} {:<6} {}  {} <{}>  ({}s countdown)",
        record.id.get(),
        state,
        record.scheduled_at.format("%Y-%m-%d %H:%M:%S"),
        record.payload.caller_name,
        record.payload.caller_number,
        record.countdown_secs,
    )
}
