//! `fakecall-scheduler`: arms, fires and recovers fake-call triggers.
//!
//! # Overview
//!
//! A saved [`CallRecord`](fakecall_core::CallRecord) becomes exactly one
//! outstanding timer request on an [`AlarmHost`]. When the host fires, the
//! [`TriggerDispatcher`] re-reads the record and, if it is still active and
//! the fire belongs to its current arm cycle, hands it to the
//! [`PresentationHandoff`]. [`RebootRecovery`] re-arms persisted calls at
//! their stored absolute time after a restart.
//!
//! | Entry point              | Component                        |
//! |--------------------------|----------------------------------|
//! | save / edit / delete     | [`CallService`]                  |
//! | timer fire               | [`TriggerDispatcher::on_fire`]   |
//! | boot signal              | [`RebootRecovery::on_boot`]      |
//! | call ended (UI)          | [`CallService::consumed`]        |

pub mod alarm;
pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handoff;
pub mod host;
pub mod locks;
pub mod recovery;
pub mod scheduler;
pub mod service;

pub use alarm::{AlarmHandle, AlarmHost, FiredAlarm, ManualAlarmHost};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{Discard, Dispatch, TriggerDispatcher};
pub use engine::{EngineOptions, TriggerEngine};
pub use error::{HandoffError, Result, SchedulerError};
pub use handoff::{ChannelPresenter, Launch, LaunchRequest, PresentationHandoff, Presenter};
pub use host::TokioAlarmHost;
pub use recovery::{RebootRecovery, RecoveryReport};
pub use scheduler::{Armed, Arming, TriggerScheduler};
pub use service::CallService;
