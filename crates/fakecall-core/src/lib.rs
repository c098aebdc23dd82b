//! `fakecall-core`: types and configuration shared by every fakecall crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{FakecallConfig, MissedPolicy};
pub use error::{CoreError, Result};
pub use types::{parse_countdown, scheduled_from, CallId, CallPayload, CallRecord, NewCallRecord};
