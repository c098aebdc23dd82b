//! `fakecall-store`: durable SQLite table of call records.
//!
//! The scheduling core only talks to the [`RecordStore`] trait; the
//! [`SqliteRecordStore`] is the implementation the daemon and CLI share.

pub mod db;
pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{RecordStore, SqliteRecordStore};
