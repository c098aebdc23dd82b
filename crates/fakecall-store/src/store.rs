use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use fakecall_core::types::{scheduled_from, CallId, CallPayload, CallRecord, NewCallRecord};
use rusqlite::{params, Connection, Row};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// The narrow record contract the scheduling core depends on.
///
/// Implementations must be durable: `save` and `reschedule` may only return
/// `Ok` once the row would survive a process restart.
pub trait RecordStore: Send + Sync {
    /// Persist a new record and return it with its assigned id.
    fn save(&self, new: &NewCallRecord) -> Result<CallRecord>;

    fn get(&self, id: CallId) -> Result<Option<CallRecord>>;

    /// Flip the active flag and stamp `updated_at = now`. Returns `false`
    /// when no record has this id.
    fn set_active(&self, id: CallId, active: bool, now: DateTime<Utc>) -> Result<bool>;

    /// Returns `false` when no record has this id.
    fn delete(&self, id: CallId) -> Result<bool>;

    /// Active records whose `scheduled_at` is strictly after `now`.
    fn query_active_future(&self, now: DateTime<Utc>) -> Result<Vec<CallRecord>>;

    /// Active records whose `scheduled_at` is at or before `now`.
    fn query_active_due(&self, now: DateTime<Utc>) -> Result<Vec<CallRecord>>;

    /// Every active record, ordered by `scheduled_at`.
    fn query_active(&self) -> Result<Vec<CallRecord>>;

    /// Start a new countdown for an existing record: `created_at = now`,
    /// `scheduled_at = now + countdown_secs`, active again. The payload is
    /// replaced when one is given. Returns `None` when the id is unknown.
    fn reschedule(
        &self,
        id: CallId,
        countdown_secs: u32,
        now: DateTime<Utc>,
        payload: Option<&CallPayload>,
    ) -> Result<Option<CallRecord>>;

    /// Full history, newest first.
    fn list(&self) -> Result<Vec<CallRecord>>;
}

const SELECT_CALLS: &str =
    "SELECT id, countdown_secs, created_at, scheduled_at, is_active, payload, updated_at FROM calls";

/// SQLite-backed [`RecordStore`].
///
/// Wraps a single connection in a `Mutex`, the same way the other stores in
/// this workspace do. Every write is a single statement, so it is committed
/// (and durable) before the call returns.
pub struct SqliteRecordStore {
    db: Mutex<Connection>,
}

impl SqliteRecordStore {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn select(
        db: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<CallRecord>> {
        let mut stmt = db.prepare_cached(sql)?;
        let rows = stmt.query_map(params, read_row)?;
        rows.map(|r| r.map_err(StoreError::from).and_then(CallRow::into_record))
            .collect()
    }

    fn get_locked(db: &Connection, id: CallId) -> Result<Option<CallRecord>> {
        let sql = format!("{SELECT_CALLS} WHERE id = ?1");
        Ok(Self::select(db, &sql, [id.get()])?.into_iter().next())
    }
}

impl RecordStore for SqliteRecordStore {
    #[instrument(skip(self, new), fields(countdown = new.countdown_secs))]
    fn save(&self, new: &NewCallRecord) -> Result<CallRecord> {
        let payload = serde_json::to_string(&new.payload)?;
        let db = self.conn();
        db.execute(
            "INSERT INTO calls
             (countdown_secs, created_at, scheduled_at, is_active, payload, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?2)",
            params![
                new.countdown_secs,
                fmt_ts(new.created_at),
                fmt_ts(new.scheduled_at),
                payload
            ],
        )?;
        let id = CallId(db.last_insert_rowid());
        debug!(call_id = %id, "call record saved");

        // Read back so the caller sees exactly what was persisted.
        Self::get_locked(&db, id)?.ok_or(StoreError::Database(rusqlite::Error::QueryReturnedNoRows))
    }

    fn get(&self, id: CallId) -> Result<Option<CallRecord>> {
        Self::get_locked(&self.conn(), id)
    }

    #[instrument(skip(self))]
    fn set_active(&self, id: CallId, active: bool, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE calls SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, fmt_ts(now), id.get()],
        )?;
        Ok(n > 0)
    }

    #[instrument(skip(self))]
    fn delete(&self, id: CallId) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM calls WHERE id = ?1", [id.get()])?;
        Ok(n > 0)
    }

    fn query_active_future(&self, now: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        let sql = format!(
            "{SELECT_CALLS} WHERE is_active = 1 AND scheduled_at > ?1 ORDER BY scheduled_at"
        );
        Self::select(&self.conn(), &sql, [fmt_ts(now)])
    }

    fn query_active_due(&self, now: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        let sql = format!(
            "{SELECT_CALLS} WHERE is_active = 1 AND scheduled_at <= ?1 ORDER BY scheduled_at"
        );
        Self::select(&self.conn(), &sql, [fmt_ts(now)])
    }

    fn query_active(&self) -> Result<Vec<CallRecord>> {
        let sql = format!("{SELECT_CALLS} WHERE is_active = 1 ORDER BY scheduled_at");
        Self::select(&self.conn(), &sql, [])
    }

    #[instrument(skip(self, payload))]
    fn reschedule(
        &self,
        id: CallId,
        countdown_secs: u32,
        now: DateTime<Utc>,
        payload: Option<&CallPayload>,
    ) -> Result<Option<CallRecord>> {
        let payload = payload.map(serde_json::to_string).transpose()?;
        let db = self.conn();
        let n = db.execute(
            "UPDATE calls
             SET countdown_secs = ?1,
                 created_at     = ?2,
                 scheduled_at   = ?3,
                 is_active      = 1,
                 payload        = COALESCE(?4, payload),
                 updated_at     = ?2
             WHERE id = ?5",
            params![
                countdown_secs,
                fmt_ts(now),
                fmt_ts(scheduled_from(now, countdown_secs)),
                payload,
                id.get()
            ],
        )?;
        if n == 0 {
            return Ok(None);
        }
        Self::get_locked(&db, id)
    }

    fn list(&self) -> Result<Vec<CallRecord>> {
        let sql = format!("{SELECT_CALLS} ORDER BY id DESC");
        Self::select(&self.conn(), &sql, [])
    }
}

/// Fixed-width UTC form (`2026-03-01T12:00:00.000Z`) so string comparison in
/// SQL is chronological.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(column: &'static str, value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp { column, value })
}

struct CallRow {
    id: i64,
    countdown_secs: u32,
    created_at: String,
    scheduled_at: String,
    is_active: bool,
    payload: String,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<CallRow> {
    Ok(CallRow {
        id: row.get(0)?,
        countdown_secs: row.get(1)?,
        created_at: row.get(2)?,
        scheduled_at: row.get(3)?,
        is_active: row.get(4)?,
        payload: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl CallRow {
    fn into_record(self) -> Result<CallRecord> {
        Ok(CallRecord {
            id: CallId(self.id),
            countdown_secs: self.countdown_secs,
            created_at: parse_ts("created_at", self.created_at)?,
            scheduled_at: parse_ts("scheduled_at", self.scheduled_at)?,
            is_active: self.is_active,
            payload: serde_json::from_str(&self.payload)?,
            updated_at: parse_ts("updated_at", self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn store() -> SqliteRecordStore {
        SqliteRecordStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
    }

    fn new_call(name: &str, countdown: u32) -> NewCallRecord {
        NewCallRecord::new(CallPayload::new(name, "+15550100", 20), countdown, t0())
    }

    #[test]
    fn save_then_get_returns_persisted_record() {
        let store = store();
        let saved = store.save(&new_call("Mom", 30)).unwrap();
        assert!(saved.is_active);
        assert_eq!(saved.scheduled_at, t0() + Duration::seconds(30));

        let fetched = store.get(saved.id).unwrap().expect("record exists");
        assert_eq!(fetched, saved);
        assert_eq!(fetched.payload.caller_name, "Mom");
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let store = store();
        let first = store.save(&new_call("A", 0)).unwrap();
        assert!(store.delete(first.id).unwrap());
        let second = store.save(&new_call("B", 0)).unwrap();
        assert!(second.id > first.id);
        assert!(store.get(first.id).unwrap().is_none());
    }

    #[test]
    fn missing_ids_report_false() {
        let store = store();
        assert!(!store.set_active(CallId(42), false, t0()).unwrap());
        assert!(!store.delete(CallId(42)).unwrap());
        assert!(store
            .reschedule(CallId(42), 10, t0(), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn future_and_due_queries_split_on_now() {
        let store = store();
        let now_call = store.save(&new_call("now", 0)).unwrap();
        let later = store.save(&new_call("later", 60)).unwrap();
        let inactive = store.save(&new_call("off", 120)).unwrap();
        store.set_active(inactive.id, false, t0()).unwrap();

        let future = store.query_active_future(t0()).unwrap();
        assert_eq!(future.iter().map(|r| r.id).collect::<Vec<_>>(), vec![later.id]);

        let due = store.query_active_due(t0()).unwrap();
        assert_eq!(due.iter().map(|r| r.id).collect::<Vec<_>>(), vec![now_call.id]);

        assert_eq!(store.query_active().unwrap().len(), 2);
        assert_eq!(store.list().unwrap().len(), 3);
    }

    #[test]
    fn millisecond_timestamps_compare_chronologically() {
        let store = store();
        let base = t0() + Duration::milliseconds(5);
        let rec = NewCallRecord::new(CallPayload::new("ms", "1", 5), 0, base);
        store.save(&rec).unwrap();

        assert_eq!(store.query_active_due(base).unwrap().len(), 1);
        assert!(store
            .query_active_due(base - Duration::milliseconds(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn set_active_stamps_the_given_time() {
        let store = store();
        let rec = store.save(&new_call("Clock", 30)).unwrap();
        let at = t0() + Duration::minutes(3);

        assert!(store.set_active(rec.id, false, at).unwrap());
        let stored = store.get(rec.id).unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.updated_at, at);
        assert_eq!(stored.created_at, rec.created_at);
    }

    #[test]
    fn reschedule_restarts_countdown_and_reactivates() {
        let store = store();
        let rec = store.save(&new_call("Boss", 30)).unwrap();
        store.set_active(rec.id, false, t0()).unwrap();

        let later = t0() + Duration::minutes(10);
        let mut payload = rec.payload.clone();
        payload.caller_name = "Big Boss".to_string();
        let updated = store
            .reschedule(rec.id, 45, later, Some(&payload))
            .unwrap()
            .unwrap();

        assert!(updated.is_active);
        assert_eq!(updated.countdown_secs, 45);
        assert_eq!(updated.created_at, later);
        assert_eq!(updated.scheduled_at, later + Duration::seconds(45));
        assert_eq!(updated.payload.caller_name, "Big Boss");

        // Without a payload the stored one is kept.
        let again = store.reschedule(rec.id, 0, later, None).unwrap().unwrap();
        assert_eq!(again.payload.caller_name, "Big Boss");
    }

    #[test]
    fn corrupt_timestamp_is_reported() {
        let store = store();
        let rec = store.save(&new_call("x", 0)).unwrap();
        store
            .conn()
            .execute(
                "UPDATE calls SET scheduled_at = 'yesterday' WHERE id = ?1",
                [rec.id.get()],
            )
            .unwrap();
        let err = store.get(rec.id).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTimestamp {
                column: "scheduled_at",
                ..
            }
        ));
    }
}
