//! Event persistence layer using SQLite
//!
//! `EventStore` is the storage client shared by the collector (local sink)
//! and the ingestion service. It is constructed explicitly with `open` and
//! released with `close`; there is no process-global handle.
//!
//! Writes are serialized by the connection mutex. Reads take the same lock
//! but no snapshot guarantees are made relative to concurrent writers.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::event::{EventId, NewEvent, StoredEvent};

/// Hard cap on rows returned by a filtered query
pub const QUERY_MAX_RESULTS: usize = 500;

const SELECT_COLUMNS: &str = "id, source, level, summary, processes, files_changed, \
                              network_calls, artifacts, meta, received_at";

/// Filter for `EventStore::query`. All bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub level: Option<String>,
    pub source: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Match events whose `artifacts.file_hashes` contains this value
    pub file_hash: Option<String>,
}

pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        tracing::debug!(path = %path.display(), "event store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Release the underlying connection, surfacing any close error
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().map_err(|_| StoreError::Poisoned)?;
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                level TEXT NOT NULL,
                summary TEXT NOT NULL,
                processes TEXT NOT NULL,
                files_changed TEXT NOT NULL,
                network_calls TEXT NOT NULL,
                artifacts TEXT NOT NULL,
                meta TEXT NOT NULL,
                received_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_received
                ON events(received_at DESC);

            CREATE INDEX IF NOT EXISTS idx_events_level
                ON events(level);

            CREATE INDEX IF NOT EXISTS idx_events_source
                ON events(source);
        "#,
        )?;
        Ok(())
    }

    // Writes

    /// Store one event with a fresh id
    pub fn insert(
        &self,
        event: NewEvent,
        received_at: DateTime<Utc>,
    ) -> Result<StoredEvent, StoreError> {
        let conn = self.lock()?;
        let stored = event.into_stored(EventId::new(), truncate_to_micros(received_at));
        insert_row(&conn, &stored)?;
        Ok(stored)
    }

    /// Store a batch atomically: either every event is stored or none is
    pub fn insert_batch(
        &self,
        events: Vec<NewEvent>,
        received_at: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut conn = self.lock()?;
        let received_at = truncate_to_micros(received_at);
        let tx = conn.transaction()?;

        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            let row = event.into_stored(EventId::new(), received_at);
            insert_row(&tx, &row)?;
            stored.push(row);
        }

        tx.commit()?;
        Ok(stored)
    }

    // Reads

    /// Most recently received events, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events ORDER BY received_at DESC, rowid DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventRow::decode).collect()
    }

    /// Every stored event, newest first. Unbounded; meant for offline export.
    pub fn all(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM events ORDER BY received_at DESC, rowid DESC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventRow::decode).collect()
    }

    /// Filtered read, newest first, at most `QUERY_MAX_RESULTS` rows
    pub fn query(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, StoreError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(level) = &filter.level {
            clauses.push("level = ?");
            values.push(SqlValue::Text(level.clone()));
        }
        if let Some(source) = &filter.source {
            clauses.push("source = ?");
            values.push(SqlValue::Text(source.clone()));
        }
        if let Some(from) = filter.from {
            clauses.push("received_at >= ?");
            values.push(SqlValue::Integer(from.timestamp_micros()));
        }
        if let Some(to) = filter.to {
            clauses.push("received_at <= ?");
            values.push(SqlValue::Integer(to.timestamp_micros()));
        }
        if let Some(hash) = &filter.file_hash {
            clauses.push(
                "EXISTS (SELECT 1 FROM json_each(events.artifacts, '$.file_hashes') AS h \
                 WHERE h.value = ?)",
            );
            values.push(SqlValue::Text(hash.clone()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM events {where_sql} \
             ORDER BY received_at DESC, rowid DESC LIMIT {QUERY_MAX_RESULTS}"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EventRow::decode).collect()
    }

    pub fn get(&self, id: &EventId) -> Result<Option<StoredEvent>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM events WHERE id = ?1");
        let row = conn
            .query_row(&sql, params![id.to_string()], EventRow::from_row)
            .optional()?;
        row.map(EventRow::decode).transpose()
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Event counts per category (`meta.category` when it is a string, else source)
    pub fn category_counts(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT CASE WHEN json_type(meta, '$.category') = 'text'
                         THEN json_extract(meta, '$.category')
                         ELSE source END AS category,
                    COUNT(*)
             FROM events
             GROUP BY category",
        )?;
        let mut rows = stmt.query([])?;

        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let category: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            counts.insert(category, n as u64);
        }
        Ok(counts)
    }

    /// SQLite library version; doubles as a liveness probe of the backend
    pub fn backend_version(&self) -> Result<String, StoreError> {
        let conn = self.lock()?;
        let version: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
        Ok(version)
    }
}

fn insert_row(conn: &Connection, event: &StoredEvent) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO events (id, source, level, summary, processes, files_changed, \
         network_calls, artifacts, meta, received_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            event.id.to_string(),
            event.source,
            event.level,
            event.summary,
            serde_json::to_string(&event.processes)?,
            serde_json::to_string(&event.files_changed)?,
            serde_json::to_string(&event.network_calls)?,
            serde_json::to_string(&event.artifacts)?,
            serde_json::to_string(&event.meta)?,
            event.received_at.timestamp_micros(),
        ],
    )?;
    Ok(())
}

// ============================================================================
// Row decoding
// ============================================================================

struct EventRow {
    id: String,
    source: String,
    level: String,
    summary: String,
    processes: String,
    files_changed: String,
    network_calls: String,
    artifacts: String,
    meta: String,
    received_at: i64,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source: row.get(1)?,
            level: row.get(2)?,
            summary: row.get(3)?,
            processes: row.get(4)?,
            files_changed: row.get(5)?,
            network_calls: row.get(6)?,
            artifacts: row.get(7)?,
            meta: row.get(8)?,
            received_at: row.get(9)?,
        })
    }

    fn decode(self) -> Result<StoredEvent, StoreError> {
        let id = EventId::parse(&self.id).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let received_at = from_micros(self.received_at)
            .ok_or_else(|| StoreError::Corrupt(format!("received_at {}", self.received_at)))?;

        Ok(StoredEvent {
            id,
            source: self.source,
            level: self.level,
            summary: self.summary,
            processes: serde_json::from_str(&self.processes)?,
            files_changed: serde_json::from_str(&self.files_changed)?,
            network_calls: serde_json::from_str(&self.network_calls)?,
            artifacts: serde_json::from_str(&self.artifacts)?,
            meta: serde_json::from_str(&self.meta)?,
            received_at,
        })
    }
}

fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Stored timestamps have microsecond resolution
fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn event(source: &str, level: &str) -> NewEvent {
        NewEvent {
            source: source.to_string(),
            level: level.to_string(),
            ..Default::default()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_and_get_roundtrip() {
        let store = EventStore::open_in_memory().unwrap();
        let mut new = event("sysmon", "WARN");
        new.processes.push(json!({"pid": 4, "name": "System"}));
        new.artifacts.insert("file_hashes".to_string(), json!(["abc"]));

        let stored = store.insert(new, t0()).unwrap();
        let fetched = store.get(&stored.id).unwrap().unwrap();
        assert_eq!(fetched, stored);
    }

    #[test]
    fn test_get_absent_is_none() {
        let store = EventStore::open_in_memory().unwrap();
        assert!(store.get(&EventId::new()).unwrap().is_none());
    }

    #[test]
    fn test_identical_inserts_get_distinct_ids() {
        let store = EventStore::open_in_memory().unwrap();
        let a = store.insert(event("x", "INFO"), t0()).unwrap();
        let b = store.insert(event("x", "INFO"), t0()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let store = EventStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .insert(event(&format!("s{i}"), "INFO"), t0() + Duration::seconds(i))
                .unwrap();
        }

        let recent = store.recent(3).unwrap();
        let sources: Vec<_> = recent.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(sources, vec!["s4", "s3", "s2"]);
    }

    #[test]
    fn test_recent_ties_break_by_insertion_order() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert(event("first", "INFO"), t0()).unwrap();
        store.insert(event("second", "INFO"), t0()).unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent[0].source, "second");
        assert_eq!(recent[1].source, "first");
    }

    #[test]
    fn test_query_time_range_inclusive() {
        let store = EventStore::open_in_memory().unwrap();
        for i in 0..3 {
            store
                .insert(event(&format!("s{i}"), "INFO"), t0() + Duration::seconds(i))
                .unwrap();
        }

        let filter = EventFilter {
            from: Some(t0() + Duration::seconds(1)),
            to: Some(t0() + Duration::seconds(2)),
            ..Default::default()
        };
        let hits = store.query(&filter).unwrap();
        let sources: Vec<_> = hits.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(sources, vec!["s2", "s1"]);
    }

    #[test]
    fn test_query_level_and_source() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert(event("sysmon", "ERROR"), t0()).unwrap();
        store.insert(event("sysmon", "INFO"), t0()).unwrap();
        store.insert(event("agent", "ERROR"), t0()).unwrap();

        let filter = EventFilter {
            level: Some("ERROR".to_string()),
            source: Some("sysmon".to_string()),
            ..Default::default()
        };
        let hits = store.query(&filter).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "sysmon");
        assert_eq!(hits[0].level, "ERROR");
    }

    #[test]
    fn test_query_file_hash() {
        let store = EventStore::open_in_memory().unwrap();
        let mut with_hash = event("sandbox", "INFO");
        with_hash
            .artifacts
            .insert("file_hashes".to_string(), json!(["d41d8cd9", "ffee"]));
        store.insert(with_hash, t0()).unwrap();
        store.insert(event("sandbox", "INFO"), t0()).unwrap();

        let filter = EventFilter {
            file_hash: Some("ffee".to_string()),
            ..Default::default()
        };
        assert_eq!(store.query(&filter).unwrap().len(), 1);

        let miss = EventFilter {
            file_hash: Some("0000".to_string()),
            ..Default::default()
        };
        assert!(store.query(&miss).unwrap().is_empty());
    }

    #[test]
    fn test_query_capped() {
        let store = EventStore::open_in_memory().unwrap();
        let batch: Vec<_> = (0..QUERY_MAX_RESULTS + 10)
            .map(|_| event("bulk", "INFO"))
            .collect();
        store.insert_batch(batch, t0()).unwrap();

        let hits = store.query(&EventFilter::default()).unwrap();
        assert_eq!(hits.len(), QUERY_MAX_RESULTS);
    }

    #[test]
    fn test_all_is_uncapped() {
        let store = EventStore::open_in_memory().unwrap();
        let batch: Vec<_> = (0..QUERY_MAX_RESULTS + 10)
            .map(|_| event("bulk", "INFO"))
            .collect();
        store.insert_batch(batch, t0()).unwrap();
        store.insert(event("late", "INFO"), t0() + Duration::seconds(1)).unwrap();

        let all = store.all().unwrap();
        assert_eq!(all.len(), QUERY_MAX_RESULTS + 11);
        assert_eq!(all[0].source, "late");
    }

    #[test]
    fn test_category_counts() {
        let store = EventStore::open_in_memory().unwrap();
        store.insert(event("sysmon", "INFO"), t0()).unwrap();
        store.insert(event("sysmon", "INFO"), t0()).unwrap();
        let mut tagged = event("sysmon", "INFO");
        tagged.meta.insert("category".to_string(), json!("network"));
        store.insert(tagged, t0()).unwrap();

        let counts = store.category_counts().unwrap();
        assert_eq!(counts.get("sysmon"), Some(&2));
        assert_eq!(counts.get("network"), Some(&1));
    }

    #[test]
    fn test_reopen_persists_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        let store = EventStore::open(&path).unwrap();
        let stored = store.insert(event("disk", "INFO"), t0()).unwrap();
        store.close().unwrap();

        let reopened = EventStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.get(&stored.id).unwrap().unwrap().source, "disk");
        assert!(!reopened.backend_version().unwrap().is_empty());
    }

    #[test]
    fn test_micros_conversion() {
        let ts = Utc.with_ymd_and_hms(1969, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(from_micros(ts.timestamp_micros()), Some(ts));
    }
}
