use std::{
    path::Path,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    schema::{self, AGE_UNSET},
    Storage,
};
use crate::{
    event::{ExportedEvent, Project, Route},
    Result,
};

const COLUMNS: &str = "id, tries, route, should_be_skipped, project, event_type, timestamp, \
                       properties, customer_ids, age, sdk_event_type";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Relational event store backed by SQLite.
///
/// All writes go through a single writer connection. File-backed databases get a second
/// connection for reads, which WAL mode lets proceed concurrently with the writer.
pub struct SqliteBackend {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
}

/// Columns as stored, before JSON fields are decoded.
struct RawRow {
    id: String,
    tries: u32,
    route: String,
    should_be_skipped: bool,
    project: String,
    event_type: Option<String>,
    timestamp: f64,
    properties: String,
    customer_ids: Option<String>,
    age: f64,
    sdk_event_type: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            id: row.get(0)?,
            tries: row.get(1)?,
            route: row.get(2)?,
            should_be_skipped: row.get(3)?,
            project: row.get(4)?,
            event_type: row.get(5)?,
            timestamp: row.get(6)?,
            properties: row.get(7)?,
            customer_ids: row.get(8)?,
            age: row.get(9)?,
            sdk_event_type: row.get(10)?,
        })
    }

    /// Decode the JSON columns. Returns `None` (and logs) for a corrupt record.
    fn decode(self) -> Option<ExportedEvent> {
        let decoded = (|| -> std::result::Result<ExportedEvent, String> {
            let route: Route = self.route.parse().map_err(|e| format!("{e}"))?;
            let project: Project =
                serde_json::from_str(&self.project).map_err(|e| format!("project: {e}"))?;
            let mut event =
                ExportedEvent::restore(self.id.clone(), self.tries, route, project, self.timestamp);
            event.should_be_skipped = self.should_be_skipped;
            event.event_type = self.event_type;
            event.properties = serde_json::from_str(&self.properties)
                .map_err(|e| format!("properties: {e}"))?;
            event.customer_ids = self
                .customer_ids
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .map_err(|e| format!("customer_ids: {e}"))?;
            event.age = (self.age >= 0.0).then_some(self.age);
            event.sdk_event_type = self.sdk_event_type;
            Ok(event)
        })();

        match decoded {
            Ok(event) => Some(event),
            Err(reason) => {
                log::warn!(target: "beacon",
                           event_id:display = self.id;
                           "dropping corrupt event record: {}", reason);
                None
            }
        }
    }
}

/// Read one row, dropping (and logging) records whose columns do not hold the expected types.
fn read_row(row: &Row<'_>) -> rusqlite::Result<Option<ExportedEvent>> {
    match RawRow::from_row(row) {
        Ok(raw) => Ok(raw.decode()),
        Err(
            err @ (rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)),
        ) => {
            let id = row.get::<_, Option<String>>(0).ok().flatten();
            log::warn!(target: "beacon",
                       event_id:display = id.as_deref().unwrap_or("<unknown>");
                       "dropping corrupt event record: {}", err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

impl SqliteBackend {
    /// Open (creating if needed) the database at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<SqliteBackend> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = Connection::open(path)?;
        writer.busy_timeout(BUSY_TIMEOUT)?;
        schema::configure(&writer)?;
        schema::migrate(&mut writer)?;

        let reader = Connection::open(path)?;
        reader.busy_timeout(BUSY_TIMEOUT)?;

        log::debug!(target: "beacon", path:display = path.display(); "opened sqlite event store");
        Ok(SqliteBackend {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
        })
    }

    /// Open a private in-memory database. Nothing survives the backend being dropped.
    pub fn open_in_memory() -> Result<SqliteBackend> {
        let mut writer = Connection::open_in_memory()?;
        schema::configure(&writer)?;
        schema::migrate(&mut writer)?;
        Ok(SqliteBackend {
            writer: Mutex::new(writer),
            reader: None,
        })
    }

    fn with_writer<R>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<R>) -> Result<R> {
        let conn = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&conn)?)
    }

    fn with_reader<R>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<R>) -> Result<R> {
        let lock = self.reader.as_ref().unwrap_or(&self.writer);
        let conn = lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&conn)?)
    }

    fn upsert(&self, event: &ExportedEvent) -> Result<()> {
        let (project, properties, customer_ids) = encode_json_columns(event)?;
        self.with_writer(|conn| {
            conn.execute(
                "INSERT INTO exported_event
                 (id, tries, project_id, route, should_be_skipped, project, event_type, timestamp,
                  properties, customer_ids, age, sdk_event_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                    tries = excluded.tries,
                    project_id = excluded.project_id,
                    route = excluded.route,
                    should_be_skipped = excluded.should_be_skipped,
                    project = excluded.project,
                    event_type = excluded.event_type,
                    timestamp = excluded.timestamp,
                    properties = excluded.properties,
                    customer_ids = excluded.customer_ids,
                    age = excluded.age,
                    sdk_event_type = excluded.sdk_event_type",
                params![
                    event.id(),
                    event.tries(),
                    event.project().project_token,
                    event.route().to_string(),
                    event.should_be_skipped,
                    project,
                    event.event_type,
                    event.timestamp,
                    properties,
                    customer_ids,
                    event.age.unwrap_or(AGE_UNSET),
                    event.sdk_event_type,
                ],
            )
        })?;
        Ok(())
    }
}

fn encode_json_columns(event: &ExportedEvent) -> Result<(String, String, Option<String>)> {
    let project = serde_json::to_string(event.project())?;
    let properties = serde_json::to_string(&event.properties)?;
    let customer_ids = event
        .customer_ids
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    Ok((project, properties, customer_ids))
}

impl Storage<ExportedEvent> for SqliteBackend {
    fn all(&self) -> Result<Vec<ExportedEvent>> {
        let rows = self.with_reader(|conn| {
            // rowid follows insertion; upserts keep it, so updates do not reorder.
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM exported_event ORDER BY rowid ASC"))?;
            let rows = stmt
                .query_map([], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        Ok(rows.into_iter().flatten().collect())
    }

    fn add(&self, item: &ExportedEvent) -> Result<()> {
        self.upsert(item)
    }

    fn update(&self, item: &ExportedEvent) -> Result<()> {
        self.upsert(item)
    }

    fn replace(&self, item: &ExportedEvent) -> Result<bool> {
        let (project, properties, customer_ids) = encode_json_columns(item)?;
        let changed = self.with_writer(|conn| {
            conn.execute(
                "UPDATE exported_event SET
                    tries = ?2,
                    project_id = ?3,
                    route = ?4,
                    should_be_skipped = ?5,
                    project = ?6,
                    event_type = ?7,
                    timestamp = ?8,
                    properties = ?9,
                    customer_ids = ?10,
                    age = ?11,
                    sdk_event_type = ?12
                 WHERE id = ?1",
                params![
                    item.id(),
                    item.tries(),
                    item.project().project_token,
                    item.route().to_string(),
                    item.should_be_skipped,
                    project,
                    item.event_type,
                    item.timestamp,
                    properties,
                    customer_ids,
                    item.age.unwrap_or(AGE_UNSET),
                    item.sdk_event_type,
                ],
            )
        })?;
        Ok(changed > 0)
    }

    fn get(&self, id: &str) -> Result<Option<ExportedEvent>> {
        let row = self.with_reader(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM exported_event WHERE id = ?1"),
                params![id],
                read_row,
            )
            .optional()
        })?;
        Ok(row.flatten())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        self.with_writer(|conn| conn.execute("DELETE FROM exported_event WHERE id = ?1", params![id]))?;
        Ok(true)
    }

    fn clear(&self) -> Result<()> {
        self.with_writer(|conn| conn.execute("DELETE FROM exported_event", []))?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self.with_reader(|conn| {
            conn.query_row("SELECT COUNT(*) FROM exported_event", [], |row| row.get(0))
        })?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rusqlite::{params, Connection};

    use super::SqliteBackend;
    use crate::{
        event::ExportedEvent,
        storage::{schema, test_support, Storage},
    };

    #[test]
    fn satisfies_storage_contract() {
        test_support::check_contract(&SqliteBackend::open_in_memory().unwrap());

        let dir = tempfile::tempdir().unwrap();
        test_support::check_contract(&SqliteBackend::open(&dir.path().join("events.db")).unwrap());
    }

    #[test]
    fn concurrent_access_on_disjoint_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("events.db")).unwrap();
        test_support::check_concurrent(Arc::new(backend));
    }

    #[test]
    fn events_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let mut event = test_support::sample_event("purchase", 42.0).with_sdk_event_type("custom");
        event.age = Some(3.5);
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.add(&event).unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.get(event.id()).unwrap(), Some(event));
    }

    #[test]
    fn corrupt_row_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let good = test_support::sample_event("good", 1.0);
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.add(&good).unwrap();
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO exported_event
                 (id, tries, project_id, route, should_be_skipped, project, event_type, timestamp, properties)
                 VALUES (?1, 0, 'token', 'track_events', 0, '{}', 'bad', 2.0, 'not json')",
                params!["bad"],
            )
            .unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.all().unwrap(), vec![good]);
        assert_eq!(backend.get("bad").unwrap(), None);
    }

    #[test]
    fn row_with_mistyped_column_is_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let good = test_support::sample_event("good", 1.0);
        let backend = SqliteBackend::open(&path).unwrap();
        backend.add(&good).unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO exported_event
                 (id, tries, project_id, route, should_be_skipped, project, event_type, timestamp, properties)
                 VALUES (?1, 'abc', 'token', 'track_events', 0, '{}', 'bad', 2.0, '{}')",
                params!["bad"],
            )
            .unwrap();
        }

        assert_eq!(backend.all().unwrap(), vec![good.clone()]);
        assert_eq!(backend.get("bad").unwrap(), None);
        assert_eq!(backend.get(good.id()).unwrap(), Some(good));
    }

    #[test]
    fn rows_from_first_schema_read_back_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let legacy = test_support::sample_event("legacy", 7.0);
        {
            let mut conn = Connection::open(&path).unwrap();
            schema::migrate_to(&mut conn, 1).unwrap();
            conn.execute(
                "INSERT INTO exported_event
                 (id, tries, project_id, route, should_be_skipped, project, event_type, timestamp, properties, customer_ids)
                 VALUES (?1, 3, 'token', 'track_events', 0, ?2, 'legacy', 7.0, ?3, ?4)",
                params![
                    legacy.id(),
                    serde_json::to_string(legacy.project()).unwrap(),
                    serde_json::to_string(&legacy.properties).unwrap(),
                    serde_json::to_string(&legacy.customer_ids).unwrap(),
                ],
            )
            .unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        let restored: ExportedEvent = backend.get(legacy.id()).unwrap().unwrap();
        assert_eq!(restored.tries(), 3);
        assert_eq!(restored.age, None);
        assert_eq!(restored.sdk_event_type, None);
        assert_eq!(restored.properties, legacy.properties);
        assert_eq!(restored.customer_ids, legacy.customer_ids);
    }
}
