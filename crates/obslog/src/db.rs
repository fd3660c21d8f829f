use std::path::{Path, PathBuf};

use boothproto::{Collection, DeviceRequirement, Kwargs, LogRowId, TaskDescriptor, TechObsRecord};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use crate::{ObsLogError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS collection_tasks (
    collection_id TEXT NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    task_id TEXT NOT NULL,
    obs_id TEXT NOT NULL,
    kind TEXT,
    kwargs JSON NOT NULL DEFAULT '{}',
    PRIMARY KEY (collection_id, position)
);

CREATE TABLE IF NOT EXISTS task_devices (
    collection_id TEXT NOT NULL,
    task_position INTEGER NOT NULL,
    position INTEGER NOT NULL,
    device_name TEXT NOT NULL,
    device_kind TEXT NOT NULL,
    kwargs JSON NOT NULL DEFAULT '{}',
    PRIMARY KEY (collection_id, task_position, position),
    FOREIGN KEY (collection_id, task_position)
        REFERENCES collection_tasks(collection_id, position) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS tech_obs_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id TEXT NOT NULL,
    allocated_at TEXT NOT NULL DEFAULT (datetime('now')),
    task_id TEXT,
    tech_obs_id TEXT,
    date_times TEXT,
    event_array TEXT,
    fields JSON,
    filled_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tech_obs_subject ON tech_obs_log(subject_id, id);
"#;

/// Collection catalog and tech-obs log with connection-per-call pattern.
/// Each method opens a fresh connection with WAL mode enabled.
pub struct ObsLogDb {
    path: PathBuf,
}

impl ObsLogDb {
    /// Open database at path, creating if necessary
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self { path };
        db.initialize()?;
        Ok(db)
    }

    /// Create a temporary database file with a unique name.
    /// Each call creates a new database - suitable for tests.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_name = format!("obslog_{}_{}.db", std::process::id(), unique_id);
        Self::open(std::env::temp_dir().join(db_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a connection with WAL mode and busy timeout
    pub fn conn(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        Ok(conn)
    }

    fn initialize(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert or replace a collection with its tasks and device requirements.
    pub fn register_collection(&self, collection: &Collection) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM collections WHERE id = ?1", [&collection.id])?;
        tx.execute("INSERT INTO collections (id) VALUES (?1)", [&collection.id])?;

        for (position, task) in collection.tasks.iter().enumerate() {
            tx.execute(
                "INSERT INTO collection_tasks (collection_id, position, task_id, obs_id, kind, kwargs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    collection.id,
                    position as i64,
                    task.task_id,
                    task.obs_id,
                    task.kind.map(|k| k.as_str()),
                    serde_json::to_string(&task.kwargs)?,
                ],
            )?;

            for (device_position, device) in task.devices.iter().enumerate() {
                tx.execute(
                    "INSERT INTO task_devices
                        (collection_id, task_position, position, device_name, device_kind, kwargs)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        collection.id,
                        position as i64,
                        device_position as i64,
                        device.name,
                        device.kind.as_str(),
                        serde_json::to_string(&device.kwargs)?,
                    ],
                )?;
            }
        }

        tx.commit()?;
        debug!(collection = %collection.id, tasks = collection.tasks.len(), "registered collection");
        Ok(())
    }

    /// Resolve a collection id to its ordered task descriptors.
    pub fn resolve_collection(&self, id: &str) -> Result<Collection> {
        let conn = self.conn()?;

        let exists: Option<String> = conn
            .query_row("SELECT id FROM collections WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_none() {
            return Err(ObsLogError::UnknownCollection(id.to_string()));
        }

        let mut stmt = conn.prepare(
            "SELECT position, task_id, obs_id, kind, kwargs
             FROM collection_tasks WHERE collection_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map([id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut device_stmt = conn.prepare(
            "SELECT device_name, device_kind, kwargs
             FROM task_devices WHERE collection_id = ?1 AND task_position = ?2
             ORDER BY position ASC",
        )?;

        let mut collection = Collection::new(id);
        for row in rows {
            let (position, task_id, obs_id, kind, kwargs) = row?;

            let mut devices = Vec::new();
            let device_rows = device_stmt.query_map(params![id, position], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for device in device_rows {
                let (name, kind, kwargs) = device?;
                devices.push(DeviceRequirement {
                    name,
                    kind: kind.parse().map_err(ObsLogError::Corrupt)?,
                    kwargs: parse_kwargs(&kwargs)?,
                });
            }

            collection.tasks.push(TaskDescriptor {
                task_id,
                obs_id,
                kind: kind
                    .map(|k| k.parse())
                    .transpose()
                    .map_err(ObsLogError::Corrupt)?,
                kwargs: parse_kwargs(&kwargs)?,
                devices,
            });
        }

        Ok(collection)
    }

    /// Allocate an empty log row for a subject.
    pub fn allocate_log_row(&self, subject_id: &str) -> Result<LogRowId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tech_obs_log (subject_id) VALUES (?1)",
            [subject_id],
        )?;
        Ok(LogRowId(conn.last_insert_rowid()))
    }

    /// Write a completed record into an allocated row. Rows are written once.
    pub fn fill_log_row(&self, id: LogRowId, record: &TechObsRecord) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tech_obs_log
             SET task_id = ?2, tech_obs_id = ?3, date_times = ?4, event_array = ?5,
                 fields = ?6, filled_at = datetime('now')
             WHERE id = ?1 AND filled_at IS NULL",
            params![
                id.0,
                record.task_id,
                record.tech_obs_id,
                record.date_times,
                record.event_array,
                serde_json::to_string(&record.fields)?,
            ],
        )?;

        if changed == 1 {
            return Ok(());
        }

        let exists: Option<i64> = conn
            .query_row("SELECT id FROM tech_obs_log WHERE id = ?1", [id.0], |row| {
                row.get(0)
            })
            .optional()?;
        match exists {
            Some(_) => Err(ObsLogError::RowAlreadyWritten(id)),
            None => Err(ObsLogError::UnknownRow(id)),
        }
    }

    /// Filled rows for a subject, oldest first.
    pub fn log_rows(&self, subject_id: &str) -> Result<Vec<(LogRowId, TechObsRecord)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, task_id, tech_obs_id, date_times, event_array, fields
             FROM tech_obs_log WHERE subject_id = ?1 AND filled_at IS NOT NULL
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([subject_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                TechObsRecord {
                    subject_id: row.get(1)?,
                    task_id: row.get(2)?,
                    tech_obs_id: row.get(3)?,
                    date_times: row.get(4)?,
                    event_array: row.get(5)?,
                    fields: Kwargs::new(),
                },
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, mut record, fields) = row?;
            record.fields = parse_kwargs(&fields)?;
            out.push((LogRowId(id), record));
        }
        Ok(out)
    }

    /// Allocated rows that were never filled (task errored mid-run).
    pub fn unfilled_rows(&self, subject_id: &str) -> Result<Vec<LogRowId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM tech_obs_log WHERE subject_id = ?1 AND filled_at IS NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([subject_id], |row| row.get::<_, i64>(0))?;
        rows.map(|r| r.map(LogRowId).map_err(Into::into)).collect()
    }
}

fn parse_kwargs(text: &str) -> Result<Kwargs> {
    Ok(serde_json::from_str(text)?)
}
