//! rollcall-store: durable persistence for the roster and report history.
//!
//! Both collections are stored whole, as JSON documents, in a single-table
//! SQLite key-value store. Every save writes both in one transaction so a
//! multi-step mutation is never persisted half-applied.

use std::path::Path;

use rollcall_core::{ReportHistory, Roster, Tracker};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use thiserror::Error;

const CURRENT_SCHEMA_VERSION: i32 = 1;

const ROSTER_KEY: &str = "roster";
const REPORTS_KEY: &str = "reports";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored {key} is corrupt: {source}")]
    Corrupt {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {key}: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("database schema version {found} is newer than supported ({supported})")]
    SchemaTooNew { found: i32, supported: i32 },
    #[error("cannot create data directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the on-disk collections.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "store opened");
        Self::init(conn)
    }

    /// Volatile store, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, StoreError> {
        run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    /// Load both collections. Missing collections load empty.
    pub fn load(&self) -> Result<Tracker, StoreError> {
        let roster: Roster = self.read(ROSTER_KEY)?.unwrap_or_default();
        let reports = self.read(REPORTS_KEY)?.unwrap_or_default();
        let history = ReportHistory::new(reports);
        tracing::info!(
            classrooms = roster.classrooms().len(),
            reports = history.len(),
            "state loaded"
        );
        Ok(Tracker::new(roster, history))
    }

    /// Persist the complete state in one transaction.
    pub fn save(&mut self, tracker: &Tracker) -> Result<(), StoreError> {
        let roster = encode(ROSTER_KEY, &tracker.roster)?;
        let reports = encode(REPORTS_KEY, &tracker.history)?;

        let tx = self.conn.transaction()?;
        write(&tx, ROSTER_KEY, &roster)?;
        write(&tx, REPORTS_KEY, &reports)?;
        tx.commit()?;
        tracing::debug!(
            roster_bytes = roster.len(),
            report_bytes = reports.len(),
            "state saved"
        );
        Ok(())
    }

    fn read<T: serde::de::DeserializeOwned>(
        &self,
        key: &'static str,
    ) -> Result<Option<T>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM collections WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|source| StoreError::Corrupt { key, source })
        })
        .transpose()
    }
}

fn encode<T: serde::Serialize>(key: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode { key, source })
}

fn write(tx: &Transaction<'_>, key: &str, value: &str) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO collections (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        version += 1;
        apply_migration(&tx, version)?;
        tracing::info!(version, "applied schema migration");
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), StoreError> {
    match version {
        1 => tx.execute_batch(
            "CREATE TABLE IF NOT EXISTS collections (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?,
        _ => unreachable!("no migration for schema version {version}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::recognition::RecognitionResult;
    use rollcall_core::{NewStudent, Photo, Secret};

    fn populated() -> Tracker {
        let mut tracker = Tracker::default();
        let id = tracker.roster.create_classroom("Physics").unwrap().id.clone();
        tracker
            .roster
            .add_student(
                &id,
                NewStudent {
                    name: "Ann".into(),
                    roll_id: "1".into(),
                    secret: Secret::new("pw"),
                    photo: Photo::new("image/jpeg", vec![7, 7, 7]),
                },
            )
            .unwrap();
        let students = tracker.roster.classroom(&id).unwrap().students.clone();
        tracker
            .commit_report(
                &id,
                &students,
                RecognitionResult {
                    present: Vec::new(),
                    unknown: Vec::new(),
                    absent: vec!["Ann".into()],
                    engagement_summary: "Quiet.".into(),
                },
                Photo::new("image/jpeg", vec![1, 2]),
                "Period 3",
                chrono::Utc::now(),
            )
            .unwrap();
        tracker
    }

    #[test]
    fn test_empty_store_loads_empty_state() {
        let store = Store::open_in_memory().unwrap();
        let tracker = store.load().unwrap();
        assert!(tracker.roster.classrooms().is_empty());
        assert!(tracker.history.is_empty());
    }

    #[test]
    fn test_save_then_load_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rollcall.db");
        let tracker = populated();
        {
            let mut store = Store::open(&path).unwrap();
            store.save(&tracker).unwrap();
        }
        let reopened = Store::open(&path).unwrap().load().unwrap();
        assert_eq!(reopened, tracker);
        assert!(reopened
            .roster
            .authenticate_student(&reopened.roster.classrooms()[0].id, "1", &Secret::new("pw"))
            .is_some());
    }

    #[test]
    fn test_save_overwrites_previous_state() {
        let mut store = Store::open_in_memory().unwrap();
        let mut tracker = populated();
        store.save(&tracker).unwrap();
        let id = tracker.roster.classrooms()[0].id.clone();
        tracker.delete_classroom(&id).unwrap();
        store.save(&tracker).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.roster.classrooms().is_empty());
        assert!(loaded.history.is_empty());
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let store = Store::open_in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO collections (key, value) VALUES ('reports', '{not json')",
                [],
            )
            .unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::Corrupt { key: "reports", .. })
        ));
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }
        assert!(matches!(
            Store::open(&path),
            Err(StoreError::SchemaTooNew { found: 99, .. })
        ));
    }
}
