use crate::config::ensure_private_dir;
use crate::error::SyncError;
use crate::upload_queue::types::{PendingUpload, SyncedFile};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS local_files (
        position INTEGER PRIMARY KEY,
        file_id INTEGER NOT NULL,
        collection_id INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS pending_uploads (
        position INTEGER PRIMARY KEY,
        collection_id INTEGER NOT NULL,
        path TEXT NOT NULL
    );
";

/// Durable local state of the upload pipeline
pub trait LocalStore: Send + Sync {
    /// The local file index in its persisted order
    fn load_files(&self) -> Result<Vec<SyncedFile>, SyncError>;

    /// Replace the whole local file index
    fn save_files(&self, files: &[SyncedFile]) -> Result<(), SyncError>;

    /// The "remaining files" ledger of an interrupted batch
    fn load_pending_uploads(&self) -> Result<Vec<PendingUpload>, SyncError>;

    fn save_pending_uploads(&self, pending: &[PendingUpload]) -> Result<(), SyncError>;
}

/// SQLite-backed store
pub struct LocalDatabase {
    conn: Mutex<Connection>,
}

impl LocalDatabase {
    /// Open (or create) the database file
    pub fn open(db_path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = db_path.parent() {
            ensure_private_dir(parent)?;
        }

        let conn = Connection::open(db_path)?;
        let db = Self::from_connection(conn)?;

        tracing::info!(path = ?db_path, "Database connection established");
        Ok(db)
    }

    /// Open the database at the default location
    pub fn open_default() -> Result<Self, SyncError> {
        let path: PathBuf = crate::config::get_database_path()?;
        Self::open(&path)
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a closure with the connection held
    fn with_connection_mut<F, T>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&mut Connection) -> Result<T, SyncError>,
    {
        let mut conn = self.conn.lock()?;
        f(&mut conn)
    }
}

impl LocalStore for LocalDatabase {
    fn load_files(&self) -> Result<Vec<SyncedFile>, SyncError> {
        self.with_connection_mut(|conn| {
            let mut stmt = conn.prepare("SELECT data FROM local_files ORDER BY position")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut files = Vec::new();
            for row in rows {
                files.push(serde_json::from_str(&row?)?);
            }
            Ok(files)
        })
    }

    fn save_files(&self, files: &[SyncedFile]) -> Result<(), SyncError> {
        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM local_files", [])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO local_files (position, file_id, collection_id, data)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (position, file) in files.iter().enumerate() {
                    stmt.execute(params![
                        position as i64,
                        file.id,
                        file.collection_id,
                        serde_json::to_string(file)?
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn load_pending_uploads(&self) -> Result<Vec<PendingUpload>, SyncError> {
        self.with_connection_mut(|conn| {
            let mut stmt = conn
                .prepare("SELECT collection_id, path FROM pending_uploads ORDER BY position")?;
            let rows = stmt.query_map([], |row| {
                Ok(PendingUpload {
                    collection_id: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                })
            })?;

            let pending = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(pending)
        })
    }

    fn save_pending_uploads(&self, pending: &[PendingUpload]) -> Result<(), SyncError> {
        self.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM pending_uploads", [])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO pending_uploads (position, collection_id, path)
                     VALUES (?1, ?2, ?3)",
                )?;
                for (position, entry) in pending.iter().enumerate() {
                    stmt.execute(params![
                        position as i64,
                        entry.collection_id,
                        entry.path.to_string_lossy()
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}
