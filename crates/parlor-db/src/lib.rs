pub mod chats;
pub mod models;
pub mod participants;
pub mod schema;
pub mod sessions;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub use chats::ChatRepository;
pub use models::{Chat, ChatSession, ChatSessionParticipant, ParticipantStatus};
pub use participants::ChatSessionParticipantRepository;
pub use sessions::ChatSessionRepository;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Driver errors are passed through untouched, including row decode
    /// failures and `QueryReturnedNoRows` from single-row fetches.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("DB lock poisoned: {0}")]
    LockPoisoned(String),
}

impl DbError {
    /// True when a single-row fetch matched nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Shared database handle. Build one per process and hand it to every
/// repository wrapped in an `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        schema::create(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Round trip to SQLite, for health checks.
    pub fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
            Ok(())
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| DbError::LockPoisoned(e.to_string()))?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_on_disk_bootstraps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        let db = Database::open(&path).unwrap();
        db.ping().unwrap();
        let sessions = ChatSessionRepository::new(std::sync::Arc::new(db));
        let id = sessions.create(1, "pk", "on disk").unwrap();
        assert_eq!(sessions.query(id).unwrap().len(), 1);
    }

    #[test]
    fn not_found_only_for_missing_rows() {
        assert!(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows).is_not_found());
        assert!(!DbError::LockPoisoned("x".into()).is_not_found());
    }
}
