use std::sync::Arc;

use tracing::debug;

use crate::models::ChatSession;
use crate::{Database, Result};

pub struct ChatSessionRepository {
    db: Arc<Database>,
}

impl ChatSessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Sessions with the given id, in storage order. At most one row in
    /// practice, but callers get a `Vec`.
    pub fn query(&self, session_id: i64) -> Result<Vec<ChatSession>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chat_sessions WHERE id = ?1",
                ChatSession::COLUMNS
            ))?;

            let rows = stmt
                .query_map([session_id], ChatSession::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn query_by_user_id(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chat_sessions WHERE user_id = ?1",
                ChatSession::COLUMNS
            ))?;

            let rows = stmt
                .query_map([user_id], ChatSession::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Renames a session and bumps `update_at`. An unknown id is not an error.
    pub fn update_name(&self, id: i64, name: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE chat_sessions
                 SET name = ?1, update_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?2",
                rusqlite::params![name, id],
            )?;
            debug!(session_id = id, changed, "Renamed chat session");
            Ok(())
        })
    }

    /// Inserts a session and returns the id the database assigned.
    pub fn create(&self, user_id: i64, public_key: &str, name: &str) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_sessions (user_id, public_key, name) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id, public_key, name],
            )?;
            let id = conn.last_insert_rowid();
            debug!(session_id = id, user_id, "Created chat session");
            Ok(id)
        })
    }

    /// Removes the session row only. Participants and chats stay until
    /// deleted through their own repositories.
    pub fn delete(&self, session_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM chat_sessions WHERE id = ?1", [session_id])?;
            Ok(())
        })
    }
}
