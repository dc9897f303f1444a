use std::sync::Arc;

use tracing::debug;

use crate::models::{ChatSessionParticipant, ParticipantStatus};
use crate::{Database, Result};

/// Session membership rows.
///
/// Note the keying: [`delete`](Self::delete) works on a whole session while
/// [`update_status`](Self::update_status) targets a single participant row id.
pub struct ChatSessionParticipantRepository {
    db: Arc<Database>,
}

impl ChatSessionParticipantRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn query_by_session_id(&self, session_id: i64) -> Result<Vec<ChatSessionParticipant>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chat_session_participants WHERE chat_session_id = ?1",
                ChatSessionParticipant::COLUMNS
            ))?;

            let rows = stmt
                .query_map([session_id], ChatSessionParticipant::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Single-row fetch. No match comes back as the driver's
    /// `QueryReturnedNoRows`; check with [`DbError::is_not_found`](crate::DbError::is_not_found).
    pub fn query_by_session_and_user(
        &self,
        session_id: i64,
        user_id: i64,
    ) -> Result<ChatSessionParticipant> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chat_session_participants WHERE chat_session_id = ?1 AND user_id = ?2",
                ChatSessionParticipant::COLUMNS
            ))?;

            let row = stmt.query_row(
                rusqlite::params![session_id, user_id],
                ChatSessionParticipant::from_row,
            )?;

            Ok(row)
        })
    }

    pub fn create(&self, session_id: i64, user_id: i64, status: ParticipantStatus) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_session_participants (chat_session_id, user_id, status)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![session_id, user_id, status.as_str()],
            )?;
            let id = conn.last_insert_rowid();
            debug!(participant_id = id, session_id, user_id, %status, "Added participant");
            Ok(id)
        })
    }

    /// Removes every participant of the session, not a single participant.
    pub fn delete(&self, session_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM chat_session_participants WHERE chat_session_id = ?1",
                [session_id],
            )?;
            debug!(session_id, removed, "Removed session participants");
            Ok(())
        })
    }

    /// Sets the status of one participant row, addressed by its own id.
    /// `update_at` is left as is.
    pub fn update_status(&self, id: i64, status: ParticipantStatus) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE chat_session_participants SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )?;
            Ok(())
        })
    }
}
