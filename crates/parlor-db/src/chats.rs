use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::Chat;
use crate::schema::sql_timestamp;
use crate::{Database, Result};

/// How far back from the current wall-clock time
/// [`ChatRepository::query_by_user_id_and_time_range`] looks.
pub const CHAT_LOOKBACK: Duration = Duration::hours(24);

pub struct ChatRepository {
    db: Arc<Database>,
}

impl ChatRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn query_by_session_id(&self, session_id: i64) -> Result<Vec<Chat>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chats WHERE chat_session_id = ?1",
                Chat::COLUMNS
            ))?;

            let rows = stmt
                .query_map([session_id], Chat::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Messages written by `user_id` with `create_at` in
    /// `[now - CHAT_LOOKBACK, end_time]`.
    ///
    /// The lower bound is anchored to the time of the call, not to
    /// `end_time`. An `end_time` older than the lookback yields an empty
    /// window and therefore no rows.
    pub fn query_by_user_id_and_time_range(
        &self,
        user_id: i64,
        end_time: DateTime<Utc>,
    ) -> Result<Vec<Chat>> {
        let start_time = Utc::now() - CHAT_LOOKBACK;

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}
                 FROM chats
                 WHERE user_id = ?1
                   AND create_at >= ?2
                   AND create_at <= ?3",
                Chat::COLUMNS
            ))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![user_id, sql_timestamp(start_time), sql_timestamp(end_time)],
                    Chat::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn create(&self, session_id: i64, user_id: i64, content: &str) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (chat_session_id, user_id, content) VALUES (?1, ?2, ?3)",
                rusqlite::params![session_id, user_id, content],
            )?;
            let id = conn.last_insert_rowid();
            debug!(chat_id = id, session_id, user_id, "Stored chat message");
            Ok(id)
        })
    }

    /// Removes every message of the session.
    pub fn delete(&self, session_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM chats WHERE chat_session_id = ?1", [session_id])?;
            debug!(session_id, removed, "Removed session chats");
            Ok(())
        })
    }

    pub fn delete_by_session_and_user(&self, session_id: i64, user_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM chats WHERE chat_session_id = ?1 AND user_id = ?2",
                rusqlite::params![session_id, user_id],
            )?;
            debug!(session_id, user_id, removed, "Removed user chats from session");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (Arc<Database>, ChatRepository) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (db.clone(), ChatRepository::new(db))
    }

    fn backdate(db: &Database, chat_id: i64, age: Duration) {
        let ts = sql_timestamp(Utc::now() - age);
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE chats SET create_at = ?1 WHERE id = ?2",
                rusqlite::params![ts, chat_id],
            )?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn create_then_query_by_session() {
        let (_db, repo) = repo();
        let content = "héllo, \"world\"\nsecond line";
        let id = repo.create(4, 9, content).unwrap();
        repo.create(5, 9, "elsewhere").unwrap();

        let chats = repo.query_by_session_id(4).unwrap();
        assert_eq!(chats.len(), 1);
        let chat = &chats[0];
        assert_eq!(chat.id, id);
        assert_eq!(chat.session_id, 4);
        assert_eq!(chat.user_id, 9);
        assert_eq!(chat.content, content);
        assert!(!chat.deleted);
    }

    #[test]
    fn time_range_includes_recent_messages() {
        let (_db, repo) = repo();
        let id = repo.create(1, 9, "fresh").unwrap();
        repo.create(1, 10, "someone else").unwrap();

        let chats = repo
            .query_by_user_id_and_time_range(9, Utc::now() + Duration::minutes(1))
            .unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].id, id);
    }

    #[test]
    fn time_range_excludes_messages_older_than_lookback() {
        let (db, repo) = repo();
        let old = repo.create(1, 9, "stale").unwrap();
        let recent = repo.create(1, 9, "recent").unwrap();
        backdate(&db, old, Duration::hours(30));
        backdate(&db, recent, Duration::hours(2));

        let ids: Vec<i64> = repo
            .query_by_user_id_and_time_range(9, Utc::now())
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![recent]);
    }

    #[test]
    fn time_range_respects_end_time() {
        let (db, repo) = repo();
        let earlier = repo.create(1, 9, "earlier").unwrap();
        let later = repo.create(1, 9, "later").unwrap();
        backdate(&db, earlier, Duration::hours(5));
        backdate(&db, later, Duration::hours(1));

        let ids: Vec<i64> = repo
            .query_by_user_id_and_time_range(9, Utc::now() - Duration::hours(3))
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![earlier]);
    }

    #[test]
    fn far_future_end_time_includes_recent_messages() {
        let (_db, repo) = repo();
        let id = repo.create(1, 9, "fresh").unwrap();

        for end in [Utc::now() + Duration::days(365 * 9000), DateTime::<Utc>::MAX_UTC] {
            let chats = repo.query_by_user_id_and_time_range(9, end).unwrap();
            assert_eq!(chats.len(), 1);
            assert_eq!(chats[0].id, id);
        }
    }

    #[test]
    fn end_time_before_lookback_is_empty() {
        let (db, repo) = repo();
        let id = repo.create(1, 9, "two days ago").unwrap();
        backdate(&db, id, Duration::hours(48));

        // The window is [now - 24h, now - 36h]: inverted, so nothing matches
        // even though the message is older than end_time.
        let chats = repo
            .query_by_user_id_and_time_range(9, Utc::now() - Duration::hours(36))
            .unwrap();
        assert!(chats.is_empty());
    }

    #[test]
    fn delete_clears_session() {
        let (_db, repo) = repo();
        repo.create(1, 9, "a").unwrap();
        repo.create(1, 10, "b").unwrap();
        repo.create(2, 9, "c").unwrap();

        repo.delete(1).unwrap();

        assert!(repo.query_by_session_id(1).unwrap().is_empty());
        assert_eq!(repo.query_by_session_id(2).unwrap().len(), 1);
    }

    #[test]
    fn delete_by_session_and_user_keeps_others() {
        let (_db, repo) = repo();
        repo.create(1, 9, "mine").unwrap();
        repo.create(1, 9, "mine too").unwrap();
        repo.create(1, 10, "theirs").unwrap();
        repo.create(2, 9, "other session").unwrap();

        repo.delete_by_session_and_user(1, 9).unwrap();

        let left: Vec<String> = repo
            .query_by_session_id(1)
            .unwrap()
            .into_iter()
            .map(|c| c.content)
            .collect();
        assert_eq!(left, vec!["theirs"]);
        assert_eq!(repo.query_by_session_id(2).unwrap().len(), 1);
    }
}
