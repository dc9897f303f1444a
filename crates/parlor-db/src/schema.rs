use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Creates the chat tables if they are missing.
///
/// Timestamps are UTC text with millisecond precision so that plain text
/// comparison in `WHERE` clauses orders them correctly. There are no foreign
/// keys: removing a session leaves its participants and chats in place until
/// the caller deletes them too.
pub fn create(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            public_key  TEXT NOT NULL,
            name        TEXT NOT NULL,
            create_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            update_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            deleted     INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_chat_sessions_user
            ON chat_sessions(user_id);

        CREATE TABLE IF NOT EXISTS chat_session_participants (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_session_id  INTEGER NOT NULL,
            user_id          INTEGER NOT NULL,
            status           TEXT NOT NULL CHECK (status IN ('invited', 'joined', 'rejected')),
            create_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            update_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            deleted          INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_participants_session
            ON chat_session_participants(chat_session_id, user_id);

        CREATE TABLE IF NOT EXISTS chats (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_session_id  INTEGER NOT NULL,
            user_id          INTEGER NOT NULL,
            content          TEXT NOT NULL,
            create_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            update_at        TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            deleted          INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_chats_session
            ON chats(chat_session_id);

        CREATE INDEX IF NOT EXISTS idx_chats_user_time
            ON chats(user_id, create_at);
        ",
    )?;

    info!("Chat schema ready");
    Ok(())
}

/// Renders a timestamp in the same text layout the column defaults produce.
pub(crate) fn sql_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    use chrono::Datelike;

    // Outside four-digit years chrono adds a sign, which breaks text ordering.
    match ts.year() {
        y if y > 9999 => "9999-12-31 23:59:59.999".to_string(),
        y if y < 0 => "0000-01-01 00:00:00.000".to_string(),
        _ => ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create(&conn).unwrap();
        create(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('chat_sessions', 'chat_session_participants', 'chats')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn sql_timestamp_matches_column_default_layout() {
        let conn = Connection::open_in_memory().unwrap();
        let from_sqlite: String = conn
            .query_row("SELECT strftime('%Y-%m-%d %H:%M:%f', 'now')", [], |r| r.get(0))
            .unwrap();
        let ours = sql_timestamp(chrono::Utc::now());
        assert_eq!(from_sqlite.len(), ours.len());
        assert_eq!(&from_sqlite[10..11], &ours[10..11]);
    }

    #[test]
    fn sql_timestamp_clamps_years_outside_four_digits() {
        use chrono::{DateTime, Duration, TimeZone, Utc};

        let far = Utc::now() + Duration::days(365 * 9000);
        assert_eq!(sql_timestamp(far), "9999-12-31 23:59:59.999");
        assert_eq!(sql_timestamp(DateTime::<Utc>::MAX_UTC), "9999-12-31 23:59:59.999");
        assert_eq!(sql_timestamp(DateTime::<Utc>::MIN_UTC), "0000-01-01 00:00:00.000");

        let last = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(sql_timestamp(last), "9999-12-31 23:59:59.000");
        assert!(sql_timestamp(far) > sql_timestamp(Utc::now()));
    }

    #[test]
    fn participant_status_is_constrained() {
        let conn = Connection::open_in_memory().unwrap();
        create(&conn).unwrap();
        let res = conn.execute(
            "INSERT INTO chat_session_participants (chat_session_id, user_id, status)
             VALUES (1, 1, 'banned')",
            [],
        );
        assert!(res.is_err());
    }
}
