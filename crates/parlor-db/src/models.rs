//! Database row types. Every table carries a `deleted` flag that is read
//! back on each scan but never written by any repository: deletes are hard
//! deletes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    pub user_id: i64,
    pub public_key: String,
    pub name: String,
    pub create_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub deleted: bool,
}

impl ChatSession {
    pub(crate) const COLUMNS: &'static str =
        "id, user_id, public_key, name, create_at, update_at, deleted";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            public_key: row.get(2)?,
            name: row.get(3)?,
            create_at: row.get(4)?,
            update_at: row.get(5)?,
            deleted: row.get(6)?,
        })
    }
}

/// Where a user stands with respect to a session invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Invited,
    Joined,
    Rejected,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Invited => "invited",
            ParticipantStatus::Joined => "joined",
            ParticipantStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown participant status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ParticipantStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invited" => Ok(ParticipantStatus::Invited),
            "joined" => Ok(ParticipantStatus::Joined),
            "rejected" => Ok(ParticipantStatus::Rejected),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSessionParticipant {
    pub id: i64,
    pub session_id: i64,
    pub user_id: i64,
    pub status: ParticipantStatus,
    pub create_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub deleted: bool,
}

impl ChatSessionParticipant {
    pub(crate) const COLUMNS: &'static str =
        "id, chat_session_id, user_id, status, create_at, update_at, deleted";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get(3)?;
        let status = status.parse::<ParticipantStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            status,
            create_at: row.get(4)?,
            update_at: row.get(5)?,
            deleted: row.get(6)?,
        })
    }
}

/// A single chat message. Content is never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub session_id: i64,
    pub user_id: i64,
    pub content: String,
    pub create_at: DateTime<Utc>,
    pub update_at: DateTime<Utc>,
    pub deleted: bool,
}

impl Chat {
    pub(crate) const COLUMNS: &'static str =
        "id, chat_session_id, user_id, content, create_at, update_at, deleted";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            user_id: row.get(2)?,
            content: row.get(3)?,
            create_at: row.get(4)?,
            update_at: row.get(5)?,
            deleted: row.get(6)?,
        })
    }
}
