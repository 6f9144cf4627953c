//! Persistence seam for the hub: display-name lookup, message writes and
//! conversation history reads.
//!
//! The trait is synchronous like rusqlite itself; async callers wrap each
//! call in `tokio::task::spawn_blocking`.

use rusqlite::OptionalExtension;

use crate::db::models::{ChatMessageRow, UserRow};
use crate::db::DbPool;
use crate::hub::{RoutedMessage, UserId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user {0} not found")]
    UserNotFound(UserId),
    #[error("id {0} is out of range for storage")]
    IdOutOfRange(UserId),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Storage operations the hub depends on.
pub trait ChatStore: Send + Sync + 'static {
    /// Resolve a user's display name.
    fn display_name(&self, user_id: UserId) -> Result<String, StoreError>;

    /// Write one message record, returning its row id.
    fn save_message(&self, message: &RoutedMessage) -> Result<i64, StoreError>;

    /// All messages exchanged between two users, oldest first.
    /// A `companion` of 0 selects the broadcast channel.
    fn conversation(
        &self,
        user_id: UserId,
        companion: UserId,
    ) -> Result<Vec<ChatMessageRow>, StoreError>;

    /// Every user, by id. Clients pick chat companions from this list.
    fn list_users(&self) -> Result<Vec<UserRow>, StoreError>;
}

/// `ChatStore` backed by the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Insert a user row. The admin panel owns user management; this is for
    /// seeding and tests.
    pub fn create_user(&self, name: &str, email: &str, role: &str) -> Result<UserId, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO users (name, email, role) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, email, role],
        )?;
        Ok(conn.last_insert_rowid() as UserId)
    }
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessageRow> {
    let sender_id: i64 = row.get(1)?;
    let receiver_id: i64 = row.get(2)?;
    Ok(ChatMessageRow {
        id: row.get(0)?,
        sender_id: sender_id as UserId,
        receiver_id: receiver_id as UserId,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn to_sql_id(id: UserId) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::IdOutOfRange(id))
}

impl ChatStore for SqliteStore {
    fn display_name(&self, user_id: UserId) -> Result<String, StoreError> {
        let id = to_sql_id(user_id)?;
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.query_row(
            "SELECT name FROM users WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or(StoreError::UserNotFound(user_id))
    }

    fn save_message(&self, message: &RoutedMessage) -> Result<i64, StoreError> {
        let sender = to_sql_id(message.sender_id)?;
        let receiver = to_sql_id(message.recipient.as_id())?;
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "INSERT INTO chat_messages (sender_id, receiver_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                sender,
                receiver,
                message.text,
                message.timestamp()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn conversation(
        &self,
        user_id: UserId,
        companion: UserId,
    ) -> Result<Vec<ChatMessageRow>, StoreError> {
        let me = to_sql_id(user_id)?;
        let other = to_sql_id(companion)?;
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;

        let rows = if companion == 0 {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM chat_messages
                 WHERE receiver_id = 0
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([], message_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, content, created_at
                 FROM chat_messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![me, other], message_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        Ok(rows)
    }

    fn list_users(&self) -> Result<Vec<UserRow>, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut stmt = conn.prepare(
            "SELECT id, name, email, role, student_group FROM users ORDER BY id ASC",
        )?;
        let users = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                Ok(UserRow {
                    id: id as UserId,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    role: row.get(3)?,
                    student_group: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}
