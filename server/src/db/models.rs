/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use serde::Serialize;

/// Row in the chat_messages table.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChatMessageRow {
    pub id: i64,
    pub sender_id: u64,
    pub receiver_id: u64,
    pub content: String,
    pub created_at: String,
}

/// Row in the users table, as listed to chat clients.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserRow {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub student_group: String,
}
