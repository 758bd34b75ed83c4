/// Database row types, mapped directly from SQLite rows.
/// Distinct from jobchat-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub client_ref: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub read: bool,
}

/// Latest message with one counterpart, joined with the counterpart's profile.
pub struct ConversationRow {
    pub other_user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
    pub last_message: MessageRow,
}
