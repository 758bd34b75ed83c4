use crate::Database;
use crate::models::{ConversationRow, MessageRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, content, client_ref, created_at, updated_at, read";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, first_name, last_name, avatar_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, username, password_hash, first_name, last_name, avatar_url],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, client_ref, created_at, updated_at, read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    msg.id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.content,
                    msg.client_ref,
                    msg.created_at,
                    msg.updated_at,
                    msg.read
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    /// The message `sender_id` already stored under `client_ref`, if any.
    pub fn find_by_client_ref(&self, sender_id: &str, client_ref: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE sender_id = ?1 AND client_ref = ?2"
                ),
                [sender_id, client_ref],
                message_from_row,
            )
            .optional()
        })
    }

    /// Replaces the content and stamps `updated_at`. Returns the new row, or
    /// None when the message does not exist.
    pub fn update_message_content(
        &self,
        id: &str,
        content: &str,
        updated_at: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET content = ?2, updated_at = ?3 WHERE id = ?1",
                [id, content, updated_at],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])? > 0))
    }

    /// Every message between `user_id` and `other_id`, oldest first.
    pub fn get_transcript(&self, user_id: &str, other_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([user_id, other_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks everything `sender_id` sent to `reader_id` as read and returns
    /// the rows that changed.
    pub fn mark_read(&self, reader_id: &str, sender_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "UPDATE messages SET read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND read = 0
                 RETURNING {MESSAGE_COLUMNS}"
            ))?;
            let rows = stmt
                .query_map([reader_id, sender_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Removes every message between the two users. Returns the count.
    pub fn delete_conversation(&self, user_id: &str, other_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)",
                [user_id, other_id],
            )?;
            Ok(removed)
        })
    }

    /// One row per counterpart of `user_id`, most recent activity first.
    pub fn list_conversations(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "WITH ranked AS (
                    SELECT m.*,
                           CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END AS other_id,
                           ROW_NUMBER() OVER (
                               PARTITION BY CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
                               ORDER BY m.created_at DESC, m.rowid DESC
                           ) AS rn
                    FROM messages m
                    WHERE m.sender_id = ?1 OR m.receiver_id = ?1
                 )
                 SELECT r.id, r.sender_id, r.receiver_id, r.content, r.client_ref,
                        r.created_at, r.updated_at, r.read,
                        u.id, u.first_name, u.last_name, u.avatar_url
                 FROM ranked r
                 JOIN users u ON u.id = r.other_id
                 WHERE r.rn = 1
                 ORDER BY r.created_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationRow {
                        last_message: message_from_row(row)?,
                        other_user_id: row.get(8)?,
                        first_name: row.get(9)?,
                        last_name: row.get(10)?,
                        avatar_url: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, password, first_name, last_name, avatar_url, created_at
         FROM users WHERE {column} = ?1"
    ))?;

    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            username: row.get(1)?,
            password: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            avatar_url: row.get(5)?,
            created_at: row.get(6)?,
        })
    })
    .optional()
}

/// Reads the first eight columns in `MESSAGE_COLUMNS` order.
fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        client_ref: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        read: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
