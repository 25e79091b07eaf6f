use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::instrument;

use parley_core::ids::MessageIdGen;

use crate::error::{MemoryError, Result};
use crate::types::{Conversation, MessageInput, MessageRecord};
use crate::types::{CONTENT_TYPE_TEXT, ROLE_SYSTEM, ROLE_USER};

/// Row-oriented storage for conversations and messages.
///
/// Wraps a single SQLite connection in a `Mutex`; every operation is atomic
/// with respect to concurrent callers because it runs under that lock.
/// Message ids come from the process-wide snowflake generator, sequences
/// from `max(existing)+1` inside the same critical section.
pub struct ConversationStore {
    db: Mutex<Connection>,
    ids: Arc<MessageIdGen>,
}

impl ConversationStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection, ids: Arc<MessageIdGen>) -> Self {
        Self {
            db: Mutex::new(conn),
            ids,
        }
    }

    #[instrument(skip(self), fields(uuid, user_id))]
    pub fn create_conversation(&self, uuid: &str, user_id: &str, title: &str) -> Result<()> {
        let now = epoch_secs();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (uuid, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            rusqlite::params![uuid, user_id, title, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                MemoryError::Conflict {
                    conversation_id: uuid.to_string(),
                }
            }
            other => MemoryError::Database(other),
        })?;
        Ok(())
    }

    pub fn get_conversation(&self, uuid: &str) -> Result<Conversation> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT uuid, user_id, title, created_at, updated_at
             FROM conversations WHERE uuid = ?1",
            rusqlite::params![uuid],
            row_to_conversation,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => MemoryError::NotFound {
                conversation_id: uuid.to_string(),
            },
            other => MemoryError::Database(other),
        })
    }

    /// Most-recently-updated conversations for a user, plus the total count.
    #[instrument(skip(self), fields(user_id, offset, limit))]
    pub fn list_conversations(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Conversation>, i64)> {
        let db = self.db.lock().unwrap();
        let total: i64 = db.query_row(
            "SELECT COUNT(*) FROM conversations WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )?;
        let mut stmt = db.prepare(
            "SELECT uuid, user_id, title, created_at, updated_at
             FROM conversations
             WHERE user_id = ?1
             ORDER BY updated_at DESC, uuid
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![user_id, limit as i64, offset as i64],
            row_to_conversation,
        )?;
        Ok((rows.filter_map(|r| r.ok()).collect(), total))
    }

    /// Update the title and bump `updated_at`.
    #[instrument(skip(self, title), fields(uuid))]
    pub fn update_conversation_title(&self, uuid: &str, title: &str) -> Result<()> {
        let now = epoch_secs();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE uuid = ?3",
            rusqlite::params![title, now, uuid],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound {
                conversation_id: uuid.to_string(),
            });
        }
        Ok(())
    }

    pub fn delete_conversation(&self, uuid: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM conversations WHERE uuid = ?1",
            rusqlite::params![uuid],
        )?;
        Ok(())
    }

    /// Append a message row: allocates the id, assigns `sequence = max+1`,
    /// stamps `created_at`, and bumps the conversation's `updated_at` — all
    /// in one transaction under the connection lock.
    #[instrument(skip(self, input), fields(conversation_id))]
    pub fn append_message(
        &self,
        conversation_id: &str,
        input: &MessageInput,
    ) -> Result<MessageRecord> {
        let role = if input.role.is_empty() {
            ROLE_USER
        } else {
            input.role.as_str()
        };
        let content_type = if input.content_type.is_empty() {
            CONTENT_TYPE_TEXT
        } else {
            input.content_type.as_str()
        };
        let meta = if input.meta.is_empty() {
            None
        } else {
            Some(input.meta.as_str())
        };
        let id = self.ids.next();
        let now = epoch_secs();

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let exists: i64 = tx.query_row(
            "SELECT COUNT(*) FROM conversations WHERE uuid = ?1",
            rusqlite::params![conversation_id],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(MemoryError::NotFound {
                conversation_id: conversation_id.to_string(),
            });
        }
        let sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO messages
             (id, conversation_id, sequence, role, content_type, content, meta, is_summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id,
                conversation_id,
                sequence,
                role,
                content_type,
                input.content,
                meta,
                input.is_summary,
                now,
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE uuid = ?2",
            rusqlite::params![now, conversation_id],
        )?;
        tx.commit()?;

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_string(),
            sequence,
            role: role.to_string(),
            content_type: content_type.to_string(),
            content: input.content.clone(),
            meta: meta.map(String::from),
            is_summary: input.is_summary,
            created_at: now,
        })
    }

    /// Messages in sequence order, plus the total count.
    #[instrument(skip(self), fields(conversation_id, offset, limit))]
    pub fn list_messages(
        &self,
        conversation_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<MessageRecord>, i64)> {
        let db = self.db.lock().unwrap();
        let total: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
            |row| row.get(0),
        )?;
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, sequence, role, content_type, content,
                    meta, is_summary, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY sequence
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![conversation_id, limit as i64, offset as i64],
            row_to_message,
        )?;
        Ok((rows.filter_map(|r| r.ok()).collect(), total))
    }

    /// The last `n` non-summary rows, preceded by any summary rows whose
    /// sequence is at or below the earliest returned non-summary row.
    /// Ascending sequence order throughout.
    pub fn list_tail_messages(&self, conversation_id: &str, n: usize) -> Result<Vec<MessageRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, sequence, role, content_type, content,
                    meta, is_summary, created_at
             FROM messages
             WHERE conversation_id = ?1 AND is_summary = 0
             ORDER BY sequence DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id, n as i64], row_to_message)?;
        let mut tail: Vec<MessageRecord> = rows.filter_map(|r| r.ok()).collect();
        tail.reverse();

        // Summaries condense everything before the window, so any summary at
        // or below the window's first sequence still belongs to the prompt.
        let cutoff = tail.first().map(|m| m.sequence).unwrap_or(i64::MAX);
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, sequence, role, content_type, content,
                    meta, is_summary, created_at
             FROM messages
             WHERE conversation_id = ?1 AND is_summary = 1 AND sequence <= ?2
             ORDER BY sequence",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id, cutoff], row_to_message)?;
        let mut out: Vec<MessageRecord> = rows.filter_map(|r| r.ok()).collect();
        out.extend(tail);
        Ok(out)
    }

    /// The first `n` non-summary rows, oldest first. Title-synthesis context.
    pub fn list_head_messages(&self, conversation_id: &str, n: usize) -> Result<Vec<MessageRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, sequence, role, content_type, content,
                    meta, is_summary, created_at
             FROM messages
             WHERE conversation_id = ?1 AND is_summary = 0
             ORDER BY sequence
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id, n as i64], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Collapse every row at or below `through_sequence` into a single
    /// summary row that takes the lowest deleted sequence. The replaced rows
    /// (previous summaries included) are removed, keeping the invariant that
    /// a summary's sequence is below every remaining non-summary row.
    #[instrument(skip(self, content), fields(conversation_id, through_sequence))]
    pub fn replace_prefix_with_summary(
        &self,
        conversation_id: &str,
        content: &str,
        through_sequence: i64,
    ) -> Result<MessageRecord> {
        let id = self.ids.next();
        let now = epoch_secs();

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let sequence: i64 = tx
            .query_row(
                "SELECT MIN(sequence) FROM messages
                 WHERE conversation_id = ?1 AND sequence <= ?2",
                rusqlite::params![conversation_id, through_sequence],
                |row| row.get::<_, Option<i64>>(0),
            )?
            .ok_or_else(|| MemoryError::NotFound {
                conversation_id: conversation_id.to_string(),
            })?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1 AND sequence <= ?2",
            rusqlite::params![conversation_id, through_sequence],
        )?;
        tx.execute(
            "INSERT INTO messages
             (id, conversation_id, sequence, role, content_type, content, meta, is_summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 1, ?7)",
            rusqlite::params![
                id,
                conversation_id,
                sequence,
                ROLE_SYSTEM,
                CONTENT_TYPE_TEXT,
                content,
                now,
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE uuid = ?2",
            rusqlite::params![now, conversation_id],
        )?;
        tx.commit()?;

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_string(),
            sequence,
            role: ROLE_SYSTEM.to_string(),
            content_type: CONTENT_TYPE_TEXT.to_string(),
            content: content.to_string(),
            meta: None,
            is_summary: true,
            created_at: now,
        })
    }

    /// Delete all rows for a conversation; the conversation row stays.
    pub fn clear_messages(&self, conversation_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
        )?;
        Ok(())
    }
}

fn epoch_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        uuid: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sequence: row.get(2)?,
        role: row.get(3)?,
        content_type: row.get(4)?,
        content: row.get(5)?,
        meta: row.get(6)?,
        is_summary: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> ConversationStore {
        let conn = Connection::open_in_memory().expect("open sqlite");
        init_db(&conn).expect("init schema");
        ConversationStore::new(conn, Arc::new(MessageIdGen::new(0)))
    }

    fn text_input(content: &str, role: &str) -> MessageInput {
        MessageInput {
            role: role.to_string(),
            content: content.to_string(),
            ..MessageInput::default()
        }
    }

    #[test]
    fn create_then_get_roundtrips() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        let conv = s.get_conversation("c1").unwrap();
        assert_eq!(conv.user_id, "u1");
        assert_eq!(conv.title, "New");
    }

    #[test]
    fn duplicate_create_is_conflict() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        let err = s.create_conversation("c1", "u2", "New").unwrap_err();
        assert!(matches!(err, MemoryError::Conflict { .. }));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let s = store();
        let err = s.get_conversation("nope").unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }

    #[test]
    fn sequences_are_contiguous_from_one() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        for i in 0..5 {
            let msg = s
                .append_message("c1", &text_input(&format!("m{i}"), "user"))
                .unwrap();
            assert_eq!(msg.sequence, i + 1);
        }
        let (items, total) = s.list_messages("c1", 0, 100).unwrap();
        assert_eq!(total, 5);
        let seqs: Vec<i64> = items.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn append_to_unknown_conversation_is_not_found() {
        let s = store();
        let err = s.append_message("nope", &text_input("hi", "user")).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }

    #[test]
    fn append_bumps_conversation_updated_at() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        {
            let db = s.db.lock().unwrap();
            db.execute("UPDATE conversations SET updated_at = 0 WHERE uuid = 'c1'", [])
                .unwrap();
        }
        s.append_message("c1", &text_input("hi", "user")).unwrap();
        let conv = s.get_conversation("c1").unwrap();
        assert!(conv.updated_at > 0);
    }

    #[test]
    fn empty_role_and_content_type_get_defaults() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        let msg = s.append_message("c1", &text_input("hi", "")).unwrap();
        assert_eq!(msg.role, "user");
        assert_eq!(msg.content_type, "text");
    }

    #[test]
    fn list_conversations_orders_by_updated_at_desc() {
        let s = store();
        s.create_conversation("old", "u1", "New").unwrap();
        s.create_conversation("fresh", "u1", "New").unwrap();
        s.create_conversation("other", "u2", "New").unwrap();
        {
            let db = s.db.lock().unwrap();
            db.execute("UPDATE conversations SET updated_at = 10 WHERE uuid = 'old'", [])
                .unwrap();
            db.execute("UPDATE conversations SET updated_at = 20 WHERE uuid = 'fresh'", [])
                .unwrap();
        }
        let (items, total) = s.list_conversations("u1", 0, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(items[0].uuid, "fresh");
        assert_eq!(items[1].uuid, "old");
    }

    #[test]
    fn message_pagination_concatenates_to_full_sequence() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        for i in 0..7 {
            s.append_message("c1", &text_input(&format!("m{i}"), "user"))
                .unwrap();
        }
        let mut all = Vec::new();
        for page in 0..4 {
            let (items, total) = s.list_messages("c1", page * 2, 2).unwrap();
            assert_eq!(total, 7);
            all.extend(items);
        }
        let seqs: Vec<i64> = all.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn tail_returns_last_rows_ascending() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        for i in 0..6 {
            s.append_message("c1", &text_input(&format!("m{i}"), "user"))
                .unwrap();
        }
        let tail = s.list_tail_messages("c1", 3).unwrap();
        let seqs: Vec<i64> = tail.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
    }

    #[test]
    fn summary_replaces_prefix_and_keeps_low_sequence() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        for i in 0..6 {
            s.append_message("c1", &text_input(&format!("m{i}"), "user"))
                .unwrap();
        }
        let summary = s
            .replace_prefix_with_summary("c1", "the early part", 4)
            .unwrap();
        assert_eq!(summary.sequence, 1);
        assert!(summary.is_summary);

        let (items, total) = s.list_messages("c1", 0, 100).unwrap();
        assert_eq!(total, 3);
        let seqs: Vec<i64> = items.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 5, 6]);

        // next append continues from the surviving maximum
        let next = s.append_message("c1", &text_input("m6", "user")).unwrap();
        assert_eq!(next.sequence, 7);
    }

    #[test]
    fn tail_includes_summary_below_window() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        for i in 0..6 {
            s.append_message("c1", &text_input(&format!("m{i}"), "user"))
                .unwrap();
        }
        s.replace_prefix_with_summary("c1", "older turns", 4).unwrap();
        let tail = s.list_tail_messages("c1", 10).unwrap();
        assert!(tail[0].is_summary);
        assert_eq!(tail[0].content, "older turns");
        let seqs: Vec<i64> = tail.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 5, 6]);
    }

    #[test]
    fn appended_summary_rows_are_listed_but_not_in_the_tail() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        s.append_message("c1", &text_input("hi", "user")).unwrap();
        let summary = s
            .append_message(
                "c1",
                &MessageInput {
                    role: "system".to_string(),
                    content: "recap".to_string(),
                    is_summary: true,
                    ..MessageInput::default()
                },
            )
            .unwrap();
        assert!(summary.is_summary);
        assert_eq!(summary.sequence, 2);

        let (items, total) = s.list_messages("c1", 0, 10).unwrap();
        assert_eq!(total, 2);
        assert!(items[1].is_summary);

        // a summary appended above the window's first row is not part of it
        let tail = s.list_tail_messages("c1", 10).unwrap();
        assert_eq!(tail.len(), 1);
        assert!(!tail[0].is_summary);
    }

    #[test]
    fn clear_preserves_conversation_row() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        s.append_message("c1", &text_input("hi", "user")).unwrap();
        s.clear_messages("c1").unwrap();
        let (_, total) = s.list_messages("c1", 0, 10).unwrap();
        assert_eq!(total, 0);
        assert!(s.get_conversation("c1").is_ok());
    }

    #[test]
    fn delete_removes_conversation_row() {
        let s = store();
        s.create_conversation("c1", "u1", "New").unwrap();
        s.delete_conversation("c1").unwrap();
        assert!(matches!(
            s.get_conversation("c1").unwrap_err(),
            MemoryError::NotFound { .. }
        ));
    }
}
