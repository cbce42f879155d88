//! Durable conversation and message stores (SQLite).
//!
//! One conversation per customer, enforced by a UNIQUE constraint so the
//! get-or-create race resolves at the storage layer. A message insert and
//! the parent conversation's aggregate update (`last_message`,
//! `last_message_at`, `unread_count`) commit in one transaction; the
//! aggregate can never reflect an uncommitted or stale message.

use crate::error::ChatError;
use crate::identity::ADMIN_SENDER;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// How long a connection waits on a competing writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The aggregate per-customer support thread.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub customer_id: String,
    /// Denormalized text of the most recent message, if any.
    pub last_message: Option<String>,
    pub last_message_at: DateTime<Utc>,
    /// Customer messages not yet acknowledged by an admin mark-read.
    pub unread_count: u32,
    pub is_resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// One utterance within a conversation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    /// Owning customer's id, or the `"admin"` sentinel.
    pub sender: String,
    pub text: String,
    pub read_by_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn from_customer(&self) -> bool {
        self.sender != ADMIN_SENDER
    }
}

/// SQLite-backed store for conversations and their messages.
pub struct SupportStore {
    db_path: PathBuf,
}

impl SupportStore {
    /// Open (and bootstrap) the store under the given data directory.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            db_path: data_dir.join("support.db"),
        }
    }

    /// Existing conversation for the customer, or a fresh one with
    /// default fields. Idempotent under concurrent calls: the UNIQUE
    /// constraint on `customer_id` makes the insert a no-op for losers
    /// of the race, and both callers fetch the winner.
    pub fn get_or_create_conversation(&self, customer_id: &str) -> Result<Conversation, ChatError> {
        let customer_id = customer_id.trim();
        if customer_id.is_empty() {
            return Err(ChatError::Validation(
                "customer id must not be empty".into(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conversation = self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, customer_id, last_message, last_message_at, unread_count, is_resolved, created_at)
                 VALUES (?1, ?2, NULL, ?3, 0, 0, ?3)
                 ON CONFLICT(customer_id) DO NOTHING",
                params![id, customer_id, now],
            )
            .context("Failed to insert conversation")?;

            let mut stmt = conn.prepare(
                "SELECT id, customer_id, last_message, last_message_at, unread_count, is_resolved, created_at
                 FROM conversations WHERE customer_id = ?1",
            )?;
            let conversation = stmt
                .query_row(params![customer_id], map_conversation_row)
                .context("Conversation vanished after get-or-create")?;
            Ok(conversation)
        })?;
        Ok(conversation)
    }

    pub fn conversation_by_id(&self, id: &str) -> Result<Option<Conversation>, ChatError> {
        let conversation = self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, customer_id, last_message, last_message_at, unread_count, is_resolved, created_at
                 FROM conversations WHERE id = ?1",
            )?;
            let row = stmt
                .query_row(params![id], map_conversation_row)
                .optional()?;
            Ok(row)
        })?;
        Ok(conversation)
    }

    /// All conversations, most recently active first (admin-only view).
    pub fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let conversations = self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, customer_id, last_message, last_message_at, unread_count, is_resolved, created_at
                 FROM conversations ORDER BY last_message_at DESC, id ASC",
            )?;
            let rows = stmt.query_map([], map_conversation_row)?;
            let mut conversations = Vec::new();
            for row in rows {
                conversations.push(row?);
            }
            Ok(conversations)
        })?;
        Ok(conversations)
    }

    /// Append a message and apply the conversation aggregate update in a
    /// single transaction. A customer-authored message increments the
    /// unread count and reopens a resolved conversation; an admin message
    /// touches neither. Returns the committed message and the updated
    /// conversation.
    pub fn append_message(
        &self,
        conversation_id: &str,
        sender: &str,
        text: &str,
    ) -> Result<(Message, Conversation), ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::Validation(
                "message text must not be empty".into(),
            ));
        }

        let from_customer = sender != ADMIN_SENDER;
        let message_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let created_at_raw = created_at.to_rfc3339();

        let result = self.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;

            // The aggregate update doubles as the existence probe; it must
            // run before the insert or the foreign key fires first.
            let changed = tx
                .execute(
                    "UPDATE conversations
                     SET last_message = ?1,
                         last_message_at = ?2,
                         unread_count = unread_count + ?3,
                         is_resolved = CASE WHEN ?4 THEN 0 ELSE is_resolved END
                     WHERE id = ?5",
                    params![text, created_at_raw, i64::from(from_customer), from_customer, conversation_id],
                )
                .context("Failed to update conversation aggregate")?;
            if changed == 0 {
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender, text, read_by_admin, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![message_id, conversation_id, sender, text, created_at_raw],
            )
            .context("Failed to insert message")?;

            let mut stmt = tx.prepare(
                "SELECT id, customer_id, last_message, last_message_at, unread_count, is_resolved, created_at
                 FROM conversations WHERE id = ?1",
            )?;
            let conversation = stmt.query_row(params![conversation_id], map_conversation_row)?;
            drop(stmt);

            tx.commit().context("Failed to commit message append")?;
            Ok(Some(conversation))
        })?;

        let Some(conversation) = result else {
            return Err(ChatError::NotFound("conversation"));
        };

        let message = Message {
            id: message_id,
            conversation_id: conversation_id.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
            read_by_admin: false,
            created_at,
        };
        Ok((message, conversation))
    }

    /// Messages of a conversation in commit order: `created_at` ascending
    /// with insert order as the tiebreak inside one clock tick.
    pub fn messages_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let messages = self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, sender, text, read_by_admin, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![conversation_id], map_message_row)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })?;
        Ok(messages)
    }

    /// Reset the unread count and flag every customer-authored message as
    /// read by the admin pool. Idempotent.
    pub fn mark_read(&self, conversation_id: &str) -> Result<Conversation, ChatError> {
        let result = self.with_connection(|conn| {
            let tx = conn.unchecked_transaction()?;

            let changed = tx
                .execute(
                    "UPDATE conversations SET unread_count = 0 WHERE id = ?1",
                    params![conversation_id],
                )
                .context("Failed to reset unread count")?;
            if changed == 0 {
                return Ok(None);
            }

            tx.execute(
                "UPDATE messages SET read_by_admin = 1
                 WHERE conversation_id = ?1 AND sender != ?2",
                params![conversation_id, ADMIN_SENDER],
            )
            .context("Failed to flag customer messages as read")?;

            let mut stmt = tx.prepare(
                "SELECT id, customer_id, last_message, last_message_at, unread_count, is_resolved, created_at
                 FROM conversations WHERE id = ?1",
            )?;
            let conversation = stmt.query_row(params![conversation_id], map_conversation_row)?;
            drop(stmt);

            tx.commit().context("Failed to commit mark-read")?;
            Ok(Some(conversation))
        })?;

        result.ok_or(ChatError::NotFound("conversation"))
    }

    /// Toggle the resolution flag. Pure state transition, no message
    /// side effect, re-enterable.
    pub fn set_resolved(
        &self,
        conversation_id: &str,
        resolved: bool,
    ) -> Result<Conversation, ChatError> {
        let result = self.with_connection(|conn| {
            let changed = conn
                .execute(
                    "UPDATE conversations SET is_resolved = ?1 WHERE id = ?2",
                    params![resolved, conversation_id],
                )
                .context("Failed to update resolution flag")?;
            if changed == 0 {
                return Ok(None);
            }

            let mut stmt = conn.prepare(
                "SELECT id, customer_id, last_message, last_message_at, unread_count, is_resolved, created_at
                 FROM conversations WHERE id = ?1",
            )?;
            let conversation = stmt.query_row(params![conversation_id], map_conversation_row)?;
            Ok(Some(conversation))
        })?;

        result.ok_or(ChatError::NotFound("conversation"))
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open support DB: {}", self.db_path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS conversations (
                id              TEXT PRIMARY KEY,
                customer_id     TEXT NOT NULL UNIQUE,
                last_message    TEXT,
                last_message_at TEXT NOT NULL,
                unread_count    INTEGER NOT NULL DEFAULT 0,
                is_resolved     INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_last_message_at
                ON conversations(last_message_at);

            CREATE TABLE IF NOT EXISTS messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender          TEXT NOT NULL,
                text            TEXT NOT NULL,
                read_by_admin   INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);",
        )
        .context("Failed to initialize support schema")?;

        f(&conn)
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid RFC3339 timestamp in support DB: {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}

fn sql_conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(err.into())
}

fn map_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let last_message_at_raw: String = row.get(3)?;
    let created_at_raw: String = row.get(6)?;
    Ok(Conversation {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        last_message: row.get(2)?,
        last_message_at: parse_rfc3339(&last_message_at_raw).map_err(sql_conversion_error)?,
        unread_count: row.get(4)?,
        is_resolved: row.get::<_, i64>(5)? != 0,
        created_at: parse_rfc3339(&created_at_raw).map_err(sql_conversion_error)?,
    })
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let created_at_raw: String = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: row.get(2)?,
        text: row.get(3)?,
        read_by_admin: row.get::<_, i64>(4)? != 0,
        created_at: parse_rfc3339(&created_at_raw).map_err(sql_conversion_error)?,
    })
}
