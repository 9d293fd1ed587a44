// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bulk access to the helpdesk's own database.
//!
//! The REST API cannot create thousands of contacts or messages at a
//! useful rate, so the reconciliation engine writes these tables directly.
//! Every statement is scoped to one account (and inbox where relevant).
//! Lookups over caller-provided key lists are chunked to stay under the
//! bound-parameter limit.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use deskbridge_config::model::{HelpdeskConfig, PolicyConfig};
use deskbridge_core::traits::helpdesk::ConversationStatus;
use deskbridge_core::types::{ChatForeignKeys, MessageInsertRecord, PhoneTimestampRecord};
use deskbridge_core::DeskbridgeError;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::{debug, info};

use crate::schema::SCHEMA_SQL;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const DEFAULT_CHUNK: usize = 500;
/// Rows per multi-row INSERT; 12 parameters each.
const INSERT_ROWS: usize = 100;

fn ts(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

fn now() -> String {
    ts(Utc::now())
}

fn marks(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn map_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> DeskbridgeError {
    DeskbridgeError::Storage {
        source: Box::new(e),
    }
}

/// A helpdesk contact row as seen by the contact sync.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingContact {
    pub id: i64,
    pub identifier: String,
    pub name: String,
    pub phone_number: Option<String>,
}

/// A contact to insert, or whose name to reconcile.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactRow {
    pub identifier: String,
    pub name: String,
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarCandidate {
    pub contact_id: i64,
    pub identifier: String,
}

/// Helpdesk ids of a message found by its source id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncedMessage {
    pub message_id: i64,
    pub conversation_id: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub contacts: u64,
    pub contact_inboxes: u64,
    pub conversations: u64,
    pub messages: u64,
}

/// Which existing conversation a chat's messages go to, and the status of
/// a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationPolicy {
    pub auto_reopen: bool,
    pub new_status: ConversationStatus,
}

impl ConversationPolicy {
    pub fn from_config(policy: &PolicyConfig) -> Self {
        let new_status = if policy.import_as_resolved {
            ConversationStatus::Resolved
        } else if policy.start_pending {
            ConversationStatus::Pending
        } else {
            ConversationStatus::Open
        };
        Self {
            auto_reopen: policy.auto_reopen,
            new_status,
        }
    }

    /// Resolved conversations are reused too. Needed when imports are
    /// created resolved, or every re-sync would open another one.
    pub fn reuse_any(&self) -> bool {
        self.auto_reopen || self.new_status == ConversationStatus::Resolved
    }
}

impl Default for ConversationPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

/// Handle to the helpdesk database, scoped to one account and inbox.
#[derive(Clone)]
pub struct HelpdeskDb {
    conn: tokio_rusqlite::Connection,
    account_id: i64,
    inbox_id: i64,
    chunk_size: usize,
}

impl HelpdeskDb {
    pub async fn open(path: &str, account_id: i64, inbox_id: i64) -> Result<Self, DeskbridgeError> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| DeskbridgeError::Storage {
                source: Box::new(e),
            })?;
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await
        .map_err(map_err)?;
        debug!(path, account_id, inbox_id, "helpdesk database opened");
        Ok(Self {
            conn,
            account_id,
            inbox_id,
            chunk_size: DEFAULT_CHUNK,
        })
    }

    /// Open the database named by `[helpdesk]`. A missing path is a
    /// configuration error.
    pub async fn from_config(config: &HelpdeskConfig) -> Result<Self, DeskbridgeError> {
        let path = config.database_path.as_deref().ok_or_else(|| {
            DeskbridgeError::Config("helpdesk.database_path is required for sync".into())
        })?;
        Self::open(path, config.account_id, config.inbox_id).await
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn inbox_id(&self) -> i64 {
        self.inbox_id
    }

    /// Create the helpdesk tables if absent. Development and tests only.
    pub async fn provision(&self) -> Result<(), DeskbridgeError> {
        self.conn
            .call(|conn| conn.execute_batch(SCHEMA_SQL))
            .await
            .map_err(map_err)?;
        info!("helpdesk schema provisioned");
        Ok(())
    }

    /// Fail with a configuration error unless every helpdesk table exists.
    ///
    /// Run before a sync writes anything.
    pub async fn verify(&self) -> Result<(), DeskbridgeError> {
        if self.inbox_id <= 0 || self.account_id <= 0 {
            return Err(DeskbridgeError::Config(format!(
                "helpdesk account {} / inbox {} is not a valid target",
                self.account_id, self.inbox_id
            )));
        }
        let missing: Vec<String> = self
            .conn
            .call(|conn| {
                let mut missing = Vec::new();
                for table in ["contacts", "contact_inboxes", "conversations", "messages"] {
                    let found: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                        [table],
                        |row| row.get(0),
                    )?;
                    if found == 0 {
                        missing.push(table.to_string());
                    }
                }
                Ok(missing)
            })
            .await
            .map_err(map_err)?;
        if !missing.is_empty() {
            return Err(DeskbridgeError::Config(format!(
                "helpdesk database lacks tables: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Contacts of this account whose identifier is in `identifiers`.
    pub async fn existing_contacts(
        &self,
        identifiers: Vec<String>,
    ) -> Result<HashMap<String, ExistingContact>, DeskbridgeError> {
        let (account, chunk) = (self.account_id, self.chunk_size);
        self.conn
            .call(move |conn| {
                let mut out = HashMap::with_capacity(identifiers.len());
                for part in identifiers.chunks(chunk) {
                    let sql = format!(
                        "SELECT id, identifier, name, phone_number FROM contacts
                         WHERE account_id = ? AND identifier IN ({})",
                        marks(part.len())
                    );
                    let mut values = vec![Value::Integer(account)];
                    values.extend(part.iter().cloned().map(Value::Text));
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(values), |row| {
                        Ok(ExistingContact {
                            id: row.get(0)?,
                            identifier: row.get(1)?,
                            name: row.get(2)?,
                            phone_number: row.get(3)?,
                        })
                    })?;
                    for row in rows {
                        let contact = row?;
                        out.insert(contact.identifier.clone(), contact);
                    }
                }
                Ok(out)
            })
            .await
            .map_err(map_err)
    }

    /// Insert new contacts and link them to the inbox.
    ///
    /// Rows whose identifier already exists are left untouched. Returns the
    /// number of contacts actually inserted.
    pub async fn insert_contacts(&self, rows: Vec<ContactRow>) -> Result<usize, DeskbridgeError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let (account, inbox) = (self.account_id, self.inbox_id);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stamp = now();
                let mut inserted = 0;
                for part in rows.chunks(INSERT_ROWS) {
                    let sql = format!(
                        "INSERT INTO contacts
                         (account_id, name, phone_number, identifier, created_at, updated_at)
                         VALUES {}
                         ON CONFLICT(identifier, account_id) DO NOTHING",
                        vec!["(?, ?, ?, ?, ?, ?)"; part.len()].join(", ")
                    );
                    let mut values = Vec::with_capacity(part.len() * 6);
                    for row in part {
                        values.push(Value::Integer(account));
                        values.push(Value::Text(row.name.clone()));
                        values.push(row.phone_number.clone().map_or(Value::Null, Value::Text));
                        values.push(Value::Text(row.identifier.clone()));
                        values.push(Value::Text(stamp.clone()));
                        values.push(Value::Text(stamp.clone()));
                    }
                    inserted += tx.execute(&sql, params_from_iter(values))?;

                    let link = format!(
                        "INSERT INTO contact_inboxes (contact_id, inbox_id, source_id, created_at, updated_at)
                         SELECT id, ?, identifier, ?, ? FROM contacts
                         WHERE account_id = ? AND identifier IN ({})
                         ON CONFLICT(inbox_id, source_id) DO NOTHING",
                        marks(part.len())
                    );
                    let mut values = vec![
                        Value::Integer(inbox),
                        Value::Text(stamp.clone()),
                        Value::Text(stamp.clone()),
                        Value::Integer(account),
                    ];
                    values.extend(part.iter().map(|r| Value::Text(r.identifier.clone())));
                    tx.execute(&link, params_from_iter(values))?;
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await
            .map_err(map_err)
    }

    /// Overwrite contact names, but only where the helpdesk name is still a
    /// placeholder (empty, the phone number, or the raw identifier).
    ///
    /// Names edited by a human are never clobbered. Returns rows changed.
    pub async fn update_contact_names(&self, rows: Vec<ContactRow>) -> Result<usize, DeskbridgeError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let account = self.account_id;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stamp = now();
                let mut updated = 0;
                for part in rows.chunks(INSERT_ROWS) {
                    let sql = format!(
                        "UPDATE contacts SET name = v.column2, updated_at = ?
                         FROM (VALUES {}) AS v
                         WHERE contacts.account_id = ?
                           AND contacts.identifier = v.column1
                           AND contacts.name <> v.column2
                           AND (contacts.name IS NULL
                                OR contacts.name = ''
                                OR contacts.name = contacts.phone_number
                                OR contacts.name = ltrim(contacts.phone_number, '+')
                                OR contacts.name = contacts.identifier)",
                        vec!["(?, ?)"; part.len()].join(", ")
                    );
                    let mut values = vec![Value::Text(stamp.clone())];
                    for row in part {
                        values.push(Value::Text(row.identifier.clone()));
                        values.push(Value::Text(row.name.clone()));
                    }
                    values.push(Value::Integer(account));
                    updated += tx.execute(&sql, params_from_iter(values))?;
                }
                tx.commit()?;
                Ok(updated)
            })
            .await
            .map_err(map_err)
    }

    /// The subset of `source_ids` already present on a message of this account.
    pub async fn existing_source_ids(
        &self,
        source_ids: Vec<String>,
    ) -> Result<HashSet<String>, DeskbridgeError> {
        let (account, chunk) = (self.account_id, self.chunk_size);
        self.conn
            .call(move |conn| {
                let mut found = HashSet::new();
                for part in source_ids.chunks(chunk) {
                    let sql = format!(
                        "SELECT DISTINCT source_id FROM messages
                         WHERE account_id = ? AND source_id IN ({})",
                        marks(part.len())
                    );
                    let mut values = vec![Value::Integer(account)];
                    values.extend(part.iter().cloned().map(Value::Text));
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;
                    for row in rows {
                        found.insert(row?);
                    }
                }
                Ok(found)
            })
            .await
            .map_err(map_err)
    }

    /// Create or resolve the contact and conversation of every chat.
    ///
    /// Runs as one transaction of four set-based steps, each depending on
    /// the rows of the previous one: contacts, contact inboxes,
    /// conversations, then the foreign-key lookup. Keyed by
    /// `remote_identifier`.
    pub async fn upsert_chats(
        &self,
        chats: Vec<PhoneTimestampRecord>,
        policy: ConversationPolicy,
    ) -> Result<HashMap<String, ChatForeignKeys>, DeskbridgeError> {
        if chats.is_empty() {
            return Ok(HashMap::new());
        }
        let (account, inbox) = (self.account_id, self.inbox_id);
        let status = policy.new_status.code();
        let reuse_any = policy.reuse_any();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stamp = now();

                tx.execute_batch(
                    "CREATE TEMP TABLE IF NOT EXISTS sync_chats (
                         identifier    TEXT PRIMARY KEY,
                         name          TEXT NOT NULL,
                         phone_number  TEXT,
                         first_seen    TEXT NOT NULL,
                         last_seen     TEXT NOT NULL
                     );
                     DELETE FROM sync_chats;",
                )?;
                {
                    let mut stage = tx.prepare(
                        "INSERT OR REPLACE INTO sync_chats VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for chat in &chats {
                        let phone = (!chat.is_group).then(|| format!("+{}", chat.phone_or_group_id));
                        stage.execute(rusqlite::params![
                            chat.remote_identifier,
                            chat.display_name,
                            phone,
                            ts(chat.first_seen_at),
                            ts(chat.last_seen_at),
                        ])?;
                    }
                }

                let contacts = tx.execute(
                    "INSERT INTO contacts (account_id, name, phone_number, identifier, created_at, updated_at)
                     SELECT ?1, name, phone_number, identifier, ?2, ?2 FROM sync_chats WHERE true
                     ON CONFLICT(identifier, account_id) DO NOTHING",
                    rusqlite::params![account, stamp],
                )?;

                tx.execute(
                    "INSERT INTO contact_inboxes (contact_id, inbox_id, source_id, created_at, updated_at)
                     SELECT c.id, ?1, c.identifier, ?2, ?2
                     FROM sync_chats s
                     JOIN contacts c ON c.identifier = s.identifier AND c.account_id = ?3
                     WHERE true
                     ON CONFLICT(inbox_id, source_id) DO NOTHING",
                    rusqlite::params![inbox, stamp, account],
                )?;

                let conversations = tx.execute(
                    "INSERT INTO conversations
                     (account_id, inbox_id, contact_id, contact_inbox_id, status,
                      last_activity_at, created_at, updated_at)
                     SELECT ?1, ci.inbox_id, c.id, ci.id, ?2, s.last_seen, s.first_seen, ?3
                     FROM sync_chats s
                     JOIN contacts c ON c.identifier = s.identifier AND c.account_id = ?1
                     JOIN contact_inboxes ci ON ci.contact_id = c.id AND ci.inbox_id = ?4
                     WHERE NOT EXISTS (
                         SELECT 1 FROM conversations cv
                         WHERE cv.contact_id = c.id AND cv.inbox_id = ?4
                           AND (?5 OR cv.status <> 1)
                     )",
                    rusqlite::params![account, status, stamp, inbox, reuse_any],
                )?;

                let mut keys = HashMap::with_capacity(chats.len());
                {
                    let mut lookup = tx.prepare(
                        "SELECT s.identifier, c.id, cv.id
                         FROM sync_chats s
                         JOIN contacts c ON c.identifier = s.identifier AND c.account_id = ?1
                         JOIN conversations cv ON cv.contact_id = c.id AND cv.inbox_id = ?2
                         WHERE (?3 OR cv.status <> 1)
                         ORDER BY s.identifier, cv.status = 1, cv.id DESC",
                    )?;
                    let rows = lookup.query_map(rusqlite::params![account, inbox, reuse_any], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            ChatForeignKeys {
                                contact_id: row.get(1)?,
                                conversation_id: row.get(2)?,
                            },
                        ))
                    })?;
                    for row in rows {
                        let (identifier, fk) = row?;
                        keys.entry(identifier).or_insert(fk);
                    }
                }
                tx.execute_batch("DELETE FROM sync_chats;")?;
                tx.commit()?;

                debug!(
                    chats = chats.len(),
                    contacts_created = contacts,
                    conversations_created = conversations,
                    resolved = keys.len(),
                    "chats upserted"
                );
                Ok(keys)
            })
            .await
            .map_err(map_err)
    }

    /// Insert text messages. Callers filter out already-synced source ids first.
    pub async fn insert_messages(
        &self,
        records: Vec<MessageInsertRecord>,
    ) -> Result<usize, DeskbridgeError> {
        if records.is_empty() {
            return Ok(0);
        }
        let (account, inbox) = (self.account_id, self.inbox_id);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0;
                for part in records.chunks(INSERT_ROWS) {
                    let sql = format!(
                        "INSERT INTO messages
                         (account_id, inbox_id, conversation_id, content, message_type, content_type,
                          content_attributes, sender_type, sender_id, source_id, created_at, updated_at)
                         VALUES {}",
                        vec!["(?, ?, ?, ?, ?, 'text', '{}', ?, ?, ?, ?, ?)"; part.len()].join(", ")
                    );
                    let mut values = Vec::with_capacity(part.len() * 10);
                    for r in part {
                        let created = ts(r.timestamp);
                        values.push(Value::Integer(account));
                        values.push(Value::Integer(inbox));
                        values.push(Value::Integer(r.conversation_id));
                        values.push(Value::Text(r.content.clone()));
                        values.push(Value::Integer(r.direction.code()));
                        values.push(r.sender_type.map_or(Value::Null, |t| Value::Text(t.to_string())));
                        values.push(r.sender_id.map_or(Value::Null, Value::Integer));
                        values.push(Value::Text(r.source_id.clone()));
                        values.push(Value::Text(created.clone()));
                        values.push(Value::Text(created));
                    }
                    inserted += tx.execute(&sql, params_from_iter(values))?;
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await
            .map_err(map_err)
    }

    /// Helpdesk ids of messages by source id. The oldest row wins on duplicates.
    pub async fn message_ids_by_source(
        &self,
        source_ids: Vec<String>,
    ) -> Result<HashMap<String, SyncedMessage>, DeskbridgeError> {
        let (account, chunk) = (self.account_id, self.chunk_size);
        self.conn
            .call(move |conn| {
                let mut out = HashMap::with_capacity(source_ids.len());
                for part in source_ids.chunks(chunk) {
                    let sql = format!(
                        "SELECT source_id, id, conversation_id FROM messages
                         WHERE account_id = ? AND source_id IN ({})
                         ORDER BY id",
                        marks(part.len())
                    );
                    let mut values = vec![Value::Integer(account)];
                    values.extend(part.iter().cloned().map(Value::Text));
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(params_from_iter(values), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            SyncedMessage {
                                message_id: row.get(1)?,
                                conversation_id: row.get(2)?,
                            },
                        ))
                    })?;
                    for row in rows {
                        let (source_id, ids) = row?;
                        out.entry(source_id).or_insert(ids);
                    }
                }
                Ok(out)
            })
            .await
            .map_err(map_err)
    }

    /// Point each `(message, quoted message)` pair's reply attribute at the
    /// quoted helpdesk message. Returns rows changed.
    pub async fn set_reply_links(&self, links: Vec<(i64, i64)>) -> Result<usize, DeskbridgeError> {
        if links.is_empty() {
            return Ok(0);
        }
        let account = self.account_id;
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stamp = now();
                let mut changed = 0;
                {
                    let mut stmt = tx.prepare(
                        "UPDATE messages
                         SET content_attributes = json_set(
                                 COALESCE(NULLIF(content_attributes, ''), '{}'),
                                 '$.in_reply_to', ?2),
                             updated_at = ?3
                         WHERE id = ?1 AND account_id = ?4",
                    )?;
                    for (message_id, in_reply_to) in &links {
                        changed += stmt.execute(rusqlite::params![message_id, in_reply_to, stamp, account])?;
                    }
                }
                tx.commit()?;
                Ok(changed)
            })
            .await
            .map_err(map_err)
    }

    /// The helpdesk message a message replies to, if linked.
    pub async fn reply_target(&self, message_id: i64) -> Result<Option<i64>, DeskbridgeError> {
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT json_extract(content_attributes, '$.in_reply_to') FROM messages WHERE id = ?1",
                    [message_id],
                    |row| row.get::<_, Option<i64>>(0),
                )
            })
            .await
            .map_err(map_err)
    }

    /// Move each conversation's `created_at` back to its earliest message.
    ///
    /// The helpdesk UI hides messages older than their conversation.
    pub async fn fix_conversation_created_at(
        &self,
        conversation_ids: Vec<i64>,
    ) -> Result<usize, DeskbridgeError> {
        self.update_conversations(
            conversation_ids,
            "UPDATE conversations
             SET created_at = (SELECT MIN(m.created_at) FROM messages m
                               WHERE m.conversation_id = conversations.id)
             WHERE account_id = ? AND id IN ({ids})
               AND EXISTS (SELECT 1 FROM messages m
                           WHERE m.conversation_id = conversations.id
                             AND m.created_at < conversations.created_at)",
            None,
        )
        .await
    }

    /// Bump `updated_at` so the helpdesk's read-side caches drop these conversations.
    pub async fn touch_conversations(
        &self,
        conversation_ids: Vec<i64>,
    ) -> Result<usize, DeskbridgeError> {
        self.update_conversations(
            conversation_ids,
            "UPDATE conversations
             SET updated_at = ?,
                 last_activity_at = COALESCE(
                     (SELECT MAX(m.created_at) FROM messages m
                      WHERE m.conversation_id = conversations.id),
                     last_activity_at)
             WHERE account_id = ? AND id IN ({ids})",
            Some(now()),
        )
        .await
    }

    async fn update_conversations(
        &self,
        mut ids: Vec<i64>,
        template: &'static str,
        stamp: Option<String>,
    ) -> Result<usize, DeskbridgeError> {
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(0);
        }
        let (account, chunk) = (self.account_id, self.chunk_size);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut changed = 0;
                for part in ids.chunks(chunk) {
                    let sql = template.replace("{ids}", &marks(part.len()));
                    let mut values = Vec::with_capacity(part.len() + 2);
                    if let Some(stamp) = &stamp {
                        values.push(Value::Text(stamp.clone()));
                    }
                    values.push(Value::Integer(account));
                    values.extend(part.iter().copied().map(Value::Integer));
                    changed += tx.execute(&sql, params_from_iter(values))?;
                }
                tx.commit()?;
                Ok(changed)
            })
            .await
            .map_err(map_err)
    }

    /// Contacts of this account without an avatar, most recently updated first.
    pub async fn contacts_missing_avatar(
        &self,
        limit: usize,
    ) -> Result<Vec<AvatarCandidate>, DeskbridgeError> {
        let account = self.account_id;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, identifier FROM contacts
                     WHERE account_id = ?1 AND identifier IS NOT NULL
                       AND (avatar_url IS NULL OR avatar_url = '')
                     ORDER BY updated_at DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(rusqlite::params![account, limit], |row| {
                    Ok(AvatarCandidate {
                        contact_id: row.get(0)?,
                        identifier: row.get(1)?,
                    })
                })?;
                rows.collect()
            })
            .await
            .map_err(map_err)
    }

    /// Row counts of this account, for status output and tests.
    pub async fn counts(&self) -> Result<TableCounts, DeskbridgeError> {
        let account = self.account_id;
        self.conn
            .call(move |conn| {
                let count = |sql: &str| -> Result<u64, rusqlite::Error> {
                    conn.query_row(sql, [account], |row| row.get::<_, i64>(0))
                        .map(i64::unsigned_abs)
                };
                Ok(TableCounts {
                    contacts: count("SELECT COUNT(*) FROM contacts WHERE account_id = ?1")?,
                    contact_inboxes: count(
                        "SELECT COUNT(*) FROM contact_inboxes ci
                         JOIN contacts c ON c.id = ci.contact_id WHERE c.account_id = ?1",
                    )?,
                    conversations: count("SELECT COUNT(*) FROM conversations WHERE account_id = ?1")?,
                    messages: count("SELECT COUNT(*) FROM messages WHERE account_id = ?1")?,
                })
            })
            .await
            .map_err(map_err)
    }
}
