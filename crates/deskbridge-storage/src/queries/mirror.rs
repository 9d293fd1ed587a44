// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol mirror: contacts, groups, messages and linked-identity mappings
//! of each session, plus the helpdesk ids written back after a sync.

use deskbridge_core::DeskbridgeError;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::{
    HelpdeskLink, MirrorContact, MirrorGroup, MirrorMessage, MirrorMessageType, QuotedReference,
};

pub async fn upsert_contact(db: &Database, contact: &MirrorContact) -> Result<(), DeskbridgeError> {
    let c = contact.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO mirror_contacts
                 (session_id, jid, first_name, full_name, push_name, business_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(session_id, jid) DO UPDATE SET
                    first_name = excluded.first_name,
                    full_name = excluded.full_name,
                    push_name = COALESCE(excluded.push_name, mirror_contacts.push_name),
                    business_name = excluded.business_name",
                params![
                    c.session_id,
                    c.jid,
                    c.first_name,
                    c.full_name,
                    c.push_name,
                    c.business_name
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Every contact known to a session.
pub async fn list_contacts(
    db: &Database,
    session_id: &str,
) -> Result<Vec<MirrorContact>, DeskbridgeError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, jid, first_name, full_name, push_name, business_name
                 FROM mirror_contacts WHERE session_id = ?1 ORDER BY jid",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok(MirrorContact {
                    session_id: row.get(0)?,
                    jid: row.get(1)?,
                    first_name: row.get(2)?,
                    full_name: row.get(3)?,
                    push_name: row.get(4)?,
                    business_name: row.get(5)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_contact(
    db: &Database,
    session_id: &str,
    jid: &str,
) -> Result<Option<MirrorContact>, DeskbridgeError> {
    let session_id = session_id.to_string();
    let jid = jid.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT session_id, jid, first_name, full_name, push_name, business_name
                 FROM mirror_contacts WHERE session_id = ?1 AND jid = ?2",
                params![session_id, jid],
                |row| {
                    Ok(MirrorContact {
                        session_id: row.get(0)?,
                        jid: row.get(1)?,
                        first_name: row.get(2)?,
                        full_name: row.get(3)?,
                        push_name: row.get(4)?,
                        business_name: row.get(5)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn upsert_group(db: &Database, group: &MirrorGroup) -> Result<(), DeskbridgeError> {
    let g = group.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO mirror_groups (session_id, jid, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id, jid) DO UPDATE SET name = excluded.name",
                params![g.session_id, g.jid, g.name],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Stored subject of a group, if any.
pub async fn group_name(
    db: &Database,
    session_id: &str,
    jid: &str,
) -> Result<Option<String>, DeskbridgeError> {
    let session_id = session_id.to_string();
    let jid = jid.to_string();
    db.connection()
        .call(move |conn| {
            let name: Option<Option<String>> = conn
                .query_row(
                    "SELECT name FROM mirror_groups WHERE session_id = ?1 AND jid = ?2",
                    params![session_id, jid],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(name.flatten())
        })
        .await
        .map_err(map_tr_err)
}

const MESSAGE_COLUMNS: &str = "session_id, message_id, chat_jid, sender_jid, from_me, \
     message_type, content, media_locator, media_mime_type, media_file_name, push_name, \
     quoted_message_id, timestamp, helpdesk_message_id, helpdesk_conversation_id";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MirrorMessage> {
    let message_type: String = row.get(5)?;
    Ok(MirrorMessage {
        session_id: row.get(0)?,
        message_id: row.get(1)?,
        chat_jid: row.get(2)?,
        sender_jid: row.get(3)?,
        from_me: row.get(4)?,
        message_type: MirrorMessageType::parse(&message_type),
        content: row.get(6)?,
        media_locator: row.get(7)?,
        media_mime_type: row.get(8)?,
        media_file_name: row.get(9)?,
        push_name: row.get(10)?,
        quoted_message_id: row.get(11)?,
        timestamp: row.get(12)?,
        helpdesk_message_id: row.get(13)?,
        helpdesk_conversation_id: row.get(14)?,
    })
}

/// Insert or refresh a message. Helpdesk ids already written back are kept.
pub async fn upsert_message(db: &Database, message: &MirrorMessage) -> Result<(), DeskbridgeError> {
    let m = message.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO mirror_messages
                 (session_id, message_id, chat_jid, sender_jid, from_me, message_type, content,
                  media_locator, media_mime_type, media_file_name, push_name, quoted_message_id,
                  timestamp, helpdesk_message_id, helpdesk_conversation_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(session_id, message_id) DO UPDATE SET
                    content = excluded.content,
                    media_locator = COALESCE(excluded.media_locator, mirror_messages.media_locator),
                    helpdesk_message_id =
                        COALESCE(mirror_messages.helpdesk_message_id, excluded.helpdesk_message_id),
                    helpdesk_conversation_id = COALESCE(
                        mirror_messages.helpdesk_conversation_id,
                        excluded.helpdesk_conversation_id
                    )",
                params![
                    m.session_id,
                    m.message_id,
                    m.chat_jid,
                    m.sender_jid,
                    m.from_me,
                    m.message_type.as_str(),
                    m.content,
                    m.media_locator,
                    m.media_mime_type,
                    m.media_file_name,
                    m.push_name,
                    m.quoted_message_id,
                    m.timestamp,
                    m.helpdesk_message_id,
                    m.helpdesk_conversation_id,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The newest `limit` messages of a session, returned oldest first.
pub async fn list_messages(
    db: &Database,
    session_id: &str,
    limit: usize,
) -> Result<Vec<MirrorMessage>, DeskbridgeError> {
    let session_id = session_id.to_string();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM (
                    SELECT * FROM mirror_messages WHERE session_id = ?1
                    ORDER BY timestamp DESC, message_id DESC LIMIT ?2
                 ) ORDER BY timestamp ASC, message_id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![session_id, limit], message_from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_message(
    db: &Database,
    session_id: &str,
    message_id: &str,
) -> Result<Option<MirrorMessage>, DeskbridgeError> {
    let session_id = session_id.to_string();
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM mirror_messages
                 WHERE session_id = ?1 AND message_id = ?2"
            );
            conn.query_row(&sql, params![session_id, message_id], message_from_row)
                .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Write helpdesk ids back onto synced messages in one transaction.
///
/// Returns how many mirror rows were updated.
pub async fn set_helpdesk_ids(
    db: &Database,
    session_id: &str,
    links: Vec<HelpdeskLink>,
) -> Result<usize, DeskbridgeError> {
    if links.is_empty() {
        return Ok(0);
    }
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut updated = 0;
            {
                let mut stmt = tx.prepare(
                    "UPDATE mirror_messages
                     SET helpdesk_message_id = ?3, helpdesk_conversation_id = ?4
                     WHERE session_id = ?1 AND message_id = ?2",
                )?;
                for link in &links {
                    updated += stmt.execute(params![
                        session_id,
                        link.message_id,
                        link.helpdesk_message_id,
                        link.helpdesk_conversation_id
                    ])?;
                }
            }
            tx.commit()?;
            Ok(updated)
        })
        .await
        .map_err(map_tr_err)
}

/// Helpdesk `(message id, conversation id)` of a synced local message.
pub async fn helpdesk_ids(
    db: &Database,
    session_id: &str,
    message_id: &str,
) -> Result<Option<(i64, i64)>, DeskbridgeError> {
    let session_id = session_id.to_string();
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let ids: Option<(Option<i64>, Option<i64>)> = conn
                .query_row(
                    "SELECT helpdesk_message_id, helpdesk_conversation_id FROM mirror_messages
                     WHERE session_id = ?1 AND message_id = ?2",
                    params![session_id, message_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(match ids {
                Some((Some(msg), Some(conv))) => Some((msg, conv)),
                _ => None,
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Synced messages of a session that quote another message.
pub async fn quoted_references(
    db: &Database,
    session_id: &str,
) -> Result<Vec<QuotedReference>, DeskbridgeError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT helpdesk_message_id, quoted_message_id FROM mirror_messages
                 WHERE session_id = ?1
                   AND helpdesk_message_id IS NOT NULL
                   AND quoted_message_id IS NOT NULL",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                Ok(QuotedReference {
                    helpdesk_message_id: row.get(0)?,
                    quoted_message_id: row.get(1)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn upsert_lid_mapping(
    db: &Database,
    session_id: &str,
    lid: &str,
    phone: &str,
) -> Result<(), DeskbridgeError> {
    let (session_id, lid, phone) = (session_id.to_string(), lid.to_string(), phone.to_string());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO lid_mappings (session_id, lid, phone) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id, lid) DO UPDATE SET phone = excluded.phone",
                params![session_id, lid, phone],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Phone digits recorded for a linked identity. Accepts the bare user part
/// or the full `@lid` identifier.
pub async fn phone_for_lid(
    db: &Database,
    session_id: &str,
    lid: &str,
) -> Result<Option<String>, DeskbridgeError> {
    let session_id = session_id.to_string();
    let bare = deskbridge_core::jid::user_part(lid).to_string();
    let full = format!("{bare}@lid");
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT phone FROM lid_mappings WHERE session_id = ?1 AND lid IN (?2, ?3)",
                params![session_id, bare, full],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}
