// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reference DDL of the helpdesk tables the bulk paths read and write.
//!
//! The helpdesk owns its schema; this is applied only to provision local
//! development and test databases. `messages.source_id` is deliberately not
//! unique: idempotency comes from the existence check before insert.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id    INTEGER NOT NULL,
    name          TEXT NOT NULL DEFAULT '',
    phone_number  TEXT,
    identifier    TEXT,
    avatar_url    TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE (identifier, account_id)
);

CREATE TABLE IF NOT EXISTS contact_inboxes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    contact_id  INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
    inbox_id    INTEGER NOT NULL,
    source_id   TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (inbox_id, source_id)
);

CREATE TABLE IF NOT EXISTS conversations (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id        INTEGER NOT NULL,
    inbox_id          INTEGER NOT NULL,
    contact_id        INTEGER NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
    contact_inbox_id  INTEGER REFERENCES contact_inboxes(id) ON DELETE CASCADE,
    status            INTEGER NOT NULL DEFAULT 0,
    last_activity_at  TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_contact_inbox
    ON conversations (contact_id, inbox_id);

CREATE TABLE IF NOT EXISTS messages (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id          INTEGER NOT NULL,
    inbox_id            INTEGER NOT NULL,
    conversation_id     INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    content             TEXT,
    message_type        INTEGER NOT NULL,
    content_type        TEXT NOT NULL DEFAULT 'text',
    content_attributes  TEXT NOT NULL DEFAULT '{}',
    sender_type         TEXT,
    sender_id           INTEGER,
    source_id           TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_source_id ON messages (source_id);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages (conversation_id, created_at);
"#;
