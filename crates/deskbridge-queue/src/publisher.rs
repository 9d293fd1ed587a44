// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Producer side of the queue.

use std::sync::Arc;

use deskbridge_core::{DeskbridgeError, EnvelopeKind, QueueEnvelope, Stream};
use deskbridge_storage::Database;
use deskbridge_storage::queries::queue;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;

/// Appends envelopes to the durable streams.
///
/// Cloning is cheap. Consumers in the same process subscribe to
/// [`Publisher::notifier`] so a publish wakes them before their poll interval.
#[derive(Clone)]
pub struct Publisher {
    db: Database,
    inbound: Arc<Notify>,
    outbound: Arc<Notify>,
}

impl Publisher {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            inbound: Arc::new(Notify::new()),
            outbound: Arc::new(Notify::new()),
        }
    }

    pub fn notifier(&self, stream: Stream) -> Arc<Notify> {
        match stream {
            Stream::Inbound => Arc::clone(&self.inbound),
            Stream::Outbound => Arc::clone(&self.outbound),
        }
    }

    /// Wrap `payload` in a fresh envelope and append it to `stream`.
    pub async fn publish<T: Serialize>(
        &self,
        stream: Stream,
        kind: EnvelopeKind,
        session_id: &str,
        payload: &T,
    ) -> Result<QueueEnvelope, DeskbridgeError> {
        let envelope = QueueEnvelope::new(kind, session_id, payload)?;
        self.publish_envelope(stream, &envelope).await?;
        Ok(envelope)
    }

    /// Append a prebuilt envelope. Its kind must belong to `stream`.
    pub async fn publish_envelope(
        &self,
        stream: Stream,
        envelope: &QueueEnvelope,
    ) -> Result<i64, DeskbridgeError> {
        if envelope.kind.stream() != stream {
            return Err(DeskbridgeError::Validation(format!(
                "{} envelopes belong on {}, not {}",
                envelope.kind,
                envelope.kind.stream().subject(),
                stream.subject()
            )));
        }
        let row = queue::publish(&self.db, stream, envelope).await?;
        debug!(
            stream = stream.subject(),
            kind = %envelope.kind,
            session = %envelope.session_id,
            envelope_id = %envelope.id,
            row,
            "envelope published"
        );
        self.notifier(stream).notify_one();
        Ok(row)
    }
}
