// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bulk import of saved mirror contacts into the helpdesk.

use std::collections::HashSet;
use std::sync::Arc;

use deskbridge_core::jid::{self, ChatKind};
use deskbridge_core::types::{SkipReason, SyncStats};
use deskbridge_core::{DeskbridgeError, LidResolver};
use deskbridge_helpdesk::{ContactRow, HelpdeskDb};
use deskbridge_storage::queries::mirror;
use deskbridge_storage::{Database, MirrorContact};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::names;
use crate::status::SyncStatusTracker;

pub struct ContactSync {
    mirror: Database,
    helpdesk: HelpdeskDb,
    lids: Arc<dyn LidResolver>,
    status: Arc<SyncStatusTracker>,
    batch_size: usize,
}

impl ContactSync {
    pub fn new(
        mirror: Database,
        helpdesk: HelpdeskDb,
        lids: Arc<dyn LidResolver>,
        status: Arc<SyncStatusTracker>,
        batch_size: usize,
    ) -> Self {
        Self {
            mirror,
            helpdesk,
            lids,
            status,
            batch_size: batch_size.max(1),
        }
    }

    /// Import every saved individual contact of a session.
    ///
    /// Contacts already in the helpdesk only get their placeholder name
    /// replaced. A failed batch is counted and the next batch still runs;
    /// cancellation stops before the next batch starts.
    pub async fn sync(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncStats, DeskbridgeError> {
        let contacts = mirror::list_contacts(&self.mirror, session_id).await?;
        let mut stats = SyncStats::default();
        let rows = self.eligible(session_id, contacts, &mut stats).await;
        debug!(session_id, eligible = rows.len(), skipped = stats.skipped, "contacts filtered");
        self.status.update_contacts(session_id, &stats);

        for batch in rows.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                info!(session_id, "contact sync cancelled");
                return Err(DeskbridgeError::Cancelled);
            }
            if let Err(e) = self.import_batch(batch, &mut stats).await {
                error!(session_id, batch = batch.len(), error = %e, "contact batch failed");
                stats.error_n("batch_failed", batch.len() as u64);
            }
            self.status.update_contacts(session_id, &stats);
        }

        info!(
            session_id,
            imported = stats.imported,
            updated = stats.updated,
            skipped = stats.skipped,
            errored = stats.errored,
            "contact sync finished"
        );
        Ok(stats)
    }

    /// Apply the eligibility filters, returning one row per identifier.
    async fn eligible(
        &self,
        session_id: &str,
        contacts: Vec<MirrorContact>,
        stats: &mut SyncStats,
    ) -> Vec<ContactRow> {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();
        for contact in contacts {
            let (identifier, digits) = match jid::classify(&contact.jid) {
                ChatKind::Group => {
                    stats.skip(SkipReason::Group);
                    continue;
                }
                kind if kind.is_excluded() || kind == ChatKind::Unknown => {
                    stats.skip(SkipReason::ExcludedChat);
                    continue;
                }
                ChatKind::LinkedIdentity => {
                    match self.lids.phone_for_lid(session_id, &contact.jid).await {
                        Ok(Some(digits)) => (jid::individual_jid(&digits), digits),
                        Ok(None) => {
                            stats.skip(SkipReason::NoPhone);
                            continue;
                        }
                        Err(e) => {
                            debug!(jid = %contact.jid, error = %e, "linked identity lookup failed");
                            stats.skip(SkipReason::NoPhone);
                            continue;
                        }
                    }
                }
                _ => match jid::phone_number(&contact.jid) {
                    Some(digits) => (jid::normalize(&contact.jid), digits),
                    None => {
                        stats.skip(SkipReason::NoPhone);
                        continue;
                    }
                },
            };
            if !names::is_saved(&contact) {
                stats.skip(SkipReason::NotSaved);
                continue;
            }
            if !seen.insert(identifier.clone()) {
                stats.skip(SkipReason::Duplicate);
                continue;
            }
            let name = names::individual_name(Some(&contact), None, Some(&digits), &identifier);
            rows.push(ContactRow {
                identifier,
                name,
                phone_number: Some(jid::e164(&digits)),
            });
        }
        rows
    }

    async fn import_batch(
        &self,
        batch: &[ContactRow],
        stats: &mut SyncStats,
    ) -> Result<(), DeskbridgeError> {
        let identifiers = batch.iter().map(|r| r.identifier.clone()).collect();
        let existing = self.helpdesk.existing_contacts(identifiers).await?;
        let (known, new): (Vec<ContactRow>, Vec<ContactRow>) = batch
            .iter()
            .cloned()
            .partition(|r| existing.contains_key(&r.identifier));

        let wanted = new.len() as u64;
        let inserted = self.helpdesk.insert_contacts(new).await? as u64;
        stats.imported += inserted;
        // lost a race with another writer
        stats.skip_n(SkipReason::AlreadyExists, wanted.saturating_sub(inserted));

        let known_count = known.len() as u64;
        let renamed = self.helpdesk.update_contact_names(known).await? as u64;
        stats.updated += renamed;
        stats.skip_n(SkipReason::AlreadyExists, known_count.saturating_sub(renamed));
        Ok(())
    }
}
