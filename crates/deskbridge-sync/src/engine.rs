// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orchestration of a full history sync.

use std::sync::Arc;

use deskbridge_config::model::DeskbridgeConfig;
use deskbridge_core::types::SyncStatus;
use deskbridge_core::{DeskbridgeError, HelpdeskApi, LidResolver, ProtocolClient};
use deskbridge_helpdesk::HelpdeskDb;
use deskbridge_storage::Database;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::avatar::{AvatarSettings, AvatarUpdater};
use crate::contacts::ContactSync;
use crate::media::{MediaFetcher, MediaUploadPool};
use crate::messages::{MessageSync, MessageSyncSettings};
use crate::status::SyncStatusTracker;

/// Collaborators of a sync engine.
pub struct SyncDeps {
    pub mirror: Database,
    pub helpdesk_db: HelpdeskDb,
    pub helpdesk: Arc<dyn HelpdeskApi>,
    pub protocol: Arc<dyn ProtocolClient>,
    pub lids: Arc<dyn LidResolver>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub status: Arc<SyncStatusTracker>,
}

/// Runs contact sync, then message sync, then the avatar backfill.
pub struct SyncEngine {
    helpdesk_db: HelpdeskDb,
    contacts: ContactSync,
    messages: MessageSync,
    avatars: Arc<AvatarUpdater>,
    status: Arc<SyncStatusTracker>,
    default_days: u32,
}

impl SyncEngine {
    pub fn new(config: &DeskbridgeConfig, deps: SyncDeps) -> Self {
        let helpdesk_db = deps
            .helpdesk_db
            .with_chunk_size(config.sync.lookup_chunk_size);
        let media = Arc::new(MediaUploadPool::from_config(
            Arc::clone(&deps.helpdesk),
            deps.fetcher,
            &config.media,
        ));
        let contacts = ContactSync::new(
            deps.mirror.clone(),
            helpdesk_db.clone(),
            Arc::clone(&deps.lids),
            Arc::clone(&deps.status),
            config.sync.contact_batch_size,
        );
        let messages = MessageSync::new(
            deps.mirror,
            helpdesk_db.clone(),
            media,
            deps.lids,
            Arc::clone(&deps.status),
            MessageSyncSettings::from_config(config),
        );
        let avatars = Arc::new(AvatarUpdater::new(
            helpdesk_db.clone(),
            deps.helpdesk,
            deps.protocol,
            AvatarSettings::from(&config.avatar),
        ));
        Self {
            helpdesk_db,
            contacts,
            messages,
            avatars,
            status: deps.status,
            default_days: config.sync.days_limit,
        }
    }

    pub fn status(&self) -> &Arc<SyncStatusTracker> {
        &self.status
    }

    /// Validate the target, mark the session running, and sync in the
    /// background.
    ///
    /// Fails before anything is written when the helpdesk database is
    /// unusable or the session is already syncing.
    pub async fn start(
        self: &Arc<Self>,
        session_id: &str,
        days_limit: Option<u32>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<SyncStatus>, DeskbridgeError> {
        self.helpdesk_db.verify().await?;
        self.status.start(session_id)?;
        info!(session_id, "sync started");

        let engine = Arc::clone(self);
        let session_id = session_id.to_string();
        let days = days_limit.unwrap_or(self.default_days);
        Ok(tokio::spawn(async move {
            engine.execute(&session_id, days, &cancel).await
        }))
    }

    /// Run a sync to completion.
    pub async fn run(
        self: &Arc<Self>,
        session_id: &str,
        days_limit: Option<u32>,
        cancel: CancellationToken,
    ) -> Result<SyncStatus, DeskbridgeError> {
        let handle = self.start(session_id, days_limit, cancel).await?;
        handle
            .await
            .map_err(|e| DeskbridgeError::Internal(format!("sync task failed: {e}")))
    }

    async fn execute(
        &self,
        session_id: &str,
        days: u32,
        cancel: &CancellationToken,
    ) -> SyncStatus {
        match self.contacts.sync(session_id, cancel).await {
            Ok(stats) => self.status.update_contacts(session_id, &stats),
            Err(DeskbridgeError::Cancelled) => {
                return self.status.fail(session_id, "sync cancelled");
            }
            Err(e) => {
                warn!(session_id, error = %e, "contact sync failed, continuing with messages");
                self.status
                    .note_error(session_id, &format!("contact sync failed: {e}"));
            }
        }

        match self.messages.sync(session_id, days, cancel).await {
            Ok(report) => self.status.update_messages(session_id, &report.stats),
            Err(DeskbridgeError::Cancelled) => {
                return self.status.fail(session_id, "sync cancelled");
            }
            Err(e) => {
                warn!(session_id, error = %e, "message sync failed");
                self.status
                    .note_error(session_id, &format!("message sync failed: {e}"));
            }
        }

        Arc::clone(&self.avatars).spawn(session_id.to_string(), cancel.clone());

        let status = self.status.finish(session_id);
        info!(
            session_id,
            state = %status.state,
            contacts_imported = status.contacts.imported,
            messages_imported = status.messages.imported,
            "sync finished"
        );
        status
    }
}
