// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background avatar backfill for contacts created by bulk sync.
//!
//! Bulk inserts cannot call the protocol client per contact, so contacts
//! arrive without a picture. This pass fetches them afterwards with a small
//! worker count, a timeout per call and a pause between calls. Nothing here
//! is allowed to fail the sync.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deskbridge_config::model::AvatarConfig;
use deskbridge_core::traits::helpdesk::ContactUpdate;
use deskbridge_core::{HelpdeskApi, ProtocolClient};
use deskbridge_helpdesk::{AvatarCandidate, HelpdeskDb};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct AvatarSettings {
    pub workers: usize,
    pub call_timeout: Duration,
    pub inter_call_delay: Duration,
    pub max_contacts: usize,
}

impl From<&AvatarConfig> for AvatarSettings {
    fn from(config: &AvatarConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            inter_call_delay: Duration::from_millis(config.inter_call_delay_ms),
            max_contacts: config.max_contacts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvatarReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for AvatarReport {
    fn add_assign(&mut self, other: Self) {
        self.checked += other.checked;
        self.updated += other.updated;
        self.failed += other.failed;
    }
}

pub struct AvatarUpdater {
    db: HelpdeskDb,
    helpdesk: Arc<dyn HelpdeskApi>,
    protocol: Arc<dyn ProtocolClient>,
    settings: AvatarSettings,
}

impl AvatarUpdater {
    pub fn new(
        db: HelpdeskDb,
        helpdesk: Arc<dyn HelpdeskApi>,
        protocol: Arc<dyn ProtocolClient>,
        settings: AvatarSettings,
    ) -> Self {
        Self {
            db,
            helpdesk,
            protocol,
            settings,
        }
    }

    /// Run the backfill on its own task.
    pub fn spawn(
        self: Arc<Self>,
        session_id: String,
        cancel: CancellationToken,
    ) -> JoinHandle<AvatarReport> {
        tokio::spawn(async move { self.run(&session_id, &cancel).await })
    }

    pub async fn run(&self, session_id: &str, cancel: &CancellationToken) -> AvatarReport {
        let candidates = match self.db.contacts_missing_avatar(self.settings.max_contacts).await {
            Ok(c) => c,
            Err(e) => {
                warn!(session_id, error = %e, "avatar candidates could not be listed");
                return AvatarReport::default();
            }
        };
        if candidates.is_empty() {
            return AvatarReport::default();
        }

        let queue = Arc::new(Mutex::new(VecDeque::from(candidates)));
        let mut set = JoinSet::new();
        for _ in 0..self.settings.workers {
            let queue = Arc::clone(&queue);
            let helpdesk = Arc::clone(&self.helpdesk);
            let protocol = Arc::clone(&self.protocol);
            let settings = self.settings;
            let session_id = session_id.to_string();
            let cancel = cancel.clone();
            set.spawn(async move {
                let mut report = AvatarReport::default();
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                    let Some(candidate) = next else { break };
                    report.checked += 1;
                    match refresh(&*helpdesk, &*protocol, &settings, &session_id, &candidate).await {
                        Some(true) => report.updated += 1,
                        Some(false) => {}
                        None => report.failed += 1,
                    }
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(settings.inter_call_delay) => {}
                    }
                }
                report
            });
        }

        let mut report = AvatarReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(part) => report += part,
                Err(e) => warn!(error = %e, "avatar worker panicked"),
            }
        }
        info!(
            session_id,
            checked = report.checked,
            updated = report.updated,
            failed = report.failed,
            "avatar backfill finished"
        );
        report
    }
}

/// `Some(true)` updated, `Some(false)` no picture, `None` failed.
async fn refresh(
    helpdesk: &dyn HelpdeskApi,
    protocol: &dyn ProtocolClient,
    settings: &AvatarSettings,
    session_id: &str,
    candidate: &AvatarCandidate,
) -> Option<bool> {
    let lookup = protocol.profile_picture_url(session_id, &candidate.identifier);
    let url = match tokio::time::timeout(settings.call_timeout, lookup).await {
        Ok(Ok(Some(url))) => url,
        Ok(Ok(None)) => return Some(false),
        Ok(Err(e)) => {
            debug!(identifier = %candidate.identifier, error = %e, "profile picture lookup failed");
            return None;
        }
        Err(_) => {
            debug!(identifier = %candidate.identifier, "profile picture lookup timed out");
            return None;
        }
    };
    let update = ContactUpdate {
        avatar_url: Some(url),
        ..ContactUpdate::default()
    };
    match helpdesk.update_contact(candidate.contact_id, &update).await {
        Ok(()) => Some(true),
        Err(e) => {
            debug!(contact_id = candidate.contact_id, error = %e, "avatar update failed");
            None
        }
    }
}
