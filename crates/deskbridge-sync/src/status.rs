// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session sync status, readable while a sync runs.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use deskbridge_core::types::{SkipReason, SyncState, SyncStats, SyncStatus};
use deskbridge_core::DeskbridgeError;

/// Last-known sync status of every session.
///
/// A status is replaced when the next sync of its session starts. Live
/// imports from the queue are counted on whatever status is current.
#[derive(Default)]
pub struct SyncStatusTracker {
    sessions: Mutex<HashMap<String, SyncStatus>>,
}

impl SyncStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_status<R>(&self, session_id: &str, f: impl FnOnce(&mut SyncStatus) -> R) -> R {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let status = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SyncStatus::idle(session_id));
        f(status)
    }

    /// Begin a sync. Refused while another sync of the session is running.
    pub fn start(&self, session_id: &str) -> Result<(), DeskbridgeError> {
        self.with_status(session_id, |status| {
            if status.state == SyncState::Running {
                return Err(DeskbridgeError::Validation(format!(
                    "sync of session {session_id} is already running"
                )));
            }
            *status = SyncStatus {
                state: SyncState::Running,
                started_at: Some(Utc::now()),
                ..SyncStatus::idle(session_id)
            };
            Ok(())
        })
    }

    pub fn update_contacts(&self, session_id: &str, stats: &SyncStats) {
        self.with_status(session_id, |status| status.contacts = stats.clone());
    }

    pub fn update_messages(&self, session_id: &str, stats: &SyncStats) {
        self.with_status(session_id, |status| status.messages = stats.clone());
    }

    /// Record a phase failure without ending the sync.
    pub fn note_error(&self, session_id: &str, error: &str) {
        self.with_status(session_id, |status| {
            status.error = Some(match status.error.take() {
                Some(previous) => format!("{previous}; {error}"),
                None => error.to_string(),
            });
        });
    }

    /// End the sync. It counts as failed when any phase noted an error.
    pub fn finish(&self, session_id: &str) -> SyncStatus {
        self.with_status(session_id, |status| {
            status.state = if status.error.is_some() {
                SyncState::Failed
            } else {
                SyncState::Completed
            };
            status.finished_at = Some(Utc::now());
            status.clone()
        })
    }

    /// End the sync as failed.
    pub fn fail(&self, session_id: &str, error: &str) -> SyncStatus {
        self.note_error(session_id, error);
        self.finish(session_id)
    }

    pub fn record_live_import(&self, session_id: &str) {
        self.with_status(session_id, |status| status.live.imported += 1);
    }

    pub fn record_live_skip(&self, session_id: &str, reason: SkipReason) {
        self.with_status(session_id, |status| status.live.skip(reason));
    }

    pub fn record_live_error(&self, session_id: &str, reason: &str) {
        self.with_status(session_id, |status| status.live.error_n(reason, 1));
    }

    /// Status of a session; idle when it never synced.
    pub fn get(&self, session_id: &str) -> SyncStatus {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| SyncStatus::idle(session_id))
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.get(session_id).state == SyncState::Running
    }
}
