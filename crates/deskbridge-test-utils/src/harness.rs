// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a temp mirror database, a provisioned helpdesk
//! database and the mock collaborators, with a config pointing at both
//! databases.

use std::sync::Arc;

use deskbridge_config::model::DeskbridgeConfig;
use deskbridge_core::DeskbridgeError;
use deskbridge_helpdesk::HelpdeskDb;
use deskbridge_storage::queries::mirror;
use deskbridge_storage::{Database, MirrorContact, MirrorMessage};

use crate::mock_helpdesk::MockHelpdesk;
use crate::mock_protocol::MockProtocol;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: DeskbridgeConfig,
    helpdesk: MockHelpdesk,
    protocol: MockProtocol,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: DeskbridgeConfig::default(),
            helpdesk: MockHelpdesk::new(),
            protocol: MockProtocol::new(),
        }
    }

    /// Adjust the configuration. Database paths are overwritten by `build`.
    pub fn with_config(mut self, configure: impl FnOnce(&mut DeskbridgeConfig)) -> Self {
        configure(&mut self.config);
        self
    }

    pub fn with_helpdesk(mut self, helpdesk: MockHelpdesk) -> Self {
        self.helpdesk = helpdesk;
        self
    }

    pub fn with_protocol(mut self, protocol: MockProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub async fn build(self) -> Result<TestHarness, DeskbridgeError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| DeskbridgeError::Storage {
            source: Box::new(e),
        })?;
        let mut config = self.config;
        let path = |name: &str| temp_dir.path().join(name).to_string_lossy().into_owned();
        config.storage.database_path = path("deskbridge.db");
        config.helpdesk.database_path = Some(path("helpdesk.db"));

        let mirror = Database::open(&config.storage.database_path).await?;
        let helpdesk_db = HelpdeskDb::from_config(&config.helpdesk)
            .await?
            .with_chunk_size(config.sync.lookup_chunk_size);
        helpdesk_db.provision().await?;

        Ok(TestHarness {
            mirror,
            helpdesk_db,
            helpdesk: Arc::new(self.helpdesk),
            protocol: Arc::new(self.protocol),
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with mock collaborators and temp databases.
pub struct TestHarness {
    /// The local mirror and queue database.
    pub mirror: Database,
    /// Helpdesk database with the schema provisioned.
    pub helpdesk_db: HelpdeskDb,
    pub helpdesk: Arc<MockHelpdesk>,
    pub protocol: Arc<MockProtocol>,
    pub config: DeskbridgeConfig,
    /// Kept alive so the databases survive until drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Harness with default configuration and fresh mocks.
    pub async fn new() -> Result<Self, DeskbridgeError> {
        Self::builder().build().await
    }

    pub async fn add_contacts(&self, contacts: &[MirrorContact]) -> Result<(), DeskbridgeError> {
        for contact in contacts {
            mirror::upsert_contact(&self.mirror, contact).await?;
        }
        Ok(())
    }

    pub async fn add_messages(&self, messages: &[MirrorMessage]) -> Result<(), DeskbridgeError> {
        for message in messages {
            mirror::upsert_message(&self.mirror, message).await?;
        }
        Ok(())
    }
}
