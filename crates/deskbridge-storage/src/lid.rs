// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use deskbridge_core::{DeskbridgeError, LidResolver};

use crate::database::Database;
use crate::queries::mirror;

/// Resolves linked identities from the mirror's `lid_mappings` table.
#[derive(Clone)]
pub struct MirrorLidResolver {
    db: Database,
}

impl MirrorLidResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LidResolver for MirrorLidResolver {
    async fn phone_for_lid(
        &self,
        session_id: &str,
        lid: &str,
    ) -> Result<Option<String>, DeskbridgeError> {
        let phone = mirror::phone_for_lid(&self.db, session_id, lid).await?;
        Ok(phone.and_then(|p| deskbridge_core::jid::digits_if_phone(&p)))
    }
}
