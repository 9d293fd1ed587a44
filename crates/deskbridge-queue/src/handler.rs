// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Kind-keyed dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deskbridge_core::{DeskbridgeError, EnvelopeKind, QueueEnvelope};

/// Processes one envelope kind.
///
/// Returning `Err` asks the consumer to redeliver later (or dead-letter once
/// the delivery budget is spent). Handlers must therefore be idempotent.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: &QueueEnvelope) -> Result<(), DeskbridgeError>;
}

/// Handlers registered at startup. Kinds without a handler are dropped.
#[derive(Clone, Default)]
pub struct HandlerMap {
    handlers: HashMap<EnvelopeKind, Arc<dyn EnvelopeHandler>>,
}

impl HandlerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: EnvelopeKind, handler: Arc<dyn EnvelopeHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn with(mut self, kind: EnvelopeKind, handler: Arc<dyn EnvelopeHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn get(&self, kind: EnvelopeKind) -> Option<&Arc<dyn EnvelopeHandler>> {
        self.handlers.get(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = EnvelopeKind> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
