// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The composition root.
//!
//! [`Bridge`] owns every shared structure (database, caches, status tracker,
//! publisher) and hands `Arc`s of them to the handlers, the consumers and the
//! sync engine. Nothing in the workspace reaches for a global.

use std::sync::Arc;
use std::time::Duration;

use deskbridge_cache::CacheRegistry;
use deskbridge_config::model::DeskbridgeConfig;
use deskbridge_core::types::SyncStatus;
use deskbridge_core::{
    DeskbridgeError, EnvelopeKind, HelpdeskApi, LidResolver, ProtocolClient, QueueEnvelope,
    Stream,
};
use deskbridge_helpdesk::HelpdeskDb;
use deskbridge_queue::{Consumer, ConsumerConfig, HandlerMap, Publisher};
use deskbridge_storage::{Database, MirrorLidResolver};
use deskbridge_sync::{
    ConversationResolver, LocatorFetcher, MediaFetcher, MediaUploadPool, ResolverSettings,
    SyncDeps, SyncEngine, SyncStatusTracker,
};
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::handlers::{
    DeletionHandler, HandlerContext, InboundMessageHandler, ReactionHandler, SendMediaHandler,
    SendTextHandler,
};
use crate::shutdown::drain_tasks;
use crate::webhook::WebhookEvent;

/// External collaborators the bridge cannot build itself.
pub struct BridgeDeps {
    pub helpdesk: Arc<dyn HelpdeskApi>,
    pub protocol: Arc<dyn ProtocolClient>,
    /// Defaults to the mirror's own linked-identity table.
    pub lids: Option<Arc<dyn LidResolver>>,
    /// Defaults to [`LocatorFetcher`].
    pub fetcher: Option<Arc<dyn MediaFetcher>>,
}

pub struct Bridge {
    config: DeskbridgeConfig,
    db: Database,
    publisher: Arc<Publisher>,
    caches: Arc<CacheRegistry>,
    status: Arc<SyncStatusTracker>,
    handlers: Arc<HandlerMap>,
    ctx: Arc<HandlerContext>,
    fetcher: Arc<dyn MediaFetcher>,
    engine: OnceCell<Arc<SyncEngine>>,
    shutdown: CancellationToken,
}

impl Bridge {
    /// Open the local database named by the configuration and wire up.
    pub async fn open(
        config: DeskbridgeConfig,
        deps: BridgeDeps,
        shutdown: CancellationToken,
    ) -> Result<Self, DeskbridgeError> {
        let db =
            Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;
        Ok(Self::new(config, db, deps, shutdown))
    }

    pub fn new(
        config: DeskbridgeConfig,
        db: Database,
        deps: BridgeDeps,
        shutdown: CancellationToken,
    ) -> Self {
        let caches = Arc::new(CacheRegistry::from_config(&config.cache));
        let status = Arc::new(SyncStatusTracker::new());
        let publisher = Arc::new(Publisher::new(db.clone()));
        let lids = deps
            .lids
            .unwrap_or_else(|| Arc::new(MirrorLidResolver::new(db.clone())));
        let fetcher = deps.fetcher.unwrap_or_else(|| {
            Arc::new(LocatorFetcher::new(Duration::from_secs(
                config.media.download_timeout_secs,
            )))
        });
        let resolver = Arc::new(ConversationResolver::new(
            Arc::clone(&deps.helpdesk),
            Arc::clone(&deps.protocol),
            Arc::clone(&caches),
            ResolverSettings::from_config(&config),
        ));
        let media = Arc::new(MediaUploadPool::from_config(
            Arc::clone(&deps.helpdesk),
            Arc::clone(&fetcher),
            &config.media,
        ));
        let ctx = Arc::new(HandlerContext {
            mirror: db.clone(),
            caches: Arc::clone(&caches),
            status: Arc::clone(&status),
            helpdesk: deps.helpdesk,
            protocol: deps.protocol,
            lids,
            resolver,
            media,
            shutdown: shutdown.clone(),
        });
        let handlers = Arc::new(handler_map(&ctx));

        Self {
            config,
            db,
            publisher,
            caches,
            status,
            handlers,
            ctx,
            fetcher,
            engine: OnceCell::new(),
            shutdown,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// The durable consumer of `stream`, sharing the bridge's handlers.
    pub fn consumer(&self, stream: Stream) -> Consumer {
        Consumer::new(
            self.db.clone(),
            stream,
            ConsumerConfig::from(&self.config.queue),
            Arc::clone(&self.handlers),
            self.publisher.notifier(stream),
        )
    }

    /// Append an event to the stream its kind travels on.
    pub async fn publish<T: Serialize>(
        &self,
        kind: EnvelopeKind,
        session_id: &str,
        payload: &T,
    ) -> Result<QueueEnvelope, DeskbridgeError> {
        self.publisher
            .publish(kind.stream(), kind, session_id, payload)
            .await
    }

    /// Queue the send a helpdesk webhook asks for.
    ///
    /// Returns `None` for events that are not agent replies.
    pub async fn enqueue_webhook(
        &self,
        session_id: &str,
        event: WebhookEvent,
    ) -> Result<Option<QueueEnvelope>, DeskbridgeError> {
        let Some((kind, payload)) = event.into_outbound()? else {
            return Ok(None);
        };
        let envelope = self.publish(kind, session_id, &payload).await?;
        info!(
            session_id,
            kind = %kind,
            helpdesk_message_id = payload.helpdesk_message_id,
            "webhook queued"
        );
        Ok(Some(envelope))
    }

    /// Start a full history sync of a session in the background.
    ///
    /// Fails immediately, before anything is written, when the helpdesk
    /// database is not configured or not usable, or when the session is
    /// already syncing.
    pub async fn start_sync(
        &self,
        session_id: &str,
        days_limit: Option<u32>,
    ) -> Result<JoinHandle<SyncStatus>, DeskbridgeError> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                let helpdesk_db = HelpdeskDb::from_config(&self.config.helpdesk).await?;
                Ok::<_, DeskbridgeError>(Arc::new(SyncEngine::new(
                    &self.config,
                    SyncDeps {
                        mirror: self.db.clone(),
                        helpdesk_db,
                        helpdesk: Arc::clone(&self.ctx.helpdesk),
                        protocol: Arc::clone(&self.ctx.protocol),
                        lids: Arc::clone(&self.ctx.lids),
                        fetcher: Arc::clone(&self.fetcher),
                        status: Arc::clone(&self.status),
                    },
                )))
            })
            .await?;
        engine
            .start(session_id, days_limit, self.shutdown.child_token())
            .await
    }

    pub fn sync_status(&self, session_id: &str) -> SyncStatus {
        self.status.get(session_id)
    }

    /// Consume both streams until shutdown, then give in-flight handlers
    /// `grace` to finish.
    pub async fn run(&self, grace: Duration) {
        info!(handlers = self.handlers.len(), "bridge running");
        let tasks: Vec<JoinHandle<()>> = Stream::ALL
            .into_iter()
            .map(|stream| tokio::spawn(self.consumer(stream).run(self.shutdown.clone())))
            .collect();
        self.shutdown.cancelled().await;
        info!("bridge shutting down");
        drain_tasks(tasks, grace).await;
    }
}

fn handler_map(ctx: &Arc<HandlerContext>) -> HandlerMap {
    let inbound = Arc::new(InboundMessageHandler::new(Arc::clone(ctx)));
    HandlerMap::new()
        .with(EnvelopeKind::IncomingMessage, inbound.clone())
        .with(EnvelopeKind::OutgoingMessageSent, inbound)
        .with(
            EnvelopeKind::Reaction,
            Arc::new(ReactionHandler::new(Arc::clone(ctx))),
        )
        .with(
            EnvelopeKind::Deletion,
            Arc::new(DeletionHandler::new(Arc::clone(ctx))),
        )
        .with(
            EnvelopeKind::SendText,
            Arc::new(SendTextHandler::new(Arc::clone(ctx))),
        )
        .with(
            EnvelopeKind::SendMedia,
            Arc::new(SendMediaHandler::new(Arc::clone(ctx))),
        )
}
