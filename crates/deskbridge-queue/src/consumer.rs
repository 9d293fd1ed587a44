// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consumer side of the queue: fetch, dispatch, acknowledge.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deskbridge_config::model::QueueConfig;
use deskbridge_core::types::DeadLetterRecord;
use deskbridge_core::{DeskbridgeError, EnvelopeKind, QueueEnvelope, Stream};
use deskbridge_storage::queries::queue;
use deskbridge_storage::{Database, QueueDelivery};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::backoff_delay;
use crate::handler::HandlerMap;

/// Durable subscription settings of one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    pub batch_size: usize,
    pub fetch_wait: Duration,
    pub poll_interval: Duration,
    pub ack_wait: Duration,
    pub max_deliveries: u32,
    pub backoff: Vec<Duration>,
}

impl From<&QueueConfig> for ConsumerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            batch_size: config.fetch_batch_size,
            fetch_wait: config.fetch_wait(),
            poll_interval: config.poll_interval(),
            ack_wait: config.ack_wait(),
            max_deliveries: config.max_deliveries,
            backoff: config.backoff(),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    /// No handler for the kind; acked without processing.
    Dropped,
    /// Handler failed; redelivery scheduled after `delay`.
    Retried { delay: Duration },
    DeadLettered,
    /// The row was settled by someone else while we held it.
    Stale,
}

pub struct Consumer {
    db: Database,
    stream: Stream,
    config: ConsumerConfig,
    handlers: Arc<HandlerMap>,
    wake: Arc<Notify>,
}

impl Consumer {
    pub fn new(
        db: Database,
        stream: Stream,
        config: ConsumerConfig,
        handlers: Arc<HandlerMap>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            db,
            stream,
            config,
            handlers,
            wake,
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Consume until `cancel` fires.
    ///
    /// Deliveries claimed by the last fetch but not yet dispatched when
    /// cancellation is observed are returned to the stream without delay.
    pub async fn run(self, cancel: CancellationToken) {
        let stream = self.stream.subject();
        info!(stream, handlers = self.handlers.len(), "consumer running");

        while !cancel.is_cancelled() {
            let batch = match self.fetch(&cancel).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(stream, error = %e, "fetch failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => continue,
                    }
                }
            };

            let mut pending = batch.into_iter();
            for delivery in pending.by_ref() {
                if cancel.is_cancelled() {
                    self.release(&delivery).await;
                    break;
                }
                if let Err(e) = self.process(delivery).await {
                    error!(stream, error = %e, "failed to settle delivery");
                }
            }
            for delivery in pending {
                self.release(&delivery).await;
            }
        }

        info!(stream, "consumer stopped");
    }

    async fn release(&self, delivery: &QueueDelivery) {
        if let Err(e) = queue::nak(&self.db, delivery.id, Duration::ZERO).await {
            warn!(stream = self.stream.subject(), id = delivery.id, error = %e, "failed to release delivery on shutdown");
        }
    }

    /// Claim the next batch, waiting up to `fetch_wait` for one to appear.
    ///
    /// Returns early, possibly empty, once `cancel` fires. A publish in this
    /// process cuts the poll interval short.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueueDelivery>, DeskbridgeError> {
        let deadline = Instant::now() + self.config.fetch_wait;
        loop {
            let batch = queue::fetch(
                &self.db,
                self.stream,
                self.config.batch_size,
                self.config.ack_wait,
            )
            .await?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            let nap = self.config.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Vec::new()),
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Fetch once without waiting and settle everything claimed.
    pub async fn poll_once(&self) -> Result<Vec<Outcome>, DeskbridgeError> {
        let batch = queue::fetch(
            &self.db,
            self.stream,
            self.config.batch_size,
            self.config.ack_wait,
        )
        .await?;
        let mut outcomes = Vec::with_capacity(batch.len());
        for delivery in batch {
            outcomes.push(self.process(delivery).await?);
        }
        Ok(outcomes)
    }

    /// Decode, dispatch and settle one delivery.
    ///
    /// Handler errors never escape: they become a nak or a dead letter.
    /// Only storage failures while settling are returned.
    pub async fn process(&self, delivery: QueueDelivery) -> Result<Outcome, DeskbridgeError> {
        let stream = self.stream.subject();

        let Ok(kind) = delivery.kind.parse::<EnvelopeKind>() else {
            debug!(stream, kind = %delivery.kind, "unknown envelope kind, dropping");
            queue::ack(&self.db, delivery.id).await?;
            return Ok(Outcome::Dropped);
        };
        let Some(handler) = self.handlers.get(kind).cloned() else {
            debug!(stream, %kind, "no handler registered, dropping");
            queue::ack(&self.db, delivery.id).await?;
            return Ok(Outcome::Dropped);
        };

        let mut envelope: QueueEnvelope = match serde_json::from_str(&delivery.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                return self
                    .dead_letter(&delivery, format!("undecodable envelope: {e}"))
                    .await;
            }
        };
        envelope.delivery_attempt = delivery.deliveries;

        match handler.handle(&envelope).await {
            Ok(()) => {
                queue::ack(&self.db, delivery.id).await?;
                debug!(stream, %kind, envelope_id = %envelope.id, "envelope handled");
                Ok(Outcome::Acked)
            }
            Err(e @ DeskbridgeError::Codec { .. }) => {
                self.dead_letter(&delivery, format!("undecodable payload: {e}"))
                    .await
            }
            Err(e) if delivery.deliveries >= self.config.max_deliveries => {
                self.dead_letter(&delivery, e.to_string()).await
            }
            Err(e) => {
                let delay = backoff_delay(&self.config.backoff, delivery.deliveries);
                warn!(
                    stream,
                    %kind,
                    envelope_id = %envelope.id,
                    attempt = delivery.deliveries,
                    max = self.config.max_deliveries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "handler failed, scheduling redelivery"
                );
                queue::nak(&self.db, delivery.id, delay).await?;
                Ok(Outcome::Retried { delay })
            }
        }
    }

    async fn dead_letter(
        &self,
        delivery: &QueueDelivery,
        reason: String,
    ) -> Result<Outcome, DeskbridgeError> {
        let original_envelope = serde_json::from_str(&delivery.payload)
            .unwrap_or_else(|_| serde_json::Value::String(delivery.payload.clone()));
        let record = DeadLetterRecord {
            original_subject: self.stream.subject().to_string(),
            original_envelope,
            failure_reason: reason,
            failed_at: Utc::now(),
        };
        let written = queue::dead_letter_and_ack(
            &self.db,
            delivery.id,
            Some(&delivery.envelope_id),
            &record,
        )
        .await?;
        if !written {
            return Ok(Outcome::Stale);
        }
        error!(
            stream = self.stream.subject(),
            envelope_id = %delivery.envelope_id,
            attempts = delivery.deliveries,
            reason = %record.failure_reason,
            "envelope dead-lettered"
        );
        Ok(Outcome::DeadLettered)
    }
}
