// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded, rate-limited media upload pool.
//!
//! A fixed number of workers drain a shared job queue. Every upload first
//! takes a token from a bucket shared by all workers, so the pool never
//! exceeds the configured uploads per second whatever the worker count.
//! Each job yields exactly one result; failures are reported, never raised.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deskbridge_config::model::MediaConfig;
use deskbridge_core::traits::helpdesk::AttachmentUpload;
use deskbridge_core::types::{MediaUploadJob, MediaUploadResult};
use deskbridge_core::{DeskbridgeError, HelpdeskApi};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::limiter::TokenBucket;

const DEFAULT_MIME: &str = "application/octet-stream";

/// Loads the bytes behind a media locator.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, DeskbridgeError>;
}

/// Fetches `http(s)://` locators over HTTP and anything else from disk.
pub struct LocatorFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl LocatorFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl MediaFetcher for LocatorFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<u8>, DeskbridgeError> {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            let response = self
                .client
                .get(locator)
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| DeskbridgeError::Helpdesk {
                    message: format!("media download failed: {e}"),
                    status: None,
                    source: Some(Box::new(e)),
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(DeskbridgeError::Helpdesk {
                    message: format!("media download returned {status}"),
                    status: Some(status.as_u16()),
                    source: None,
                });
            }
            let bytes = response.bytes().await.map_err(|e| DeskbridgeError::Helpdesk {
                message: format!("media body read failed: {e}"),
                status: None,
                source: Some(Box::new(e)),
            })?;
            return Ok(bytes.to_vec());
        }
        let path = locator.strip_prefix("file://").unwrap_or(locator);
        tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DeskbridgeError::not_found("media", path)
            } else {
                DeskbridgeError::Storage {
                    source: Box::new(e),
                }
            }
        })
    }
}

pub struct MediaUploadPool {
    helpdesk: Arc<dyn HelpdeskApi>,
    fetcher: Arc<dyn MediaFetcher>,
    limiter: Arc<TokenBucket>,
    workers: usize,
}

impl MediaUploadPool {
    /// The bucket's burst equals the worker count.
    pub fn new(
        helpdesk: Arc<dyn HelpdeskApi>,
        fetcher: Arc<dyn MediaFetcher>,
        workers: usize,
        rate_per_sec: f64,
    ) -> Self {
        let workers = workers.max(1);
        Self {
            helpdesk,
            fetcher,
            limiter: Arc::new(TokenBucket::new(rate_per_sec, workers)),
            workers,
        }
    }

    pub fn from_config(
        helpdesk: Arc<dyn HelpdeskApi>,
        fetcher: Arc<dyn MediaFetcher>,
        config: &MediaConfig,
    ) -> Self {
        Self::new(helpdesk, fetcher, config.workers, config.rate_per_sec)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Upload a single job under the same rate limit as the batches,
    /// returning the created helpdesk message id.
    pub async fn upload(
        &self,
        job: &MediaUploadJob,
        cancel: &CancellationToken,
    ) -> Result<i64, DeskbridgeError> {
        upload_one(&*self.helpdesk, &*self.fetcher, &self.limiter, job, cancel).await
    }

    /// Upload every job, returning one result per job ordered by index.
    ///
    /// Jobs not started when `cancel` fires are reported as cancelled.
    pub async fn process_batch(
        &self,
        jobs: Vec<MediaUploadJob>,
        cancel: &CancellationToken,
    ) -> Vec<MediaUploadResult> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let total = jobs.len();
        let queue = Arc::new(Mutex::new(
            jobs.into_iter().enumerate().collect::<VecDeque<_>>(),
        ));
        let mut set = JoinSet::new();
        for worker in 0..self.workers.min(total) {
            let queue = Arc::clone(&queue);
            let helpdesk = Arc::clone(&self.helpdesk);
            let fetcher = Arc::clone(&self.fetcher);
            let limiter = Arc::clone(&self.limiter);
            let cancel = cancel.clone();
            set.spawn(async move {
                let mut results = Vec::new();
                loop {
                    let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                    let Some((index, job)) = next else { break };
                    let outcome = upload_one(&*helpdesk, &*fetcher, &limiter, &job, &cancel).await;
                    results.push(into_result(index, job.source_id, outcome));
                }
                debug!(worker, uploads = results.len(), "media worker drained");
                results
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(batch) => results.extend(batch),
                Err(e) => warn!(error = %e, "media worker panicked"),
            }
        }
        // account for jobs lost to a panicked worker
        if results.len() < total {
            let mut seen = vec![false; total];
            for r in &results {
                seen[r.index] = true;
            }
            let leftover: Vec<(usize, MediaUploadJob)> =
                queue.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
            for (index, job) in leftover {
                seen[index] = true;
                results.push(into_result(index, job.source_id, Err(DeskbridgeError::Cancelled)));
            }
            for (index, done) in seen.into_iter().enumerate() {
                if !done {
                    results.push(MediaUploadResult {
                        index,
                        source_id: String::new(),
                        success: false,
                        message_id: None,
                        error: Some("media worker failed".into()),
                    });
                }
            }
        }
        results.sort_by_key(|r| r.index);

        let uploaded = results.iter().filter(|r| r.success).count();
        info!(total, uploaded, failed = total - uploaded, "media batch finished");
        results
    }
}

fn into_result(
    index: usize,
    source_id: String,
    outcome: Result<i64, DeskbridgeError>,
) -> MediaUploadResult {
    match outcome {
        Ok(message_id) => MediaUploadResult {
            index,
            source_id,
            success: true,
            message_id: Some(message_id),
            error: None,
        },
        Err(e) => MediaUploadResult {
            index,
            source_id,
            success: false,
            message_id: None,
            error: Some(e.to_string()),
        },
    }
}

async fn upload_one(
    helpdesk: &dyn HelpdeskApi,
    fetcher: &dyn MediaFetcher,
    limiter: &TokenBucket,
    job: &MediaUploadJob,
    cancel: &CancellationToken,
) -> Result<i64, DeskbridgeError> {
    if cancel.is_cancelled() {
        return Err(DeskbridgeError::Cancelled);
    }
    limiter.acquire(cancel).await?;
    let bytes = fetcher.fetch(&job.locator).await?;
    let upload = AttachmentUpload {
        file_name: file_name(job),
        mime_type: job.mime_type.clone().unwrap_or_else(|| DEFAULT_MIME.to_string()),
        bytes,
        caption: caption(job),
        direction: job.direction,
        source_id: job.source_id.clone(),
        timestamp: job.timestamp,
    };
    let message = helpdesk.upload_attachment(job.conversation_id, &upload).await?;
    Ok(message.id)
}

fn file_name(job: &MediaUploadJob) -> String {
    if let Some(name) = job.file_name.as_deref().filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    let path = job.locator.split(['?', '#']).next().unwrap_or(&job.locator);
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("attachment")
        .to_string()
}

/// Group attachments name their sender above the caption.
fn caption(job: &MediaUploadJob) -> Option<String> {
    let caption = job.caption.as_deref().filter(|c| !c.is_empty());
    match (job.sender_prefix.as_deref(), caption) {
        (Some(prefix), Some(caption)) => Some(format!("{prefix}\n{caption}")),
        (Some(prefix), None) => Some(prefix.to_string()),
        (None, caption) => caption.map(str::to_string),
    }
}
