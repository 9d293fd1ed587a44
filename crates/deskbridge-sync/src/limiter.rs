// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token bucket shared by the media upload workers.

use std::sync::Mutex;
use std::time::Duration;

use deskbridge_core::DeskbridgeError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Refills at `rate` tokens per second up to `burst`; starts full.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    /// `rate` must be positive; `burst` is at least one token.
    pub fn new(rate: f64, burst: usize) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            rate: if rate > 0.0 { rate } else { 1.0 },
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Take a token, or return how long until one is available.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate))
        }
    }

    /// Wait for a token. Fails with `Cancelled` once `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), DeskbridgeError> {
        loop {
            let wait = match self.try_take() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            tokio::select! {
                () = cancel.cancelled() => return Err(DeskbridgeError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}
