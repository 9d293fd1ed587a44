// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable queue between the protocol side and the helpdesk.
//!
//! Envelopes are appended to one of two streams in the local database by a
//! [`Publisher`] and pulled in small batches by one [`Consumer`] per stream.
//! Consumers dispatch by [`EnvelopeKind`](deskbridge_core::EnvelopeKind)
//! through a [`HandlerMap`] and ack, nak with backoff, or dead-letter
//! depending on the outcome.

pub mod backoff;
pub mod consumer;
pub mod handler;
pub mod publisher;

pub use backoff::backoff_delay;
pub use consumer::{Consumer, ConsumerConfig, Outcome};
pub use handler::{EnvelopeHandler, HandlerMap};
pub use publisher::Publisher;
