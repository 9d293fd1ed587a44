// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for deskbridge integration tests.
//!
//! Provides mock collaborators and a harness for fast, deterministic tests
//! without a helpdesk server or a live protocol session.
//!
//! # Components
//!
//! - [`MockHelpdesk`] - in-memory `HelpdeskApi` recording every call
//! - [`MockProtocol`] - `ProtocolClient` with canned lookups and captured sends
//! - [`TestHarness`] - temp databases plus both mocks

pub mod fixtures;
pub mod harness;
pub mod mock_helpdesk;
pub mod mock_protocol;

pub use harness::TestHarness;
pub use mock_helpdesk::{MockHelpdesk, RecordedMessage};
pub use mock_protocol::{MockProtocol, SentItem};
