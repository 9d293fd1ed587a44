// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator contracts at the edges of the bridge.
//!
//! The helpdesk REST API and the chat protocol client are external systems;
//! the pipeline only sees them through these `#[async_trait]` traits.

pub mod helpdesk;
pub mod protocol;

pub use helpdesk::HelpdeskApi;
pub use protocol::{LidResolver, ProtocolClient};
