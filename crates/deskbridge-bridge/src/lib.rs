// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live bridging between the protocol side and the helpdesk.
//!
//! [`Bridge`] wires the durable queue to one handler per envelope kind and
//! exposes the sync and webhook entry points used by the outer surfaces.

pub mod bridge;
pub mod handlers;
pub mod shutdown;
pub mod webhook;

pub use bridge::{Bridge, BridgeDeps};
pub use handlers::HandlerContext;
pub use shutdown::install_signal_handler;
pub use webhook::WebhookEvent;
