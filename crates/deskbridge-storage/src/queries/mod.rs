// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules: durable queue streams and the protocol mirror.

pub mod mirror;
pub mod queue;
