// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// Redelivery delay after the `attempt`-th failed delivery (1-based).
///
/// Attempts past the end of the schedule reuse its last step. An empty
/// schedule means immediate redelivery.
pub fn backoff_delay(schedule: &[Duration], attempt: u32) -> Duration {
    if schedule.is_empty() {
        return Duration::ZERO;
    }
    let idx = (attempt.saturating_sub(1) as usize).min(schedule.len() - 1);
    schedule[idx]
}
