//! Bounded exponential backoff for session reconnects.

use std::time::Duration;

/// Delay before reconnect attempt number `attempt` (1-based): `base * 2^(n-1)`.
///
/// The exponent is clamped so large attempt numbers cannot overflow the
/// duration arithmetic; the ceiling on attempts themselves is enforced by the
/// session manager.
pub fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base * 2u32.pow(exponent)
}
