//! Tick clock and time conversions
//!
//! The kernel measures time exclusively in ticks of a monotonic counter
//! advanced by the tick handler. A timeout of [`MAX_TIMEOUT`] means "wait
//! forever"; a timeout of `0` means "do not wait".

/// Unsigned integer type representing a tick count or a duration in ticks.
pub type Time32 = u32;

/// Timeout value denoting an infinite wait.
pub const MAX_TIMEOUT: Time32 = Time32::MAX;

/// Convert a duration in milliseconds to ticks, rounding up so that a
/// non-zero wait never degenerates to a zero-tick (non-blocking) one.
pub(crate) fn ms_to_ticks(tick_period_ms: u32, ms: u32) -> Time32 {
    if ms == u32::MAX {
        return MAX_TIMEOUT;
    }
    let period = tick_period_ms.max(1);
    (ms / period) + u32::from(ms % period != 0)
}

/// Convert a tick count to milliseconds, saturating on overflow.
pub(crate) fn ticks_to_ms(tick_period_ms: u32, ticks: Time32) -> u32 {
    ticks.saturating_mul(tick_period_ms)
}

/// Absolute expiry tick for a relative timeout, or `None` for an infinite
/// timeout. Saturates just below `MAX_TIMEOUT` so the sentinel stays
/// unreachable.
pub(crate) fn expiry(now: Time32, timeout: Time32) -> Option<Time32> {
    if timeout == MAX_TIMEOUT {
        None
    } else {
        Some(now.saturating_add(timeout).min(MAX_TIMEOUT - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_round_trip() {
        assert_eq!(ms_to_ticks(10, 0), 0);
        assert_eq!(ms_to_ticks(10, 10), 1);
        assert_eq!(ms_to_ticks(10, 15), 2);
        assert_eq!(ms_to_ticks(10, 5000), 500);
        assert_eq!(ticks_to_ms(10, 500), 5000);
    }

    #[test]
    fn infinite_is_preserved() {
        assert_eq!(ms_to_ticks(10, u32::MAX), MAX_TIMEOUT);
        assert_eq!(expiry(42, MAX_TIMEOUT), None);
    }

    #[test]
    fn expiry_saturates() {
        assert_eq!(expiry(0, 7), Some(7));
        assert_eq!(expiry(MAX_TIMEOUT - 3, 100), Some(MAX_TIMEOUT - 1));
    }
}
