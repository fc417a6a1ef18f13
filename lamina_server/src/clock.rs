// Copyright 2026 the Lamina Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Monotonic host clock reads.
//!
//! Every timestamp in the compositor (vsync samples, fence signal times,
//! listener deadlines) is a [`HostTime`] on `CLOCK_MONOTONIC`. Condition
//! variable waits need an [`Instant`]; [`deadline`] maps between the two.

use std::time::Instant;

use lamina_core::time::{HostTime, NANOS_PER_SECOND};
use rustix::time::{ClockId, Timespec, clock_gettime};

/// Returns the current monotonic host time in nanoseconds.
#[must_use]
pub fn now() -> HostTime {
    timespec_to_host_time(clock_gettime(ClockId::Monotonic))
}

/// Returns the [`Instant`] at which `at` will be reached, measured from now.
///
/// Times in the past map to the current instant.
#[must_use]
pub fn deadline(at: HostTime) -> Instant {
    let wait = at.saturating_duration_since(now());
    Instant::now() + wait.to_std()
}

fn timespec_to_host_time(timespec: Timespec) -> HostTime {
    let seconds = i64::try_from(timespec.tv_sec).unwrap_or(0);
    let nanos = i64::try_from(timespec.tv_nsec)
        .unwrap_or(0)
        .clamp(0, 999_999_999);
    let ticks = seconds
        .saturating_mul(NANOS_PER_SECOND)
        .saturating_add(nanos);
    HostTime(ticks)
}

#[cfg(test)]
mod tests {
    use super::{deadline, now, timespec_to_host_time};
    use lamina_core::time::{Duration, HostTime};
    use rustix::time::Timespec;

    #[test]
    fn now_is_monotonic_non_decreasing() {
        let first = now();
        let second = now();
        assert!(second >= first, "monotonic clock should not go backwards");
    }

    #[test]
    fn timespec_conversion_uses_nanoseconds() {
        let ts = Timespec {
            tv_sec: 2,
            tv_nsec: 500,
        };
        assert_eq!(timespec_to_host_time(ts), HostTime(2_000_000_500));
    }

    #[test]
    fn timespec_conversion_clamps_invalid_nanos() {
        let ts = Timespec {
            tv_sec: 1,
            tv_nsec: 2_000_000_000,
        };
        assert_eq!(timespec_to_host_time(ts), HostTime(1_999_999_999));
    }

    #[test]
    fn past_deadline_is_not_in_the_future() {
        let before = std::time::Instant::now();
        let d = deadline(now() - Duration::from_millis(50));
        assert!(d <= std::time::Instant::now(), "past deadline must not wait");
        assert!(d >= before, "deadline should not precede the call");
    }
}
