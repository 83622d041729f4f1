//! Stuck/timeout watchdog.
//!
//! Two independent triggers, either sufficient to escalate: a wall-clock
//! ceiling per kind, and a poll-count ceiling for portrait jobs, whose
//! provider is known to silently wedge.

use providers::JobKind;
use std::time::Duration;

/// Watchdog ceilings for one job kind.
#[derive(Debug, Clone)]
pub struct WatchdogLimits {
    /// Elapsed time since the attempt started.
    pub wall_clock: Duration,
    /// Ticks without a terminal status, where applicable.
    pub max_polls: Option<u32>,
}

/// Watchdog decision for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Healthy,
    /// Liveness failure; not eligible for prompt adjustment.
    WallClockExceeded,
    /// Silent wedge; treated like a reported failure, adjustment-eligible.
    PollCountExceeded,
}

impl WatchdogLimits {
    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::Portrait => Self {
                wall_clock: Duration::from_secs(5 * 60),
                max_polls: Some(60),
            },
            JobKind::Video | JobKind::Poster => Self {
                wall_clock: Duration::from_secs(5 * 60),
                max_polls: None,
            },
            JobKind::Trailer => Self {
                wall_clock: Duration::from_secs(15 * 60),
                max_polls: None,
            },
        }
    }

    /// Check conditions before issuing the next status query.
    pub fn check(&self, elapsed: Duration, poll_count: u32) -> WatchdogVerdict {
        if elapsed >= self.wall_clock {
            return WatchdogVerdict::WallClockExceeded;
        }
        if let Some(max) = self.max_polls {
            if poll_count >= max {
                return WatchdogVerdict::PollCountExceeded;
            }
        }
        WatchdogVerdict::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_trip() {
        let limits = WatchdogLimits::for_kind(JobKind::Video);
        assert_eq!(
            limits.check(Duration::from_secs(299), 1000),
            WatchdogVerdict::Healthy
        );
        assert_eq!(
            limits.check(Duration::from_secs(300), 0),
            WatchdogVerdict::WallClockExceeded
        );
    }

    #[test]
    fn test_poll_count_trip_is_portrait_only() {
        let portrait = WatchdogLimits::for_kind(JobKind::Portrait);
        assert_eq!(
            portrait.check(Duration::from_secs(10), 59),
            WatchdogVerdict::Healthy
        );
        assert_eq!(
            portrait.check(Duration::from_secs(10), 60),
            WatchdogVerdict::PollCountExceeded
        );

        let trailer = WatchdogLimits::for_kind(JobKind::Trailer);
        assert_eq!(
            trailer.check(Duration::from_secs(10), 10_000),
            WatchdogVerdict::Healthy
        );
    }

    #[test]
    fn test_wall_clock_takes_precedence() {
        let portrait = WatchdogLimits::for_kind(JobKind::Portrait);
        assert_eq!(
            portrait.check(Duration::from_secs(600), 600),
            WatchdogVerdict::WallClockExceeded
        );
    }

    #[test]
    fn test_trailer_ceiling_is_longer() {
        let trailer = WatchdogLimits::for_kind(JobKind::Trailer);
        assert_eq!(
            trailer.check(Duration::from_secs(600), 0),
            WatchdogVerdict::Healthy
        );
        assert_eq!(
            trailer.check(Duration::from_secs(900), 0),
            WatchdogVerdict::WallClockExceeded
        );
    }
}
