//! Poll timing: back-off schedule and per-kind limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use reviva_core::JobKind;

/// Poll interval schedule: a fixed interval for the first few polls, then
/// multiplicative back-off up to a cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollSchedule {
    /// Interval for the first `fixed_polls` polls.
    pub initial_interval: Duration,
    /// Number of polls at the fixed interval before back-off kicks in.
    pub fixed_polls: u32,
    /// Multiplicative growth factor per poll after the fixed phase.
    pub growth: f64,
    /// Interval cap.
    pub max_interval: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            fixed_polls: 10,
            growth: 1.2,
            max_interval: Duration::from_secs(3),
        }
    }
}

impl PollSchedule {
    /// Delay before the given poll attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        if attempt <= self.fixed_polls {
            return self.initial_interval;
        }

        let base_ms = self.initial_interval.as_millis() as f64;
        let max_ms = self.max_interval.as_millis() as f64;
        let grown = base_ms * self.growth.powi((attempt - self.fixed_polls) as i32);
        Duration::from_millis(grown.min(max_ms) as u64)
    }

    /// How many polls the schedule would have fired within `elapsed`.
    ///
    /// Used by `resume()` to re-enter the loop at the back-off stage matching
    /// the time the process was away, rather than restarting at interval 1.
    pub fn stage_for_elapsed(&self, elapsed: Duration) -> u32 {
        let mut total = Duration::ZERO;
        let mut attempt = 0u32;
        loop {
            let next = self.delay_for_attempt(attempt + 1);
            if total + next > elapsed {
                return attempt;
            }
            total += next;
            attempt += 1;
        }
    }
}

/// Per-kind polling limits: a hard attempt cap and a wall-clock ceiling on
/// how long a job may stay non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    pub max_attempts: u32,
    pub ceiling: Duration,
}

impl KindPolicy {
    /// Defaults: photo edits settle within minutes; video renders take
    /// longer and get a 10-minute ceiling.
    pub fn default_for(kind: JobKind) -> Self {
        match kind {
            JobKind::Photo => Self {
                max_attempts: 120,
                ceiling: Duration::from_secs(5 * 60),
            },
            JobKind::Video => Self {
                max_attempts: 240,
                ceiling: Duration::from_secs(10 * 60),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_ten_polls_are_fixed_one_second() {
        let schedule = PollSchedule::default();
        for attempt in 1..=10 {
            assert_eq!(schedule.delay_for_attempt(attempt), Duration::from_secs(1));
        }
    }

    #[test]
    fn backoff_grows_then_caps_at_three_seconds() {
        let schedule = PollSchedule::default();

        assert_eq!(schedule.delay_for_attempt(11), Duration::from_millis(1200));
        assert_eq!(schedule.delay_for_attempt(12), Duration::from_millis(1440));

        // Growth is capped.
        let late = schedule.delay_for_attempt(40);
        assert_eq!(late, Duration::from_secs(3));
    }

    #[test]
    fn stage_for_elapsed_matches_cumulative_schedule() {
        let schedule = PollSchedule::default();

        // Exactly the first 15 intervals' worth of elapsed time resumes at
        // stage 15, not at interval 1.
        let elapsed: Duration = (1..=15).map(|n| schedule.delay_for_attempt(n)).sum();
        assert_eq!(schedule.stage_for_elapsed(elapsed), 15);

        // Just shy of the first interval: nothing has fired yet.
        assert_eq!(
            schedule.stage_for_elapsed(Duration::from_millis(999)),
            0
        );

        // Ten seconds covers exactly the fixed phase.
        assert_eq!(schedule.stage_for_elapsed(Duration::from_secs(10)), 10);
    }

    #[test]
    fn video_policy_has_longer_ceiling_than_photo() {
        let photo = KindPolicy::default_for(JobKind::Photo);
        let video = KindPolicy::default_for(JobKind::Video);
        assert!(video.ceiling > photo.ceiling);
        assert!(video.max_attempts > photo.max_attempts);
    }
}
