//! Countdown timer reconstructed from an anchor and the wall clock.
//!
//! Nothing ticks in the background: `seconds` holds the elapsed time at
//! `last_update_time`, and every reader derives the current value on demand.

use serde::{Deserialize, Serialize};

/// Default countdown length for new rooms.
pub const DEFAULT_TARGET_DURATION_SECONDS: u64 = 300;

/// Persisted timer state of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    /// Whether the clock is counting.
    pub running: bool,
    /// Elapsed seconds accumulated up to `last_update_time`.
    pub seconds: u64,
    /// Sub-second part of the accumulated time, carried across pauses.
    #[serde(default)]
    pub carried_ms: u64,
    /// Milliseconds since the Unix epoch.
    pub last_update_time: u64,
    /// Countdown length of a round.
    pub target_duration_seconds: u64,
    /// Elapsed seconds at which the current round started.
    pub round_anchor_seconds: u64,
    /// Re-anchor the round when the votes are reset.
    pub auto_reset_on_votes_reset: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            running: false,
            seconds: 0,
            carried_ms: 0,
            last_update_time: 0,
            target_duration_seconds: DEFAULT_TARGET_DURATION_SECONDS,
            round_anchor_seconds: 0,
            auto_reset_on_votes_reset: true,
        }
    }
}

/// Moderator-supplied timer configuration; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    /// New countdown length, clamped to the floor.
    pub target_duration_seconds: Option<u64>,
    /// New value of [`TimerState::auto_reset_on_votes_reset`].
    pub auto_reset_on_votes_reset: Option<bool>,
    /// Re-anchor the round at the current elapsed time.
    pub reset_countdown: Option<bool>,
}

impl TimerState {
    /// Total elapsed milliseconds at `now_ms`.
    fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let running = if self.running {
            now_ms.saturating_sub(self.last_update_time)
        } else {
            0
        };
        self.seconds * 1000 + self.carried_ms + running
    }

    /// Total elapsed seconds at `now_ms`.
    pub fn elapsed_seconds(&self, now_ms: u64) -> u64 {
        self.elapsed_ms(now_ms) / 1000
    }

    /// Seconds spent in the current round.
    pub fn round_seconds(&self, now_ms: u64) -> u64 {
        self.elapsed_seconds(now_ms)
            .saturating_sub(self.round_anchor_seconds)
    }

    /// Seconds left before the countdown target is reached.
    pub fn remaining_seconds(&self, now_ms: u64) -> u64 {
        self.target_duration_seconds
            .saturating_sub(self.round_seconds(now_ms))
    }

    /// Start counting; returns `false` when already running.
    pub fn start(&mut self, now_ms: u64) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.last_update_time = now_ms;
        true
    }

    /// Freeze the elapsed time; returns `false` when not running.
    pub fn pause(&mut self, now_ms: u64) -> bool {
        if !self.running {
            return false;
        }
        let elapsed = self.elapsed_ms(now_ms);
        self.seconds = elapsed / 1000;
        self.carried_ms = elapsed % 1000;
        self.running = false;
        self.last_update_time = now_ms;
        true
    }

    /// Stop and zero the timer, keeping its configuration.
    pub fn reset(&mut self, now_ms: u64) {
        self.running = false;
        self.seconds = 0;
        self.carried_ms = 0;
        self.round_anchor_seconds = 0;
        self.last_update_time = now_ms;
    }

    /// Start a new round at the current elapsed time without stopping the timer.
    pub fn reanchor(&mut self, now_ms: u64) {
        self.round_anchor_seconds = self.elapsed_seconds(now_ms);
    }

    /// Apply a configuration, clamping the target duration to `floor_seconds`.
    pub fn configure(&mut self, config: &TimerConfig, floor_seconds: u64, now_ms: u64) {
        if let Some(target) = config.target_duration_seconds {
            self.target_duration_seconds = target.max(floor_seconds);
        }
        if let Some(auto_reset) = config.auto_reset_on_votes_reset {
            self.auto_reset_on_votes_reset = auto_reset;
        }
        if config.reset_countdown.unwrap_or(false) {
            self.reanchor(now_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_is_derived_from_the_clock() {
        let mut timer = TimerState::default();
        assert!(timer.start(10_000));
        assert!(!timer.start(11_000));
        assert_eq!(timer.elapsed_seconds(25_000), 15);

        assert!(timer.pause(25_000));
        assert_eq!(timer.elapsed_seconds(90_000), 15);

        assert!(timer.start(100_000));
        assert_eq!(timer.elapsed_seconds(105_000), 20);
    }

    #[test]
    fn reanchor_restarts_the_round_without_stopping() {
        let mut timer = TimerState::default();
        timer.start(0);
        timer.reanchor(40_000);
        assert!(timer.running);
        assert_eq!(timer.round_anchor_seconds, 40);
        assert_eq!(timer.round_seconds(50_000), 10);
        assert_eq!(timer.remaining_seconds(50_000), 290);
    }

    #[test]
    fn configure_clamps_to_floor() {
        let mut timer = TimerState::default();
        timer.configure(
            &TimerConfig {
                target_duration_seconds: Some(5),
                ..TimerConfig::default()
            },
            30,
            0,
        );
        assert_eq!(timer.target_duration_seconds, 30);

        timer.configure(
            &TimerConfig {
                target_duration_seconds: Some(120),
                auto_reset_on_votes_reset: Some(false),
                reset_countdown: None,
            },
            30,
            0,
        );
        assert_eq!(timer.target_duration_seconds, 120);
        assert!(!timer.auto_reset_on_votes_reset);
    }

    #[test]
    fn reset_countdown_reanchors() {
        let mut timer = TimerState::default();
        timer.start(0);
        timer.configure(
            &TimerConfig {
                reset_countdown: Some(true),
                ..TimerConfig::default()
            },
            30,
            75_000,
        );
        assert_eq!(timer.round_anchor_seconds, 75);
        assert!(timer.running);
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut timer = TimerState::default();
        timer.start(0);
        timer.reanchor(10_000);
        timer.reset(20_000);
        assert!(!timer.running);
        assert_eq!(timer.elapsed_seconds(60_000), 0);
        assert_eq!(timer.round_anchor_seconds, 0);
    }

    #[test]
    fn pausing_keeps_sub_second_time() {
        let mut timer = TimerState::default();
        for cycle in 0..4 {
            let start = cycle * 10_000;
            timer.start(start);
            timer.pause(start + 1_600);
        }
        assert_eq!(timer.elapsed_seconds(100_000), 6);
        assert_eq!(timer.carried_ms, 400);

        timer.start(200_000);
        assert_eq!(timer.elapsed_seconds(200_600), 7);
    }
}
