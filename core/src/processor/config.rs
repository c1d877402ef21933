//! Tunables for a single processor's polling cycle.
use std::time::Duration;

/// Configuration for one registered processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub processor_id: &'static str,
    pub polling_interval: Duration,
    pub batch_size: usize,
    pub enabled: bool,
    pub max_errors: u32,
    pub backoff: BackoffConfig,
}

impl ProcessorConfig {
    pub fn new(processor_id: &'static str, polling_interval: Duration, batch_size: usize) -> Self {
        Self {
            processor_id,
            polling_interval,
            batch_size,
            enabled: true,
            max_errors: 5,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Exponential backoff engaged after `threshold` consecutive empty polls.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub enabled: bool,
    pub threshold: u32,
    pub multiplier: u32,
    pub max_seconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3,
            multiplier: 2,
            max_seconds: 300,
        }
    }
}

/// Tracks empty-poll accounting and the resulting skip count for a single
/// processor, per the cycle described in `crate::processor::runtime`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    pub consecutive_empty: u32,
    pub skip_cycles: u32,
}

impl BackoffState {
    /// Called when a poll returned at least one event: resets accounting.
    pub fn on_events_handled(&mut self) {
        self.consecutive_empty = 0;
        self.skip_cycles = 0;
    }

    /// Called when a poll returned zero events. `polling_interval` is the
    /// processor's own cycle interval, used to turn `max_seconds` into a
    /// ceiling on skipped cycles. Returns whether this cycle should now be
    /// counted as "skipped" on account of backoff.
    pub fn on_empty_poll(&mut self, config: &BackoffConfig, polling_interval: Duration) {
        if !config.enabled {
            return;
        }
        self.consecutive_empty += 1;
        if self.consecutive_empty >= config.threshold {
            let poll_secs = 1u64.max(polling_interval.as_secs());
            let max_skips = (config.max_seconds / poll_secs).max(1) as u32;
            self.skip_cycles = if self.skip_cycles == 0 {
                1
            } else {
                (self.skip_cycles * config.multiplier).min(max_skips)
            };
        }
    }

    /// Called at the top of a cycle, before fetching. Returns true if this
    /// cycle should be skipped entirely (and decrements the counter).
    pub fn should_skip(&mut self) -> bool {
        if self.skip_cycles > 0 {
            self.skip_cycles -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_engages_at_threshold_and_doubles() {
        let config = BackoffConfig {
            enabled: true,
            threshold: 3,
            multiplier: 2,
            max_seconds: 300,
        };
        let polling_interval = Duration::from_secs(1);
        let mut state = BackoffState::default();
        state.on_empty_poll(&config, polling_interval);
        assert_eq!(state.skip_cycles, 0);
        state.on_empty_poll(&config, polling_interval);
        assert_eq!(state.skip_cycles, 0);
        state.on_empty_poll(&config, polling_interval);
        assert_eq!(state.skip_cycles, 1);
        state.on_empty_poll(&config, polling_interval);
        assert_eq!(state.skip_cycles, 2);
    }

    #[test]
    fn max_skips_ceiling_is_derived_from_the_real_polling_interval_not_the_threshold() {
        // threshold=5 (occasionally misread as the interval), polling every 2s,
        // max_seconds=20 -> ceiling is 20/2=10, not 20/5=4.
        let config = BackoffConfig {
            enabled: true,
            threshold: 5,
            multiplier: 100,
            max_seconds: 20,
        };
        let mut state = BackoffState::default();
        for _ in 0..5 {
            state.on_empty_poll(&config, Duration::from_secs(2));
        }
        assert_eq!(state.skip_cycles, 1);
        state.on_empty_poll(&config, Duration::from_secs(2));
        assert_eq!(state.skip_cycles, 10);
    }

    #[test]
    fn events_handled_resets_backoff() {
        let config = BackoffConfig::default();
        let mut state = BackoffState {
            consecutive_empty: 5,
            skip_cycles: 4,
        };
        state.on_events_handled();
        assert_eq!(state, BackoffState::default());
        let _ = config;
    }

    #[test]
    fn should_skip_decrements_the_counter() {
        let mut state = BackoffState {
            consecutive_empty: 0,
            skip_cycles: 2,
        };
        assert!(state.should_skip());
        assert_eq!(state.skip_cycles, 1);
        assert!(state.should_skip());
        assert_eq!(state.skip_cycles, 0);
        assert!(!state.should_skip());
    }
}
