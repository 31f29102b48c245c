//! Timed-lock configuration.
//!
//! One tunable: how often a contended `mtx_timedlock` re-polls the mutex.
//! A second switch picks between the polling emulation and a native
//! deadline lock, for targets that have one.
//!
//! Resolution order for the process default:
//! 1. [`set_default`] (programmatic override),
//! 2. `C11THREADS_TIMEDLOCK_CHECK_NS` / `C11THREADS_TIMEDLOCK_STRATEGY`,
//! 3. built-in defaults.
//!
//! Callers can bypass the process default entirely by passing a
//! [`TimedLockConfig`] to the `*_with` lock variants.

use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;

use crate::time::{ClockError, TimeSpan};

/// Environment variable holding the check interval in nanoseconds.
pub const CHECK_INTERVAL_ENV: &str = "C11THREADS_TIMEDLOCK_CHECK_NS";
/// Environment variable selecting `polling` or `native`.
pub const STRATEGY_ENV: &str = "C11THREADS_TIMEDLOCK_STRATEGY";

/// Default poll interval for a contended timed lock.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_micros(1);

/// How a timed lock waits for a contended mutex.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimedLockStrategy {
    /// Try-lock / sleep loop, portable to every target.
    #[default]
    Polling,
    /// Hand the deadline to the platform's own timed lock where it exists;
    /// targets without one fall back to polling.
    Native,
}

impl TimedLockStrategy {
    /// Parse from string (case-insensitive). Unknown values mean `Polling`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "os" | "platform" => Self::Native,
            _ => Self::Polling,
        }
    }
}

/// Timed-lock tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimedLockConfig {
    /// Upper bound on each sleep between polls. Zero makes the loop
    /// yield-only.
    pub check_interval: Duration,
    pub strategy: TimedLockStrategy,
}

impl Default for TimedLockConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            strategy: TimedLockStrategy::Polling,
        }
    }
}

impl TimedLockConfig {
    #[must_use]
    pub fn polling(check_interval: Duration) -> Self {
        Self {
            check_interval,
            strategy: TimedLockStrategy::Polling,
        }
    }

    /// Reads the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Values that do not
    /// parse keep their default.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(raw) = lookup(CHECK_INTERVAL_ENV)
            && let Ok(ns) = raw.trim().parse::<u64>()
        {
            cfg.check_interval = Duration::from_nanos(ns);
        }
        if let Some(raw) = lookup(STRATEGY_ENV) {
            cfg.strategy = TimedLockStrategy::from_str_loose(&raw);
        }
        cfg
    }

    /// The check interval as a timespec-resolution span.
    pub fn check_span(&self) -> Result<TimeSpan, ClockError> {
        TimeSpan::from_duration(self.check_interval)
    }
}

fn default_slot() -> &'static RwLock<Option<TimedLockConfig>> {
    static SLOT: OnceLock<RwLock<Option<TimedLockConfig>>> = OnceLock::new();
    SLOT.get_or_init(|| RwLock::new(None))
}

/// The process-wide default, resolving the environment on first use.
#[must_use]
pub fn default_config() -> TimedLockConfig {
    if let Some(cfg) = *default_slot().read() {
        return cfg;
    }
    let resolved = TimedLockConfig::from_env();
    *default_slot().write().get_or_insert(resolved)
}

/// Replaces the process-wide default.
pub fn set_default(cfg: TimedLockConfig) {
    *default_slot().write() = Some(cfg);
}

/// Drops any cached or overridden default so the next read re-resolves.
#[doc(hidden)]
pub fn reset_default_for_tests() {
    *default_slot().write() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let cfg = TimedLockConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg, TimedLockConfig::default());
        assert_eq!(cfg.check_interval, Duration::from_nanos(1_000));
        assert_eq!(cfg.strategy, TimedLockStrategy::Polling);
    }

    #[test]
    fn env_overrides_interval_and_strategy() {
        let cfg = TimedLockConfig::from_lookup(lookup(&[
            (CHECK_INTERVAL_ENV, " 250000 "),
            (STRATEGY_ENV, "Native"),
        ]));
        assert_eq!(cfg.check_interval, Duration::from_micros(250));
        assert_eq!(cfg.strategy, TimedLockStrategy::Native);
    }

    #[test]
    fn garbage_env_keeps_defaults() {
        let cfg = TimedLockConfig::from_lookup(lookup(&[
            (CHECK_INTERVAL_ENV, "-5"),
            (STRATEGY_ENV, "turbo"),
        ]));
        assert_eq!(cfg, TimedLockConfig::default());
    }

    #[test]
    fn zero_interval_is_allowed() {
        let cfg = TimedLockConfig::from_lookup(lookup(&[(CHECK_INTERVAL_ENV, "0")]));
        assert!(cfg.check_span().unwrap().is_zero());
    }

    #[test]
    fn override_wins_until_reset() {
        let custom = TimedLockConfig::polling(Duration::from_micros(42));
        set_default(custom);
        assert_eq!(default_config(), custom);
        reset_default_for_tests();
        assert_eq!(default_config(), TimedLockConfig::from_env());
    }
}
