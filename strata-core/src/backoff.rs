//! Delay policy between poll ticks and retry attempts
//!
//! Call sites never pick their own sleep durations: a [`DelayPolicy`] comes from
//! configuration and a [`Backoff`] walks it.
//!
//! The exponential policy doubles from `initial` (100ms by default), never
//! exceeds `max` (10s), never drops below `min`, and is never zero:
//!
//! ```
//! use std::time::Duration;
//! use strata_core::backoff::{Backoff, DelayPolicy};
//!
//! let mut backoff = Backoff::new(DelayPolicy::default());
//! assert_eq!(backoff.next_delay(), Duration::from_millis(100));
//! assert_eq!(backoff.next_delay(), Duration::from_millis(200));
//! assert_eq!(backoff.next_delay(), Duration::from_millis(400));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_str;

/// How long to wait between two consecutive calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DelayPolicy {
    /// Always wait the same interval
    Fixed {
        #[serde(with = "duration_str")]
        interval: Duration,
    },
    /// Double the delay after every call, clamped to `[min, max]`
    Exponential {
        #[serde(with = "duration_str")]
        initial: Duration,
        #[serde(with = "duration_str")]
        max: Duration,
        #[serde(with = "duration_str", default)]
        min: Duration,
    },
}

impl Default for DelayPolicy {
    fn default() -> Self {
        DelayPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            min: Duration::ZERO,
        }
    }
}

impl DelayPolicy {
    pub fn fixed(interval: Duration) -> Self {
        DelayPolicy::Fixed { interval }
    }

    /// Raise the floor of an exponential policy (a fixed policy is returned as-is
    /// unless its interval is below `min`).
    pub fn with_min(self, min: Duration) -> Self {
        match self {
            DelayPolicy::Fixed { interval } => DelayPolicy::Fixed {
                interval: interval.max(min),
            },
            DelayPolicy::Exponential { initial, max, .. } => DelayPolicy::Exponential {
                initial,
                max: max.max(min),
                min,
            },
        }
    }
}

/// Smallest delay an exponential policy yields
const MIN_EXPONENTIAL_DELAY: Duration = Duration::from_millis(1);

/// Stateful walker over a [`DelayPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: DelayPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: DelayPolicy) -> Self {
        let current = match &policy {
            DelayPolicy::Fixed { interval } => *interval,
            DelayPolicy::Exponential { initial, .. } => *initial,
        };
        Self { policy, current }
    }

    /// Get the next delay and advance the sequence
    pub fn next_delay(&mut self) -> Duration {
        match &self.policy {
            DelayPolicy::Fixed { interval } => *interval,
            DelayPolicy::Exponential { max, min, .. } => {
                let mut wait = self.current;
                if wait < *min {
                    wait = *min;
                } else if wait > *max {
                    wait = *max;
                }
                let wait = wait.max(MIN_EXPONENTIAL_DELAY);
                self.current = wait.saturating_mul(2);
                wait
            }
        }
    }

    /// Reset the sequence to its first delay
    pub fn reset(&mut self) {
        *self = Backoff::new(self.policy.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(backoff: &mut Backoff, n: usize) -> Vec<u128> {
        (0..n).map(|_| backoff.next_delay().as_millis()).collect()
    }

    #[test]
    fn exponential_doubles_up_to_cap() {
        let mut backoff = Backoff::new(DelayPolicy::default());
        assert_eq!(
            millis(&mut backoff, 9),
            vec![100, 200, 400, 800, 1600, 3200, 6400, 10000, 10000]
        );
    }

    #[test]
    fn exponential_respects_floor() {
        let policy = DelayPolicy::default().with_min(Duration::from_millis(500));
        let mut backoff = Backoff::new(policy);
        assert_eq!(millis(&mut backoff, 4), vec![500, 1000, 2000, 4000]);
    }

    #[test]
    fn zero_initial_delay_still_backs_off() {
        let policy: DelayPolicy =
            serde_json::from_str(r#"{"kind": "exponential", "initial": "0ms", "max": "10s"}"#)
                .unwrap();
        let mut backoff = Backoff::new(policy);
        assert_eq!(millis(&mut backoff, 4), vec![1, 2, 4, 8]);

        let mut capped = Backoff::new(DelayPolicy::Exponential {
            initial: Duration::ZERO,
            max: Duration::ZERO,
            min: Duration::ZERO,
        });
        assert_eq!(millis(&mut capped, 2), vec![1, 1]);
    }

    #[test]
    fn fixed_never_changes() {
        let mut backoff = Backoff::new(DelayPolicy::fixed(Duration::from_secs(5)));
        assert_eq!(millis(&mut backoff, 3), vec![5000, 5000, 5000]);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut backoff = Backoff::new(DelayPolicy::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn policy_deserializes_from_duration_strings() {
        let policy: DelayPolicy =
            serde_json::from_str(r#"{"kind": "exponential", "initial": "200ms", "max": "5s"}"#)
                .unwrap();
        assert_eq!(
            policy,
            DelayPolicy::Exponential {
                initial: Duration::from_millis(200),
                max: Duration::from_secs(5),
                min: Duration::ZERO,
            }
        );

        let fixed: DelayPolicy =
            serde_json::from_str(r#"{"kind": "fixed", "interval": "30s"}"#).unwrap();
        assert_eq!(fixed, DelayPolicy::fixed(Duration::from_secs(30)));
    }
}
