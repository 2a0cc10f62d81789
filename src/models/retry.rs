//! # Retry Policies
//!
//! A [`RetryPolicy`] decides when the next attempt of a failed task may start. The
//! worker applies it in-process; the executor consults it to know whether a FAILED task
//! run is final or still waiting for another attempt.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::validation::Violations;

/// Backoff schedule between two attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryBehavior {
    Constant {
        interval_ms: u64,
    },
    Exponential {
        interval_ms: u64,
        max_interval_ms: u64,
        #[serde(default = "default_delay_factor")]
        delay_factor: f64,
    },
    Random {
        min_interval_ms: u64,
        max_interval_ms: u64,
    },
}

fn default_delay_factor() -> f64 {
    2.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(flatten)]
    pub behavior: RetryBehavior,
    /// Total number of attempts, the first one included
    #[serde(default)]
    pub max_attempt: Option<u32>,
    /// Upper bound on the time between the first attempt and the next retry
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
    /// Report WARNING instead of SUCCESS when the task needed more than one attempt
    #[serde(default)]
    pub warning_on_retry: bool,
}

impl RetryPolicy {
    pub fn constant(interval_ms: u64, max_attempt: u32) -> Self {
        Self {
            behavior: RetryBehavior::Constant { interval_ms },
            max_attempt: Some(max_attempt),
            max_duration_ms: None,
            warning_on_retry: false,
        }
    }

    pub fn exponential(interval_ms: u64, max_interval_ms: u64, max_attempt: u32) -> Self {
        Self {
            behavior: RetryBehavior::Exponential {
                interval_ms,
                max_interval_ms,
                delay_factor: default_delay_factor(),
            },
            max_attempt: Some(max_attempt),
            max_duration_ms: None,
            warning_on_retry: false,
        }
    }

    pub fn with_warning_on_retry(mut self, warning_on_retry: bool) -> Self {
        self.warning_on_retry = warning_on_retry;
        self
    }

    pub fn with_max_duration_ms(mut self, max_duration_ms: u64) -> Self {
        self.max_duration_ms = Some(max_duration_ms);
        self
    }

    /// Delay to wait before the attempt following `attempt_count` finished attempts
    pub fn delay(&self, attempt_count: u32) -> chrono::Duration {
        let millis = match &self.behavior {
            RetryBehavior::Constant { interval_ms } => *interval_ms,
            RetryBehavior::Exponential {
                interval_ms,
                max_interval_ms,
                delay_factor,
            } => {
                let exponent = attempt_count.saturating_sub(1) as i32;
                let delay = (*interval_ms as f64) * delay_factor.powi(exponent);
                if delay.is_finite() {
                    (delay as u64).min(*max_interval_ms)
                } else {
                    *max_interval_ms
                }
            }
            RetryBehavior::Random {
                min_interval_ms,
                max_interval_ms,
            } => {
                if min_interval_ms >= max_interval_ms {
                    *min_interval_ms
                } else {
                    rand::thread_rng().gen_range(*min_interval_ms..=*max_interval_ms)
                }
            }
        };
        chrono::Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Date of the next attempt given the number of attempts so far and the end of the
    /// last one
    pub fn next_retry_date(&self, attempt_count: u32, base: DateTime<Utc>) -> DateTime<Utc> {
        base + self.delay(attempt_count)
    }

    pub fn max_duration(&self) -> Option<chrono::Duration> {
        self.max_duration_ms
            .map(|ms| chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX)))
    }

    /// Collect every inconsistency of this policy
    pub fn validate(&self) -> Violations {
        let mut violations = Violations::new();

        violations.check(
            self.max_attempt.is_some() || self.max_duration_ms.is_some(),
            "retry",
            "one of max_attempt or max_duration_ms must be set",
        );
        violations.check(
            self.max_attempt != Some(0),
            "retry.max_attempt",
            "must be greater than 0",
        );
        violations.check(
            self.max_duration_ms != Some(0),
            "retry.max_duration_ms",
            "must be greater than 0",
        );

        match &self.behavior {
            RetryBehavior::Constant { interval_ms } => {
                violations.check(*interval_ms > 0, "retry.interval_ms", "must be greater than 0");
            }
            RetryBehavior::Exponential {
                interval_ms,
                max_interval_ms,
                delay_factor,
            } => {
                violations.check(*interval_ms > 0, "retry.interval_ms", "must be greater than 0");
                violations.check(
                    interval_ms <= max_interval_ms,
                    "retry.max_interval_ms",
                    "must be greater than or equal to interval_ms",
                );
                violations.check(
                    *delay_factor >= 1.0,
                    "retry.delay_factor",
                    "must be greater than or equal to 1",
                );
            }
            RetryBehavior::Random {
                min_interval_ms,
                max_interval_ms,
            } => {
                violations.check(
                    *min_interval_ms > 0,
                    "retry.min_interval_ms",
                    "must be greater than 0",
                );
                violations.check(
                    min_interval_ms <= max_interval_ms,
                    "retry.max_interval_ms",
                    "must be greater than or equal to min_interval_ms",
                );
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constant_delay() {
        let retry = RetryPolicy::constant(1_000, 3);
        let base = Utc::now();
        assert_eq!(retry.next_retry_date(1, base), base + chrono::Duration::seconds(1));
        assert_eq!(retry.next_retry_date(5, base), base + chrono::Duration::seconds(1));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let retry = RetryPolicy::exponential(100, 1_000, 10);
        assert_eq!(retry.delay(1), chrono::Duration::milliseconds(100));
        assert_eq!(retry.delay(2), chrono::Duration::milliseconds(200));
        assert_eq!(retry.delay(3), chrono::Duration::milliseconds(400));
        assert_eq!(retry.delay(8), chrono::Duration::milliseconds(1_000));
    }

    #[test]
    fn test_random_delay_in_bounds() {
        let retry = RetryPolicy {
            behavior: RetryBehavior::Random {
                min_interval_ms: 10,
                max_interval_ms: 20,
            },
            max_attempt: Some(3),
            max_duration_ms: None,
            warning_on_retry: false,
        };
        for attempt in 1..50 {
            let delay = retry.delay(attempt).num_milliseconds();
            assert!((10..=20).contains(&delay));
        }
    }

    #[test]
    fn test_validate_collects_all_violations() {
        let retry = RetryPolicy {
            behavior: RetryBehavior::Exponential {
                interval_ms: 0,
                max_interval_ms: 0,
                delay_factor: 0.5,
            },
            max_attempt: None,
            max_duration_ms: None,
            warning_on_retry: false,
        };
        let violations = retry.validate().into_result().unwrap_err();
        assert_eq!(violations.violations.len(), 3);
        assert!(RetryPolicy::constant(10, 2).validate().is_empty());
    }

    #[test]
    fn test_deserialize() {
        let retry: RetryPolicy = serde_json::from_value(json!({
            "type": "exponential",
            "interval_ms": 100,
            "max_interval_ms": 1000,
            "max_attempt": 5,
            "warning_on_retry": true
        }))
        .unwrap();
        assert_eq!(retry.max_attempt, Some(5));
        assert!(retry.warning_on_retry);
        assert!(matches!(
            retry.behavior,
            RetryBehavior::Exponential { delay_factor, .. } if delay_factor == 2.0
        ));
    }
}
