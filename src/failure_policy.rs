//! Abort decision for partially failed runs

use crate::error::{Error, Result};

/// Decides when accumulated chapter failures should stop a run
///
/// The policy only sees final, post-retry outcomes. It is a pure function of
/// the counts it is given and keeps no state between calls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FailurePolicy {
    threshold: f64,
}

impl FailurePolicy {
    /// Create a policy with a failure fraction in `[0, 1]`
    ///
    /// `0.0` aborts on the first failure; `1.0` never aborts on ratio alone.
    pub fn new(threshold: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::config(
                "failure_threshold",
                format!("failure_threshold must be between 0.0 and 1.0, got {threshold}"),
            ));
        }
        Ok(Self { threshold })
    }

    /// The configured fraction
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// True when `failed / total` is strictly greater than the threshold
    pub fn should_abort(&self, total: usize, failed: usize) -> bool {
        if total == 0 {
            return false;
        }
        failed as f64 / total as f64 > self.threshold
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_threshold_does_not_abort() {
        let policy = FailurePolicy::new(0.5).unwrap();
        assert!(!policy.should_abort(10, 5));
        assert!(policy.should_abort(10, 6));
        assert!(!policy.should_abort(4, 2));
        assert!(policy.should_abort(4, 3));
    }

    #[test]
    fn zero_threshold_aborts_on_first_failure() {
        let policy = FailurePolicy::new(0.0).unwrap();
        assert!(!policy.should_abort(10, 0));
        assert!(policy.should_abort(10, 1));
    }

    #[test]
    fn full_threshold_never_aborts() {
        let policy = FailurePolicy::new(1.0).unwrap();
        for failed in 0..=10 {
            assert!(!policy.should_abort(10, failed));
        }
    }

    #[test]
    fn matches_ratio_for_all_small_counts() {
        for threshold in [0.0, 0.1, 0.25, 1.0 / 3.0, 0.5, 0.75, 1.0] {
            let policy = FailurePolicy::new(threshold).unwrap();
            for total in 1..=20usize {
                for failed in 0..=total {
                    let expected = (failed as f64 / total as f64) > threshold;
                    assert_eq!(
                        policy.should_abort(total, failed),
                        expected,
                        "threshold={threshold} total={total} failed={failed}"
                    );
                }
            }
        }
    }

    #[test]
    fn empty_run_never_aborts() {
        assert!(!FailurePolicy::new(0.0).unwrap().should_abort(0, 0));
    }

    #[test]
    fn out_of_range_threshold_is_a_config_error() {
        for bad in [-0.1, 1.01, f64::NAN] {
            match FailurePolicy::new(bad) {
                Err(Error::Config { key, .. }) => {
                    assert_eq!(key.as_deref(), Some("failure_threshold"));
                }
                other => panic!("threshold {bad} gave {other:?}"),
            }
        }
    }

    #[test]
    fn default_is_half() {
        assert_eq!(FailurePolicy::default().threshold(), 0.5);
    }
}
