//! Threshold-based qualitative ratings

use crate::error::{Result, RiskError};
use crate::types::Rating;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// Cut-offs mapping a value to a rating
///
/// For `HigherIsBetter` a value at or above `excellent` rates Excellent, at
/// or above `good` rates Good, and so on; `LowerIsBetter` mirrors this.
/// Every real value, including ±∞, gets a rating. NaN rates Poor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingThresholds {
    pub direction: RatingDirection,
    pub excellent: f64,
    pub good: f64,
    pub average: f64,
}

impl RatingThresholds {
    pub const fn higher_is_better(excellent: f64, good: f64, average: f64) -> Self {
        Self {
            direction: RatingDirection::HigherIsBetter,
            excellent,
            good,
            average,
        }
    }

    pub const fn lower_is_better(excellent: f64, good: f64, average: f64) -> Self {
        Self {
            direction: RatingDirection::LowerIsBetter,
            excellent,
            good,
            average,
        }
    }

    /// Thresholds must be ordered in the direction of improvement
    pub fn validate(&self) -> Result<()> {
        let ordered = match self.direction {
            RatingDirection::HigherIsBetter => {
                self.excellent >= self.good && self.good >= self.average
            }
            RatingDirection::LowerIsBetter => {
                self.excellent <= self.good && self.good <= self.average
            }
        };
        if !ordered {
            return Err(RiskError::InvalidParameter(format!(
                "rating thresholds out of order: {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn rate(&self, value: f64) -> Rating {
        if value.is_nan() {
            return Rating::Poor;
        }
        let meets = |threshold: f64| match self.direction {
            RatingDirection::HigherIsBetter => value >= threshold,
            RatingDirection::LowerIsBetter => value <= threshold,
        };

        if meets(self.excellent) {
            Rating::Excellent
        } else if meets(self.good) {
            Rating::Good
        } else if meets(self.average) {
            Rating::Average
        } else {
            Rating::Poor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_higher_is_better() {
        let t = RatingThresholds::higher_is_better(2.0, 1.0, 0.5);
        assert_eq!(t.rate(2.5), Rating::Excellent);
        assert_eq!(t.rate(2.0), Rating::Excellent);
        assert_eq!(t.rate(1.2), Rating::Good);
        assert_eq!(t.rate(0.5), Rating::Average);
        assert_eq!(t.rate(-1.0), Rating::Poor);
        assert_eq!(t.rate(f64::INFINITY), Rating::Excellent);
        assert_eq!(t.rate(f64::NEG_INFINITY), Rating::Poor);
        assert_eq!(t.rate(f64::NAN), Rating::Poor);
    }

    #[test]
    fn test_lower_is_better() {
        let t = RatingThresholds::lower_is_better(0.1, 0.2, 0.3);
        assert_eq!(t.rate(0.05), Rating::Excellent);
        assert_eq!(t.rate(0.15), Rating::Good);
        assert_eq!(t.rate(0.3), Rating::Average);
        assert_eq!(t.rate(0.31), Rating::Poor);
        assert_eq!(t.rate(f64::INFINITY), Rating::Poor);
    }

    #[test]
    fn test_validate_ordering() {
        assert!(RatingThresholds::higher_is_better(2.0, 1.0, 0.5).validate().is_ok());
        assert!(RatingThresholds::higher_is_better(0.5, 1.0, 2.0).validate().is_err());
        assert!(RatingThresholds::lower_is_better(0.1, 0.2, 0.3).validate().is_ok());
    }

    proptest! {
        #[test]
        fn rating_is_monotone(a in -1e6f64..1e6, b in -1e6f64..1e6) {
            let t = RatingThresholds::higher_is_better(1.0, 0.0, -1.0);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(t.rate(lo) <= t.rate(hi));

            let t = RatingThresholds::lower_is_better(-1.0, 0.0, 1.0);
            prop_assert!(t.rate(lo) >= t.rate(hi));
        }
    }
}
