//! Probability aggregation across ensemble views

use crate::types::{ProbabilityVector, RiskClass, NUM_CLASSES};

/// Combines per-view class probabilities into one vector.
pub struct ViewAggregator;

impl ViewAggregator {
    /// Element-wise arithmetic mean of the view probabilities.
    ///
    /// The result is only approximately normalized; callers renormalize.
    pub fn mean(views: &[ProbabilityVector]) -> ProbabilityVector {
        if views.is_empty() {
            return ProbabilityVector::default();
        }

        let mut sums = [0.0; NUM_CLASSES];
        for view in views {
            for (sum, p) in sums.iter_mut().zip(view.as_array()) {
                *sum += p;
            }
        }

        let count = views.len() as f64;
        ProbabilityVector::from_array(sums.map(|s| s / count))
    }

    /// How closely the views agree: 1 minus the largest per-class standard deviation.
    pub fn agreement(views: &[ProbabilityVector]) -> f64 {
        if views.len() < 2 {
            return 1.0;
        }

        let mean = Self::mean(views);
        let count = views.len() as f64;
        let max_std_dev = RiskClass::ALL
            .iter()
            .map(|&class| {
                let variance = views
                    .iter()
                    .map(|v| (v[class] - mean[class]).powi(2))
                    .sum::<f64>()
                    / count;
                variance.sqrt()
            })
            .fold(0.0, f64::max);

        1.0 - max_std_dev.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean() {
        let views = [
            ProbabilityVector::new(0.6, 0.3, 0.1),
            ProbabilityVector::new(0.8, 0.1, 0.1),
            ProbabilityVector::new(0.7, 0.2, 0.1),
        ];

        let mean = ViewAggregator::mean(&views);
        assert_relative_eq!(mean[RiskClass::Low], 0.7, epsilon = 1e-12);
        assert_relative_eq!(mean[RiskClass::Medium], 0.2, epsilon = 1e-12);
        assert_relative_eq!(mean[RiskClass::High], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_views() {
        assert_eq!(ViewAggregator::mean(&[]), ProbabilityVector::default());
        assert_eq!(ViewAggregator::agreement(&[]), 1.0);
    }

    #[test]
    fn test_agreement() {
        let same = [ProbabilityVector::new(0.5, 0.3, 0.2); 3];
        assert_relative_eq!(ViewAggregator::agreement(&same), 1.0);

        let split = [
            ProbabilityVector::new(1.0, 0.0, 0.0),
            ProbabilityVector::new(0.0, 0.0, 1.0),
        ];
        assert_relative_eq!(ViewAggregator::agreement(&split), 0.5);
    }
}
