//! Multivariate Gaussian densities with diagonal covariance, and their
//! maximum-likelihood trainer.
//!
//! A [`DiagonalGaussian`] caches the per-dimension precisions and the log
//! normalisation constant at construction, so scoring an observation is one
//! pass over the dimensions. Zero-variance dimensions act as hard
//! constraints: any observation off the mean in such a dimension scores the
//! [`IMPOSSIBLE_LOG_PROB`] sentinel.

use crate::errors::{validate_dimension, RecognitionError, RecognitionResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Log-probability sentinel for observations a density rules out entirely
/// (an observation off the mean of a zero-variance dimension).
pub const IMPOSSIBLE_LOG_PROB: f64 = -f64::MAX;

/// Default smoothing variance seeded into fresh trainers.
pub const DEFAULT_PRIOR_VARIANCE: f64 = 1.0;

/// Default smoothing pseudo-count seeded into fresh trainers.
pub const DEFAULT_PRIOR_COUNT: f64 = 1.0;

const LOG_2PI: f64 = 1.8378770664093453;

/// Capability set shared by every emission density: report a dimension and
/// score observations in the linear and log domains.
pub trait ObservationDensity {
    /// Dimensionality of the observations this density scores.
    fn dimension(&self) -> usize;

    /// Probability density at `x`.
    fn prob(&self, x: &[f32]) -> RecognitionResult<f64>;

    /// Log probability density at `x`.
    fn log_prob(&self, x: &[f32]) -> RecognitionResult<f64>;
}

/// Multivariate Gaussian with diagonal covariance.
///
/// Immutable after construction; re-estimation builds new instances.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DiagonalGaussian {
    means: Vec<f64>,
    variances: Vec<f64>,
    precisions: Vec<f64>,
    log_c: f64,
}

impl DiagonalGaussian {
    /// Build a Gaussian from a mean and per-dimension variance vector.
    ///
    /// Variances must be non-negative; a zero variance makes that dimension a
    /// hard constraint. Fails with `ConfigurationError` on negative variance
    /// or mismatched lengths.
    pub fn new(means: Vec<f64>, variances: Vec<f64>) -> RecognitionResult<Self> {
        if means.len() != variances.len() {
            return Err(RecognitionError::ConfigurationError {
                reason: format!(
                    "mean and variance lengths disagree: {} vs {}",
                    means.len(),
                    variances.len()
                ),
            });
        }
        let mut log_c = 0.0;
        let mut precisions = vec![0.0; variances.len()];
        for (d, &var) in variances.iter().enumerate() {
            if var < 0.0 {
                return Err(RecognitionError::ConfigurationError {
                    reason: format!("variance[{}] is negative: {}", d, var),
                });
            }
            if var == 0.0 {
                continue;
            }
            precisions[d] = 1.0 / var;
            log_c += var.ln();
        }
        log_c += LOG_2PI * variances.len() as f64;
        log_c *= -0.5;
        Ok(Self {
            means,
            variances,
            precisions,
            log_c,
        })
    }

    /// Standard Gaussian of the given dimension: zero mean, unit variance.
    pub fn unit(dim: usize) -> Self {
        // Infallible: unit variances are valid by construction.
        match Self::new(vec![0.0; dim], vec![1.0; dim]) {
            Ok(g) => g,
            Err(_) => unreachable!("unit Gaussian construction cannot fail"),
        }
    }

    /// Mean vector.
    pub fn means(&self) -> &[f64] {
        &self.means
    }

    /// Per-dimension variances.
    pub fn variances(&self) -> &[f64] {
        &self.variances
    }

    /// Cached precisions: 1/variance, or 0 for zero-variance dimensions.
    pub fn precisions(&self) -> &[f64] {
        &self.precisions
    }

    /// Cached log normalisation constant.
    pub fn log_c(&self) -> f64 {
        self.log_c
    }

    /// Split into two Gaussians with means shifted one standard deviation in
    /// opposite directions, sharing the original variance. A deterministic,
    /// reversible perturbation that breaks symmetry for the next EM sweep.
    pub fn split(&self) -> (DiagonalGaussian, DiagonalGaussian) {
        let dim = self.dimension();
        let mut up = vec![0.0; dim];
        let mut down = vec![0.0; dim];
        for d in 0..dim {
            let stdev = self.variances[d].sqrt();
            up[d] = self.means[d] + stdev;
            down[d] = self.means[d] - stdev;
        }
        let high = DiagonalGaussian {
            means: up,
            variances: self.variances.clone(),
            precisions: self.precisions.clone(),
            log_c: self.log_c,
        };
        let low = DiagonalGaussian {
            means: down,
            variances: self.variances.clone(),
            precisions: self.precisions.clone(),
            log_c: self.log_c,
        };
        (high, low)
    }
}

impl ObservationDensity for DiagonalGaussian {
    fn dimension(&self) -> usize {
        self.means.len()
    }

    fn prob(&self, x: &[f32]) -> RecognitionResult<f64> {
        Ok(self.log_prob(x)?.exp())
    }

    fn log_prob(&self, x: &[f32]) -> RecognitionResult<f64> {
        validate_dimension(self.dimension(), x.len())?;
        let mut dist = 0.0;
        for (d, &value) in x.iter().enumerate() {
            if self.variances[d] == 0.0 {
                if self.means[d] != f64::from(value) {
                    return Ok(IMPOSSIBLE_LOG_PROB);
                }
                continue;
            }
            let diff = f64::from(value) - self.means[d];
            dist += diff * diff * self.precisions[d];
        }
        Ok(-0.5 * dist + self.log_c)
    }
}

/// Sufficient-statistics accumulator for one diagonal Gaussian.
///
/// Seeded with a pseudo-count of prior mass so the re-estimated variance
/// stays strictly positive even under vanishing data mass.
#[derive(Debug, Clone)]
pub struct DiagonalGaussianTrainer {
    dimension: usize,
    acc_weight: f64,
    acc_means: Vec<f64>,
    acc_covs: Vec<f64>,
    prior_variance: f64,
    prior_count: f64,
}

impl DiagonalGaussianTrainer {
    /// Fresh trainer with the default smoothing constants.
    pub fn new(dimension: usize) -> Self {
        Self::with_priors(dimension, DEFAULT_PRIOR_VARIANCE, DEFAULT_PRIOR_COUNT)
    }

    /// Fresh trainer with explicit smoothing constants.
    pub fn with_priors(dimension: usize, prior_variance: f64, prior_count: f64) -> Self {
        let mut trainer = Self {
            dimension: 0,
            acc_weight: 0.0,
            acc_means: Vec::new(),
            acc_covs: Vec::new(),
            prior_variance,
            prior_count,
        };
        trainer.reset(dimension);
        trainer
    }

    /// Dimensionality of the accumulators.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Clear the accumulators for a new pass. Re-allocates when the dimension
    /// changes, zeroes in place otherwise, then re-seeds the prior mass.
    pub fn reset(&mut self, dimension: usize) {
        if self.dimension != dimension || self.acc_means.len() != dimension {
            self.acc_means = vec![0.0; dimension];
            self.acc_covs = vec![0.0; dimension];
        } else {
            self.acc_means.iter_mut().for_each(|v| *v = 0.0);
            self.acc_covs.iter_mut().for_each(|v| *v = 0.0);
        }
        self.dimension = dimension;
        self.acc_weight = self.prior_count;
        for c in self.acc_covs.iter_mut() {
            *c = self.prior_variance * self.prior_count;
        }
    }

    /// Accumulate one weighted observation.
    pub fn learn_case(&mut self, x: &[f32], weight: f64) -> RecognitionResult<()> {
        validate_dimension(self.dimension, x.len())?;
        self.acc_weight += weight;
        for (d, &value) in x.iter().enumerate() {
            let v = f64::from(value);
            self.acc_means[d] += v * weight;
            self.acc_covs[d] += v * v * weight;
        }
        Ok(())
    }

    /// Emit the maximum-likelihood Gaussian for the accumulated statistics.
    ///
    /// The variance is floored at `prior_variance * prior_count / W`, which
    /// keeps it strictly positive under any positive total weight. Fails with
    /// `InsufficientMass` when the accumulated weight is not positive.
    pub fn distribution(&self) -> RecognitionResult<DiagonalGaussian> {
        if self.acc_weight <= 0.0 {
            return Err(RecognitionError::InsufficientMass {
                context: "diagonal Gaussian trainer".to_string(),
            });
        }
        let scale = 1.0 / self.acc_weight;
        let floor = self.prior_variance * self.prior_count * scale;
        let mut means = vec![0.0; self.dimension];
        let mut variances = vec![0.0; self.dimension];
        for d in 0..self.dimension {
            means[d] = scale * self.acc_means[d];
            variances[d] = (scale * self.acc_covs[d] - means[d] * means[d]).max(floor);
        }
        DiagonalGaussian::new(means, variances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_unit_gaussian_log_prob() {
        let g = DiagonalGaussian::unit(2);
        // Standard bivariate normal at the origin: -log(2*pi)
        let lp = g.log_prob(&[0.0, 0.0]).unwrap();
        assert_approx_eq!(lp, -LOG_2PI, 1e-12);
        // One unit away in one dimension costs another 1/2
        let lp = g.log_prob(&[1.0, 0.0]).unwrap();
        assert_approx_eq!(lp, -LOG_2PI - 0.5, 1e-12);
    }

    #[test]
    fn test_cached_values_match_formula() {
        let g = DiagonalGaussian::new(vec![1.0, -2.0], vec![0.25, 4.0]).unwrap();
        assert_approx_eq!(g.precisions()[0], 4.0, 1e-12);
        assert_approx_eq!(g.precisions()[1], 0.25, 1e-12);
        let expected = -0.5 * (0.25f64.ln() + 4.0f64.ln() + 2.0 * LOG_2PI);
        assert_approx_eq!(g.log_c(), expected, 1e-12);
    }

    #[test]
    fn test_zero_variance_dimension() {
        let g = DiagonalGaussian::new(vec![5.0, 0.0], vec![0.0, 1.0]).unwrap();
        assert_eq!(g.precisions()[0], 0.0);

        // On the constrained mean: finite, the dimension contributes nothing.
        let on = g.log_prob(&[5.0, 0.0]).unwrap();
        assert!(on.is_finite());
        assert_approx_eq!(on, -0.5 * (1.0f64.ln() + 2.0 * LOG_2PI), 1e-12);

        // Off the constrained mean: sentinel.
        let off = g.log_prob(&[4.9, 0.0]).unwrap();
        assert_eq!(off, IMPOSSIBLE_LOG_PROB);
    }

    #[test]
    fn test_negative_variance_rejected() {
        assert!(matches!(
            DiagonalGaussian::new(vec![0.0], vec![-1.0]),
            Err(RecognitionError::ConfigurationError { .. })
        ));
        assert!(matches!(
            DiagonalGaussian::new(vec![0.0, 0.0], vec![1.0]),
            Err(RecognitionError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let g = DiagonalGaussian::unit(2);
        assert!(matches!(
            g.log_prob(&[0.0, 0.0, 0.0]),
            Err(RecognitionError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_split_shifts_by_stdev() {
        let g = DiagonalGaussian::new(vec![1.0, 2.0], vec![4.0, 9.0]).unwrap();
        let (high, low) = g.split();
        assert_eq!(high.means(), &[3.0, 5.0]);
        assert_eq!(low.means(), &[-1.0, -1.0]);
        assert_eq!(high.variances(), g.variances());
        assert_eq!(low.variances(), g.variances());
    }

    #[test]
    fn test_trainer_recovers_weighted_mean() {
        let mut trainer = DiagonalGaussianTrainer::new(1);
        // Many identical observations overwhelm the unit prior.
        for _ in 0..10_000 {
            trainer.learn_case(&[2.0], 1.0).unwrap();
        }
        let g = trainer.distribution().unwrap();
        assert_approx_eq!(g.means()[0], 2.0, 1e-3);
        // Point mass: variance collapses onto the floor.
        let floor = DEFAULT_PRIOR_VARIANCE * DEFAULT_PRIOR_COUNT / trainer.acc_weight;
        assert!(g.variances()[0] >= floor);
        assert!(g.variances()[0] < 1e-2);
    }

    #[test]
    fn test_trainer_without_data_emits_prior() {
        let trainer = DiagonalGaussianTrainer::new(2);
        let g = trainer.distribution().unwrap();
        assert_eq!(g.means(), &[0.0, 0.0]);
        assert_approx_eq!(g.variances()[0], DEFAULT_PRIOR_VARIANCE, 1e-12);
    }

    #[test]
    fn test_trainer_insufficient_mass() {
        let mut trainer = DiagonalGaussianTrainer::new(1);
        trainer.learn_case(&[1.0], -2.0).unwrap();
        assert!(matches!(
            trainer.distribution(),
            Err(RecognitionError::InsufficientMass { .. })
        ));
    }

    #[test]
    fn test_trainer_rejects_wrong_dimension_without_mutation() {
        let mut trainer = DiagonalGaussianTrainer::new(2);
        let before = trainer.clone();
        assert!(trainer.learn_case(&[1.0, 2.0, 3.0], 1.0).is_err());
        assert_eq!(trainer.acc_weight, before.acc_weight);
        assert_eq!(trainer.acc_means, before.acc_means);
        assert_eq!(trainer.acc_covs, before.acc_covs);
    }

    #[test]
    fn test_reset_reallocates_on_dimension_change() {
        let mut trainer = DiagonalGaussianTrainer::new(2);
        trainer.learn_case(&[1.0, 1.0], 1.0).unwrap();
        trainer.reset(3);
        assert_eq!(trainer.dimension(), 3);
        assert_eq!(trainer.acc_means.len(), 3);
        assert_eq!(trainer.acc_weight, DEFAULT_PRIOR_COUNT);
        trainer.reset(3);
        assert_eq!(trainer.acc_covs, vec![DEFAULT_PRIOR_VARIANCE; 3]);
    }
}
