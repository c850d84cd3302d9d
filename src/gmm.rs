//! Gaussian mixture models over diagonal Gaussians, and their EM trainer.
//!
//! The trainer runs one EM sweep per `learn_case`/`optimize` cycle: soft
//! posterior assignment with the shift-by-max trick, then closed-form
//! re-estimation of priors and components. Between sweeps the component with
//! the largest prior is split until the mixture reaches its configured cap,
//! so the model grows progressively from a single unit Gaussian.

use crate::errors::{RecognitionError, RecognitionResult};
use crate::gaussian::{
    DiagonalGaussian, DiagonalGaussianTrainer, ObservationDensity, DEFAULT_PRIOR_COUNT,
    DEFAULT_PRIOR_VARIANCE,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mixture of diagonal Gaussians with cached log-priors.
///
/// Construction drops zero-prior components and normalises the surviving
/// priors to sum to 1, so every stored component carries positive mass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gmm {
    dimension: usize,
    priors: Vec<f64>,
    log_priors: Vec<f64>,
    mixtures: Vec<DiagonalGaussian>,
}

impl Gmm {
    /// Build a mixture from priors and components.
    ///
    /// Fails with `ConfigurationError` on negative priors, mismatched
    /// priors/components lengths, component dimensions disagreeing with
    /// `dimension`, or no positive prior mass at all.
    pub fn new(
        dimension: usize,
        priors: Vec<f64>,
        mixtures: Vec<DiagonalGaussian>,
    ) -> RecognitionResult<Self> {
        if priors.len() != mixtures.len() {
            return Err(RecognitionError::ConfigurationError {
                reason: format!(
                    "priors and mixtures lengths disagree: {} vs {}",
                    priors.len(),
                    mixtures.len()
                ),
            });
        }
        let mut kept_priors = Vec::with_capacity(priors.len());
        let mut kept = Vec::with_capacity(mixtures.len());
        for (m, (prior, mixture)) in priors.into_iter().zip(mixtures.into_iter()).enumerate() {
            if prior < 0.0 {
                return Err(RecognitionError::ConfigurationError {
                    reason: format!("prior[{}] is negative: {}", m, prior),
                });
            }
            if mixture.dimension() != dimension {
                return Err(RecognitionError::ConfigurationError {
                    reason: format!(
                        "mixture[{}] has dimension {}, expected {}",
                        m,
                        mixture.dimension(),
                        dimension
                    ),
                });
            }
            if prior > 0.0 {
                kept_priors.push(prior);
                kept.push(mixture);
            }
        }
        let total: f64 = kept_priors.iter().sum();
        if total <= 0.0 {
            return Err(RecognitionError::ConfigurationError {
                reason: "mixture has no positive prior mass".to_string(),
            });
        }
        let scale = 1.0 / total;
        let mut log_priors = Vec::with_capacity(kept_priors.len());
        for p in kept_priors.iter_mut() {
            *p *= scale;
            log_priors.push(p.ln());
        }
        Ok(Self {
            dimension,
            priors: kept_priors,
            log_priors,
            mixtures: kept,
        })
    }

    /// Single-component mixture holding the unit Gaussian.
    pub fn unit(dimension: usize) -> Self {
        match Self::new(dimension, vec![1.0], vec![DiagonalGaussian::unit(dimension)]) {
            Ok(gmm) => gmm,
            Err(_) => unreachable!("unit mixture construction cannot fail"),
        }
    }

    /// Number of components.
    pub fn num_mixture(&self) -> usize {
        self.mixtures.len()
    }

    /// Component priors; they sum to 1.
    pub fn priors(&self) -> &[f64] {
        &self.priors
    }

    /// Component densities.
    pub fn mixtures(&self) -> &[DiagonalGaussian] {
        &self.mixtures
    }

    /// Per-component joint log-probabilities `log p_m + log p_m(x)`, without
    /// log-sum-exp stabilisation; the caller shifts by the maximum.
    pub fn log_component_probs(&self, x: &[f32]) -> RecognitionResult<Vec<f64>> {
        let mut out = Vec::with_capacity(self.mixtures.len());
        for (m, mixture) in self.mixtures.iter().enumerate() {
            out.push(self.log_priors[m] + mixture.log_prob(x)?);
        }
        Ok(out)
    }

    /// Split the component with the largest prior into two, each inheriting
    /// half the prior, with means shifted a standard deviation apart.
    pub fn split_largest(&mut self) {
        let mut max_index = 0;
        let mut max_prior = 0.0;
        for (m, &p) in self.priors.iter().enumerate() {
            if p >= max_prior {
                max_prior = p;
                max_index = m;
            }
        }
        let (high, low) = self.mixtures[max_index].split();
        let half = self.priors[max_index] / 2.0;
        let log_half = self.log_priors[max_index] - std::f64::consts::LN_2;
        self.priors[max_index] = half;
        self.log_priors[max_index] = log_half;
        self.mixtures[max_index] = high;
        self.priors.push(half);
        self.log_priors.push(log_half);
        self.mixtures.push(low);
    }
}

impl ObservationDensity for Gmm {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn prob(&self, x: &[f32]) -> RecognitionResult<f64> {
        let mut pr = 0.0;
        for (m, mixture) in self.mixtures.iter().enumerate() {
            pr += (mixture.log_prob(x)? + self.log_priors[m]).exp();
        }
        Ok(pr)
    }

    fn log_prob(&self, x: &[f32]) -> RecognitionResult<f64> {
        Ok(self.prob(x)?.ln())
    }
}

/// EM trainer for a [`Gmm`] with progressive mixture splitting.
#[derive(Debug, Clone)]
pub struct GmmTrainer {
    max_mixture: usize,
    dimension: usize,
    model: Gmm,
    component_trainers: Vec<DiagonalGaussianTrainer>,
    acc_priors: Vec<f64>,
    prior_variance: f64,
    prior_count: f64,
}

impl GmmTrainer {
    /// Fresh trainer starting from the unit mixture, with default smoothing.
    pub fn new(dimension: usize, max_mixture: usize) -> Self {
        Self::with_priors(
            dimension,
            max_mixture,
            DEFAULT_PRIOR_VARIANCE,
            DEFAULT_PRIOR_COUNT,
        )
    }

    /// Fresh trainer with explicit smoothing constants.
    pub fn with_priors(
        dimension: usize,
        max_mixture: usize,
        prior_variance: f64,
        prior_count: f64,
    ) -> Self {
        let model = Gmm::unit(dimension);
        let mut trainer = Self {
            max_mixture,
            dimension,
            model,
            component_trainers: Vec::new(),
            acc_priors: Vec::new(),
            prior_variance,
            prior_count,
        };
        trainer.rebuild_accumulators();
        trainer
    }

    /// Fresh trainer configured from a [`crate::config::RecognitionConfig`].
    pub fn from_config(config: &crate::config::RecognitionConfig) -> RecognitionResult<Self> {
        config.validate()?;
        Ok(Self::with_priors(
            config.dimension,
            config.max_mixture,
            config.prior_variance,
            config.prior_count,
        ))
    }

    /// Dimensionality of the mixture under training.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Cap on mixture components.
    pub fn max_mixture(&self) -> usize {
        self.max_mixture
    }

    /// Smoothing variance seeded into the component trainers.
    pub fn prior_variance(&self) -> f64 {
        self.prior_variance
    }

    /// Smoothing pseudo-count seeded into the component trainers.
    pub fn prior_count(&self) -> f64 {
        self.prior_count
    }

    /// Read-only snapshot of the current mixture.
    pub fn model(&self) -> Gmm {
        self.model.clone()
    }

    /// Accumulate one weighted observation.
    ///
    /// Computes soft posteriors over the current components with the
    /// shift-by-max trick, spreads `weight` across them, and returns the
    /// observation's contribution to the corpus log-likelihood.
    pub fn learn_case(&mut self, x: &[f32], weight: f64) -> RecognitionResult<f64> {
        let log_posts = self.model.log_component_probs(x)?;
        let shift = log_posts.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let mut posteriors = Vec::with_capacity(log_posts.len());
        let mut total = 0.0;
        for &lp in &log_posts {
            let p = (lp - shift).exp();
            posteriors.push(p);
            total += p;
        }
        let scaled = weight / total;
        for (m, &post) in posteriors.iter().enumerate() {
            let w = scaled * post;
            self.acc_priors[m] += w;
            self.component_trainers[m].learn_case(x, w)?;
        }
        Ok(total.ln() + shift)
    }

    /// Finish the sweep: normalise accumulated responsibilities into priors,
    /// re-estimate every component, split the heaviest component while below
    /// the mixture cap, and reset the accumulators for the next sweep.
    pub fn optimize(&mut self) -> RecognitionResult<()> {
        let total: f64 = self.acc_priors.iter().sum();
        if total <= 0.0 {
            return Err(RecognitionError::InsufficientMass {
                context: "GMM trainer".to_string(),
            });
        }
        let scale = 1.0 / total;
        let mut priors = Vec::with_capacity(self.acc_priors.len());
        let mut components = Vec::with_capacity(self.component_trainers.len());
        for (m, trainer) in self.component_trainers.iter().enumerate() {
            priors.push(scale * self.acc_priors[m]);
            components.push(trainer.distribution()?);
        }
        self.model = Gmm::new(self.dimension, priors, components)?;
        if self.model.num_mixture() < self.max_mixture {
            self.model.split_largest();
            log::debug!(
                "split heaviest mixture component, now {} of at most {}",
                self.model.num_mixture(),
                self.max_mixture
            );
        }
        self.rebuild_accumulators();
        Ok(())
    }

    /// Size the accumulators to the current model: re-allocate when the
    /// component count changed, zero in place otherwise.
    fn rebuild_accumulators(&mut self) {
        let count = self.model.num_mixture();
        if self.component_trainers.len() != count {
            self.component_trainers = (0..count)
                .map(|_| {
                    DiagonalGaussianTrainer::with_priors(
                        self.dimension,
                        self.prior_variance,
                        self.prior_count,
                    )
                })
                .collect();
            self.acc_priors = vec![0.0; count];
        } else {
            for trainer in self.component_trainers.iter_mut() {
                trainer.reset(self.dimension);
            }
            self.acc_priors.iter_mut().for_each(|p| *p = 0.0);
        }
    }
}
