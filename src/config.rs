//! Configuration for recognition training and decoding.
//!
//! One struct carries every knob the engine recognises; trainers and the
//! connected decoder read the fields they need. There is no CLI, file, or
//! environment binding.

use crate::errors::{validate_positive, RecognitionError, RecognitionResult};
use crate::gaussian::{DEFAULT_PRIOR_COUNT, DEFAULT_PRIOR_VARIANCE};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for GMM/HMM training and connected decoding.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RecognitionConfig {
    /// Observation dimensionality.
    pub dimension: usize,
    /// Cap on mixture components per GMM.
    pub max_mixture: usize,
    /// Real states per HMM (the virtual end state is extra).
    pub num_state: usize,
    /// Hypotheses returned by the connected decoder.
    pub n_best: usize,
    /// Maximum sub-models per connected hypothesis.
    pub max_models: usize,
    /// Smoothing variance seeded into Gaussian trainers.
    pub prior_variance: f64,
    /// Smoothing pseudo-count seeded into Gaussian trainers.
    pub prior_count: f64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            dimension: 1,
            max_mixture: 4,
            num_state: 3,
            n_best: 1,
            max_models: 8,
            prior_variance: DEFAULT_PRIOR_VARIANCE,
            prior_count: DEFAULT_PRIOR_COUNT,
        }
    }
}

impl RecognitionConfig {
    /// Validate every field, naming the offending one on failure.
    pub fn validate(&self) -> RecognitionResult<()> {
        if self.dimension == 0 {
            return Err(RecognitionError::ConfigurationError {
                reason: "dimension must be positive".to_string(),
            });
        }
        if self.max_mixture == 0 {
            return Err(RecognitionError::ConfigurationError {
                reason: "max_mixture must be at least 1".to_string(),
            });
        }
        if self.num_state < 2 {
            return Err(RecognitionError::ConfigurationError {
                reason: format!("num_state must be at least 2, got {}", self.num_state),
            });
        }
        if self.n_best == 0 {
            return Err(RecognitionError::ConfigurationError {
                reason: "n_best must be positive".to_string(),
            });
        }
        if self.max_models == 0 {
            return Err(RecognitionError::ConfigurationError {
                reason: "max_models must be positive".to_string(),
            });
        }
        validate_positive(self.prior_variance, "prior_variance")?;
        validate_positive(self.prior_count, "prior_count")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RecognitionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_each_field_is_checked() {
        let base = RecognitionConfig::default();

        let mut cfg = base.clone();
        cfg.dimension = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.max_mixture = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.num_state = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.n_best = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.max_models = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.prior_variance = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = base;
        cfg.prior_count = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validation_names_the_field() {
        let mut cfg = RecognitionConfig::default();
        cfg.num_state = 0;
        match cfg.validate() {
            Err(RecognitionError::ConfigurationError { reason }) => {
                assert!(reason.contains("num_state"));
            }
            other => panic!("expected ConfigurationError, got {:?}", other),
        }
    }
}
