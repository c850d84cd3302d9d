//! Error types and validation helpers for sequence recognition.
//!
//! All fallible operations in this crate return [`RecognitionResult`]. Model
//! construction and trainer re-estimation errors are recoverable; invariant
//! violations inside the forward/backward recurrences abort the decode and
//! surface with enough context (the offending time step) for debugging.

use thiserror::Error;

/// Error types for model construction, training, and decoding.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum RecognitionError {
    /// Invalid construction arguments: mismatched lengths, negative
    /// probabilities or variances, or a transition topology with no path to
    /// the end state.
    #[error("Invalid model configuration: {reason}")]
    ConfigurationError {
        /// What was wrong with the arguments
        reason: String,
    },

    /// An observation whose length differs from the model's dimension.
    #[error("Dimension mismatch: model expects {expected}, observation has {actual}")]
    DimensionMismatch {
        /// Dimension the model was built with
        expected: usize,
        /// Length of the offending observation
        actual: usize,
    },

    /// A trainer was asked to emit a distribution without having seen
    /// positive-weight data.
    #[error("Insufficient mass in {context}: accumulated weight is not positive")]
    InsufficientMass {
        /// Which trainer ran dry
        context: String,
    },

    /// Forward scaling found zero total probability: the model assigns zero
    /// likelihood to the sequence.
    #[error("Sequence unreachable at time {time}: the model assigns it zero probability")]
    UnreachableSequence {
        /// Time step at which the forward mass vanished
        time: usize,
    },

    /// The state-posterior sanity check failed, indicating numerical
    /// corruption in the forward/backward pass.
    #[error("Numerical inconsistency at time {time}: {detail}")]
    NumericalInconsistency {
        /// Time step at which the check failed
        time: usize,
        /// Description of the violated invariant
        detail: String,
    },

    /// Decode was called with zero observations.
    #[error("Empty observation sequence")]
    EmptySequence,
}

/// Result type for recognition operations.
pub type RecognitionResult<T> = Result<T, RecognitionError>;

/// Validates that an observation has the dimension a model expects.
pub fn validate_dimension(expected: usize, actual: usize) -> RecognitionResult<()> {
    if expected != actual {
        Err(RecognitionError::DimensionMismatch { expected, actual })
    } else {
        Ok(())
    }
}

/// Validates that a configuration value is finite and strictly positive.
pub fn validate_positive(value: f64, name: &str) -> RecognitionResult<()> {
    if !value.is_finite() || value <= 0.0 {
        Err(RecognitionError::ConfigurationError {
            reason: format!("{} must be a positive finite value, got {}", name, value),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dimension() {
        assert!(validate_dimension(3, 3).is_ok());

        match validate_dimension(3, 4) {
            Err(RecognitionError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, 3);
                assert_eq!(actual, 4);
            }
            _ => panic!("Expected DimensionMismatch error"),
        }
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1.0, "prior_count").is_ok());
        assert!(validate_positive(1e-12, "prior_count").is_ok());

        assert!(validate_positive(0.0, "prior_count").is_err());
        assert!(validate_positive(-1.0, "prior_count").is_err());
        assert!(validate_positive(f64::NAN, "prior_count").is_err());
        assert!(validate_positive(f64::INFINITY, "prior_count").is_err());
    }

    #[test]
    fn test_error_display_formatting() {
        let err = RecognitionError::DimensionMismatch {
            expected: 2,
            actual: 5,
        };
        let message = format!("{}", err);
        assert!(message.contains("2"));
        assert!(message.contains("5"));

        let err = RecognitionError::UnreachableSequence { time: 17 };
        assert!(format!("{}", err).contains("17"));

        let err = RecognitionError::InsufficientMass {
            context: "GMM trainer".to_string(),
        };
        assert!(format!("{}", err).contains("GMM trainer"));
    }
}
