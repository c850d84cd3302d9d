//! # HMM Recognition
//!
//! Sequence recognition with Gaussian-mixture hidden Markov models.
//!
//! The engine has two halves. The training stack runs maximum-likelihood
//! re-estimation bottom-up: diagonal Gaussians accumulate weighted
//! sufficient statistics, mixtures re-weight them with EM posteriors and
//! grow by splitting their heaviest component, and HMMs tie the mixtures
//! together through scaled forward/backward (Baum-Welch). The decoding
//! stack runs a multi-level Viterbi search over concatenations of sub-HMMs,
//! recovering the best state path and the best segmentation into sub-models
//! at once, with N-best hypotheses ranked through a priority queue.
//!
//! ## Quick start
//!
//! ```rust
//! use hmm_recognition::{sparse, HmmTrainer, RecognitionResult};
//!
//! fn main() -> RecognitionResult<()> {
//!     // A 3-state left-to-right topology with self-loops; column 3 is the
//!     // virtual end state.
//!     let init_counts = sparse::from_dense_rows(&[
//!         vec![0.5, 0.5, 0.0, 0.0],
//!         vec![0.0, 0.5, 0.5, 0.0],
//!         vec![0.0, 0.0, 0.5, 0.5],
//!     ]);
//!     let mut trainer = HmmTrainer::new(2, 2, 3, init_counts)?;
//!
//!     let sequence = vec![
//!         vec![-2.0f32, -2.0],
//!         vec![-1.0, -1.0],
//!         vec![2.0, 2.0],
//!     ];
//!     for _ in 0..3 {
//!         trainer.learn_case(&sequence)?;
//!         trainer.optimize()?;
//!     }
//!     let model = trainer.model();
//!     let decoded = model.decode(&sequence)?;
//!     println!("log-likelihood: {:.3}", decoded.log_likelihood);
//!     Ok(())
//! }
//! ```
//!
//! ## Numerical strategy
//!
//! Mixture posteriors use the shift-by-max trick before exponentiation.
//! Forward/backward stays in the linear domain with per-time scaling
//! factors; absolute likelihoods are reconstructed from the accumulated log
//! scales. The connected decoder works in the log domain throughout and
//! keeps unreachable lattice cells structurally absent instead of encoding
//! them as negative infinity.
//!
//! ## Concurrency
//!
//! Models are immutable after construction and all decode scratch is
//! allocated per call, so read-only decodes may run on disjoint threads.
//! Trainer steps on the same model must be externally serialised.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connected;
pub mod dense;
pub mod errors;
pub mod gaussian;
pub mod gmm;
pub mod hmm;
pub mod sparse;

pub use config::RecognitionConfig;
pub use connected::{ConnectedHmm, DecodedSequence};
pub use errors::{RecognitionError, RecognitionResult};
pub use gaussian::{
    DiagonalGaussian, DiagonalGaussianTrainer, ObservationDensity, DEFAULT_PRIOR_COUNT,
    DEFAULT_PRIOR_VARIANCE, IMPOSSIBLE_LOG_PROB,
};
pub use gmm::{Gmm, GmmTrainer};
pub use hmm::{Decoded, Hmm, HmmTrainer};
pub use sparse::{SparseMatrix, SparseRow};
