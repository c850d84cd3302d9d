//! Left-to-right hidden Markov models with a virtual end state, scaled
//! forward/backward decoding, and Baum-Welch re-estimation.
//!
//! State 0 is always the initial state; state `N` is a phantom absorbing
//! exit with no emission. The transition matrix therefore has rows
//! `0..N-1` and columns `0..N`, and construction requires at least one row
//! to place mass on the end column. Add a fake state 0 to a topology that
//! needs a free choice of initial state.
//!
//! The forward recursion stays in the linear domain with per-step scaling
//! factors; absolute log-likelihoods are reconstructed from the accumulated
//! log scales. Log-domain arithmetic inside the recursion would complicate
//! the sparse matrix-vector products without improving accuracy.

use crate::dense;
use crate::errors::{RecognitionError, RecognitionResult};
use crate::gaussian::ObservationDensity;
use crate::gmm::{Gmm, GmmTrainer};
use crate::sparse::SparseMatrix;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Emission probabilities below this floor are clamped before taking logs.
/// Zero keeps the natural convention `log 0 = -inf`.
pub const MIN_STATE_PROB: f64 = 0.0;

/// Relative tolerance for the state-posterior consistency check in
/// [`Hmm::decode`]. A violation means the forward/backward pass is
/// numerically corrupt.
const GAMMA_TOLERANCE: f64 = 0.1;

/// Validate a transition matrix against the left-to-right topology and build
/// the reverse adjacency: for each destination state, the list of source
/// states with a stored transition.
///
/// Rejects sources at or beyond `num_state`, destinations beyond the end
/// state, negative probabilities, and topologies where no mass reaches the
/// end column.
pub fn check_state_transition(
    num_state: usize,
    transitions: &SparseMatrix,
) -> RecognitionResult<Vec<Vec<usize>>> {
    let mut sources: Vec<Vec<usize>> = vec![Vec::new(); num_state + 1];
    let mut pr_out = 0.0;
    for (src, row) in transitions.rows() {
        if src >= num_state {
            return Err(RecognitionError::ConfigurationError {
                reason: format!(
                    "source state {} is not below the end state {}",
                    src, num_state
                ),
            });
        }
        for (dst, pr) in row.entries() {
            if pr < 0.0 {
                return Err(RecognitionError::ConfigurationError {
                    reason: format!("transition [{} -> {}] is negative: {}", src, dst, pr),
                });
            }
            if dst > num_state {
                return Err(RecognitionError::ConfigurationError {
                    reason: format!("destination state {} is beyond the end state {}", dst, num_state),
                });
            }
            if dst == num_state {
                pr_out += pr;
            }
            sources[dst].push(src);
        }
    }
    if pr_out <= 0.0 {
        return Err(RecognitionError::ConfigurationError {
            reason: format!("no transition mass reaches the end state {}", num_state),
        });
    }
    Ok(sources)
}

/// Hidden Markov model with per-state emission densities of type `D`.
///
/// Immutable after construction. Multiple read-only decodes may run
/// concurrently; all decode scratch is allocated per call.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hmm<D = Gmm> {
    num_state: usize,
    pi: Vec<f64>,
    transitions: SparseMatrix,
    emissions: Vec<D>,
    sources: Vec<Vec<usize>>,
    uniform_emissions: bool,
}

/// Everything a scaled forward/backward pass produces: the scaled alpha,
/// beta, and normalised gamma lattices, the per-time emission probabilities,
/// and the sequence log-likelihood.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// Scaled forward probabilities, one vector of length N+1 per time step.
    pub alphas: Vec<Vec<f64>>,
    /// Scaled backward probabilities, same shape as `alphas`.
    pub betas: Vec<Vec<f64>>,
    /// Normalised state posteriors, same shape as `alphas`.
    pub gammas: Vec<Vec<f64>>,
    /// Per-time emission probabilities for each state.
    pub state_probs: Vec<Vec<f64>>,
    /// Log-likelihood of the sequence under the model.
    pub log_likelihood: f64,
}

impl<D: ObservationDensity> Hmm<D> {
    /// Build an HMM from its real-state count, transition matrix, and one
    /// emission density per real state.
    pub fn new(
        num_state: usize,
        transitions: SparseMatrix,
        emissions: Vec<D>,
    ) -> RecognitionResult<Self> {
        if num_state <= 1 {
            return Err(RecognitionError::ConfigurationError {
                reason: format!("need at least 2 states, got {}", num_state),
            });
        }
        if emissions.len() != num_state {
            return Err(RecognitionError::ConfigurationError {
                reason: format!(
                    "state count {} disagrees with {} emission densities",
                    num_state,
                    emissions.len()
                ),
            });
        }
        let dimension = emissions[0].dimension();
        if let Some(s) = emissions.iter().position(|e| e.dimension() != dimension) {
            return Err(RecognitionError::ConfigurationError {
                reason: format!(
                    "emission density {} has dimension {}, expected {}",
                    s,
                    emissions[s].dimension(),
                    dimension
                ),
            });
        }
        let sources = check_state_transition(num_state, &transitions)?;
        let mut pi = vec![0.0; num_state + 1];
        pi[0] = 1.0;
        Ok(Self {
            num_state,
            pi,
            transitions,
            emissions,
            sources,
            uniform_emissions: false,
        })
    }

    /// Number of real states; the virtual end state is `num_state()`.
    pub fn num_state(&self) -> usize {
        self.num_state
    }

    /// Observation dimension expected by every emission density.
    pub fn dimension(&self) -> usize {
        self.emissions[0].dimension()
    }

    /// The transition matrix (rows `0..N-1`, columns `0..N`).
    pub fn transitions(&self) -> &SparseMatrix {
        &self.transitions
    }

    /// Per-state emission densities.
    pub fn emissions(&self) -> &[D] {
        &self.emissions
    }

    /// Force unit emission probabilities for every real state. Used for the
    /// first training sweep, before any emission density has been estimated,
    /// so the transition structure alone drives the state posteriors.
    pub fn set_uniform_emissions(&mut self, uniform: bool) {
        self.uniform_emissions = uniform;
    }

    /// Whether unit emission probabilities are in force.
    pub fn uniform_emissions(&self) -> bool {
        self.uniform_emissions
    }

    /// Source states with a stored transition into `dst`.
    pub fn source_states(&self, dst: usize) -> &[usize] {
        &self.sources[dst]
    }

    /// Transition probability from `src` to `dst` (0 when absent).
    pub fn transition_prob(&self, src: usize, dst: usize) -> f64 {
        self.transitions.get(src, dst)
    }

    /// Log transition probability, or `None` when the transition is absent.
    pub fn log_transition_prob(&self, src: usize, dst: usize) -> Option<f64> {
        let pr = self.transitions.get(src, dst);
        if pr == 0.0 {
            None
        } else {
            Some(pr.ln())
        }
    }

    /// Emission probabilities of `x` for every state, as a vector of length
    /// N+1. The end-state slot carries no emission and stays 0.
    pub fn state_probs(&self, x: &[f32]) -> RecognitionResult<Vec<f64>> {
        let mut prs = vec![0.0; self.num_state + 1];
        if self.uniform_emissions {
            for pr in prs.iter_mut().take(self.num_state) {
                *pr = 1.0;
            }
            return Ok(prs);
        }
        for (s, density) in self.emissions.iter().enumerate() {
            prs[s] = density.prob(x)?.max(MIN_STATE_PROB);
        }
        Ok(prs)
    }

    /// Log emission probabilities of `x` for every state, length N+1.
    ///
    /// The end-state slot is not an emission; it is set to negative infinity
    /// so an accidental read loses every max comparison.
    pub fn log_state_probs(&self, x: &[f32]) -> RecognitionResult<Vec<f64>> {
        let mut prs = self.state_probs(x)?;
        for pr in prs.iter_mut().take(self.num_state) {
            *pr = pr.ln();
        }
        prs[self.num_state] = f64::NEG_INFINITY;
        Ok(prs)
    }

    /// Log emission probability of `x` in the forced initial state 0.
    pub fn log_init_state_prob(&self, x: &[f32]) -> RecognitionResult<f64> {
        if self.uniform_emissions {
            return Ok(0.0);
        }
        Ok(self.emissions[0].prob(x)?.max(MIN_STATE_PROB).ln())
    }

    /// Scaled forward/backward pass over a full observation sequence.
    ///
    /// Returns the scaled lattices, state posteriors, and the sequence
    /// log-likelihood `log prEnd - sum(log c_t)`. Fails with
    /// [`RecognitionError::EmptySequence`] on zero observations,
    /// [`RecognitionError::UnreachableSequence`] when the forward mass (or
    /// the mass reaching the end state) vanishes, and
    /// [`RecognitionError::NumericalInconsistency`] when the posterior
    /// sanity check detects a corrupt pass.
    pub fn decode(&self, seq: &[Vec<f32>]) -> RecognitionResult<Decoded> {
        let len = seq.len();
        if len == 0 {
            return Err(RecognitionError::EmptySequence);
        }
        let n = self.num_state;

        let mut alphas: Vec<Vec<f64>> = Vec::with_capacity(len);
        let mut state_probs: Vec<Vec<f64>> = Vec::with_capacity(len);
        let mut scale = vec![0.0; len];

        let prs = self.state_probs(&seq[0])?;
        let mut alpha = dense::multiply_elem_wise(&self.pi, &prs);
        let total = dense::sum(&alpha);
        if total <= 0.0 {
            return Err(RecognitionError::UnreachableSequence { time: 0 });
        }
        scale[0] = 1.0 / total;
        dense::scale_in_place(&mut alpha, scale[0]);
        alphas.push(alpha);
        state_probs.push(prs);

        for t in 1..len {
            let prs = self.state_probs(&seq[t])?;
            let mut alpha = dense::vec_times_sparse(&alphas[t - 1], &self.transitions);
            dense::multiply_elem_wise_in_place(&mut alpha, &prs);
            let total = dense::sum(&alpha);
            if total <= 0.0 {
                return Err(RecognitionError::UnreachableSequence { time: t });
            }
            scale[t] = 1.0 / total;
            dense::scale_in_place(&mut alpha, scale[t]);
            alphas.push(alpha);
            state_probs.push(prs);
        }

        // The backward pass seeds from the end column: only states that can
        // exit carry backward mass at the last step.
        let mut betas: Vec<Vec<f64>> = vec![Vec::new(); len];
        let mut beta_last = self.transitions.column(n, n + 1);
        let mut pr_end = 0.0;
        for s in 0..n {
            pr_end += alphas[len - 1][s] * beta_last[s];
        }
        if pr_end <= 0.0 {
            return Err(RecognitionError::UnreachableSequence { time: len - 1 });
        }
        dense::scale_in_place(&mut beta_last, scale[len - 1]);
        betas[len - 1] = beta_last;
        for t in (0..len - 1).rev() {
            let weighted = dense::multiply_elem_wise(&state_probs[t + 1], &betas[t + 1]);
            let mut beta = dense::sparse_times_vec(&self.transitions, &weighted);
            dense::scale_in_place(&mut beta, scale[t]);
            betas[t] = beta;
        }

        let mut gammas: Vec<Vec<f64>> = Vec::with_capacity(len);
        for t in 0..len {
            let mut gamma = dense::multiply_elem_wise(&alphas[t], &betas[t]);
            let total = dense::sum(&gamma);
            if total <= 0.0 {
                return Err(RecognitionError::NumericalInconsistency {
                    time: t,
                    detail: "state posterior mass vanished".to_string(),
                });
            }
            // Before normalisation, total / c_t must reconstruct prEnd.
            let relative = total / scale[t] / pr_end - 1.0;
            if relative.abs() > GAMMA_TOLERANCE {
                log::warn!(
                    "posterior consistency check failed at t={}: mass={:e} scale={:e} pr_end={:e}",
                    t,
                    total,
                    scale[t],
                    pr_end
                );
                return Err(RecognitionError::NumericalInconsistency {
                    time: t,
                    detail: format!(
                        "posterior mass off by {:+.3e} relative to the end probability",
                        relative
                    ),
                });
            }
            dense::scale_in_place(&mut gamma, 1.0 / total);
            gammas.push(gamma);
        }

        let mut log_likelihood = pr_end.ln();
        for c in &scale {
            log_likelihood -= c.ln();
        }
        Ok(Decoded {
            alphas,
            betas,
            gammas,
            state_probs,
            log_likelihood,
        })
    }
}

/// Baum-Welch trainer: accumulates expected transition counts and
/// state-weighted observations over a corpus, then re-estimates the model.
///
/// The initial transition counts double as a Dirichlet-like prior: the
/// accumulator is reseeded from them after every [`HmmTrainer::optimize`].
#[derive(Debug, Clone)]
pub struct HmmTrainer {
    num_state: usize,
    init_transition_counts: SparseMatrix,
    acc_transition_counts: SparseMatrix,
    model: Hmm<Gmm>,
    gmm_trainers: Vec<GmmTrainer>,
}

impl HmmTrainer {
    /// Build a trainer from the observation dimension, the per-state mixture
    /// cap, the state count, and the initial transition counts.
    ///
    /// The starting model row-normalises the counts, uses one unit GMM per
    /// state, and runs its first sweep with uniform emissions.
    pub fn new(
        dimension: usize,
        max_mixture: usize,
        num_state: usize,
        init_transition_counts: SparseMatrix,
    ) -> RecognitionResult<Self> {
        Self::with_priors(
            dimension,
            max_mixture,
            num_state,
            init_transition_counts,
            crate::gaussian::DEFAULT_PRIOR_VARIANCE,
            crate::gaussian::DEFAULT_PRIOR_COUNT,
        )
    }

    /// As [`HmmTrainer::new`], with explicit Gaussian smoothing constants.
    pub fn with_priors(
        dimension: usize,
        max_mixture: usize,
        num_state: usize,
        init_transition_counts: SparseMatrix,
        prior_variance: f64,
        prior_count: f64,
    ) -> RecognitionResult<Self> {
        let gmms = (0..num_state).map(|_| Gmm::unit(dimension)).collect();
        let gmm_trainers = (0..num_state)
            .map(|_| GmmTrainer::with_priors(dimension, max_mixture, prior_variance, prior_count))
            .collect();
        let mut model = Hmm::new(num_state, init_transition_counts.normalize_rows(), gmms)?;
        model.set_uniform_emissions(true);
        let acc_transition_counts = init_transition_counts.clone();
        Ok(Self {
            num_state,
            init_transition_counts,
            acc_transition_counts,
            model,
            gmm_trainers,
        })
    }

    /// Trainer configured from a [`crate::config::RecognitionConfig`] plus
    /// the initial transition counts.
    pub fn from_config(
        config: &crate::config::RecognitionConfig,
        init_transition_counts: SparseMatrix,
    ) -> RecognitionResult<Self> {
        config.validate()?;
        Self::with_priors(
            config.dimension,
            config.max_mixture,
            config.num_state,
            init_transition_counts,
            config.prior_variance,
            config.prior_count,
        )
    }

    /// Number of real states under training.
    pub fn num_state(&self) -> usize {
        self.num_state
    }

    /// Read-only snapshot of the current model.
    pub fn model(&self) -> Hmm<Gmm> {
        self.model.clone()
    }

    /// Accumulate one training sequence and return its log-likelihood under
    /// the current model.
    ///
    /// For each stored transition `(s, r)`: destinations below the end state
    /// accumulate `sum_t alpha_t[s] * A[s][r] * B(o_{t+1})[r] * beta_{t+1}[r]`,
    /// and the end column accumulates `alpha_{T-1}[s] * A[s][N]`. Every
    /// observation is fed to its states' GMM trainers weighted by the state
    /// posterior.
    pub fn learn_case(&mut self, seq: &[Vec<f32>]) -> RecognitionResult<f64> {
        let decoded = self.model.decode(seq)?;
        let len = seq.len();
        for (s, row) in self.model.transitions.rows() {
            for (r, pr) in row.entries() {
                let mass = if r != self.num_state {
                    let mut acc = 0.0;
                    for t in 0..len - 1 {
                        acc += decoded.alphas[t][s]
                            * pr
                            * decoded.state_probs[t + 1][r]
                            * decoded.betas[t + 1][r];
                    }
                    acc
                } else {
                    decoded.alphas[len - 1][s] * pr
                };
                self.acc_transition_counts.add(s, r, mass);
            }
        }
        for (t, observation) in seq.iter().enumerate() {
            for s in 0..self.num_state {
                self.gmm_trainers[s].learn_case(observation, decoded.gammas[t][s])?;
            }
        }
        Ok(decoded.log_likelihood)
    }

    /// Re-estimate the model from the accumulated statistics: optimise every
    /// state's GMM, row-normalise the transition counts, rebuild the HMM,
    /// and reseed the count accumulator from the initial counts.
    pub fn optimize(&mut self) -> RecognitionResult<()> {
        let mut gmms = Vec::with_capacity(self.num_state);
        for trainer in self.gmm_trainers.iter_mut() {
            trainer.optimize()?;
            gmms.push(trainer.model());
        }
        let transitions = self.acc_transition_counts.normalize_rows();
        self.model = Hmm::new(self.num_state, transitions, gmms)?;
        self.acc_transition_counts = self.init_transition_counts.clone();
        log::debug!(
            "re-estimated {}-state model, per-state mixtures: {:?}",
            self.num_state,
            self.model
                .emissions()
                .iter()
                .map(Gmm::num_mixture)
                .collect::<Vec<_>>()
        );
        Ok(())
    }
}
