//! End-to-end Baum-Welch training tests.
//!
//! Sequences are drawn from a known 3-state left-to-right reference model
//! with two-component Gaussian emissions. A trainer started from uniform
//! emissions and a diagonal-leaning transition init must close to within 5%
//! of the reference average log-likelihood in 15 EM iterations.

use assert_approx_eq::assert_approx_eq;
use hmm_recognition::{sparse, DiagonalGaussian, Gmm, Hmm, HmmTrainer};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

const DIM: usize = 2;

fn mixture(means: &[[f64; 2]], priors: &[f64], variance: f64) -> Gmm {
    let gaussians = means
        .iter()
        .map(|m| DiagonalGaussian::new(m.to_vec(), vec![variance; DIM]).unwrap())
        .collect();
    Gmm::new(DIM, priors.to_vec(), gaussians).unwrap()
}

fn reference_model() -> Hmm<Gmm> {
    let transitions = sparse::from_dense_rows(&[
        vec![0.8, 0.2, 0.0, 0.0],
        vec![0.0, 0.8, 0.2, 0.0],
        vec![0.0, 0.0, 0.8, 0.2],
    ]);
    let emissions = vec![
        mixture(&[[-2.0, -2.0], [-2.0, -1.0]], &[0.9, 0.1], 0.5),
        mixture(&[[-1.0, -1.0], [0.0, 0.0]], &[0.9, 0.1], 0.5),
        mixture(&[[2.0, 2.0], [1.0, 2.0]], &[0.6, 0.4], 0.5),
    ];
    Hmm::new(3, transitions, emissions).unwrap()
}

/// Pick an index from a discrete distribution.
fn sample_discrete(rng: &mut ChaCha8Rng, probs: &[f64]) -> usize {
    let x: f64 = rng.gen();
    let mut acc = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        acc += p;
        if x < acc {
            return i;
        }
    }
    probs.len() - 1
}

/// Walk the reference model from state 0 to the end state, emitting one
/// observation per visited state.
fn sample_sequence(rng: &mut ChaCha8Rng, model: &Hmm<Gmm>) -> Vec<Vec<f32>> {
    let n = model.num_state();
    let mut seq = Vec::new();
    let mut state = 0;
    while state != n {
        let gmm = &model.emissions()[state];
        let m = sample_discrete(rng, gmm.priors());
        let component = &gmm.mixtures()[m];
        let obs: Vec<f32> = (0..DIM)
            .map(|d| {
                let normal =
                    Normal::new(component.means()[d], component.variances()[d].sqrt()).unwrap();
                normal.sample(rng) as f32
            })
            .collect();
        seq.push(obs);
        let row: Vec<f64> = (0..=n).map(|dst| model.transition_prob(state, dst)).collect();
        state = sample_discrete(rng, &row);
    }
    seq
}

#[test]
fn test_hmm_training_converges_to_reference() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let reference = reference_model();

    let num_data = 1000;
    let sequences: Vec<Vec<Vec<f32>>> = (0..num_data)
        .map(|_| sample_sequence(&mut rng, &reference))
        .collect();

    let optimal_score: f64 = sequences
        .iter()
        .map(|s| reference.decode(s).unwrap().log_likelihood)
        .sum::<f64>()
        / num_data as f64;

    let init = sparse::from_dense_rows(&[
        vec![0.5, 0.5, 0.0, 0.0],
        vec![0.0, 0.5, 0.5, 0.0],
        vec![0.0, 0.0, 0.5, 0.5],
    ]);
    let mut trainer = HmmTrainer::new(DIM, 2, 3, init).unwrap();

    let mut scores = Vec::new();
    for _ in 0..15 {
        let mut score = 0.0;
        for seq in &sequences {
            score += trainer.learn_case(seq).unwrap();
        }
        trainer.optimize().unwrap();
        scores.push(score / num_data as f64);
    }

    let trained = trainer.model();
    let trained_score: f64 = sequences
        .iter()
        .map(|s| trained.decode(s).unwrap().log_likelihood)
        .sum::<f64>()
        / num_data as f64;

    assert!(
        (optimal_score - trained_score) / optimal_score.abs() < 0.05,
        "training stalled: optimal {:.4}, trained {:.4}",
        optimal_score,
        trained_score
    );

    // Re-estimated transition rows are distributions.
    for (_, row) in trained.transitions().rows() {
        assert_approx_eq!(row.sum(), 1.0, 1e-9);
    }

    // After the first sweeps replace the uniform emissions and the mixtures
    // reach their cap, EM sweeps never lose likelihood.
    for pair in scores[3..].windows(2) {
        assert!(
            pair[1] >= pair[0] - 1e-2,
            "likelihood regressed between iterations: {:.5} -> {:.5}",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn test_scaled_forward_invariants_on_reference_data() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let reference = reference_model();
    let seq = sample_sequence(&mut rng, &reference);
    let decoded = reference.decode(&seq).unwrap();

    // Scaled forward vectors are normalised at every step, and the state
    // posteriors stay proper distributions.
    for alpha in &decoded.alphas {
        let total: f64 = alpha.iter().sum();
        assert_approx_eq!(total, 1.0, 1e-9);
    }
    for gamma in &decoded.gammas {
        let total: f64 = gamma.iter().sum();
        assert_approx_eq!(total, 1.0, 1e-9);
    }
    assert!(decoded.log_likelihood.is_finite());
}
