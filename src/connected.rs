//! Connected-HMM decoding: a multi-level Viterbi search over concatenations
//! of sub-HMMs.
//!
//! The lattice is indexed by (time, level, sub-model, state), where the
//! level counts sub-model boundaries crossed so far. A level transition
//! leaves one sub-HMM through its virtual end state and enters another at
//! state 0. Unreachable cells are structurally absent: score rows grow state
//! by state, and an empty row means no path reaches that (level, sub-model)
//! at all. The search keeps rolling score/start-time tables for the previous
//! time step plus a full boundary-backpointer store, so memory stays at
//! O(T * L * V) boundaries and O(L * V * N) scores.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::errors::{RecognitionError, RecognitionResult};
use crate::gaussian::ObservationDensity;
use crate::gmm::Gmm;
use crate::hmm::Hmm;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One decoded hypothesis: the sub-model sequence, the time each sub-model
/// started, and the total log-score including the final exit transition.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedSequence {
    /// Total log-probability of the hypothesis.
    pub score: f64,
    /// Vocabulary indices of the sub-models, in temporal order.
    pub models: Vec<usize>,
    /// Start time of each sub-model; `starts[0]` is always 0.
    pub starts: Vec<usize>,
}

/// Backpointer recorded where a level transition lands: the sub-model that
/// exited and the time it had started.
#[derive(Debug, Clone, Copy)]
struct ModelBoundary {
    model: usize,
    start: usize,
}

/// Heap entry for N-best extraction: an exit score at (level, model)
/// together with the end state's best source state.
#[derive(Debug)]
struct EndStateItem {
    score: f64,
    level: usize,
    model: usize,
    state: usize,
}

impl PartialEq for EndStateItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EndStateItem {}

impl PartialOrd for EndStateItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EndStateItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on score; ties resolved toward shorter hypotheses and
        // lower vocabulary indices so extraction order is deterministic.
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.level.cmp(&self.level))
            .then_with(|| other.model.cmp(&self.model))
    }
}

/// Per-(level, sub-model) score rows for one time step. Rows fill state by
/// state in ascending order; a state beyond the row length is unreachable.
struct ScoreTable {
    cells: Vec<Vec<Vec<f64>>>,
}

impl ScoreTable {
    fn new(levels: usize, models: usize) -> Self {
        Self {
            cells: vec![vec![Vec::new(); models]; levels],
        }
    }

    fn get(&self, level: usize, model: usize, state: usize) -> Option<f64> {
        self.cells[level][model].get(state).copied()
    }

    fn set(&mut self, level: usize, model: usize, state: usize, score: f64) {
        let row = &mut self.cells[level][model];
        debug_assert!(state <= row.len(), "states must fill in ascending order");
        if state == row.len() {
            row.push(score);
        } else {
            row[state] = score;
        }
    }
}

/// Fixed vocabulary of sub-HMMs for connected decoding.
///
/// The decoder allocates all lattice scratch per call, so one vocabulary may
/// serve concurrent decodes from disjoint threads.
#[derive(Debug, Clone)]
pub struct ConnectedHmm<D = Gmm> {
    hmms: Vec<Hmm<D>>,
}

impl<D: ObservationDensity> ConnectedHmm<D> {
    /// Build a vocabulary from sub-HMMs sharing one observation dimension.
    pub fn new(hmms: Vec<Hmm<D>>) -> RecognitionResult<Self> {
        if hmms.is_empty() {
            return Err(RecognitionError::ConfigurationError {
                reason: "connected HMM needs at least one sub-model".to_string(),
            });
        }
        let dimension = hmms[0].dimension();
        if let Some(v) = hmms.iter().position(|h| h.dimension() != dimension) {
            return Err(RecognitionError::ConfigurationError {
                reason: format!(
                    "sub-model {} has dimension {}, expected {}",
                    v,
                    hmms[v].dimension(),
                    dimension
                ),
            });
        }
        Ok(Self { hmms })
    }

    /// The vocabulary of sub-HMMs, indexed by position.
    pub fn hmms(&self) -> &[Hmm<D>] {
        &self.hmms
    }

    /// Observation dimension shared by every sub-model.
    pub fn dimension(&self) -> usize {
        self.hmms[0].dimension()
    }

    /// Best score of entering state `dst` of sub-model `model` at level
    /// `level`, over all predecessor states in the previous time step's
    /// table. Returns the score together with the winning source state, or
    /// `None` when no predecessor cell is reachable.
    ///
    /// With `dst` equal to the sub-model's state count this evaluates the
    /// exit score through the virtual end state.
    fn best_transition(
        &self,
        table: &ScoreTable,
        level: usize,
        model: usize,
        dst: usize,
        hmm: &Hmm<D>,
    ) -> Option<(f64, usize)> {
        let mut best: Option<(f64, usize)> = None;
        for &src in hmm.source_states(dst) {
            let Some(prev) = table.get(level, model, src) else {
                continue;
            };
            let Some(lpr) = hmm.log_transition_prob(src, dst) else {
                continue;
            };
            let score = prev + lpr;
            if best.map_or(true, |(b, _)| score > b) {
                best = Some((score, src));
            }
        }
        best
    }

    /// Decode the best segmentations of `seq` into at most `max_models`
    /// concatenated sub-models, returning up to `n_best` hypotheses in
    /// descending score order.
    ///
    /// Returns an empty vector when no concatenation within the level cap
    /// can both cover the sequence and exit through an end state. Fails with
    /// [`RecognitionError::EmptySequence`] on zero observations; dimension
    /// mismatches surface from emission scoring.
    pub fn viterbi_decode(
        &self,
        seq: &[Vec<f32>],
        max_models: usize,
        n_best: usize,
    ) -> RecognitionResult<Vec<DecodedSequence>> {
        let len = seq.len();
        if len == 0 {
            return Err(RecognitionError::EmptySequence);
        }
        if max_models == 0 {
            return Ok(Vec::new());
        }
        let vocab = self.hmms.len();

        // boundary[t][l][v]: set when a level transition lands at
        // (t, l, v, state 0); names the exited sub-model and its start time.
        let mut boundary: Vec<Vec<Vec<Option<ModelBoundary>>>> =
            vec![vec![vec![None; vocab]; max_models]; len];
        let mut last_scores = ScoreTable::new(max_models, vocab);
        let mut last_starts = self.new_start_table(max_models);

        for (v, hmm) in self.hmms.iter().enumerate() {
            last_scores.set(0, v, 0, hmm.log_init_state_prob(&seq[0])?);
        }

        let mut reachable = true;
        for (t, observation) in seq.iter().enumerate().skip(1) {
            let mut cur_scores = ScoreTable::new(max_models, vocab);
            let mut cur_starts = self.new_start_table(max_models);
            let mut log_probs = Vec::with_capacity(vocab);
            for hmm in &self.hmms {
                log_probs.push(hmm.log_state_probs(observation)?);
            }

            let mut any_reachable = false;
            for level in 0..max_models {
                for (v, hmm) in self.hmms.iter().enumerate() {
                    let state_lprs = &log_probs[v];

                    // Candidate A: stay inside the sub-model.
                    let mut entry = self.best_transition(&last_scores, level, v, 0, hmm);
                    let mut entered_from = None;
                    if level > 0 {
                        // Candidate B: leave some sub-model through its end
                        // state and restart here.
                        for (prev_v, prev_hmm) in self.hmms.iter().enumerate() {
                            let exit = self.best_transition(
                                &last_scores,
                                level - 1,
                                prev_v,
                                prev_hmm.num_state(),
                                prev_hmm,
                            );
                            if let Some((exit_score, exit_src)) = exit {
                                if entry.map_or(true, |(score, _)| exit_score > score) {
                                    entry = Some((exit_score, exit_src));
                                    entered_from = Some(prev_v);
                                }
                            }
                        }
                    }

                    // State 0 unreachable: the whole (level, v) cell is.
                    let Some((score, src)) = entry else {
                        continue;
                    };
                    match entered_from {
                        Some(prev_v) => {
                            boundary[t][level][v] = Some(ModelBoundary {
                                model: prev_v,
                                start: last_starts[level - 1][prev_v][src],
                            });
                            cur_starts[level][v][0] = t;
                        }
                        None => {
                            cur_starts[level][v][0] = last_starts[level][v][src];
                        }
                    }
                    cur_scores.set(level, v, 0, score + state_lprs[0]);
                    any_reachable = true;

                    // Higher states, in ascending order; the left-to-right
                    // topology makes the first unreachable state final.
                    for dst in 1..hmm.num_state() {
                        match self.best_transition(&last_scores, level, v, dst, hmm) {
                            Some((score, src)) => {
                                cur_starts[level][v][dst] = last_starts[level][v][src];
                                cur_scores.set(level, v, dst, score + state_lprs[dst]);
                            }
                            None => break,
                        }
                    }
                }
                if !any_reachable {
                    // Nothing reachable at any level so far: higher levels
                    // only build on these, stop ascending.
                    break;
                }
            }
            if !any_reachable {
                log::debug!("connected decode exhausted every level at t={}", t);
                reachable = false;
                break;
            }
            last_scores = cur_scores;
            last_starts = cur_starts;
        }
        if !reachable {
            return Ok(Vec::new());
        }

        // Evaluate the exit through every sub-model's end state and rank.
        let mut queue = BinaryHeap::new();
        for (v, hmm) in self.hmms.iter().enumerate() {
            for level in 0..max_models {
                if let Some((score, src)) =
                    self.best_transition(&last_scores, level, v, hmm.num_state(), hmm)
                {
                    queue.push(EndStateItem {
                        score,
                        level,
                        model: v,
                        state: src,
                    });
                }
            }
        }

        let mut results = Vec::new();
        while results.len() < n_best {
            let Some(item) = queue.pop() else {
                break;
            };
            results.push(self.backtrack(&item, &last_starts, &boundary)?);
        }
        Ok(results)
    }

    /// As [`ConnectedHmm::viterbi_decode`], reading the hypothesis cap and
    /// N-best count from a [`crate::config::RecognitionConfig`].
    ///
    /// The config is validated first, so an invalid one surfaces
    /// `ConfigurationError` before any lattice work starts.
    pub fn viterbi_decode_with_config(
        &self,
        seq: &[Vec<f32>],
        config: &crate::config::RecognitionConfig,
    ) -> RecognitionResult<Vec<DecodedSequence>> {
        config.validate()?;
        self.viterbi_decode(seq, config.max_models, config.n_best)
    }

    /// Walk the boundary store from a final (level, model, state) back to
    /// level 0, recovering the sub-model sequence and segment start times.
    fn backtrack(
        &self,
        item: &EndStateItem,
        last_starts: &[Vec<Vec<usize>>],
        boundary: &[Vec<Vec<Option<ModelBoundary>>>],
    ) -> RecognitionResult<DecodedSequence> {
        let count = item.level + 1;
        let mut models = vec![0; count];
        let mut starts = vec![0; count];
        let mut model = item.model;
        let mut start = last_starts[item.level][model][item.state];
        models[item.level] = model;
        starts[item.level] = start;
        for level in (0..item.level).rev() {
            let track = boundary[start][level + 1][model].ok_or_else(|| {
                RecognitionError::NumericalInconsistency {
                    time: start,
                    detail: format!(
                        "missing boundary backpointer into sub-model {} at level {}",
                        model,
                        level + 1
                    ),
                }
            })?;
            model = track.model;
            start = track.start;
            models[level] = model;
            starts[level] = start;
        }
        Ok(DecodedSequence {
            score: item.score,
            models,
            starts,
        })
    }

    /// Fresh start-time table: levels x sub-models x states, zero-filled.
    fn new_start_table(&self, levels: usize) -> Vec<Vec<Vec<usize>>> {
        (0..levels)
            .map(|_| {
                self.hmms
                    .iter()
                    .map(|h| vec![0; h.num_state()])
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
