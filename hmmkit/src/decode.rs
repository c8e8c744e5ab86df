//! Hidden-state decoding: Viterbi and MAP.
//!
//! - **Viterbi** finds the single most probable state path, in log space.
//!   Argmax ties resolve to the lowest state index.
//! - **MAP** picks `argmax_k gamma[t, k]` independently at every step. The
//!   resulting path maximises per-step accuracy and may contain transitions
//!   that have zero probability under the model; that is expected.

use std::fmt;
use std::str::FromStr;

use hmmkit_core::{HmmError, Result};

use crate::dataset::Dataset;
use crate::emission::EmissionModel;
use crate::lattice::Lattice;
use crate::params::HmmParams;

/// Decoding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DecodeAlgorithm {
    /// Most probable joint path.
    #[default]
    Viterbi,
    /// Per-step most probable state.
    Map,
}

impl DecodeAlgorithm {
    /// Every accepted name, in the order error messages list them.
    pub const NAMES: &'static [&'static str] = &["viterbi", "map"];

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            DecodeAlgorithm::Viterbi => "viterbi",
            DecodeAlgorithm::Map => "map",
        }
    }
}

impl fmt::Display for DecodeAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DecodeAlgorithm {
    type Err = HmmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "viterbi" => Ok(DecodeAlgorithm::Viterbi),
            "map" => Ok(DecodeAlgorithm::Map),
            _ => Err(HmmError::UnknownAlgorithm {
                name: s.to_string(),
                valid: Self::NAMES,
            }),
        }
    }
}

/// A decoded state path and its log score.
///
/// For Viterbi the score is `ln p(path, X)`; for MAP it is
/// `Σ_t ln max_k gamma[t, k]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Decoded {
    pub log_prob: f64,
    pub states: Vec<usize>,
}

/// Reusable Viterbi buffers: two rolling score rows and a `len × K`
/// backpointer table.
#[derive(Debug, Clone, Default)]
pub struct ViterbiWorkspace {
    log_frames: Vec<f64>,
    prev: Vec<f64>,
    cur: Vec<f64>,
    backptr: Vec<usize>,
}

impl ViterbiWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most probable path for one sequence.
    ///
    /// # Errors
    ///
    /// Empty or out-of-range input, or [`HmmError::Degenerate`] when every
    /// path has probability zero.
    pub fn decode<E: EmissionModel>(&mut self, params: &HmmParams<E>, observations: &[E::Observation]) -> Result<Decoded> {
        if observations.is_empty() {
            return Err(HmmError::EmptySequence { index: 0 });
        }
        let emission = params.emission();
        emission.check_observations(observations)?;
        let k = params.n_hidden();
        let len = observations.len();

        self.log_frames.resize(len * k, 0.0);
        self.backptr.resize(len * k, 0);
        self.prev.resize(k, 0.0);
        self.cur.resize(k, 0.0);
        emission.fill_log_likelihoods(observations, &mut self.log_frames);
        let log_initial = params.log_initial();
        let log_transition = params.log_transition();

        for s in 0..k {
            self.prev[s] = log_initial[s] + self.log_frames[s];
        }
        for t in 1..len {
            for s in 0..k {
                let mut best = f64::NEG_INFINITY;
                let mut arg = 0;
                for j in 0..k {
                    let v = self.prev[j] + log_transition[j * k + s];
                    if v > best {
                        best = v;
                        arg = j;
                    }
                }
                self.cur[s] = best + self.log_frames[t * k + s];
                self.backptr[t * k + s] = arg;
            }
            std::mem::swap(&mut self.prev, &mut self.cur);
        }

        let mut last = 0;
        let mut log_prob = f64::NEG_INFINITY;
        for (s, &v) in self.prev.iter().enumerate() {
            if v > log_prob {
                log_prob = v;
                last = s;
            }
        }
        if log_prob == f64::NEG_INFINITY {
            return Err(HmmError::Degenerate {
                sequence: 0,
                t: len - 1,
                reason: "every hidden path has probability zero".into(),
            });
        }

        let mut states = vec![0; len];
        states[len - 1] = last;
        for t in (1..len).rev() {
            states[t - 1] = self.backptr[t * k + states[t]];
        }
        Ok(Decoded { log_prob, states })
    }
}

/// Viterbi decoding of one sequence.
pub fn viterbi<E: EmissionModel>(params: &HmmParams<E>, observations: &[E::Observation]) -> Result<Decoded> {
    ViterbiWorkspace::new().decode(params, observations)
}

/// MAP decoding of one sequence, reusing `lattice`.
pub fn map_with<E: EmissionModel>(
    lattice: &mut Lattice,
    params: &HmmParams<E>,
    observations: &[E::Observation],
) -> Result<Decoded> {
    lattice.run(params, observations)?;
    let k = params.n_hidden();
    let mut log_prob = 0.0;
    let states = lattice
        .gamma()
        .chunks(k)
        .map(|row| {
            let (arg, best) = argmax(row);
            log_prob += best.ln();
            arg
        })
        .collect();
    Ok(Decoded { log_prob, states })
}

/// MAP decoding of one sequence.
pub fn map<E: EmissionModel>(params: &HmmParams<E>, observations: &[E::Observation]) -> Result<Decoded> {
    map_with(&mut Lattice::new(params.n_hidden()), params, observations)
}

/// Decode every sequence of `dataset` independently and concatenate.
///
/// The returned `log_prob` is the sum over sequences.
pub fn decode<E: EmissionModel>(
    params: &HmmParams<E>,
    dataset: &Dataset<'_, E::Observation>,
    algorithm: DecodeAlgorithm,
) -> Result<Decoded> {
    let parts = match algorithm {
        DecodeAlgorithm::Viterbi => {
            dataset.map_sequences(ViterbiWorkspace::new, |ws, seq| ws.decode(params, seq))?
        }
        DecodeAlgorithm::Map => dataset.map_sequences(
            || Lattice::new(params.n_hidden()),
            |lattice, seq| map_with(lattice, params, seq),
        )?,
    };
    let mut states = Vec::with_capacity(dataset.n_samples());
    let mut log_prob = 0.0;
    for part in parts {
        log_prob += part.log_prob;
        states.extend(part.states);
    }
    Ok(Decoded { log_prob, states })
}

/// Index and value of the largest entry; ties go to the lowest index.
pub(crate) fn argmax(xs: &[f64]) -> (usize, f64) {
    let mut arg = 0;
    let mut best = f64::NEG_INFINITY;
    for (i, &v) in xs.iter().enumerate() {
        if v > best {
            best = v;
            arg = i;
        }
    }
    (arg, best)
}
