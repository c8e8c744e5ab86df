//! Emission families: per-state observation likelihoods.
//!
//! The forward-backward lattice, the decoders, the trainer and the sampler
//! only talk to emissions through [`EmissionModel`], so a continuous family
//! can be added without touching the dynamic-programming code. The one
//! family shipped here is [`Multinomial`] (discrete symbols).

use hmmkit_core::{check_distribution, log_mask_zero, normalize, renormalize, HmmError, Result};
use rand::Rng;

use crate::random::CategoricalRows;

/// Observation sampler built once from a fixed set of emission parameters.
pub trait EmissionSampler<O> {
    /// Draw one observation from the emission distribution of `state`.
    fn draw<R: Rng + ?Sized>(&self, state: usize, rng: &mut R) -> O;
}

/// Capability every emission family provides.
///
/// Likelihood matrices are row-major `len × n_states`: entry `t * K + k` is
/// `p(obs[t] | state k)`.
pub trait EmissionModel: Clone + std::fmt::Debug + Send + Sync {
    /// One observation.
    type Observation: Copy + Send + Sync + std::fmt::Debug;

    /// Number of hidden states the family is parameterised over.
    fn n_states(&self) -> usize;

    /// Check that every observation is in the support of the family.
    fn check_observations(&self, observations: &[Self::Observation]) -> Result<()>;

    /// Check the parameters themselves (e.g. rows are distributions).
    fn validate(&self, tol: f64) -> Result<()>;

    /// Rescale any distribution whose sum drifted more than `tol` from one.
    ///
    /// Called on parameters that already passed [`validate`](Self::validate).
    fn renormalize(&mut self, tol: f64);

    /// Fill `out` (length `observations.len() * n_states`) with likelihoods.
    fn fill_likelihoods(&self, observations: &[Self::Observation], out: &mut [f64]);

    /// Fill `out` with natural-log likelihoods (`-∞` for zero probability).
    fn fill_log_likelihoods(&self, observations: &[Self::Observation], out: &mut [f64]) {
        self.fill_likelihoods(observations, out);
        for v in out.iter_mut() {
            *v = log_mask_zero(*v);
        }
    }

    /// Per-state sampler used for generation.
    type Sampler: EmissionSampler<Self::Observation> + Send + Sync;

    /// Build the sampler for the current parameters.
    fn sampler(&self) -> Result<Self::Sampler>;

    /// Closed-form re-estimate from one sequence and its posteriors `gamma`
    /// (row-major `len × n_states`).
    ///
    /// A state with zero expected occupancy keeps its current parameters.
    fn reestimate(&self, observations: &[Self::Observation], gamma: &[f64]) -> Self;

    /// Element-wise arithmetic mean of several parameter sets of equal shape.
    fn average(parts: &[Self]) -> Result<Self>;

    /// `true` when every parameter is finite.
    fn is_finite(&self) -> bool;
}

/// Discrete emission distribution: one categorical row per hidden state.
#[derive(Debug, Clone, PartialEq)]
pub struct Multinomial {
    n_states: usize,
    n_symbols: usize,
    /// Row-major `n_states × n_symbols`.
    probs: Vec<f64>,
}

impl Multinomial {
    /// Build from a flat row-major matrix.
    ///
    /// Rows are only shape-checked here; [`EmissionModel::validate`] checks
    /// that they are distributions.
    pub fn new(n_states: usize, n_symbols: usize, probs: Vec<f64>) -> Result<Self> {
        if n_states == 0 || n_symbols == 0 {
            return Err(HmmError::Configuration(format!(
                "emission shape must be at least 1 x 1, got {n_states} x {n_symbols}"
            )));
        }
        if probs.len() != n_states * n_symbols {
            return Err(HmmError::Configuration(format!(
                "emission length {} != n_states*n_symbols {}",
                probs.len(),
                n_states * n_symbols
            )));
        }
        Ok(Self {
            n_states,
            n_symbols,
            probs,
        })
    }

    /// Build from one row per hidden state.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_states = rows.len();
        let n_symbols = rows.first().map_or(0, Vec::len);
        if let Some((k, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_symbols) {
            return Err(HmmError::Configuration(format!(
                "emission row {k} has {} entries, expected {n_symbols}",
                row.len()
            )));
        }
        Self::new(n_states, n_symbols, rows.concat())
    }

    /// Random rows drawn uniformly and normalised.
    pub fn random<R: Rng + ?Sized>(n_states: usize, n_symbols: usize, rng: &mut R) -> Result<Self> {
        let mut probs: Vec<f64> = (0..n_states * n_symbols).map(|_| rng.gen::<f64>()).collect();
        for row in probs.chunks_mut(n_symbols.max(1)) {
            normalize(row);
        }
        Self::new(n_states, n_symbols, probs)
    }

    /// Size of the observation alphabet.
    pub fn n_symbols(&self) -> usize {
        self.n_symbols
    }

    /// Emission distribution of one hidden state.
    pub fn row(&self, state: usize) -> &[f64] {
        &self.probs[state * self.n_symbols..(state + 1) * self.n_symbols]
    }

    /// `p(symbol | state)`.
    pub fn prob(&self, state: usize, symbol: usize) -> f64 {
        self.probs[state * self.n_symbols + symbol]
    }

    /// Flat row-major matrix.
    pub fn as_slice(&self) -> &[f64] {
        &self.probs
    }

    /// One owned row per hidden state.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.probs.chunks(self.n_symbols).map(<[f64]>::to_vec).collect()
    }
}

impl EmissionModel for Multinomial {
    type Observation = usize;

    fn n_states(&self) -> usize {
        self.n_states
    }

    fn check_observations(&self, observations: &[usize]) -> Result<()> {
        match observations.iter().position(|&o| o >= self.n_symbols) {
            Some(position) => Err(HmmError::SymbolOutOfRange {
                position,
                symbol: observations[position],
                n_symbols: self.n_symbols,
            }),
            None => Ok(()),
        }
    }

    fn validate(&self, tol: f64) -> Result<()> {
        for k in 0..self.n_states {
            check_distribution(self.row(k), tol, &format!("emission row {k}"))?;
        }
        Ok(())
    }

    fn renormalize(&mut self, tol: f64) {
        for row in self.probs.chunks_mut(self.n_symbols) {
            renormalize(row, tol);
        }
    }

    // Column lookup: row t of the output is column obs[t] of the matrix.
    fn fill_likelihoods(&self, observations: &[usize], out: &mut [f64]) {
        let k = self.n_states;
        for (frame, &o) in out.chunks_mut(k).zip(observations) {
            for (s, v) in frame.iter_mut().enumerate() {
                *v = self.probs[s * self.n_symbols + o];
            }
        }
    }

    type Sampler = CategoricalRows;

    fn sampler(&self) -> Result<CategoricalRows> {
        CategoricalRows::new(&self.probs, self.n_symbols)
    }

    fn reestimate(&self, observations: &[usize], gamma: &[f64]) -> Self {
        let (k, m) = (self.n_states, self.n_symbols);
        let mut counts = vec![0.0; k * m];
        let mut occupancy = vec![0.0; k];
        for (frame, &o) in gamma.chunks(k).zip(observations) {
            for s in 0..k {
                counts[s * m + o] += frame[s];
                occupancy[s] += frame[s];
            }
        }
        for s in 0..k {
            let row = &mut counts[s * m..(s + 1) * m];
            if occupancy[s] > 0.0 {
                for v in row.iter_mut() {
                    *v /= occupancy[s];
                }
            } else {
                row.copy_from_slice(self.row(s));
            }
        }
        Self {
            n_states: k,
            n_symbols: m,
            probs: counts,
        }
    }

    fn average(parts: &[Self]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| HmmError::Validation("cannot average zero emission estimates".into()))?;
        let mut probs = vec![0.0; first.probs.len()];
        for part in parts {
            if part.n_states != first.n_states || part.n_symbols != first.n_symbols {
                return Err(HmmError::Validation(format!(
                    "emission estimate shape {} x {} != {} x {}",
                    part.n_states, part.n_symbols, first.n_states, first.n_symbols
                )));
            }
            for (acc, &v) in probs.iter_mut().zip(&part.probs) {
                *acc += v;
            }
        }
        let n = parts.len() as f64;
        for v in probs.iter_mut() {
            *v /= n;
        }
        Ok(Self {
            n_states: first.n_states,
            n_symbols: first.n_symbols,
            probs,
        })
    }

    fn is_finite(&self) -> bool {
        self.probs.iter().all(|p| p.is_finite())
    }
}
