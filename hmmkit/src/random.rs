//! Seeded random source handed explicitly to initialisation and sampling.
//!
//! The capability is plain [`rand::Rng`]; nothing in the crate reaches for a
//! thread-local or global generator, so a fixed seed reproduces every draw.

use hmmkit_core::{HmmError, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::emission::EmissionSampler;

/// Build the reproducible generator used for a given seed.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Draw an index from the categorical distribution `probs`.
///
/// # Errors
///
/// Returns an error if `probs` is empty, has a negative or non-finite entry,
/// or sums to zero.
pub fn categorical<R: Rng + ?Sized>(rng: &mut R, probs: &[f64]) -> Result<usize> {
    let dist = weighted(probs)?;
    Ok(dist.sample(rng))
}

fn weighted(probs: &[f64]) -> Result<WeightedIndex<f64>> {
    WeightedIndex::new(probs).map_err(|e| {
        HmmError::Validation(format!(
            "cannot sample from weights {probs:?}: {e}"
        ))
    })
}

/// Pre-built categorical samplers, one per row of a row-major matrix.
///
/// Used for transition rows and multinomial emission rows, both sampled
/// once per generated step.
#[derive(Debug, Clone)]
pub struct CategoricalRows {
    rows: Vec<WeightedIndex<f64>>,
}

impl CategoricalRows {
    /// # Errors
    ///
    /// Returns a validation error if `n_cols` is zero or any row cannot be
    /// sampled from (see [`categorical`]).
    pub fn new(flat: &[f64], n_cols: usize) -> Result<Self> {
        if n_cols == 0 {
            return Err(HmmError::Validation("cannot sample from rows of width 0".into()));
        }
        let rows = flat
            .chunks(n_cols)
            .map(weighted)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Draw a column index from row `row`.
    pub fn draw<R: Rng + ?Sized>(&self, row: usize, rng: &mut R) -> usize {
        self.rows[row].sample(rng)
    }
}

impl EmissionSampler<usize> for CategoricalRows {
    fn draw<R: Rng + ?Sized>(&self, state: usize, rng: &mut R) -> usize {
        CategoricalRows::draw(self, state, rng)
    }
}
