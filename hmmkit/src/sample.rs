//! Synthetic sequence generation from fitted parameters.

use hmmkit_core::Result;
use rand::Rng;

use crate::decode::argmax;
use crate::emission::{EmissionModel, EmissionSampler};
use crate::params::HmmParams;
use crate::random::CategoricalRows;

/// Generated observations and the hidden path that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<O> {
    pub observations: Vec<O>,
    pub states: Vec<usize>,
}

/// Draw `n` (state, observation) pairs.
///
/// The first hidden state is the most probable entry of `initial` (lowest
/// index on ties), not a random draw. Later states follow the transition
/// rows and every observation comes from the current state's emission
/// distribution. Both samplers are built once up front. All randomness
/// comes from `rng`.
pub fn sample<E: EmissionModel, R: Rng + ?Sized>(params: &HmmParams<E>, n: usize, rng: &mut R) -> Result<Sample<E::Observation>> {
    let mut observations = Vec::with_capacity(n);
    let mut states = Vec::with_capacity(n);
    if n == 0 {
        return Ok(Sample { observations, states });
    }

    let transitions = CategoricalRows::new(params.transition(), params.n_hidden())?;
    let emissions = params.emission().sampler()?;
    let mut state = argmax(params.initial()).0;
    for t in 0..n {
        if t > 0 {
            state = transitions.draw(state, rng);
        }
        states.push(state);
        observations.push(emissions.draw(state, rng));
    }
    Ok(Sample { observations, states })
}
