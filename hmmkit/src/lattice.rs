//! Scaled forward-backward recursions over one observation sequence.
//!
//! A [`Lattice`] owns fixed-size, time-indexed buffers (`len × K`) for the
//! likelihood frames, `alpha`, `beta` and `gamma`, plus the per-step scaling
//! constants `c[t]`. Buffers are resized, never grown element by element, so
//! a lattice reused across sequences of similar length does not allocate.
//!
//! With the shared scaling constants, `alpha[t] ⊙ beta[t]` is already the
//! posterior `gamma[t]` and `Σ_t ln c[t]` is the sequence log-likelihood.
//!
//! [`log_forward`] is the log-domain variant used when even scaled
//! probabilities could underflow.

use hmmkit_core::{log_sum_exp, HmmError, Result};

use crate::emission::EmissionModel;
use crate::params::HmmParams;

/// Forward-backward workspace for one sequence at a time.
#[derive(Debug, Clone, Default)]
pub struct Lattice {
    n_states: usize,
    len: usize,
    /// `frames[t * K + k] = p(obs[t] | k)`.
    frames: Vec<f64>,
    alpha: Vec<f64>,
    beta: Vec<f64>,
    gamma: Vec<f64>,
    scale: Vec<f64>,
}

impl Lattice {
    /// Empty lattice for `n_states` hidden states.
    pub fn new(n_states: usize) -> Self {
        Self {
            n_states,
            ..Self::default()
        }
    }

    fn check_loaded(&self) -> Result<()> {
        if self.len == 0 {
            return Err(HmmError::Validation("no sequence loaded in the lattice".into()));
        }
        Ok(())
    }

    fn check_transition(&self, transition: &[f64]) -> Result<()> {
        let k = self.n_states;
        if transition.len() != k * k {
            return Err(HmmError::Validation(format!(
                "transition has {} entries, expected {k} x {k} = {}",
                transition.len(),
                k * k
            )));
        }
        Ok(())
    }

    fn reset(&mut self, n_states: usize, len: usize) {
        self.n_states = n_states;
        self.len = len;
        let cells = n_states * len;
        self.frames.resize(cells, 0.0);
        self.alpha.resize(cells, 0.0);
        self.beta.resize(cells, 0.0);
        self.gamma.resize(cells, 0.0);
        self.scale.resize(len, 0.0);
    }

    /// Fill the likelihood frames for `observations`.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty sequence or out-of-support observations.
    pub fn load<E: EmissionModel>(&mut self, emission: &E, observations: &[E::Observation]) -> Result<()> {
        if observations.is_empty() {
            return Err(HmmError::EmptySequence { index: 0 });
        }
        emission.check_observations(observations)?;
        self.reset(emission.n_states(), observations.len());
        emission.fill_likelihoods(observations, &mut self.frames);
        Ok(())
    }

    /// Load, then run the scaled forward pass. Returns `ln p(X)`.
    pub fn score<E: EmissionModel>(&mut self, params: &HmmParams<E>, observations: &[E::Observation]) -> Result<f64> {
        self.load(params.emission(), observations)?;
        self.forward(params.initial(), params.transition())
    }

    /// Load, then run forward, backward and posteriors. Returns `ln p(X)`.
    pub fn run<E: EmissionModel>(&mut self, params: &HmmParams<E>, observations: &[E::Observation]) -> Result<f64> {
        let ll = self.score(params, observations)?;
        self.backward(params.transition())?;
        self.posteriors();
        Ok(ll)
    }

    /// Scaled forward pass over the loaded frames. Returns `Σ_t ln c[t]`.
    ///
    /// # Errors
    ///
    /// [`HmmError::Validation`] if nothing is loaded or the parameter shapes
    /// do not match the lattice. [`HmmError::Degenerate`] if some `c[t]` is
    /// zero or not finite, i.e. the observation is impossible under the
    /// current parameters.
    pub fn forward(&mut self, initial: &[f64], transition: &[f64]) -> Result<f64> {
        let k = self.n_states;
        self.check_loaded()?;
        self.check_transition(transition)?;
        if initial.len() != k {
            return Err(HmmError::Validation(format!(
                "initial has {} entries, expected {k}",
                initial.len()
            )));
        }
        let mut log_likelihood = 0.0;
        for t in 0..self.len {
            let (done, rest) = self.alpha.split_at_mut(t * k);
            let cur = &mut rest[..k];
            let frame = &self.frames[t * k..(t + 1) * k];
            if t == 0 {
                for s in 0..k {
                    cur[s] = initial[s] * frame[s];
                }
            } else {
                let prev = &done[(t - 1) * k..];
                for s in 0..k {
                    let mut acc = 0.0;
                    for j in 0..k {
                        acc += prev[j] * transition[j * k + s];
                    }
                    cur[s] = frame[s] * acc;
                }
            }
            let c: f64 = cur.iter().sum();
            if !(c.is_finite() && c > 0.0) {
                return Err(HmmError::Degenerate {
                    sequence: 0,
                    t,
                    reason: format!("forward scaling constant c[t] = {c}, observation has zero probability"),
                });
            }
            for v in cur.iter_mut() {
                *v /= c;
            }
            self.scale[t] = c;
            log_likelihood += c.ln();
        }
        Ok(log_likelihood)
    }

    /// Scaled backward pass, reusing the forward scaling constants.
    ///
    /// Must follow a successful [`forward`](Self::forward).
    ///
    /// # Errors
    ///
    /// [`HmmError::Validation`] if nothing is loaded or `transition` is not
    /// `K × K`.
    pub fn backward(&mut self, transition: &[f64]) -> Result<()> {
        let k = self.n_states;
        self.check_loaded()?;
        self.check_transition(transition)?;
        let last = self.len - 1;
        self.beta[last * k..].fill(1.0);
        for t in (0..last).rev() {
            let (head, tail) = self.beta.split_at_mut((t + 1) * k);
            let cur = &mut head[t * k..];
            let next = &tail[..k];
            let frame = &self.frames[(t + 1) * k..(t + 2) * k];
            let c = self.scale[t + 1];
            for j in 0..k {
                let mut acc = 0.0;
                for s in 0..k {
                    acc += transition[j * k + s] * frame[s] * next[s];
                }
                cur[j] = acc / c;
            }
        }
        Ok(())
    }

    /// `gamma = alpha ⊙ beta`.
    fn posteriors(&mut self) {
        for ((g, a), b) in self.gamma.iter_mut().zip(&self.alpha).zip(&self.beta) {
            *g = a * b;
        }
    }

    /// Number of time steps currently loaded.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` before anything has been loaded.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of hidden states.
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Likelihood frames, row-major `len × K`.
    pub fn frames(&self) -> &[f64] {
        &self.frames[..self.len * self.n_states]
    }

    /// Normalised forward variables, row-major `len × K`.
    pub fn alpha(&self) -> &[f64] {
        &self.alpha[..self.len * self.n_states]
    }

    /// Scaled backward variables, row-major `len × K`.
    pub fn beta(&self) -> &[f64] {
        &self.beta[..self.len * self.n_states]
    }

    /// Posteriors `p(z_t = k | X)`, row-major `len × K`.
    pub fn gamma(&self) -> &[f64] {
        &self.gamma[..self.len * self.n_states]
    }

    /// Scaling constants `c[t]`.
    pub fn scale(&self) -> &[f64] {
        &self.scale[..self.len]
    }

    /// `Σ_t ln c[t]` of the last forward pass.
    pub fn log_likelihood(&self) -> f64 {
        self.scale().iter().map(|c| c.ln()).sum()
    }

    /// Pairwise posterior of the transition `j → k` at step `t`
    /// (`0 ≤ t < len - 1`).
    #[inline]
    fn xi_at(&self, transition: &[f64], t: usize, j: usize, k: usize) -> f64 {
        let n = self.n_states;
        let c = self.scale[t + 1];
        self.alpha[t * n + j] * transition[j * n + k] * self.frames[(t + 1) * n + k] * self.beta[(t + 1) * n + k] / c
    }

    /// Full pairwise posteriors, row-major `(len - 1) × K × K`.
    pub fn xi(&self, transition: &[f64]) -> Result<Vec<f64>> {
        self.check_transition(transition)?;
        let n = self.n_states;
        let steps = self.len.saturating_sub(1);
        let mut out = vec![0.0; steps * n * n];
        for t in 0..steps {
            for j in 0..n {
                for k in 0..n {
                    out[(t * n + j) * n + k] = self.xi_at(transition, t, j, k);
                }
            }
        }
        Ok(out)
    }

    /// `Σ_t xi[t]`, the expected transition counts (`K × K`), added into `out`.
    pub fn accumulate_xi(&self, transition: &[f64], out: &mut [f64]) -> Result<()> {
        self.check_transition(transition)?;
        let n = self.n_states;
        if out.len() != n * n {
            return Err(HmmError::Validation(format!(
                "count buffer has {} entries, expected {n} x {n} = {}",
                out.len(),
                n * n
            )));
        }
        for t in 0..self.len.saturating_sub(1) {
            for j in 0..n {
                for k in 0..n {
                    out[j * n + k] += self.xi_at(transition, t, j, k);
                }
            }
        }
        Ok(())
    }
}

/// Log-domain forward pass (sum-product with log-sum-exp).
///
/// `log_frames` is row-major `len × K`. Returns the log forward variables
/// (same layout) and `ln p(X)`.
///
/// # Errors
///
/// [`HmmError::Degenerate`] when `ln p(X) = -∞`; [`HmmError::EmptySequence`]
/// for an empty sequence; [`HmmError::Validation`] when `log_transition` is
/// not `K × K` or `log_frames` is not a whole number of `K`-wide rows.
pub fn log_forward(log_initial: &[f64], log_transition: &[f64], log_frames: &[f64]) -> Result<(Vec<f64>, f64)> {
    let k = log_initial.len();
    if k == 0 || log_frames.is_empty() {
        return Err(HmmError::EmptySequence { index: 0 });
    }
    if log_transition.len() != k * k {
        return Err(HmmError::Validation(format!(
            "log transition has {} entries, expected {k} x {k} = {}",
            log_transition.len(),
            k * k
        )));
    }
    if log_frames.len() % k != 0 {
        return Err(HmmError::Validation(format!(
            "{} log likelihoods do not split into rows of {k}",
            log_frames.len()
        )));
    }
    let len = log_frames.len() / k;
    let mut log_alpha = vec![f64::NEG_INFINITY; len * k];
    for s in 0..k {
        log_alpha[s] = log_initial[s] + log_frames[s];
    }
    let mut work = vec![0.0; k];
    for t in 1..len {
        let (done, rest) = log_alpha.split_at_mut(t * k);
        let prev = &done[(t - 1) * k..];
        for s in 0..k {
            for j in 0..k {
                work[j] = prev[j] + log_transition[j * k + s];
            }
            rest[s] = log_sum_exp(&work) + log_frames[t * k + s];
        }
    }
    let ll = log_sum_exp(&log_alpha[(len - 1) * k..]);
    if ll == f64::NEG_INFINITY || ll.is_nan() {
        let t = (0..len)
            .find(|&t| log_alpha[t * k..(t + 1) * k].iter().all(|&v| v == f64::NEG_INFINITY))
            .unwrap_or(len - 1);
        return Err(HmmError::Degenerate {
            sequence: 0,
            t,
            reason: format!("log forward probability is {ll}, observation has zero probability"),
        });
    }
    Ok((log_alpha, ll))
}

/// Log-domain log-likelihood of one sequence under `params`.
pub fn log_likelihood_log_domain<E: EmissionModel>(params: &HmmParams<E>, observations: &[E::Observation]) -> Result<f64> {
    if observations.is_empty() {
        return Err(HmmError::EmptySequence { index: 0 });
    }
    let emission = params.emission();
    emission.check_observations(observations)?;
    let mut log_frames = vec![0.0; observations.len() * params.n_hidden()];
    emission.fill_log_likelihoods(observations, &mut log_frames);
    let (_, ll) = log_forward(&params.log_initial(), &params.log_transition(), &log_frames)?;
    Ok(ll)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textbook() -> HmmParams {
        HmmParams::from_rows(
            vec![0.6, 0.4],
            &[vec![0.7, 0.3], vec![0.4, 0.6]],
            &[vec![0.9, 0.1], vec![0.2, 0.8]],
        )
        .unwrap()
    }

    /// Brute-force `p(X)` by summing over every hidden path.
    fn brute_force(p: &HmmParams, obs: &[usize]) -> f64 {
        let k = p.n_hidden();
        let n = obs.len();
        let mut total = 0.0;
        for code in 0..k.pow(n as u32) {
            let mut path = vec![0; n];
            let mut c = code;
            for z in path.iter_mut() {
                *z = c % k;
                c /= k;
            }
            let mut prob = p.initial()[path[0]] * p.emission().prob(path[0], obs[0]);
            for t in 1..n {
                prob *= p.transition_row(path[t - 1])[path[t]] * p.emission().prob(path[t], obs[t]);
            }
            total += prob;
        }
        total
    }

    #[test]
    fn textbook_likelihood_by_hand() {
        // alpha_0 = [0.54, 0.08], c0 = 0.62
        // alpha_1 (unscaled) = [0.9*(0.54*0.7+0.08*0.4), 0.2*(0.54*0.3+0.08*0.6)]
        //                    = [0.369, 0.042], c1·c0 = 0.411
        // alpha_2 = [0.1*(0.369*0.7+0.042*0.4), 0.8*(0.369*0.3+0.042*0.6)]
        //         = [0.02751, 0.10872], p(X) = 0.13623
        let p = textbook();
        let mut lat = Lattice::new(2);
        let ll = lat.run(&p, &[0, 0, 1]).unwrap();
        assert!((ll - 0.13623_f64.ln()).abs() < 1e-12, "ll = {ll}");
        assert!((lat.scale()[0] - 0.62).abs() < 1e-12);
        assert!((ll - brute_force(&p, &[0, 0, 1]).ln()).abs() < 1e-12);
        assert!((lat.log_likelihood() - ll).abs() < 1e-12);
    }

    #[test]
    fn matches_brute_force() {
        let p = textbook();
        let obs = [1, 0, 1, 1, 0, 0, 1];
        let mut lat = Lattice::new(2);
        let ll = lat.score(&p, &obs).unwrap();
        assert!((ll - brute_force(&p, &obs).ln()).abs() < 1e-10);
    }

    #[test]
    fn gamma_rows_sum_to_one() {
        let p = textbook();
        let mut lat = Lattice::new(2);
        lat.run(&p, &[0, 1, 1, 0, 1, 0, 0, 0]).unwrap();
        for row in lat.gamma().chunks(2) {
            let s: f64 = row.iter().sum();
            assert!((s - 1.0).abs() < 1e-12, "row sum {s}");
        }
    }

    #[test]
    fn xi_marginalises_to_gamma() {
        let p = textbook();
        let obs = [0, 1, 1, 0];
        let mut lat = Lattice::new(2);
        lat.run(&p, &obs).unwrap();
        let xi = lat.xi(p.transition()).unwrap();
        assert_eq!(xi.len(), 3 * 4);
        for t in 0..3 {
            let block = &xi[t * 4..(t + 1) * 4];
            let total: f64 = block.iter().sum();
            assert!((total - 1.0).abs() < 1e-12);
            for j in 0..2 {
                let row: f64 = block[j * 2..(j + 1) * 2].iter().sum();
                assert!((row - lat.gamma()[t * 2 + j]).abs() < 1e-12);
            }
            for k in 0..2 {
                let col = block[k] + block[2 + k];
                assert!((col - lat.gamma()[(t + 1) * 2 + k]).abs() < 1e-12);
            }
        }
        let mut summed = vec![0.0; 4];
        lat.accumulate_xi(p.transition(), &mut summed).unwrap();
        for c in 0..4 {
            let by_hand: f64 = (0..3).map(|t| xi[t * 4 + c]).sum();
            assert!((summed[c] - by_hand).abs() < 1e-12);
        }
    }

    #[test]
    fn log_forward_agrees_with_scaled() {
        let p = textbook();
        let obs = [0, 0, 1, 1, 1, 0, 1, 0, 0, 1];
        let mut lat = Lattice::new(2);
        let scaled = lat.score(&p, &obs).unwrap();
        let logd = log_likelihood_log_domain(&p, &obs).unwrap();
        assert!((scaled - logd).abs() < 1e-10);
    }

    #[test]
    fn long_sequence_does_not_underflow() {
        let p = textbook();
        let obs: Vec<usize> = (0..20_000).map(|i| (i / 3) % 2).collect();
        let mut lat = Lattice::new(2);
        let ll = lat.run(&p, &obs).unwrap();
        assert!(ll.is_finite());
        assert!(ll < -1000.0);
        let logd = log_likelihood_log_domain(&p, &obs).unwrap();
        assert!((ll - logd).abs() < 1e-6 * ll.abs().max(1.0));
    }

    #[test]
    fn impossible_observation_is_degenerate() {
        let p = HmmParams::from_rows(
            vec![1.0, 0.0],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        let mut lat = Lattice::new(2);
        match lat.score(&p, &[0, 0, 1]) {
            Err(HmmError::Degenerate { t, .. }) => assert_eq!(t, 2),
            other => panic!("unexpected {other:?}"),
        }
        match log_likelihood_log_domain(&p, &[0, 1]) {
            Err(HmmError::Degenerate { t, .. }) => assert_eq!(t, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_and_out_of_range() {
        let p = textbook();
        let mut lat = Lattice::new(2);
        assert!(matches!(lat.score(&p, &[]), Err(HmmError::EmptySequence { .. })));
        assert!(matches!(
            lat.score(&p, &[0, 2]),
            Err(HmmError::SymbolOutOfRange { position: 1, .. })
        ));
        assert!(log_likelihood_log_domain(&p, &[]).is_err());
    }

    #[test]
    fn mismatched_shapes_are_errors() {
        let p = textbook();
        let mut lat = Lattice::new(2);
        assert!(lat.backward(p.transition()).unwrap_err().is_validation());
        assert!(lat.forward(p.initial(), p.transition()).unwrap_err().is_validation());

        lat.load(p.emission(), &[0, 1, 1]).unwrap();
        assert!(lat.forward(&[1.0], p.transition()).unwrap_err().is_validation());
        assert!(lat.forward(p.initial(), &[1.0]).unwrap_err().is_validation());
        lat.forward(p.initial(), p.transition()).unwrap();
        assert!(lat.backward(&[0.5, 0.5]).unwrap_err().is_validation());
        assert!(lat.xi(&[1.0]).unwrap_err().is_validation());
        assert!(lat.accumulate_xi(p.transition(), &mut [0.0; 3]).unwrap_err().is_validation());

        let frames = [0.0; 4];
        assert!(log_forward(&[0.0, 0.0], &[0.0], &frames).unwrap_err().is_validation());
        assert!(log_forward(&[0.0, 0.0], &[0.0; 4], &[0.0; 3]).unwrap_err().is_validation());
    }

    #[test]
    fn reuse_across_lengths() {
        let p = textbook();
        let mut lat = Lattice::new(2);
        lat.run(&p, &[0, 1, 0, 1, 0, 1]).unwrap();
        let ll = lat.run(&p, &[0, 0, 1]).unwrap();
        assert_eq!(lat.len(), 3);
        assert_eq!(lat.gamma().len(), 6);
        assert!((ll - 0.13623_f64.ln()).abs() < 1e-12);
    }
}
