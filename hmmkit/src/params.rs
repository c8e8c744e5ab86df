//! Model state: the `(initial, transition, emission)` distribution triple.
//!
//! Every [`HmmParams`] value is valid: `initial` sums to one, each transition
//! row sums to one, and every emission row is a distribution. Constructors
//! enforce this and the trainer only replaces a value with another one that
//! passed the same checks.

use hmmkit_core::{check_distribution, log_mask_zero, normalize, renormalize, HmmError, Result, Summarizable};
use rand::Rng;

use crate::emission::{EmissionModel, Multinomial};

/// Tolerance used when checking row sums of caller-supplied parameters.
pub const ROW_SUM_TOL: f64 = 1e-6;

/// Accepted rows further than this from a unit sum are rescaled on the way in.
pub const STORED_SUM_TOL: f64 = 1e-12;

/// Added to the diagonal of a random transition matrix before normalising,
/// so freshly initialised chains favour staying in place.
pub const SELF_TRANSITION_BOOST: f64 = 0.3;

/// Parameters of a hidden Markov model with emission family `E`.
#[derive(Debug, Clone, PartialEq)]
pub struct HmmParams<E = Multinomial> {
    /// `initial[k] = p(z_0 = k)`.
    initial: Vec<f64>,
    /// Row-major `K × K`, `transition[j * K + k] = p(z_t = k | z_{t-1} = j)`.
    transition: Vec<f64>,
    emission: E,
}

impl<E: EmissionModel> HmmParams<E> {
    /// Assemble and validate a parameter triple.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the shapes disagree or any row is
    /// not a probability distribution (tolerance [`ROW_SUM_TOL`]). Accepted
    /// rows are then rescaled so every stored sum is within
    /// [`STORED_SUM_TOL`] of one.
    pub fn new(initial: Vec<f64>, transition: Vec<f64>, emission: E) -> Result<Self> {
        let mut params = Self {
            initial,
            transition,
            emission,
        };
        params.validate()?;
        let k = params.initial.len();
        renormalize(&mut params.initial, STORED_SUM_TOL);
        for row in params.transition.chunks_mut(k) {
            renormalize(row, STORED_SUM_TOL);
        }
        params.emission.renormalize(STORED_SUM_TOL);
        Ok(params)
    }

    /// Re-check every invariant.
    pub fn validate(&self) -> Result<()> {
        let k = self.initial.len();
        if k == 0 {
            return Err(HmmError::Configuration(
                "n_hidden must be > 0".into(),
            ));
        }
        if self.transition.len() != k * k {
            return Err(HmmError::Configuration(format!(
                "transition length {} != n_hidden*n_hidden {}",
                self.transition.len(),
                k * k
            )));
        }
        if self.emission.n_states() != k {
            return Err(HmmError::Configuration(format!(
                "emission has {} states but initial has {k}",
                self.emission.n_states()
            )));
        }
        check_distribution(&self.initial, ROW_SUM_TOL, "initial")?;
        for (j, row) in self.transition.chunks(k).enumerate() {
            check_distribution(row, ROW_SUM_TOL, &format!("transition row {j}"))?;
        }
        self.emission.validate(ROW_SUM_TOL)
    }

    /// Number of hidden states `K`.
    pub fn n_hidden(&self) -> usize {
        self.initial.len()
    }

    /// Initial-state distribution.
    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    /// Row-major `K × K` transition matrix.
    pub fn transition(&self) -> &[f64] {
        &self.transition
    }

    /// Transition distribution out of state `j`.
    pub fn transition_row(&self, j: usize) -> &[f64] {
        let k = self.n_hidden();
        &self.transition[j * k..(j + 1) * k]
    }

    /// Emission parameters.
    pub fn emission(&self) -> &E {
        &self.emission
    }

    /// `ln(initial)` with `ln(0) = -∞`.
    pub fn log_initial(&self) -> Vec<f64> {
        self.initial.iter().map(|&p| log_mask_zero(p)).collect()
    }

    /// `ln(transition)` with `ln(0) = -∞`.
    pub fn log_transition(&self) -> Vec<f64> {
        self.transition.iter().map(|&p| log_mask_zero(p)).collect()
    }

    /// `true` when no parameter is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.initial.iter().chain(&self.transition).all(|p| p.is_finite()) && self.emission.is_finite()
    }
}

impl HmmParams<Multinomial> {
    /// Random parameters for `n_hidden` states over `n_symbols` symbols.
    ///
    /// Transition rows get [`SELF_TRANSITION_BOOST`] on the diagonal before
    /// normalisation.
    pub fn random<R: Rng + ?Sized>(n_hidden: usize, n_symbols: usize, rng: &mut R) -> Result<Self> {
        if n_hidden == 0 {
            return Err(HmmError::Configuration("n_hidden must be > 0".into()));
        }
        if n_symbols == 0 {
            return Err(HmmError::Configuration("n_symbols must be > 0".into()));
        }
        let mut initial: Vec<f64> = (0..n_hidden).map(|_| rng.gen::<f64>()).collect();
        normalize(&mut initial);

        let mut transition: Vec<f64> = (0..n_hidden * n_hidden).map(|_| rng.gen::<f64>()).collect();
        for (j, row) in transition.chunks_mut(n_hidden).enumerate() {
            row[j] += SELF_TRANSITION_BOOST;
            normalize(row);
        }

        let emission = Multinomial::random(n_hidden, n_symbols, rng)?;
        Self::new(initial, transition, emission)
    }

    /// Build from nested rows, the layout used by persisted bundles.
    pub fn from_rows(initial: Vec<f64>, transition: &[Vec<f64>], emission: &[Vec<f64>]) -> Result<Self> {
        let k = initial.len();
        if transition.len() != k || transition.iter().any(|r| r.len() != k) {
            return Err(HmmError::Configuration(format!(
                "transition must be {k} x {k} to match initial"
            )));
        }
        let emission = Multinomial::from_rows(emission)?;
        Self::new(initial, transition.concat(), emission)
    }

    /// Size of the observation alphabet `M`.
    pub fn n_symbols(&self) -> usize {
        self.emission.n_symbols()
    }

    /// Transition matrix as one owned row per state.
    pub fn transition_rows(&self) -> Vec<Vec<f64>> {
        self.transition.chunks(self.n_hidden()).map(<[f64]>::to_vec).collect()
    }
}

impl Summarizable for HmmParams<Multinomial> {
    fn summary(&self) -> String {
        let k = self.n_hidden();
        let stay: Vec<String> = (0..k)
            .map(|j| format!("{:.3}", self.transition[j * k + j]))
            .collect();
        format!(
            "HMM: n_hidden={}, n_symbols={}, self-transition=[{}]",
            k,
            self.n_symbols(),
            stay.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded_rng;

    fn textbook() -> HmmParams {
        HmmParams::from_rows(
            vec![0.6, 0.4],
            &[vec![0.7, 0.3], vec![0.4, 0.6]],
            &[vec![0.9, 0.1], vec![0.2, 0.8]],
        )
        .unwrap()
    }

    #[test]
    fn textbook_is_valid() {
        let p = textbook();
        assert_eq!(p.n_hidden(), 2);
        assert_eq!(p.n_symbols(), 2);
        assert_eq!(p.transition_row(1), &[0.4, 0.6]);
        assert!(p.is_finite());
    }

    #[test]
    fn random_is_row_stochastic() {
        let mut rng = seeded_rng(42);
        let p = HmmParams::random(4, 6, &mut rng).unwrap();
        let s: f64 = p.initial().iter().sum();
        assert!((s - 1.0).abs() < 1e-9);
        for j in 0..4 {
            let s: f64 = p.transition_row(j).iter().sum();
            assert!((s - 1.0).abs() < 1e-9);
        }
        for k in 0..4 {
            let s: f64 = p.emission().row(k).iter().sum();
            assert!((s - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn random_is_reproducible() {
        let a = HmmParams::random(3, 2, &mut seeded_rng(9)).unwrap();
        let b = HmmParams::random(3, 2, &mut seeded_rng(9)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn random_rejects_empty_shapes() {
        let mut rng = seeded_rng(0);
        assert!(HmmParams::random(0, 2, &mut rng).unwrap_err().is_configuration());
        assert!(HmmParams::random(2, 0, &mut rng).unwrap_err().is_configuration());
    }

    #[test]
    fn accepted_rows_are_stored_with_unit_sums() {
        let p = HmmParams::from_rows(
            vec![0.5, 0.5000005],
            &[vec![0.7, 0.3], vec![0.4, 0.6000007]],
            &[vec![0.9, 0.1], vec![0.2000006, 0.8]],
        )
        .unwrap();
        assert!((p.initial().iter().sum::<f64>() - 1.0).abs() < 1e-9);
        for j in 0..2 {
            assert!((p.transition_row(j).iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!((p.emission().row(j).iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        assert_eq!(p.transition_row(0), &[0.7, 0.3]);
        assert_eq!(p.emission().row(0), &[0.9, 0.1]);
    }

    #[test]
    fn invalid_rows_rejected() {
        assert!(HmmParams::from_rows(
            vec![0.3, 0.3],
            &[vec![0.5, 0.5], vec![0.5, 0.5]],
            &[vec![0.5, 0.5], vec![0.5, 0.5]],
        )
        .is_err());
        assert!(HmmParams::from_rows(
            vec![0.5, 0.5],
            &[vec![0.9, 0.2], vec![0.5, 0.5]],
            &[vec![0.5, 0.5], vec![0.5, 0.5]],
        )
        .is_err());
        assert!(HmmParams::from_rows(
            vec![0.5, 0.5],
            &[vec![0.5, 0.5]],
            &[vec![0.5, 0.5], vec![0.5, 0.5]],
        )
        .is_err());
        assert!(HmmParams::from_rows(
            vec![0.5, 0.5],
            &[vec![0.5, 0.5], vec![0.5, 0.5]],
            &[vec![0.5, 0.5]],
        )
        .is_err());
    }

    #[test]
    fn log_views_mask_zero() {
        let p = HmmParams::from_rows(
            vec![1.0, 0.0],
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &[vec![1.0], vec![1.0]],
        )
        .unwrap();
        assert_eq!(p.log_initial(), vec![0.0, f64::NEG_INFINITY]);
        assert_eq!(p.log_transition()[1], f64::NEG_INFINITY);
    }

    #[test]
    fn summary_mentions_shape() {
        let s = textbook().summary();
        assert!(s.contains("n_hidden=2"));
        assert!(s.contains("n_symbols=2"));
        assert!(s.contains("0.700"));
    }
}
